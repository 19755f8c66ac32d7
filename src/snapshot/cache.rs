use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::Snapshot;

/// Sequence for temp file names; every write in this process gets its own.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Why a cached snapshot could not be served.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cache contents unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("cache expired at {expire_at}")]
    Expired { expire_at: i64 },
}

/// On-disk layout: the snapshot fields plus `expire_at` (epoch seconds).
#[derive(Serialize, Deserialize)]
struct CacheEntry<S> {
    #[serde(flatten)]
    snapshot: S,
    expire_at: i64,
}

/// Single-slot snapshot cache backed by one JSON file.
///
/// Expiry is checked when reading; nothing sweeps the file in the background.
/// Writes go to a sibling temp file that is renamed over the target, so a
/// reader sees either the old entry or the new one.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached snapshot, or `None` when missing, unreadable or expired.
    pub async fn read(&self) -> Option<Snapshot> {
        self.read_at(Utc::now().timestamp()).await
    }

    pub(crate) async fn read_at(&self, now: i64) -> Option<Snapshot> {
        match self.load(now).await {
            Ok(snapshot) => Some(snapshot),
            Err(CacheError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(cache = %self.path.display(), "cache: not found");
                None
            }
            Err(e) => {
                debug!(cache = %self.path.display(), reason = %e, "cache: miss");
                None
            }
        }
    }

    async fn load(&self, now: i64) -> Result<Snapshot, CacheError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let entry: CacheEntry<Snapshot> = serde_json::from_slice(&bytes)?;
        if entry.expire_at <= now {
            return Err(CacheError::Expired {
                expire_at: entry.expire_at,
            });
        }
        Ok(entry.snapshot)
    }

    /// Replace the cached entry.
    pub async fn write(&self, snapshot: &Snapshot, expire_at: i64) -> Result<(), CacheError> {
        let entry = CacheEntry { snapshot, expire_at };
        let body = serde_json::to_vec(&entry)?;

        let tmp = self.temp_path();

        tokio::fs::write(&tmp, &body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(cache = %self.path.display(), expire_at, "cache: snapshot written");
        Ok(())
    }

    /// `<path>.<pid>.<seq>.tmp`, unique per write.
    fn temp_path(&self) -> PathBuf {
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.{seq}.tmp", std::process::id()));
        PathBuf::from(tmp)
    }
}
