use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ─── Organization / project ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub slug: String,
    pub name: Option<String>,
    /// Status id, e.g. `active`. The API sends an object here, the cache a string.
    #[serde(default, deserialize_with = "status_id")]
    pub status: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "status_id")]
    pub status: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnvironmentRecord {
    pub name: String,
}

// ─── Issues ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueProject {
    pub slug: String,
}

/// One open issue as returned by the project issues endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub logger: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    pub project: IssueProject,
    #[serde(default)]
    pub is_unhandled: Option<bool>,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
    /// Event count. Sent as a decimal string upstream.
    #[serde(default, deserialize_with = "lenient_count")]
    pub count: Option<u64>,
}

impl Issue {
    pub fn event_count(&self) -> u64 {
        self.count.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CurrentReleaseEnvelope {
    #[serde(default)]
    pub current_release: Option<CurrentRelease>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentRelease {
    pub release: ReleaseRecord,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseRecord {
    pub version: String,
}

// ─── Project stats ───────────────────────────────────────────────

/// Event stat names summed by the events counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventStat {
    Received,
    Rejected,
    Blacklisted,
}

impl EventStat {
    pub const ALL: [EventStat; 3] = [Self::Received, Self::Rejected, Self::Blacklisted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Rejected => "rejected",
            Self::Blacklisted => "blacklisted",
        }
    }
}

/// Sum the count column of a `[[timestamp, count], ...]` series.
/// Rows without a numeric count are skipped.
pub(crate) fn sum_stat_series(rows: &[Value]) -> u64 {
    rows.iter()
        .filter_map(|row| row.as_array())
        .filter_map(|row| row.get(1))
        .filter_map(|count| count.as_u64().or_else(|| count.as_f64().map(|f| f.max(0.0) as u64)))
        .sum()
}

// ─── Lenient field decoders ──────────────────────────────────────

fn status_id<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(de)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(map)) => map.get("id").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    })
}

fn lenient_count<'de, D>(de: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(de)?;
    Ok(match value {
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    })
}
