use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use super::{MetricFamily, MetricKind, SeriesValue};
use crate::config::{MetricToggles, ScrapeSettings};
use crate::error::{ExporterError, Result};
use crate::sentry::{Issue, SentryClient};
use crate::snapshot::{AgeBucket, Snapshot, SnapshotBuilder, SnapshotCache};

// ─── Family definitions ──────────────────────────────────────────

const ISSUES_NAME: &str = "sentry_issues";
const ISSUES_HELP: &str = "Number of open issues (aka is:unresolved) per project";
const ISSUES_LABELS: &[&str] = &["project_slug", "environment"];

const OPEN_ISSUE_NAME: &str = "sentry_open_issue_events";
const OPEN_ISSUE_HELP: &str = "Number of open issues (aka is:unresolved) per project";
const OPEN_ISSUE_LABELS: &[&str] = &[
    "issue_id",
    "logger",
    "level",
    "status",
    "platform",
    "project_slug",
    "environment",
    "release",
    "isUnhandled",
    "firstSeen",
    "lastSeen",
];

const EVENTS_NAME: &str = "sentry_events";
const EVENTS_HELP: &str = "Total events counts per project";
const EVENTS_LABELS: &[&str] = &["project_slug", "stat"];

/// Upstream timestamp layout.
const SEEN_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
/// Layout of the `firstSeen` / `lastSeen` labels.
const LABEL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Label value used for absent fields.
const NONE: &str = "None";

// ─── Collector ───────────────────────────────────────────────────

/// Renders one scrape worth of metric families.
///
/// Built per request and dropped afterwards; nothing is registered globally.
/// The snapshot comes from the cache when fresh and is rebuilt otherwise.
pub struct SentryCollector<'a> {
    client: &'a SentryClient,
    settings: &'a ScrapeSettings,
    cache: &'a SnapshotCache,
}

impl<'a> SentryCollector<'a> {
    pub fn new(
        client: &'a SentryClient,
        settings: &'a ScrapeSettings,
        cache: &'a SnapshotCache,
    ) -> Self {
        Self {
            client,
            settings,
            cache,
        }
    }

    /// Cached snapshot, or a fresh build on miss.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        if let Some(snapshot) = self.cache.read().await {
            debug!(cache = %self.cache.path().display(), "cache: serving snapshot");
            return Ok(snapshot);
        }
        debug!("cache: rebuilding from API");
        SnapshotBuilder::new(self.client, self.settings, self.cache).build().await
    }

    /// Append every enabled family to `out`.
    ///
    /// Families are appended as they complete. On error the families already
    /// in `out` stay valid and the failing family is left out entirely.
    pub async fn collect(&self, out: &mut Vec<MetricFamily>) -> Result<()> {
        let snapshot = self.snapshot().await?;
        self.collect_from(&snapshot, Utc::now(), out).await
    }

    pub(crate) async fn collect_from(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
        out: &mut Vec<MetricFamily>,
    ) -> Result<()> {
        let toggles = self.settings.toggles;

        if toggles.issues {
            info!("collector: loading projects issues");
            out.push(issue_histogram(snapshot, &toggles));
            out.push(self.open_issue_gauge(snapshot, now).await?);
        }
        if toggles.events {
            out.push(self.project_events(snapshot).await?);
        }
        Ok(())
    }

    /// One series per issue in the 1h bucket; the release is looked up live.
    async fn open_issue_gauge(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<MetricFamily> {
        let mut family = MetricFamily::new(
            OPEN_ISSUE_NAME,
            OPEN_ISSUE_HELP,
            MetricKind::Gauge,
            OPEN_ISSUE_LABELS,
        );

        for project in &snapshot.metadata.projects {
            for env in snapshot.environments(&project.slug) {
                for issue in snapshot.issues(&project.slug, env, AgeBucket::OneHour) {
                    let release = self.client.get_issue_release(&issue.id, Some(env)).await?;
                    let labels = issue_labels(issue, env, release.as_deref(), now)?;
                    family.add(labels, SeriesValue::Scalar(issue.event_count() as f64));
                }
            }
        }
        Ok(family)
    }

    async fn project_events(&self, snapshot: &Snapshot) -> Result<MetricFamily> {
        let mut family =
            MetricFamily::new(EVENTS_NAME, EVENTS_HELP, MetricKind::Counter, EVENTS_LABELS);
        let org = &snapshot.metadata.org.slug;

        for project in &snapshot.metadata.projects {
            for (stat, total) in self.client.get_project_stats(org, &project.slug).await? {
                family.add(
                    vec![project.slug.clone(), stat.as_str().to_owned()],
                    SeriesValue::Scalar(total as f64),
                );
            }
        }
        Ok(family)
    }
}

// ─── Pure transforms ─────────────────────────────────────────────

/// Event counts per project and environment, bucketed by issue age.
///
/// Exposed buckets follow the toggles (`14d` is exposed as `+Inf`), while the
/// sum covers every bucket present in the snapshot.
pub fn issue_histogram(snapshot: &Snapshot, toggles: &MetricToggles) -> MetricFamily {
    let mut family = MetricFamily::new(
        ISSUES_NAME,
        ISSUES_HELP,
        MetricKind::GaugeHistogram,
        ISSUES_LABELS,
    );

    for project in &snapshot.metadata.projects {
        for env in snapshot.environments(&project.slug) {
            debug!(project = %project.slug, env = %env, "collector: loading issues");

            let events = |bucket: AgeBucket| -> u64 {
                snapshot
                    .issues(&project.slug, env, bucket)
                    .iter()
                    .map(Issue::event_count)
                    .sum()
            };
            let (events_1h, events_24h, events_14d) = (
                events(AgeBucket::OneHour),
                events(AgeBucket::OneDay),
                events(AgeBucket::TwoWeeks),
            );

            let mut buckets = Vec::with_capacity(3);
            if toggles.bucket_1h {
                buckets.push(("1h".to_owned(), events_1h as f64));
            }
            if toggles.bucket_24h {
                buckets.push(("24h".to_owned(), events_24h as f64));
            }
            if toggles.bucket_14d {
                buckets.push(("+Inf".to_owned(), events_14d as f64));
            }

            family.add(
                vec![project.slug.clone(), env.clone()],
                SeriesValue::Histogram {
                    buckets,
                    sum: (events_1h + events_24h + events_14d) as f64,
                },
            );
        }
    }
    family
}

fn issue_labels(
    issue: &Issue,
    env: &str,
    release: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| NONE.to_owned());
    let unhandled = match issue.is_unhandled {
        Some(true) => "True",
        Some(false) => "False",
        None => NONE,
    };

    Ok(vec![
        issue.id.clone(),
        text(&issue.logger),
        text(&issue.level),
        text(&issue.status),
        text(&issue.platform),
        issue.project.slug.clone(),
        env.to_owned(),
        release.unwrap_or(NONE).to_owned(),
        unhandled.to_owned(),
        label_date(issue.first_seen.as_deref(), now)?,
        label_date(issue.last_seen.as_deref(), now)?,
    ])
}

/// Fill in `now` for a missing first/last-seen timestamp.
///
/// Recent issues may come back without one; they render with today's date.
pub fn seen_or_now(value: Option<&str>, now: DateTime<Utc>) -> String {
    match value {
        Some(v) => v.to_owned(),
        None => now.format(SEEN_FORMAT).to_string(),
    }
}

/// Reduce an upstream timestamp to its `YYYY-MM-DD` label form.
pub fn label_date(value: Option<&str>, now: DateTime<Utc>) -> Result<String> {
    let raw = seen_or_now(value, now);
    let parsed = NaiveDateTime::parse_from_str(&raw, SEEN_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.naive_utc()))
        .map_err(|e| ExporterError::type_mismatch("issue timestamp", format!("{raw:?}: {e}")))?;
    Ok(parsed.format(LABEL_DATE_FORMAT).to_string())
}
