pub mod builder;
pub mod cache;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sentry::{Issue, Organization, Project};

pub use builder::SnapshotBuilder;
pub use cache::SnapshotCache;

/// Lookback window for an open-issue query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "14d")]
    TwoWeeks,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 3] = [Self::OneHour, Self::OneDay, Self::TwoWeeks];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::TwoWeeks => "14d",
        }
    }
}

/// Issues of one environment, keyed by the bucket they were fetched for.
/// Buckets that were not fetched are absent.
pub type BucketIssues = BTreeMap<AgeBucket, Vec<Issue>>;

/// Organization and project metadata of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub org: Organization,
    pub projects: Vec<Project>,
    pub projects_slug: Vec<String>,
    /// Environment names per project slug, in API order.
    pub projects_envs: BTreeMap<String, Vec<String>>,
}

/// Everything one build cycle learned from the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: Metadata,
    /// project slug → environment → bucket → issues
    #[serde(default)]
    pub projects_data: BTreeMap<String, BTreeMap<String, BucketIssues>>,
}

impl Snapshot {
    pub fn environments(&self, project_slug: &str) -> &[String] {
        self.metadata
            .projects_envs
            .get(project_slug)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn issues(&self, project_slug: &str, environment: &str, bucket: AgeBucket) -> &[Issue] {
        self.projects_data
            .get(project_slug)
            .and_then(|envs| envs.get(environment))
            .and_then(|buckets| buckets.get(&bucket))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every project under `projects_data` is a known project and every
    /// environment under it is one of that project's environments.
    pub fn is_consistent(&self) -> bool {
        self.projects_data.iter().all(|(slug, envs)| {
            self.metadata.projects.iter().any(|p| &p.slug == slug)
                && envs.keys().all(|env| self.environments(slug).contains(env))
        })
    }
}
