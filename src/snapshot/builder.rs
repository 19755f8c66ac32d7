use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{BucketIssues, Metadata, Snapshot, SnapshotCache};
use crate::config::ScrapeSettings;
use crate::error::Result;
use crate::sentry::{Project, SentryClient};

/// How long a freshly built snapshot may be served from the cache.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(120);

/// Builds a [`Snapshot`] from the API and writes it through the cache.
///
/// Calls are issued one after another, so a build costs roughly
/// `projects × environments × enabled buckets` round trips.
pub struct SnapshotBuilder<'a> {
    client: &'a SentryClient,
    settings: &'a ScrapeSettings,
    cache: &'a SnapshotCache,
}

impl<'a> SnapshotBuilder<'a> {
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

    /// Build, cache and return a new snapshot.
    ///
    /// A failed cache write is logged; the snapshot is still returned.
    pub async fn build(&self) -> Result<Snapshot> {
        let snapshot = self.fetch().await?;

        let expire_at = Utc::now().timestamp() + SNAPSHOT_TTL.as_secs() as i64;
        let cache = self.cache.path().display();
        match self.cache.write(&snapshot, expire_at).await {
            Ok(()) => debug!(%cache, "cache: stored fresh snapshot"),
            Err(e) => warn!(%cache, error = %e, "cache: write failed"),
        }
        Ok(snapshot)
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let org = self.client.get_organization(&self.settings.org).await?;
        info!(org = %org.slug, "metadata: sentry organization loaded");

        let projects = self.resolve_projects(&org.slug).await?;
        info!(count = projects.len(), "metadata: projects loaded from API");

        let mut projects_slug = Vec::with_capacity(projects.len());
        let mut projects_envs = BTreeMap::new();
        for project in &projects {
            let envs = self.client.list_environments(&org.slug, project).await?;
            debug!(project = %project.slug, envs = envs.len(), "metadata: environments loaded");
            projects_slug.push(project.slug.clone());
            projects_envs.insert(project.slug.clone(), envs);
        }

        let mut projects_data = BTreeMap::new();
        if self.settings.toggles.issues {
            for project in &projects {
                let envs = projects_envs.get(&project.slug).map(Vec::as_slice).unwrap_or(&[]);
                if envs.is_empty() {
                    continue;
                }
                let mut by_env = BTreeMap::new();
                for env in envs {
                    by_env.insert(env.clone(), self.fetch_buckets(&org.slug, project, env).await?);
                }
                projects_data.insert(project.slug.clone(), by_env);
            }
        }

        let snapshot = Snapshot {
            metadata: Metadata {
                org,
                projects,
                projects_slug,
                projects_envs,
            },
            projects_data,
        };
        debug_assert!(snapshot.is_consistent());
        Ok(snapshot)
    }

    /// Configured projects in the given order, or every visible project.
    async fn resolve_projects(&self, org_slug: &str) -> Result<Vec<Project>> {
        if self.settings.projects.is_empty() {
            info!("metadata: no projects specified, loading from API");
            return self.client.list_projects().await;
        }

        info!(count = self.settings.projects.len(), "metadata: projects specified");
        let mut projects = Vec::with_capacity(self.settings.projects.len());
        for slug in &self.settings.projects {
            debug!(project = %slug, "metadata: getting project from API");
            projects.push(self.client.get_project(org_slug, slug).await?);
        }
        Ok(projects)
    }

    async fn fetch_buckets(
        &self,
        org_slug: &str,
        project: &Project,
        env: &str,
    ) -> Result<BucketIssues> {
        let mut buckets = BucketIssues::new();
        for bucket in self.settings.toggles.enabled_buckets() {
            debug!(
                project = %project.slug,
                env,
                age = bucket.as_str(),
                "metadata: getting issues from API"
            );
            let issues = self.client.list_issues(org_slug, project, Some(env), bucket).await?;
            buckets.insert(bucket, issues);
        }
        Ok(buckets)
    }
}
