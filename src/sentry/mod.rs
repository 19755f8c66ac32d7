//! Authenticated reads against the Sentry web API.
//!
//! Only the resources the metric families need are fetched, and only the
//! first page of each. Every call goes through [`SentryClient::get`], which
//! retries non-2xx answers with exponential backoff and hands transport
//! failures straight back to the caller.

pub mod models;
pub mod retry;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{ExporterError, Result};
use crate::snapshot::AgeBucket;

pub use models::{EventStat, Issue, Organization, Project};
use models::{sum_stat_series, CurrentReleaseEnvelope, EnvironmentRecord};
use retry::Backoff;

/// Cloneable API client. Clones share one connection pool.
#[derive(Clone)]
pub struct SentryClient {
    http: Client,
    base_url: String,
    retry: RetrySettings,
}

impl SentryClient {
    pub fn new(base_url: &str, auth_token: &str, retry: RetrySettings) -> Result<Self> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {auth_token}"))
            .map_err(|e| ExporterError::Config(format!("invalid auth token: {e}")))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("sentry-prometheus-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut base_url = base_url.trim().to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            retry,
        })
    }

    // ── Resources ───────────────────────────────────────────────

    pub async fn get_organization(&self, org_slug: &str) -> Result<Organization> {
        let path = format!("organizations/{org_slug}/");
        let value = self.get(&path, &[]).await?;
        decode(&path, value)
    }

    /// Every project the token can see.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let path = "projects/";
        let value = self.get(path, &[]).await?;
        decode(path, value)
    }

    pub async fn get_project(&self, org_slug: &str, project_slug: &str) -> Result<Project> {
        let path = format!("projects/{org_slug}/{project_slug}/");
        let value = self.get(&path, &[]).await?;
        decode(&path, value)
    }

    /// Environment names in API order. A 404 means "no environments".
    pub async fn list_environments(
        &self,
        org_slug: &str,
        project: &Project,
    ) -> Result<Vec<String>> {
        let path = format!("projects/{org_slug}/{}/environments/", project.slug);
        let value = match self.get(&path, &[]).await {
            Ok(value) => value,
            Err(ExporterError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let records: Vec<EnvironmentRecord> = decode(&path, value)?;
        Ok(records.into_iter().map(|env| env.name).collect())
    }

    /// First page of unresolved issues created within `age`, most recently seen first.
    /// A 404 yields an empty page.
    pub async fn list_issues(
        &self,
        org_slug: &str,
        project: &Project,
        environment: Option<&str>,
        age: AgeBucket,
    ) -> Result<Vec<Issue>> {
        let path = format!("projects/{org_slug}/{}/issues/", project.slug);
        let mut query = vec![
            ("project", project.id.clone()),
            ("sort", "date".to_owned()),
            ("query", format!("is:unresolved age:-{}", age.as_str())),
        ];
        if let Some(env) = environment {
            query.push(("environment", env.to_owned()));
        }

        match self.get(&path, &query).await {
            Ok(value) => decode(&path, value),
            Err(ExporterError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Version of the issue's current release, if it has one.
    pub async fn get_issue_release(
        &self,
        issue_id: &str,
        environment: Option<&str>,
    ) -> Result<Option<String>> {
        let path = format!("issues/{issue_id}/current-release/");
        let query: Vec<(&str, String)> = environment
            .map(|env| vec![("environment", env.to_owned())])
            .unwrap_or_default();
        let value = self.get(&path, &query).await?;
        let envelope: CurrentReleaseEnvelope = decode(&path, value)?;
        Ok(envelope.current_release.map(|current| current.release.version))
    }

    /// Month-to-date totals, one entry per stat name in [`EventStat::ALL`] order.
    pub async fn get_project_stats(
        &self,
        org_slug: &str,
        project_slug: &str,
    ) -> Result<Vec<(EventStat, u64)>> {
        self.get_project_stats_at(org_slug, project_slug, Utc::now()).await
    }

    pub(crate) async fn get_project_stats_at(
        &self,
        org_slug: &str,
        project_slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(EventStat, u64)>> {
        let path = format!("projects/{org_slug}/{project_slug}/stats/");
        let since = month_start(now).timestamp().to_string();
        let until = now.timestamp().to_string();

        let mut totals = Vec::with_capacity(EventStat::ALL.len());
        for stat in EventStat::ALL {
            let query = [
                ("stat", stat.as_str().to_owned()),
                ("since", since.clone()),
                ("until", until.clone()),
            ];
            let value = self.get(&path, &query).await?;
            let rows = value
                .as_array()
                .ok_or_else(|| {
                    ExporterError::type_mismatch(&path, "stats response is not a list")
                })?;
            totals.push((stat, sum_stat_series(rows)));
        }
        Ok(totals)
    }

    // ── Transport ───────────────────────────────────────────────

    /// GET `path` and return the JSON body.
    ///
    /// Non-2xx answers are retried per the configured schedule; 404 is final
    /// and comes back as [`ExporterError::NotFound`]. Transport errors are
    /// returned immediately.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = Backoff::new(self.retry);

        loop {
            let response = self.http.get(&url).query(query).send().await?;
            let status = response.status();

            if status.is_success() {
                return response.json::<Value>().await.map_err(|e| {
                    if e.is_decode() {
                        ExporterError::type_mismatch(path, e)
                    } else {
                        ExporterError::Transport(e)
                    }
                });
            }
            if status == StatusCode::NOT_FOUND {
                return Err(ExporterError::NotFound { path: path.to_owned() });
            }
            if !backoff.can_retry() {
                return Err(ExporterError::Remote {
                    status,
                    path: path.to_owned(),
                });
            }

            let delay = backoff.next_delay();
            warn!(
                %status,
                path,
                attempt = backoff.failures(),
                delay_ms = delay.as_millis() as u64,
                "upstream call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        debug!(path, error = %e, "response did not match the expected shape");
        ExporterError::type_mismatch(path, e)
    })
}

/// Midnight UTC on the first day of `now`'s month.
fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> SentryClient {
        SentryClient::new(&server.uri(), "secret", RetrySettings::immediate(3)).unwrap()
    }

    fn project(slug: &str, id: &str) -> Project {
        Project {
            id: id.into(),
            slug: slug.into(),
            name: Some(slug.into()),
            status: Some("active".into()),
            platform: None,
        }
    }

    #[tokio::test]
    async fn sends_bearer_token_and_normalizes_org() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/organizations/acme/"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1", "slug": "acme", "name": "Acme",
                "status": {"id": "active", "name": "active"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let org = client_for(&server).await.get_organization("acme").await.unwrap();
        assert_eq!(org.slug, "acme");
        assert_eq!(org.status.as_deref(), Some("active"));
    }

    #[tokio::test]
    async fn missing_organization_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(path("/organizations/ghost/"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).await.get_organization("ghost").await.unwrap_err();
        assert!(matches!(err, ExporterError::NotFound { .. }));
    }

    #[tokio::test]
    async fn environments_404_is_empty() {
        let server = MockServer::start().await;
        Mock::given(path("/projects/acme/x/environments/"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let envs = client_for(&server)
            .await
            .list_environments("acme", &project("x", "9"))
            .await
            .unwrap();
        assert!(envs.is_empty());
    }

    #[tokio::test]
    async fn environments_keep_api_order() {
        let server = MockServer::start().await;
        Mock::given(path("/projects/acme/api/environments/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "name": "prod"}, {"id": "2", "name": "staging"}
            ])))
            .mount(&server)
            .await;

        let envs = client_for(&server)
            .await
            .list_environments("acme", &project("api", "1"))
            .await
            .unwrap();
        assert_eq!(envs, vec!["prod", "staging"]);
    }

    #[tokio::test]
    async fn issues_query_carries_age_and_environment() {
        let server = MockServer::start().await;
        Mock::given(path("/projects/acme/api/issues/"))
            .and(query_param("project", "1"))
            .and(query_param("sort", "date"))
            .and(query_param("query", "is:unresolved age:-24h"))
            .and(query_param("environment", "prod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "10", "project": {"slug": "api"}, "count": "5"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let issues = client_for(&server)
            .await
            .list_issues("acme", &project("api", "1"), Some("prod"), AgeBucket::OneDay)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].event_count(), 5);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/projects/acme/api/stats/"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get_project_stats("acme", "api")
            .await
            .unwrap_err();
        match err {
            ExporterError::Remote { status, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failure_recovers() {
        let server = MockServer::start().await;
        Mock::given(path("/projects/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(path("/projects/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "slug": "api", "name": "API", "status": "active", "platform": "python"}
            ])))
            .mount(&server)
            .await;

        let projects = client_for(&server).await.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].platform.as_deref(), Some("python"));
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        // nothing listens on the discard port
        let client =
            SentryClient::new("http://127.0.0.1:9/", "t", RetrySettings::immediate(3)).unwrap();
        let err = client.list_projects().await.unwrap_err();
        assert!(matches!(err, ExporterError::Transport(_)));
    }

    #[tokio::test]
    async fn non_list_projects_is_type_mismatch() {
        let server = MockServer::start().await;
        Mock::given(path("/projects/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "nope"})))
            .mount(&server)
            .await;

        let err = client_for(&server).await.list_projects().await.unwrap_err();
        assert!(matches!(err, ExporterError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn truncated_body_is_a_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            // promise 64 bytes, send a few, then hang up
            let head = concat!(
                "HTTP/1.1 200 OK\r\n",
                "content-type: application/json\r\n",
                "content-length: 64\r\n\r\n",
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(br#"{"id": "1""#).await.unwrap();
        });

        let base = format!("http://{addr}/");
        let client = SentryClient::new(&base, "t", RetrySettings::immediate(3)).unwrap();
        let err = client.get_organization("acme").await.unwrap_err();
        assert!(matches!(err, ExporterError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn release_absent_when_no_current_release() {
        let server = MockServer::start().await;
        Mock::given(path("/issues/10/current-release/"))
            .and(query_param("environment", "prod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"currentRelease": null})))
            .mount(&server)
            .await;
        Mock::given(path("/issues/11/current-release/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "currentRelease": {"release": {"version": "1.4.2"}, "firstSeen": null}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.get_issue_release("10", Some("prod")).await.unwrap(), None);
        assert_eq!(
            client.get_issue_release("11", None).await.unwrap().as_deref(),
            Some("1.4.2")
        );
    }

    #[tokio::test]
    async fn stats_summed_per_stat_over_month_to_date() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().timestamp().to_string();

        for (stat, body) in [
            ("received", json!([[1, 10], [2, 5], "bad"])),
            ("rejected", json!([[1, 1]])),
            ("blacklisted", json!([])),
        ] {
            Mock::given(path("/projects/acme/api/stats/"))
                .and(query_param("stat", stat))
                .and(query_param("since", since.as_str()))
                .and(query_param("until", now.timestamp().to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .expect(1)
                .mount(&server)
                .await;
        }

        let stats = client_for(&server)
            .await
            .get_project_stats_at("acme", "api", now)
            .await
            .unwrap();
        assert_eq!(
            stats,
            vec![
                (EventStat::Received, 15),
                (EventStat::Rejected, 1),
                (EventStat::Blacklisted, 0),
            ]
        );
    }

    #[test]
    fn month_start_is_midnight_on_the_first() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }
}
