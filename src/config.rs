use std::net::SocketAddr;
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser};

use crate::error::{ExporterError, Result};
use crate::snapshot::AgeBucket;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://sentry.io/api/0/";
pub const DEFAULT_CACHE_FILE: &str = "/tmp/sentry-prometheus-exporter-cache.json";

// ─── Command line / environment ──────────────────────────────────

/// Exposes Sentry issue and event counts as Prometheus metrics.
#[derive(Debug, Clone, Parser)]
#[command(name = "sentry-prometheus-exporter", version, about)]
pub struct Config {
    /// Sentry API base URL.
    #[arg(long, env = "SENTRY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Bearer token used for every API call.
    #[arg(long, env = "SENTRY_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: String,

    /// Organization slug.
    #[arg(long, env = "SENTRY_EXPORTER_ORG")]
    pub org: String,

    /// Comma-separated project slugs; every visible project when empty.
    #[arg(long, env = "SENTRY_EXPORTER_PROJECTS", value_delimiter = ',')]
    pub projects: Vec<String>,

    #[arg(
        long,
        env = "SENTRY_SCRAPE_ISSUE_METRICS",
        default_value_t = true,
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub scrape_issue_metrics: bool,

    #[arg(
        long,
        env = "SENTRY_SCRAPE_EVENT_METRICS",
        default_value_t = true,
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub scrape_event_metrics: bool,

    /// Defaults to the issue metrics flag.
    #[arg(
        long,
        env = "SENTRY_ISSUES_1H",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub issues_1h: Option<bool>,

    /// Defaults to the issue metrics flag.
    #[arg(
        long,
        env = "SENTRY_ISSUES_24H",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub issues_24h: Option<bool>,

    /// Defaults to the issue metrics flag.
    #[arg(
        long,
        env = "SENTRY_ISSUES_14D",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub issues_14d: Option<bool>,

    #[command(flatten)]
    pub retry: RetrySettings,

    /// Where the snapshot cache lives.
    #[arg(long, env = "SENTRY_EXPORTER_CACHE_FILE", default_value = DEFAULT_CACHE_FILE)]
    pub cache_file: PathBuf,

    #[arg(long, env = "SENTRY_EXPORTER_LISTEN", default_value = "0.0.0.0:9790")]
    pub listen: SocketAddr,

    #[arg(
        long,
        env = "SENTRY_EXPORTER_BASIC_AUTH",
        default_value_t = false,
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub basic_auth: bool,

    #[arg(long, env = "SENTRY_EXPORTER_BASIC_AUTH_USER", default_value = "prometheus")]
    pub basic_auth_user: String,

    #[arg(
        long,
        env = "SENTRY_EXPORTER_BASIC_AUTH_PASS",
        default_value = "prometheus",
        hide_env_values = true
    )]
    pub basic_auth_pass: String,

    /// Tracing filter directive (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Retry tunables applied to every upstream call.
#[derive(Debug, Clone, Copy, Args)]
pub struct RetrySettings {
    /// Attempts per call, including the first one.
    #[arg(long = "retry-tries", env = "SENTRY_RETRY_TRIES", default_value_t = 3)]
    pub tries: u32,

    /// Initial delay between attempts, in seconds.
    #[arg(long = "retry-delay", env = "SENTRY_RETRY_DELAY", default_value_t = 1.0)]
    pub delay: f64,

    /// Upper bound for a single delay, in seconds.
    #[arg(long = "retry-max-delay", env = "SENTRY_RETRY_MAX_DELAY", default_value_t = 10.0)]
    pub max_delay: f64,

    /// Delay multiplier applied after every failed attempt.
    #[arg(long = "retry-backoff", env = "SENTRY_RETRY_BACKOFF", default_value_t = 2.0)]
    pub backoff: f64,

    /// Fraction of the delay randomly added or removed.
    #[arg(long = "retry-jitter", env = "SENTRY_RETRY_JITTER", default_value_t = 0.5)]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            tries: 3,
            delay: 1.0,
            max_delay: 10.0,
            backoff: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetrySettings {
    /// Settings with no sleeping between attempts.
    #[cfg(test)]
    pub fn immediate(tries: u32) -> Self {
        Self {
            tries,
            delay: 0.0,
            max_delay: 0.0,
            backoff: 1.0,
            jitter: 0.0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tries == 0 {
            return Err(ExporterError::Config("retry tries must be at least 1".into()));
        }
        if !(self.delay >= 0.0 && self.max_delay >= 0.0) {
            return Err(ExporterError::Config("retry delays must not be negative".into()));
        }
        if !(self.delay.is_finite() && self.max_delay.is_finite()) {
            return Err(ExporterError::Config("retry delays must be finite".into()));
        }
        if !(self.backoff >= 1.0) {
            return Err(ExporterError::Config("retry backoff must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ExporterError::Config("retry jitter must be between 0 and 1".into()));
        }
        Ok(())
    }
}

// ─── Resolved toggles ────────────────────────────────────────────

/// Which metric families and age buckets a scrape covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricToggles {
    pub issues: bool,
    pub events: bool,
    pub bucket_1h: bool,
    pub bucket_24h: bool,
    pub bucket_14d: bool,
}

impl MetricToggles {
    #[cfg(test)]
    pub fn all() -> Self {
        Self {
            issues: true,
            events: true,
            bucket_1h: true,
            bucket_24h: true,
            bucket_14d: true,
        }
    }

    pub fn bucket_enabled(&self, bucket: AgeBucket) -> bool {
        match bucket {
            AgeBucket::OneHour => self.bucket_1h,
            AgeBucket::OneDay => self.bucket_24h,
            AgeBucket::TwoWeeks => self.bucket_14d,
        }
    }

    /// Enabled buckets, shortest window first.
    pub fn enabled_buckets(&self) -> Vec<AgeBucket> {
        AgeBucket::ALL
            .into_iter()
            .filter(|b| self.bucket_enabled(*b))
            .collect()
    }
}

/// The subset of the configuration a single scrape needs.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub org: String,
    /// Explicit project slugs; empty means "every project the token can see".
    pub projects: Vec<String>,
    pub toggles: MetricToggles,
}

// ─── Config impl ─────────────────────────────────────────────────

impl Config {
    /// Reject configurations the exporter cannot serve with.
    pub fn validate(&self) -> Result<()> {
        if self.auth_token.trim().is_empty() || self.org.trim().is_empty() {
            return Err(ExporterError::Config(
                "SENTRY_AUTH_TOKEN and SENTRY_EXPORTER_ORG must be set".into(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ExporterError::Config(format!(
                "SENTRY_BASE_URL is not an http(s) URL: {}",
                self.base_url
            )));
        }
        self.retry.validate()
    }

    pub fn toggles(&self) -> MetricToggles {
        let issues = self.scrape_issue_metrics;
        MetricToggles {
            issues,
            events: self.scrape_event_metrics,
            bucket_1h: self.issues_1h.unwrap_or(issues),
            bucket_24h: self.issues_24h.unwrap_or(issues),
            bucket_14d: self.issues_14d.unwrap_or(issues),
        }
    }

    /// Project slugs with blanks and surrounding whitespace removed.
    pub fn project_slugs(&self) -> Vec<String> {
        self.projects
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            org: self.org.trim().to_owned(),
            projects: self.project_slugs(),
            toggles: self.toggles(),
        }
    }

    pub fn uses_default_credentials(&self) -> bool {
        self.basic_auth_user == "prometheus" && self.basic_auth_pass == "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_with_org(org: &str, args: &[&str]) -> Config {
        let mut argv = vec!["sentry-prometheus-exporter", "--auth-token", "tok", "--org", org];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).expect("valid arguments")
    }

    fn parse(args: &[&str]) -> Config {
        parse_with_org("acme", args)
    }

    #[test]
    fn buckets_follow_issue_flag_by_default() {
        let cfg = parse(&["--scrape-issue-metrics", "False"]);
        let toggles = cfg.toggles();
        assert!(!toggles.issues);
        assert!(toggles.enabled_buckets().is_empty());

        let cfg = parse(&[]);
        assert_eq!(cfg.toggles(), MetricToggles::all());
    }

    #[test]
    fn explicit_bucket_flag_wins() {
        let cfg = parse(&["--issues-24h", "false", "--issues-14d", "no"]);
        assert_eq!(cfg.toggles().enabled_buckets(), vec![AgeBucket::OneHour]);
    }

    #[test]
    fn project_list_is_split_and_trimmed() {
        let cfg = parse(&["--projects", "api, web,,worker"]);
        assert_eq!(cfg.project_slugs(), vec!["api", "web", "worker"]);
    }

    #[test]
    fn blank_org_is_a_config_error() {
        let cfg = parse_with_org("  ", &[]);
        assert!(matches!(cfg.validate(), Err(ExporterError::Config(_))));
    }

    #[test]
    fn zero_tries_rejected() {
        let cfg = parse(&["--retry-tries", "0"]);
        assert!(matches!(cfg.validate(), Err(ExporterError::Config(_))));
        assert!(parse(&[]).validate().is_ok());
    }

    #[test]
    fn infinite_delays_rejected() {
        let cfg = parse(&["--retry-max-delay", "inf"]);
        assert!(matches!(cfg.validate(), Err(ExporterError::Config(_))));
        let cfg = parse(&["--retry-delay", "inf"]);
        assert!(matches!(cfg.validate(), Err(ExporterError::Config(_))));
    }
}
