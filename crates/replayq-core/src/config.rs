//! Pipeline configuration from the environment.
//!
//! Every variable is optional. Empty or whitespace-only values count as unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

pub const ENV_WORKER_CONCURRENCY: &str = "REPLAYQ_WORKER_CONCURRENCY";
pub const ENV_RATE_LIMIT: &str = "REPLAYQ_RATE_LIMIT";
pub const ENV_RATE_WINDOW_SECS: &str = "REPLAYQ_RATE_WINDOW_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "REPLAYQ_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_MS: &str = "REPLAYQ_RETRY_BASE_MS";
pub const ENV_PARSER_URL: &str = "REPLAYQ_PARSER_URL";
pub const ENV_PARSER_HEALTH_URL: &str = "REPLAYQ_PARSER_HEALTH_URL";
pub const ENV_PARSER_TIMEOUT_SECS: &str = "REPLAYQ_PARSER_TIMEOUT_SECS";
pub const ENV_RETENTION_DAYS: &str = "REPLAYQ_RETENTION_DAYS";
pub const ENV_EXPIRY_INTERVAL_SECS: &str = "REPLAYQ_EXPIRY_INTERVAL_SECS";
pub const ENV_STUCK_THRESHOLD_SECS: &str = "REPLAYQ_STUCK_THRESHOLD_SECS";
pub const ENV_ORPHAN_INTERVAL_SECS: &str = "REPLAYQ_ORPHAN_INTERVAL_SECS";
pub const ENV_HEALTH_INTERVAL_SECS: &str = "REPLAYQ_HEALTH_INTERVAL_SECS";
pub const ENV_HEALTH_TIMEOUT_SECS: &str = "REPLAYQ_HEALTH_TIMEOUT_SECS";
pub const ENV_BROKER_URL: &str = "REPLAYQ_BROKER_URL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_ALERT_WEBHOOK_URL: &str = "REPLAYQ_ALERT_WEBHOOK_URL";
pub const ENV_RESULTS_DIR: &str = "REPLAYQ_RESULTS_DIR";

const DEFAULT_PARSER_URL: &str = "http://127.0.0.1:8000/parse";

/// Upper bound for every period, timeout and age (100 years).
const MAX_DURATION: Duration = Duration::from_secs(36_500 * 86_400);

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// N: worker loops (and the cap on jobs processed at once).
    pub worker_concurrency: usize,

    /// M dequeues per `rate_window`.
    pub rate_limit: usize,
    pub rate_window: Duration,

    pub max_attempts: u32,
    pub retry_base: Duration,

    pub parser_url: String,
    pub parser_health_url: String,
    pub parser_timeout: Duration,

    pub retention: Duration,
    pub expiry_interval: Duration,
    pub stuck_threshold: Duration,
    pub orphan_interval: Duration,
    pub health_interval: Duration,
    pub health_timeout: Duration,

    pub broker_url: Option<String>,
    pub database_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub results_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            rate_limit: 10,
            rate_window: Duration::from_secs(1),
            max_attempts: 5,
            retry_base: Duration::from_millis(2000),
            parser_url: DEFAULT_PARSER_URL.to_string(),
            parser_health_url: health_url_for(DEFAULT_PARSER_URL),
            parser_timeout: Duration::from_secs(60),
            retention: days(30),
            expiry_interval: Duration::from_secs(86_400),
            stuck_threshold: Duration::from_secs(3_600),
            orphan_interval: Duration::from_secs(3_600),
            health_interval: Duration::from_secs(300),
            health_timeout: Duration::from_secs(5),
            broker_url: None,
            database_url: None,
            alert_webhook_url: None,
            results_dir: PathBuf::from("./results"),
        }
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(86_400))
}

/// `<scheme>://<host>/health` for a parser endpoint URL.
pub fn health_url_for(parser_url: &str) -> String {
    let after_scheme = parser_url.find("://").map(|i| i + 3).unwrap_or(0);
    let base = match parser_url[after_scheme..].find('/') {
        Some(slash) => &parser_url[..after_scheme + slash],
        None => parser_url,
    };
    format!("{base}/health")
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Parse {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

impl PipelineConfig {
    /// Read the process environment, then `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(raw) = var(ENV_WORKER_CONCURRENCY) {
            cfg.worker_concurrency = parse_var(ENV_WORKER_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = var(ENV_RATE_LIMIT) {
            cfg.rate_limit = parse_var(ENV_RATE_LIMIT, &raw)?;
        }
        if let Some(raw) = var(ENV_RATE_WINDOW_SECS) {
            cfg.rate_window = Duration::from_secs(parse_var(ENV_RATE_WINDOW_SECS, &raw)?);
        }
        if let Some(raw) = var(ENV_MAX_ATTEMPTS) {
            cfg.max_attempts = parse_var(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = var(ENV_RETRY_BASE_MS) {
            cfg.retry_base = Duration::from_millis(parse_var(ENV_RETRY_BASE_MS, &raw)?);
        }
        if let Some(url) = var(ENV_PARSER_URL) {
            cfg.parser_health_url = health_url_for(&url);
            cfg.parser_url = url;
        }
        if let Some(url) = var(ENV_PARSER_HEALTH_URL) {
            cfg.parser_health_url = url;
        }
        if let Some(raw) = var(ENV_PARSER_TIMEOUT_SECS) {
            cfg.parser_timeout = Duration::from_secs(parse_var(ENV_PARSER_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = var(ENV_RETENTION_DAYS) {
            cfg.retention = days(parse_var(ENV_RETENTION_DAYS, &raw)?);
        }
        if let Some(raw) = var(ENV_EXPIRY_INTERVAL_SECS) {
            cfg.expiry_interval = Duration::from_secs(parse_var(ENV_EXPIRY_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = var(ENV_STUCK_THRESHOLD_SECS) {
            cfg.stuck_threshold = Duration::from_secs(parse_var(ENV_STUCK_THRESHOLD_SECS, &raw)?);
        }
        if let Some(raw) = var(ENV_ORPHAN_INTERVAL_SECS) {
            cfg.orphan_interval = Duration::from_secs(parse_var(ENV_ORPHAN_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = var(ENV_HEALTH_INTERVAL_SECS) {
            cfg.health_interval = Duration::from_secs(parse_var(ENV_HEALTH_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = var(ENV_HEALTH_TIMEOUT_SECS) {
            cfg.health_timeout = Duration::from_secs(parse_var(ENV_HEALTH_TIMEOUT_SECS, &raw)?);
        }
        cfg.broker_url = var(ENV_BROKER_URL);
        cfg.database_url = var(ENV_DATABASE_URL);
        cfg.alert_webhook_url = var(ENV_ALERT_WEBHOOK_URL);
        if let Some(dir) = var(ENV_RESULTS_DIR) {
            cfg.results_dir = PathBuf::from(dir);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject zero limits/periods, durations over 100 years and non-HTTP parser URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounded = [
            (ENV_RATE_WINDOW_SECS, self.rate_window),
            (ENV_RETRY_BASE_MS, self.retry_base),
            (ENV_PARSER_TIMEOUT_SECS, self.parser_timeout),
            (ENV_RETENTION_DAYS, self.retention),
            (ENV_EXPIRY_INTERVAL_SECS, self.expiry_interval),
            (ENV_STUCK_THRESHOLD_SECS, self.stuck_threshold),
            (ENV_ORPHAN_INTERVAL_SECS, self.orphan_interval),
            (ENV_HEALTH_INTERVAL_SECS, self.health_interval),
            (ENV_HEALTH_TIMEOUT_SECS, self.health_timeout),
        ];
        if let Some((var, _)) = bounded.iter().find(|(_, d)| *d > MAX_DURATION) {
            return Err(ConfigError::Invalid {
                var: *var,
                reason: "must be at most 36500 days".to_string(),
            });
        }

        let positive = [
            (ENV_WORKER_CONCURRENCY, self.worker_concurrency as u128),
            (ENV_RATE_LIMIT, self.rate_limit as u128),
            (ENV_RATE_WINDOW_SECS, self.rate_window.as_millis()),
            (ENV_MAX_ATTEMPTS, u128::from(self.max_attempts)),
            (ENV_PARSER_TIMEOUT_SECS, self.parser_timeout.as_millis()),
            (ENV_RETENTION_DAYS, self.retention.as_millis()),
            (ENV_EXPIRY_INTERVAL_SECS, self.expiry_interval.as_millis()),
            (ENV_STUCK_THRESHOLD_SECS, self.stuck_threshold.as_millis()),
            (ENV_ORPHAN_INTERVAL_SECS, self.orphan_interval.as_millis()),
            (ENV_HEALTH_INTERVAL_SECS, self.health_interval.as_millis()),
            (ENV_HEALTH_TIMEOUT_SECS, self.health_timeout.as_millis()),
        ];
        if let Some((var, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*var));
        }

        for (var, url) in [
            (ENV_PARSER_URL, &self.parser_url),
            (ENV_PARSER_HEALTH_URL, &self.parser_health_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    var,
                    reason: format!("{url:?} is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base, self.max_attempts)
    }

    /// Retention window as a chrono duration (for store cutoffs).
    pub fn retention_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = from_pairs(&[]).unwrap();

        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.worker_concurrency, 4);
        assert_eq!(cfg.retention, Duration::from_secs(30 * 86_400));
        assert_eq!(cfg.stuck_threshold, Duration::from_secs(3_600));
        assert_eq!(cfg.health_interval, Duration::from_secs(300));
        assert_eq!(cfg.health_timeout, Duration::from_secs(5));
        assert_eq!(cfg.parser_health_url, "http://127.0.0.1:8000/health");
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let cfg = from_pairs(&[
            (ENV_WORKER_CONCURRENCY, "8"),
            (ENV_RATE_LIMIT, "3"),
            (ENV_RATE_WINDOW_SECS, "10"),
            (ENV_PARSER_URL, "https://parser.internal:9000/v1/parse"),
            (ENV_RETENTION_DAYS, "7"),
            (ENV_DATABASE_URL, "postgres://localhost/replayq"),
            (ENV_RESULTS_DIR, "/var/lib/replayq"),
            (ENV_ALERT_WEBHOOK_URL, "  "),
        ])
        .unwrap();

        assert_eq!(cfg.worker_concurrency, 8);
        assert_eq!(cfg.rate_limit, 3);
        assert_eq!(cfg.rate_window, Duration::from_secs(10));
        assert_eq!(cfg.parser_health_url, "https://parser.internal:9000/health");
        assert_eq!(cfg.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/replayq"));
        assert_eq!(cfg.results_dir, PathBuf::from("/var/lib/replayq"));
        assert!(cfg.alert_webhook_url.is_none());
    }

    #[test]
    fn explicit_health_url_wins() {
        let cfg = from_pairs(&[
            (ENV_PARSER_URL, "http://parser:8000/parse"),
            (ENV_PARSER_HEALTH_URL, "http://parser:8000/status"),
        ])
        .unwrap();
        assert_eq!(cfg.parser_health_url, "http://parser:8000/status");
    }

    #[rstest]
    #[case::not_a_number(ENV_WORKER_CONCURRENCY, "many")]
    #[case::negative(ENV_MAX_ATTEMPTS, "-1")]
    #[case::float_secs(ENV_PARSER_TIMEOUT_SECS, "1.5")]
    fn malformed_numbers_are_rejected(#[case] var: &str, #[case] value: &str) {
        let err = from_pairs(&[(var, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[rstest]
    #[case(ENV_WORKER_CONCURRENCY)]
    #[case(ENV_RATE_LIMIT)]
    #[case(ENV_MAX_ATTEMPTS)]
    #[case(ENV_HEALTH_TIMEOUT_SECS)]
    fn zero_is_rejected(#[case] var: &'static str) {
        let err = from_pairs(&[(var, "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Zero(v) if v == var), "{err}");
    }

    #[rstest]
    #[case::stuck_threshold(ENV_STUCK_THRESHOLD_SECS, "1000000000000000")]
    #[case::retention(ENV_RETENTION_DAYS, "99999999")]
    #[case::health_interval(ENV_HEALTH_INTERVAL_SECS, "18446744073709551615")]
    fn out_of_range_durations_are_rejected(#[case] var: &str, #[case] value: &str) {
        let err = from_pairs(&[(var, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn hundred_years_is_accepted() {
        let cfg = from_pairs(&[(ENV_RETENTION_DAYS, "36500")]).unwrap();
        assert_eq!(cfg.retention_chrono(), chrono::Duration::days(36_500));
    }

    #[test]
    fn non_http_parser_url_is_rejected() {
        let err = from_pairs(&[(ENV_PARSER_URL, "parser:8000")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[rstest]
    #[case("http://127.0.0.1:8000/parse", "http://127.0.0.1:8000/health")]
    #[case("http://parser", "http://parser/health")]
    #[case("https://p.example.com/a/b/c", "https://p.example.com/health")]
    fn health_url_derivation(#[case] parser: &str, #[case] health: &str) {
        assert_eq!(health_url_for(parser), health);
    }
}
