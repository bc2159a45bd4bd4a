//! Run configuration
//!
//! The CLI (or an external scheduler) fills a [`PipelineConfig`]; stages read
//! only the parts they need. Credentials are optional at construction and
//! demanded by the stage that uses them, so `transform` never needs a key.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifacts::sanitize_query;
use crate::error::ConfigError;

// ============================================================================
// Defaults
// ============================================================================

/// Items collected per query when no cap is given.
pub const DEFAULT_MAX_TOTAL: usize = 100;

/// Largest `maxResults` the search endpoint accepts.
pub const MAX_PER_PAGE: u32 = 50;

/// Courtesy pause between successful page requests (milliseconds).
pub const DEFAULT_PAGE_DELAY_MS: u64 = 1_000;

/// Total attempts per page, first try included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// First retry backoff (milliseconds); doubles on every further attempt.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 2_000;

/// Upper bound for a single backoff sleep (seconds).
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;

/// HTTP request timeout (seconds).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

pub const DEFAULT_DATA_DIR: &str = "./data";

pub const DEFAULT_TABLE_NAME: &str = "youtube_videos";

/// Queries fetched at once. 1 keeps all requests on one rate-limit clock.
pub const DEFAULT_QUERY_CONCURRENCY: usize = 1;

// ============================================================================
// Types
// ============================================================================

/// Opaque API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// How the sink merges batches. Resolved against the destination's dialect
/// when the sink connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LoadModePreference {
    /// Native upsert where the dialect supports it, append otherwise
    #[default]
    Auto,
    /// Require native upsert; fail on dialects without it
    Upsert,
    /// Plain append, duplicates allowed
    Append,
}

/// Bounded exponential backoff for transient API failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `attempt` (1 = first retry).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Settings for the search API client and the pagination loop.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_base_url: String,
    pub per_page: u32,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            per_page: MAX_PER_PAGE,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queries: Vec<String>,
    pub max_total: usize,
    pub api_key: Option<ApiKey>,
    pub db_url: Option<String>,
    pub data_dir: PathBuf,
    pub table_name: String,
    pub load_mode: LoadModePreference,
    pub query_concurrency: usize,
    pub fetch: FetchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            max_total: DEFAULT_MAX_TOTAL,
            api_key: None,
            db_url: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            load_mode: LoadModePreference::Auto,
            query_concurrency: DEFAULT_QUERY_CONCURRENCY,
            fetch: FetchConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Check the settings that do not depend on which stage runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.per_page == 0 || self.fetch.per_page > MAX_PER_PAGE {
            return Err(ConfigError::invalid(format!(
                "per-page size must be between 1 and {}, got {}",
                MAX_PER_PAGE, self.fetch.per_page
            )));
        }

        if self.fetch.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry max_attempts must be at least 1"));
        }

        if self.query_concurrency == 0 {
            return Err(ConfigError::invalid("query concurrency must be at least 1"));
        }

        if self.fetch.api_base_url.trim().is_empty() {
            return Err(ConfigError::invalid("API base URL cannot be empty"));
        }

        if !is_sql_identifier(&self.table_name) {
            return Err(ConfigError::invalid(format!(
                "table name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.table_name
            )));
        }

        self.check_query_file_names()?;

        Ok(())
    }

    /// Distinct queries must map to distinct snapshot names. Exact repeats
    /// are fine; extraction drops them.
    fn check_query_file_names(&self) -> Result<(), ConfigError> {
        let mut names: HashMap<String, &str> = HashMap::new();
        for query in &self.queries {
            let name = sanitize_query(query);
            match names.get(name.as_str()) {
                Some(&earlier) if earlier != query.as_str() => {
                    return Err(ConfigError::invalid(format!(
                        "queries '{}' and '{}' would share the snapshot name '{}'",
                        earlier, query, name
                    )));
                },
                Some(_) => {},
                None => {
                    names.insert(name, query.as_str());
                },
            }
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&ApiKey, ConfigError> {
        self.api_key
            .as_ref()
            .filter(|k| !k.expose().trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn require_db_url(&self) -> Result<&str, ConfigError> {
        self.db_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    pub fn require_queries(&self) -> Result<&[String], ConfigError> {
        if self.queries.is_empty() {
            return Err(ConfigError::NoQueries);
        }
        Ok(&self.queries)
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Builder for PipelineConfig
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.queries = queries.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_total(mut self, max_total: usize) -> Self {
        self.config.max_total = max_total;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(ApiKey::new(key));
        self
    }

    pub fn db_url(mut self, url: impl Into<String>) -> Self {
        self.config.db_url = Some(url.into());
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    pub fn load_mode(mut self, mode: LoadModePreference) -> Self {
        self.config.load_mode = mode;
        self
    }

    pub fn query_concurrency(mut self, n: usize) -> Self {
        self.config.query_concurrency = n;
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.fetch.api_base_url = url.into();
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.config.fetch.per_page = per_page;
        self
    }

    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.config.fetch.page_delay = delay;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.fetch.retry = retry;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch.http_timeout = timeout;
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_total, 100);
        assert_eq!(config.fetch.per_page, 50);
        assert_eq!(config.table_name, "youtube_videos");
        assert_eq!(config.query_concurrency, 1);
        assert_eq!(config.load_mode, LoadModePreference::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(32));
        assert_eq!(policy.backoff_for(6), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PipelineConfig::builder().per_page(0).build().validate().is_err());
        assert!(PipelineConfig::builder().per_page(51).build().validate().is_err());
        assert!(PipelineConfig::builder().query_concurrency(0).build().validate().is_err());
        assert!(PipelineConfig::builder()
            .table_name("videos; DROP TABLE x")
            .build()
            .validate()
            .is_err());
        assert!(PipelineConfig::builder()
            .retry(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            })
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_queries_sharing_a_file_name() {
        for pair in [["lo fi", "lo/fi"], ["lo fi", "lo_fi"]] {
            let err = PipelineConfig::builder().queries(pair).build().validate().unwrap_err();
            assert!(err.to_string().contains("lo_fi"), "{}", err);
        }

        assert!(PipelineConfig::builder()
            .queries(["lo fi", "lo fi", "kpop"])
            .build()
            .validate()
            .is_ok());
    }

    #[test]
    fn test_required_settings() {
        let config = PipelineConfig::default();
        assert!(matches!(config.require_api_key(), Err(ConfigError::MissingApiKey)));
        assert!(matches!(config.require_db_url(), Err(ConfigError::MissingDatabaseUrl)));
        assert!(matches!(config.require_queries(), Err(ConfigError::NoQueries)));

        let config = PipelineConfig::builder()
            .api_key("secret")
            .db_url("sqlite://yt.db")
            .queries(["kpop"])
            .build();
        assert_eq!(config.require_api_key().unwrap().expose(), "secret");
        assert_eq!(config.require_db_url().unwrap(), "sqlite://yt.db");
        assert_eq!(config.require_queries().unwrap(), ["kpop".to_string()]);
    }

    #[test]
    fn test_blank_credentials_count_as_missing() {
        let config = PipelineConfig::builder().api_key("  ").db_url("").build();
        assert!(config.require_api_key().is_err());
        assert!(config.require_db_url().is_err());
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let config = PipelineConfig::builder().api_key("AIza-very-secret").build();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("AIza-very-secret"));
        assert!(printed.contains("ApiKey(***)"));
    }
}
