//! Environment-only configuration.
//!
//! Every setting is read from a `POSTCRON_`-prefixed environment variable;
//! the binaries take no flags. Missing optional settings fall back to the
//! defaults below, malformed values are fatal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::batch::BatchRunnerConfig;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutConfig;

/// Prefix shared by every environment variable.
pub const ENV_PREFIX: &str = "POSTCRON";

pub const FACEBOOK_APP_ID_VAR: &str = "POSTCRON_FACEBOOK_APP_ID";
pub const FACEBOOK_APP_SECRET_VAR: &str = "POSTCRON_FACEBOOK_APP_SECRET";

/// Default Graph API base URL.
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

/// Application settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory of the file store.
    pub data_dir: PathBuf,
    pub facebook_app_id: Option<String>,
    pub facebook_app_secret: Option<String>,
    /// Graph API base URL, without trailing slash.
    pub graph_api_base: String,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub inter_batch_delay_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Deadline for one outbound HTTP request.
    pub call_timeout_ms: u64,
    /// Deadline for one work item, retries included.
    pub item_timeout_ms: u64,
    pub refresh_threshold_days: u32,
    /// Status history retention; 0 disables pruning.
    pub status_retention_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            facebook_app_id: None,
            facebook_app_secret: None,
            graph_api_base: DEFAULT_GRAPH_API_BASE.to_string(),
            batch_size: 10,
            max_concurrency: 5,
            inter_batch_delay_ms: 1000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            call_timeout_ms: 30_000,
            item_timeout_ms: 120_000,
            refresh_threshold_days: 7,
            status_retention_days: 30,
        }
    }
}

/// App credentials needed for the token exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct FacebookCredentials {
    pub app_id: String,
    pub app_secret: String,
}

impl std::fmt::Debug for FacebookCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacebookCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an explicit set of variables, named as they
    /// would appear in the environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::load(Environment::with_prefix(ENV_PREFIX).source(Some(map)))
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every run fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "POSTCRON_BATCH_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "POSTCRON_MAX_CONCURRENCY",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid {
                key: "POSTCRON_RETRY_MAX_DELAY_MS",
                reason: format!(
                    "{} is below the base delay of {}",
                    self.retry_max_delay_ms, self.retry_base_delay_ms
                ),
            });
        }
        if !self.graph_api_base.starts_with("http://") && !self.graph_api_base.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                key: "POSTCRON_GRAPH_API_BASE",
                reason: format!("'{}' is not an http(s) URL", self.graph_api_base),
            });
        }
        Ok(())
    }

    /// App credentials, or a fatal error naming the first missing variable.
    pub fn require_facebook_credentials(&self) -> Result<FacebookCredentials, ConfigError> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let app_id = present(&self.facebook_app_id).ok_or(ConfigError::Missing(FACEBOOK_APP_ID_VAR))?;
        let app_secret =
            present(&self.facebook_app_secret).ok_or(ConfigError::Missing(FACEBOOK_APP_SECRET_VAR))?;
        Ok(FacebookCredentials { app_id, app_secret })
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::with_values(
            Duration::from_millis(self.item_timeout_ms),
            Duration::from_millis(self.call_timeout_ms),
        )
    }

    pub fn runner_config(&self) -> BatchRunnerConfig {
        BatchRunnerConfig::new()
            .with_batch_size(self.batch_size)
            .with_max_concurrency(self.max_concurrency)
            .with_inter_batch_delay(Duration::from_millis(self.inter_batch_delay_ms))
            .with_timeout_config(self.timeout_config())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }

    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.refresh_threshold_days))
    }

    /// Retention window for status history, `None` when pruning is disabled.
    pub fn status_retention(&self) -> Option<chrono::Duration> {
        match self.status_retention_days {
            0 => None,
            days => Some(chrono::Duration::days(i64::from(days))),
        }
    }

    /// Graph API base URL with any trailing slash removed.
    pub fn graph_api_base(&self) -> &str {
        self.graph_api_base.trim_end_matches('/')
    }
}
