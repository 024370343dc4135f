//! Configuration models for altsync.
//!
//! Every tunable of a run lives here. Defaults reproduce the constants the
//! tool historically shipped with, so a run without a config file behaves
//! the same as before.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for altsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Catalog API endpoint and credential
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Retry/backoff policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker pool and global request spacing
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Alt-text label rules
    #[serde(default)]
    pub labels: LabelConfig,

    /// Checkpoint location and resume semantics
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Catalog API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Store account name, used to build the default base URL
    #[serde(default = "default_account")]
    pub account: String,

    /// Explicit base URL (overrides the account-derived one)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Credential value (supports ${ENV_VAR} expansion)
    #[serde(default)]
    pub credential: Option<String>,

    /// Environment variable holding the credential
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    /// Header the credential is sent in
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Prefix prepended to the credential (e.g. "Bearer ")
    #[serde(default)]
    pub auth_prefix: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_account() -> String {
    "bemol".to_string()
}

fn default_credential_env() -> String {
    "VTEX_COOKIE".to_string()
}

fn default_auth_header() -> String {
    "VtexIdclientAutCookie".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            base_url: None,
            credential: None,
            credential_env: default_credential_env(),
            auth_header: default_auth_header(),
            auth_prefix: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl CatalogConfig {
    /// Base URL of the private catalog API, without trailing slash.
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.vtexcommercestable.com.br/api/catalog/pvt",
                self.account
            ),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry, doubled on each further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on computed backoff
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Upper bound on server-provided Retry-After hints
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_max_retry_after_secs() -> u64 {
    120
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of items processed concurrently
    #[serde(default = "default_workers")]
    pub size: usize,

    /// Minimum spacing between any two outbound requests, in milliseconds
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

fn default_workers() -> usize {
    3
}

fn default_rate_limit_delay_ms() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            size: default_workers(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

/// Which images get their label rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Rewrite every label that differs from the normalized one
    #[default]
    Replace,
    /// Only fill labels that are absent or blank
    FillMissing,
}

/// Label normalization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Label used when the item has no usable name
    #[serde(default = "default_fallback_label")]
    pub fallback: String,

    #[serde(default)]
    pub policy: LabelPolicy,

    /// Terms whose casing survives lowercasing (brands, units)
    #[serde(default)]
    pub preserve_terms: Vec<String>,
}

fn default_fallback_label() -> String {
    "produto farmacêutico".to_string()
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_label(),
            policy: LabelPolicy::default(),
            preserve_terms: Vec::new(),
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,

    /// Reprocess items whose previous outcome was `failed`
    #[serde(default = "default_true")]
    pub retry_failed: bool,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoint.json")
}

fn default_true() -> bool {
    true
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
            retry_failed: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the catalog credential from config or environment.
    pub fn resolve_credential(&self) -> Result<String, ConfigError> {
        if let Some(value) = &self.catalog.credential {
            let expanded = expand_env_vars(value);
            if !expanded.trim().is_empty() {
                return Ok(expanded);
            }
        }

        match std::env::var(&self.catalog.credential_env) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::MissingCredential {
                env_var: self.catalog.credential_env.clone(),
            }),
        }
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.size == 0 {
            return Err(ConfigError::Invalid("workers.size must be at least 1".into()));
        }
        if self.catalog.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "catalog.timeout_secs must be at least 1".into(),
            ));
        }
        if self.catalog.auth_header.trim().is_empty() {
            return Err(ConfigError::Invalid("catalog.auth_header is empty".into()));
        }
        if self.labels.fallback.trim().is_empty() {
            return Err(ConfigError::Invalid("labels.fallback is empty".into()));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing catalog credential: set {env_var} env var or catalog.credential in config")]
    MissingCredential { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
