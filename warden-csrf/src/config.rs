use crate::error::{CsrfError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Logical key used when the caller does not name one.
pub const DEFAULT_TOKEN_KEY: &str = "default";

/// Prefix prepended to a session's cache key to form its token-map key.
pub const DEFAULT_KEY_PREFIX: &str = "csrf_tokens_";

/// Upper bound for `rotationInterval` and `reapFrequency` (one year).
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// CSRF protection configuration
///
/// Field names deserialize from camelCase (`rotationInterval`) as well as
/// snake_case (`rotation_interval`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CsrfConfig {
    /// Name of the cache partition holding token maps
    #[serde(alias = "cache_storage")]
    pub cache_storage: String,

    /// Minutes from issuance until a token expires
    #[serde(alias = "rotation_interval")]
    pub rotation_interval: u64,

    /// Minutes between reaper sweeps
    #[serde(alias = "reap_frequency")]
    pub reap_frequency: u64,

    /// Verify tokens automatically on inbound requests
    #[serde(alias = "auto_verify")]
    pub auto_verify: bool,

    /// HTTP methods that require verification when `auto_verify` is on
    #[serde(alias = "verify_methods")]
    pub verify_methods: Vec<String>,

    /// Header carrying the token for automatic verification
    #[serde(alias = "header_name")]
    pub header_name: String,

    /// Prefix for token-map cache keys
    #[serde(alias = "key_prefix")]
    pub key_prefix: String,

    /// Seconds before expiry at which `generate` stops reusing a token
    #[serde(alias = "timeout_skew_seconds")]
    pub timeout_skew_seconds: u64,

    /// Give cache entries a backend TTL matching their latest token expiry
    #[serde(alias = "entry_ttl")]
    pub entry_ttl: bool,

    /// Conditional-write attempts before a mutation gives up
    #[serde(alias = "max_write_retries")]
    pub max_write_retries: u32,

    /// Sessions compacted concurrently by one reap cycle
    #[serde(alias = "reap_concurrency")]
    pub reap_concurrency: usize,
}

impl CsrfConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            cache_storage: "session".to_string(),
            rotation_interval: 30,
            reap_frequency: 1,
            auto_verify: false,
            verify_methods: ["POST", "PUT", "PATCH", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            header_name: "x-csrf-token".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout_skew_seconds: 0,
            entry_ttl: false,
            max_write_retries: 32,
            reap_concurrency: 16,
        }
    }

    /// Parse a TOML document (a `[csrf]` table or top-level keys).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let document: toml::Table =
            toml::from_str(content).map_err(|e| CsrfError::Config(format!("TOML parse error: {}", e)))?;

        let settings = match document.get("csrf").cloned() {
            Some(section) => section,
            None => toml::Value::Table(document),
        };
        let config: Self = settings
            .try_into()
            .map_err(|e: toml::de::Error| CsrfError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Build from a JSON module-settings object.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| CsrfError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `WARDEN_CSRF_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(v) = lookup("WARDEN_CSRF_CACHE_STORAGE") {
            config.cache_storage = v;
        }
        if let Some(v) = lookup("WARDEN_CSRF_ROTATION_INTERVAL") {
            config.rotation_interval = parse_var("WARDEN_CSRF_ROTATION_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("WARDEN_CSRF_REAP_FREQUENCY") {
            config.reap_frequency = parse_var("WARDEN_CSRF_REAP_FREQUENCY", &v)?;
        }
        if let Some(v) = lookup("WARDEN_CSRF_AUTO_VERIFY") {
            config.auto_verify = parse_flag(&v);
        }
        if let Some(v) = lookup("WARDEN_CSRF_VERIFY_METHODS") {
            config.verify_methods = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(v) = lookup("WARDEN_CSRF_HEADER_NAME") {
            config.header_name = v;
        }
        if let Some(v) = lookup("WARDEN_CSRF_KEY_PREFIX") {
            config.key_prefix = v;
        }
        if let Some(v) = lookup("WARDEN_CSRF_TIMEOUT_SKEW") {
            config.timeout_skew_seconds = parse_var("WARDEN_CSRF_TIMEOUT_SKEW", &v)?;
        }
        if let Some(v) = lookup("WARDEN_CSRF_ENTRY_TTL") {
            config.entry_ttl = parse_flag(&v);
        }
        if let Some(v) = lookup("WARDEN_CSRF_MAX_WRITE_RETRIES") {
            config.max_write_retries = parse_var("WARDEN_CSRF_MAX_WRITE_RETRIES", &v)?;
        }
        if let Some(v) = lookup("WARDEN_CSRF_REAP_CONCURRENCY") {
            config.reap_concurrency = parse_var("WARDEN_CSRF_REAP_CONCURRENCY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval == 0 {
            return Err(CsrfError::Config("rotationInterval must be at least 1 minute".into()));
        }
        if self.rotation_interval > MAX_INTERVAL_MINUTES {
            return Err(CsrfError::Config(format!(
                "rotationInterval must not exceed {} minutes",
                MAX_INTERVAL_MINUTES
            )));
        }
        if self.reap_frequency == 0 {
            return Err(CsrfError::Config("reapFrequency must be at least 1 minute".into()));
        }
        if self.reap_frequency > MAX_INTERVAL_MINUTES {
            return Err(CsrfError::Config(format!(
                "reapFrequency must not exceed {} minutes",
                MAX_INTERVAL_MINUTES
            )));
        }
        if self.max_write_retries == 0 {
            return Err(CsrfError::Config("maxWriteRetries must be at least 1".into()));
        }
        if self.reap_concurrency == 0 {
            return Err(CsrfError::Config("reapConcurrency must be at least 1".into()));
        }
        if self.timeout_skew_seconds >= self.rotation_interval.saturating_mul(60) {
            return Err(CsrfError::Config(
                "timeoutSkewSeconds must be shorter than rotationInterval".into(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(CsrfError::Config(
                "keyPrefix must not be empty; the reaper would sweep the whole cache".into(),
            ));
        }
        if self.cache_storage.trim().is_empty() {
            return Err(CsrfError::Config("cacheStorage must name a cache".into()));
        }
        http::HeaderName::from_bytes(self.header_name.as_bytes())
            .map_err(|_| CsrfError::Config(format!("invalid header name '{}'", self.header_name)))?;
        for method in &self.verify_methods {
            http::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| CsrfError::Config(format!("invalid HTTP method '{}'", method)))?;
        }
        Ok(())
    }

    /// Token lifetime, capped at [`MAX_INTERVAL_MINUTES`].
    pub fn rotation_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.rotation_interval.min(MAX_INTERVAL_MINUTES) as i64)
    }

    /// Margin before expiry inside which a token is no longer reused.
    pub fn timeout_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_skew_seconds.min(MAX_INTERVAL_MINUTES * 60) as i64)
    }

    /// Interval between reaper sweeps, capped at [`MAX_INTERVAL_MINUTES`].
    pub fn reap_period(&self) -> Duration {
        Duration::from_secs(self.reap_frequency.min(MAX_INTERVAL_MINUTES) * 60)
    }

    /// Whether requests with `method` are subject to automatic verification.
    pub fn requires_verification(&self, method: &http::Method) -> bool {
        self.auto_verify
            && self
                .verify_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    /// Set the cache partition name
    pub fn with_cache_storage(mut self, name: impl Into<String>) -> Self {
        self.cache_storage = name.into();
        self
    }

    /// Set token lifetime in minutes
    pub fn with_rotation_interval(mut self, minutes: u64) -> Self {
        self.rotation_interval = minutes;
        self
    }

    /// Set reaper frequency in minutes
    pub fn with_reap_frequency(mut self, minutes: u64) -> Self {
        self.reap_frequency = minutes;
        self
    }

    /// Enable or disable automatic verification
    pub fn with_auto_verify(mut self, enabled: bool) -> Self {
        self.auto_verify = enabled;
        self
    }

    /// Set methods requiring verification
    pub fn with_verify_methods(mut self, methods: Vec<String>) -> Self {
        self.verify_methods = methods;
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Set cache key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set reuse skew in seconds
    pub fn with_timeout_skew(mut self, seconds: u64) -> Self {
        self.timeout_skew_seconds = seconds;
        self
    }

    /// Enable backend TTLs on token maps
    pub fn with_entry_ttl(mut self, enabled: bool) -> Self {
        self.entry_ttl = enabled;
        self
    }

    /// Set conditional-write retry budget
    pub fn with_max_write_retries(mut self, attempts: u32) -> Self {
        self.max_write_retries = attempts;
        self
    }

    /// Set reaper concurrency
    pub fn with_reap_concurrency(mut self, sessions: usize) -> Self {
        self.reap_concurrency = sessions;
        self
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CsrfError::Config(format!("{} has invalid value '{}'", name, value)))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
