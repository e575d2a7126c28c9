//! Matchmaker configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`Config::default()`]
//! 2. If a config file exists, deep-merge its values over the defaults
//! 3. Apply `PRISM_*` environment variable overrides (highest priority)
//!
//! Keys follow the platform's PascalCase convention. `RedisUrl` and
//! `DatabaseUrl` are recognized for deployment tooling but unused by the
//! core; rate-limit keys are consumed by external middleware.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Recognized configuration options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Client-facing HTTP API port.
    pub http_port: u16,
    #[serde(rename = "UseHTTPS")]
    pub use_https: bool,
    /// Node control protocol port.
    pub matchmaker_port: u16,
    /// Admin dashboard port (dashboard itself is an external collaborator).
    pub admin_dashboard_port: u16,
    pub log_to_file: bool,
    pub enable_webserver: bool,
    /// Shared secret gating `/stats`; at least 32 chars in production.
    pub jwt_secret: Option<String>,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub session_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 80,
            use_https: false,
            matchmaker_port: 9999,
            admin_dashboard_port: 3001,
            log_to_file: true,
            enable_webserver: true,
            jwt_secret: None,
            rate_limit_window_ms: 900_000,
            rate_limit_max_requests: 100,
            session_timeout_ms: 1_800_000,
            health_check_interval_ms: 30_000,
            redis_url: None,
            database_url: None,
        }
    }
}

impl Config {
    /// Load from `path` with env overrides. A missing file yields defaults;
    /// invalid JSON is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = if path.exists() {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        } else {
            debug!(?path, "config file not found, using defaults");
            defaults
        };

        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Validate startup requirements. `production` hardens secret handling.
    pub fn validate(&self, production: bool) -> Result<(), ConfigError> {
        match &self.jwt_secret {
            Some(secret) if secret.len() < 32 => Err(ConfigError::Invalid(
                "JwtSecret must be at least 32 characters".to_owned(),
            )),
            None if production => Err(ConfigError::Invalid(
                "JwtSecret is required in production".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Apply `PRISM_*` environment overrides. Invalid values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_u16("PRISM_HTTP_PORT") {
            self.http_port = v;
        }
        if let Some(v) = read_env_bool("PRISM_USE_HTTPS") {
            self.use_https = v;
        }
        if let Some(v) = read_env_u16("PRISM_MATCHMAKER_PORT") {
            self.matchmaker_port = v;
        }
        if let Some(v) = read_env_u16("PRISM_ADMIN_DASHBOARD_PORT") {
            self.admin_dashboard_port = v;
        }
        if let Some(v) = read_env_bool("PRISM_LOG_TO_FILE") {
            self.log_to_file = v;
        }
        if let Some(v) = read_env_bool("PRISM_ENABLE_WEBSERVER") {
            self.enable_webserver = v;
        }
        if let Ok(v) = std::env::var("PRISM_JWT_SECRET") {
            if !v.is_empty() {
                self.jwt_secret = Some(v);
            }
        }
        if let Some(v) = read_env_u64("PRISM_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit_window_ms = v;
        }
        if let Some(v) = read_env_u32("PRISM_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit_max_requests = v;
        }
        if let Some(v) = read_env_u64("PRISM_SESSION_TIMEOUT_MS") {
            self.session_timeout_ms = v;
        }
        if let Some(v) = read_env_u64("PRISM_HEALTH_CHECK_INTERVAL_MS") {
            self.health_check_interval_ms = v;
        }
        if let Ok(v) = std::env::var("PRISM_REDIS_URL") {
            if !v.is_empty() {
                self.redis_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("PRISM_DATABASE_URL") {
            if !v.is_empty() {
                self.database_url = Some(v);
            }
        }
    }
}

/// Recursive deep merge: objects merge per-key, everything else is replaced
/// by the source; `null` source values are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn read_env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok()?.parse().ok()
}

fn read_env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.parse().ok()
}

fn read_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn read_env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
