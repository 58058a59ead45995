mod auth;
mod llm;
mod meetings;
mod server;
mod storage;

pub use auth::*;
pub use llm::*;
pub use meetings::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub meetings: MeetingsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Load a config from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Server port must be non-zero.
        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        // Server host must not be empty.
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        // LLM base_url must be a valid URL (http:// or https://).
        if !self.llm.base_url.starts_with("http://")
            && !self.llm.base_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.llm.base_url
                ),
            });
        }

        // Warn when the API key env var is not set.
        if std::env::var(&self.llm.api_key_env)
            .map(|v| v.is_empty())
            .unwrap_or(true)
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.api_key_env".into(),
                message: format!(
                    "{} is not set — internal agent turns will fail until it is",
                    self.llm.api_key_env
                ),
            });
        }

        // Meeting knobs must be usable.
        if self.meetings.max_rounds_default == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "meetings.max_rounds_default".into(),
                message: "max_rounds_default must be greater than 0".into(),
            });
        }
        if self.meetings.cooldown_seconds_default < 0.0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "meetings.cooldown_seconds_default".into(),
                message: "cooldown_seconds_default must not be negative".into(),
            });
        }
        if self.meetings.idle_pass_multiplier == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "meetings.idle_pass_multiplier".into(),
                message: "idle_pass_multiplier must be greater than 0".into(),
            });
        }
        if self.meetings.external_turn_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "meetings.external_turn_timeout_secs".into(),
                message: "a zero timeout skips every external turn".into(),
            });
        }

        // Token prefix must be non-empty ASCII without the separator.
        if self.auth.token_prefix.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.token_prefix".into(),
                message: "token_prefix must not be empty".into(),
            });
        } else if !self.auth.token_prefix.is_ascii()
            || self.auth.token_prefix.contains(' ')
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.token_prefix".into(),
                message: "token_prefix must be ASCII without spaces".into(),
            });
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        // Rate limit: if set, both values must be > 0.
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
