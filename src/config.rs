//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Server configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    /// Upper bound on how long a transaction waits for the write lock.
    pub busy_timeout: Duration,
    /// `(step_key, field_key)` pairs whose values are coerced to strings
    /// before validation.
    pub stringify_fields: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/onboarding.db"),
            port: 8080,
            busy_timeout: Duration::from_millis(5000),
            stringify_fields: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ONBOARDING_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(port) = std::env::var("ONBOARDING_PORT") {
            config.port = port.parse().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARDING_PORT".to_string(),
                message: format!("{e}"),
            })?;
        }

        if let Ok(ms) = std::env::var("ONBOARDING_BUSY_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARDING_BUSY_TIMEOUT_MS".to_string(),
                message: format!("{e}"),
            })?;
            config.busy_timeout = Duration::from_millis(ms);
        }

        if let Ok(raw) = std::env::var("ONBOARDING_STRINGIFY_FIELDS") {
            config.stringify_fields = parse_field_pairs(&raw)?;
        }

        Ok(config)
    }
}

/// Parse `step:field,step:field` into pairs. Blank entries are skipped.
pub fn parse_field_pairs(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (step, field) = entry.split_once(':').ok_or_else(|| {
                ConfigError::ParseError(format!(
                    "expected step_key:field_key in ONBOARDING_STRINGIFY_FIELDS, got {entry:?}"
                ))
            })?;
            let (step, field) = (step.trim(), field.trim());
            if step.is_empty() || field.is_empty() {
                return Err(ConfigError::ParseError(format!(
                    "empty step or field key in {entry:?}"
                )));
            }
            Ok((step.to_string(), field.to_string()))
        })
        .collect()
}
