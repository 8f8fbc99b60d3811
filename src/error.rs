//! Error types for the onboarding engine.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Lock wait timed out: {0}")]
    Busy(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Classify a libSQL failure, separating lock timeouts from other query errors.
    pub fn from_libsql(op: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("database is locked") || lowered.contains("busy") {
            DatabaseError::Busy(format!("{op}: {message}"))
        } else {
            DatabaseError::Query(format!("{op}: {message}"))
        }
    }
}

/// Errors surfaced by the onboarding operations.
///
/// Everything except `Internal` is detected before any write is committed.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Step not found: {step_key}")]
    StepNotFound { step_key: String },

    #[error("Answers payload must be a JSON object")]
    InvalidInputShape,

    #[error("{0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] DatabaseError),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
