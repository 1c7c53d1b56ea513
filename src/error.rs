//! Error types for MailMind.

use std::time::Duration;

/// Top-level error type for the responder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail transport and parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("IMAP connection failed: {0}")]
    ImapConnect(String),

    #[error("IMAP authentication failed for {username}")]
    ImapAuth { username: String },

    #[error("IMAP protocol error: {0}")]
    ImapProtocol(String),

    #[error("SMTP send failed: {0}")]
    SmtpSend(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unparseable message: {0}")]
    Unparseable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inference endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Inference request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Inference call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Authentication failed for inference endpoint")]
    AuthFailed,

    #[error("Invalid response from inference endpoint: {reason}")]
    InvalidResponse { reason: String },

    #[error("Rate limited by inference endpoint")]
    RateLimited,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// Whether a retry with backoff can reasonably succeed.
    ///
    /// Connection drops, timeouts, and provider-side rate limits are
    /// transient. Auth failures and malformed requests/responses are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::RequestFailed { .. } | AiError::Timeout { .. } | AiError::RateLimited
        )
    }
}

/// Pipeline-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Record failed: {0}")]
    Record(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
}

/// Result type alias for the responder.
pub type Result<T> = std::result::Result<T, Error>;
