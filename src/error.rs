//! Error types for the audit engine.
//!
//! Page- and rule-level failures are recovered locally and folded into the
//! result data; only seed-unreachable, storage and configuration errors
//! propagate to the caller.

use thiserror::Error;

/// Domain-specific errors for audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Invalid or malformed URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Rejected before any network activity starts
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The seed URL itself could not be fetched (crawl-level fatal)
    #[error("Seed URL unreachable: {url}: {reason}")]
    SeedUnreachable { url: String, reason: String },

    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Audit not found
    #[error("Audit not found: {0}")]
    AuditNotFound(String),

    /// Crawl not found
    #[error("Crawl not found: {0}")]
    CrawlNotFound(String),

    /// Audit was cancelled
    #[error("Audit cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AuditError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(error: sqlx::Error) -> Self {
        Self::DatabaseError(error.to_string())
    }
}

/// Result type alias using AuditError.
pub type Result<T> = std::result::Result<T, AuditError>;
