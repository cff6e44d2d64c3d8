// src/error.rs

//! Unified error handling for the mirror crawler.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Token exchange with the upstream API failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Upstream call returned a non-success status
    #[error("Upstream request to {path} failed with status {status}")]
    Request { status: u16, path: String },

    /// Upstream responded with a body we could not use
    #[error("Unexpected upstream response for {path}: {message}")]
    UnexpectedResponse { path: String, message: String },

    /// Write to the document index failed
    #[error("Index write error: {0}")]
    IndexWrite(String),

    /// Read from the document index failed
    #[error("Index read error: {0}")]
    IndexRead(String),

    /// Unrecognized lifecycle state
    #[error("Policy error: unrecognized lifecycle state '{0}'")]
    Policy(String),

    /// Upstream entity is missing required data
    #[error("Malformed entity: {0}")]
    Malformed(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Crawl task panicked or was aborted
    #[error("Crawl task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create an authentication error.
    pub fn auth(message: impl fmt::Display) -> Self {
        Self::Auth(message.to_string())
    }

    /// Create an upstream status error.
    pub fn request(status: u16, path: impl Into<String>) -> Self {
        Self::Request {
            status,
            path: path.into(),
        }
    }

    /// Create an unexpected-response error.
    pub fn unexpected(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::UnexpectedResponse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an index write error.
    pub fn index_write(message: impl fmt::Display) -> Self {
        Self::IndexWrite(message.to_string())
    }

    /// Create an index read error.
    pub fn index_read(message: impl fmt::Display) -> Self {
        Self::IndexRead(message.to_string())
    }

    /// Create a policy error for an unknown state.
    pub fn policy(state: impl Into<String>) -> Self {
        Self::Policy(state.into())
    }

    /// Create a malformed-entity error.
    pub fn malformed(message: impl fmt::Display) -> Self {
        Self::Malformed(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Upstream status code, if this is a request error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the upstream reported the entity as not found.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Programming or data errors that must stop the affected loop.
    ///
    /// Everything else is transient and retried in place.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Policy(_) | Self::Malformed(_) | Self::Config(_) | Self::Validation(_)
        )
    }
}
