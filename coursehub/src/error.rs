//! Error types for the course store
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to the frontend as plain messages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected input; the message is meant for the person who typed it
    #[error("{0}")]
    Validation(String),

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
