//! Common error types for ModelGrid
//!
//! This module defines all error types used across the ModelGrid system.
//! Connection-level failures stay inside the broker session that observed
//! them; dispatch-level failures surface to the HTTP caller as a structured
//! result.

use std::net::AddrParseError;
use thiserror::Error;

/// Main error type for ModelGrid
#[derive(Error, Debug)]
pub enum ModelGridError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed frame or message — connection-fatal
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bad first message on a new connection — registration refused
    #[error("Registration error: {0}")]
    Registration(String),

    /// No free model slot matched the request; retriable later
    #[error("No candidate: {0}")]
    NoCandidate(String),

    /// I/O failure while dispatching; the worker is evicted
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// No response within the dispatch deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Correlation id already pending. Ids are monotonic, so this is an
    /// invariant violation, kept as a defensive check.
    #[error("Duplicate correlation id {0}")]
    DuplicateId(u64),

    /// The broker is draining and no longer accepts dispatches
    #[error("Shutting down")]
    ShuttingDown,

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Inference backend failure on the worker side
    #[error("Inference error: {0}")]
    Inference(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for ModelGridError {
    fn from(err: AddrParseError) -> Self {
        ModelGridError::Config(format!("invalid address: {}", err))
    }
}

impl ModelGridError {
    /// Short machine-readable label, used by the HTTP layer's `status` field.
    pub fn status_label(&self) -> &'static str {
        match self {
            ModelGridError::Config(_) => "config",
            ModelGridError::Protocol(_) => "protocol",
            ModelGridError::Registration(_) => "registration",
            ModelGridError::NoCandidate(_) => "no_candidate",
            ModelGridError::SendFailed(_) => "send_failed",
            ModelGridError::Timeout(_) => "timeout",
            ModelGridError::DuplicateId(_) => "duplicate_id",
            ModelGridError::ShuttingDown => "shutting_down",
            ModelGridError::Serialization(_) => "serialization",
            ModelGridError::Io(_) => "io",
            ModelGridError::InvalidInput(_) => "invalid_input",
            ModelGridError::Inference(_) => "inference",
            ModelGridError::Internal(_) => "internal",
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ModelGridError::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        ModelGridError::Protocol(msg.into())
    }

    /// Create a registration error
    pub fn registration(msg: impl Into<String>) -> Self {
        ModelGridError::Registration(msg.into())
    }

    /// Create a no-candidate error
    pub fn no_candidate(msg: impl Into<String>) -> Self {
        ModelGridError::NoCandidate(msg.into())
    }

    /// Create a send-failed error
    pub fn send_failed(msg: impl Into<String>) -> Self {
        ModelGridError::SendFailed(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        ModelGridError::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        ModelGridError::InvalidInput(msg.into())
    }

    /// Create an inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        ModelGridError::Inference(msg.into())
    }
}

/// Result type alias for ModelGrid operations
pub type Result<T> = std::result::Result<T, ModelGridError>;
