// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the buildscribe engine.

use thiserror::Error;

/// The primary error type used across all buildscribe traits and core operations.
#[derive(Debug, Error)]
pub enum BuildscribeError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote analysis service errors (transport failure, HTTP error status).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An inbound log event failed boundary validation.
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// The analysis service answered with something that is not a usable verdict.
    #[error("malformed analysis response: {message}")]
    MalformedResponse { message: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The dispatch queue is full; the build stays READY and must be resubmitted.
    #[error("dispatch queue saturated (capacity {capacity})")]
    DispatchSaturated { capacity: usize },

    /// An accumulator was asked to make a transition its state does not allow.
    #[error("cannot {action} build {key} in state {from}")]
    InvalidTransition {
        key: String,
        from: String,
        action: &'static str,
    },

    /// A requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildscribeError {
    /// Returns true when retrying the same operation later may succeed.
    ///
    /// Malformed inbound events, configuration problems and illegal state
    /// transitions are permanent; everything touching I/O is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BuildscribeError::Storage { .. }
                | BuildscribeError::Provider { .. }
                | BuildscribeError::MalformedResponse { .. }
                | BuildscribeError::Timeout { .. }
                | BuildscribeError::DispatchSaturated { .. }
        )
    }
}
