//! # AppError
//!
//! Centralized error handling for the Rusty-Board storage engine.
//! Maps storage failures to actionable error types so callers can tell
//! "missing" from "rejected" from "the database fell over".

use thiserror::Error;

/// The primary error type for all rb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Board, Thread, Message)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure, raised before any mutation starts
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Resource already exists (e.g., duplicate board short name)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure (connection loss, timeout, unclassified constraint).
    /// The anyhow chain carries the context of the failing step.
    #[error("internal service error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Self::NotFound(resource.to_string(), id.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(..))
    }
}

/// A specialized Result type for Rusty-Board logic.
pub type Result<T> = std::result::Result<T, AppError>;
