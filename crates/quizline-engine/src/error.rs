//! Error types for the Quizline engine.
//!
//! Fatal failures propagate to the caller as descriptive errors; degraded
//! dependency failures never appear here — the settlement pipeline folds them
//! into its structured outcome instead (see
//! [`crate::pipeline::SettlementOutcome`]).

use std::path::PathBuf;

use quizline_assess::AssessError;
use quizline_store::StoreError;

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, QuizError>;

/// Errors that can occur while driving a quiz session.
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your quizline.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Settlement Errors
    // ========================================================================
    /// A fatal settlement step failed, aborting the whole attempt.
    ///
    /// Only credential exchange and credential persistence are fatal; every
    /// later step degrades into the settlement outcome instead.
    #[error("settlement failed at {step}: {message}")]
    SettlementFailed {
        /// The step that failed.
        step: &'static str,
        /// The originating failure message.
        message: String,
    },

    // ========================================================================
    // Reconciliation Errors
    // ========================================================================
    /// A stalled session's owner has no resolvable contact details.
    #[error("session {session_id} has no resolvable contact details")]
    MissingContact {
        /// The session that could not be re-engaged.
        session_id: i64,
    },

    // ========================================================================
    // Wrapped Subsystem Errors
    // ========================================================================
    /// Store failure, including session/question lookup misses.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// External call failure outside the settlement pipeline's step folding.
    #[error(transparent)]
    Assess(#[from] AssessError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QuizError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `SettlementFailed` error for the given step.
    #[must_use]
    pub fn settlement_failed(step: &'static str, message: impl Into<String>) -> Self {
        Self::SettlementFailed {
            step,
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a lookup miss rather than a failure of
    /// the engine or its dependencies.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_not_found())
    }
}
