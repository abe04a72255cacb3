//! Quizline Persistence
//!
//! Relational storage for quiz sessions and their question rows, accessed
//! through parameterized queries only.
//!
//! This crate owns two things:
//! - the [`Store`] itself: schema bootstrap, session and user rows, and the
//!   queries the reconciliation job runs, and
//! - the question ledger (see [`Store::create_questions`] and
//!   [`Store::save_answer_and_get_next`]): per-session question rows with a
//!   strict 1-based ordinal sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod ledger;
mod store;

pub use store::Store;

/// Ordinal at which the medium-tier scenario text is attached and surfaced.
pub const MEDIUM_SCENARIO_NO: u32 = 6;

/// Ordinal at which the hard-tier scenario text is attached and surfaced.
pub const HARD_SCENARIO_NO: u32 = 9;

/// A specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Session lookup missed, or the session is owned by a different user.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The session that could not be resolved.
        session_id: i64,
    },

    /// Question lookup missed for the given (question, session) pair.
    #[error("question {question_id} not found in session {session_id}")]
    QuestionNotFound {
        /// The question that could not be resolved.
        question_id: i64,
        /// The session the lookup was scoped to.
        session_id: i64,
    },

    /// User lookup missed.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// The user that could not be resolved.
        user_id: i64,
    },

    /// A referential-integrity violation during bulk question insert that is
    /// not explained by the session having been deleted mid-insert.
    #[error("integrity conflict during question insert: {message}")]
    IntegrityConflict {
        /// The underlying constraint message, surfaced verbatim.
        message: String,
    },

    /// Underlying database error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Returns `true` if this error is a lookup miss rather than a failure of
    /// the store itself.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. } | Self::QuestionNotFound { .. } | Self::UserNotFound { .. }
        )
    }
}

/// A quiz participant.
///
/// Contact fields are nullable: the reconciliation job validates them per
/// session and skips sessions whose owner cannot be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    /// Row identifier.
    pub id: i64,
    /// Contact address on the messaging channel.
    pub phone: Option<String>,
    /// Display name.
    pub full_name: Option<String>,
    /// Identifier of this user in the external assessment system.
    pub external_ref: String,
    /// When the user row was created.
    pub created_at: DateTime<Utc>,
}

/// One user's single attempt at a ten-question quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    /// Row identifier.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Correlation identifier in the external assessment system.
    pub external_user_ref: String,
    /// Opaque, time-bounded credential for the assessment system.
    pub bearer_token: Option<String>,
    /// Expiry of the bearer credential, when the backend reports one.
    pub token_expiry: Option<DateTime<Utc>>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Whether the settlement pipeline has finalized this session.
    pub quiz_completed: bool,
    /// Whether analysis retrieval succeeded during settlement.
    pub quiz_analysis_generated: bool,
    /// When the one-time re-engagement fired, if it has.
    pub reconciliation_fired_at: Option<DateTime<Utc>>,
    /// Serialized scored answer array recorded at settlement.
    pub settlement_payload: Option<String>,
    /// Order identifier returned by paid-test creation, if any.
    pub order_id: Option<String>,
}

/// A question row owned by a session.
///
/// Ordinal positions (`question_no`) for a session form a contiguous 1..N
/// sequence with no gaps or duplicates; the unique index on
/// `(session_id, question_no)` enforces the no-duplicates half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRow {
    /// Row identifier.
    pub id: i64,
    /// Owning session.
    pub session_id: i64,
    /// Owning user.
    pub user_id: i64,
    /// 1-based position within the session's fixed sequence.
    pub question_no: u32,
    /// Formatted question text, options included.
    pub prompt: String,
    /// Recorded answer letter; empty until answered.
    pub answer: String,
    /// Correct answer letter.
    pub correct_answer: String,
    /// Whether an answer has been recorded.
    pub answered: bool,
    /// Identifier of the question in the external bank.
    pub bank_id: i64,
    /// Contextual scenario text; empty except at the designated ordinals.
    pub scenario: String,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A question to insert, as produced by the distribution selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuestion {
    /// Formatted question text, options included.
    pub prompt: String,
    /// Correct answer letter.
    pub correct_answer: String,
    /// Identifier of the question in the external bank.
    pub bank_id: i64,
    /// Contextual scenario text carried by this question, if any.
    pub scenario: Option<String>,
}

/// Outcome of recording an answer: either the next question to present or
/// the terminal completion signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Another question follows the one just answered.
    Next {
        /// The question at the following ordinal.
        question: QuestionRow,
        /// Scenario text to present with it, surfaced only at the designated
        /// ordinals and only when non-blank.
        scenario: Option<String>,
    },
    /// The answered question was the last one; the quiz is complete.
    Complete,
}

impl NextStep {
    /// Returns `true` if this outcome is the terminal completion signal.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// A session the reconciliation job considers stalled: inside the age window,
/// never reconciled, and with its first question absent or unanswered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledSession {
    /// The stalled session.
    pub session_id: i64,
    /// Owner's contact address, if resolvable.
    pub phone: Option<String>,
    /// Owner's display name, if resolvable.
    pub full_name: Option<String>,
}
