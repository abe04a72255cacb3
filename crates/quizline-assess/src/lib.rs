//! Quizline Assessment Backend Client
//!
//! Typed HTTP access to the external assessment system (credential exchange,
//! bulk answer submission, certificate claim, paid-test/order creation,
//! analysis retrieval) and to the re-engagement endpoint used by the
//! reconciliation job.
//!
//! Every assessment endpoint answers with a JSON envelope carrying at least
//! `result` ("success" or anything else) and `message`; see [`ApiEnvelope`].
//! All requests carry a bounded per-request timeout so a stalled backend
//! cannot hang a caller indefinitely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod client;

pub use client::{AssessClient, EngageClient};

/// Errors that can occur while talking to the external systems.
#[derive(Debug, Error)]
pub enum AssessError {
    /// The request never produced a usable response: connection failure,
    /// timeout, or an undecodable body.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Which endpoint was being called.
        endpoint: &'static str,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success HTTP status.
    #[error("{endpoint} returned HTTP {status}")]
    UnexpectedStatus {
        /// Which endpoint was being called.
        endpoint: &'static str,
        /// The HTTP status code received.
        status: u16,
    },

    /// The endpoint answered 2xx but the envelope reports a failure, or a
    /// required field is missing from a success envelope.
    #[error("{endpoint} rejected the request: {message}")]
    Backend {
        /// Which endpoint was being called.
        endpoint: &'static str,
        /// The backend's own message, surfaced verbatim.
        message: String,
    },
}

/// The JSON envelope every assessment endpoint wraps its payload in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    /// `"success"` on success; anything else is a failure.
    pub result: String,
    /// Human-readable outcome description.
    #[serde(default)]
    pub message: String,
}

impl ApiEnvelope {
    /// Returns `true` if the envelope reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result == "success"
    }
}

/// Identity fields sent to the credential-exchange endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Display name of the participant.
    pub name: String,
    /// Contact address on the messaging channel.
    pub phone: String,
    /// Identifier of the participant in the assessment system.
    pub external_ref: String,
    /// Deterministically derived password for this participant.
    pub password: String,
}

/// A bearer credential granted by the credential-exchange endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// The opaque bearer token.
    pub token: String,
    /// Expiry reported by the backend, when present.
    pub expires_at: Option<DateTime<Utc>>,
}

/// One scored answer inside the bulk submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    /// 1-based position of the question within the session.
    pub question_no: u32,
    /// Identifier of the question in the external bank.
    pub bank_id: i64,
    /// Display text of the chosen option, or the no-answer sentinel.
    pub answer_text: String,
    /// Whether the recorded letter matched the correct answer.
    pub correct: bool,
}

/// The bulk answer-submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionBundle {
    /// Identifier of the participant in the assessment system.
    pub external_ref: String,
    /// Scored answers in ordinal order.
    pub answers: Vec<SubmittedAnswer>,
    /// Percentage of correct answers, 0–100.
    pub score_percent: u32,
    /// Wall-clock minutes from session creation to submission.
    pub completion_minutes: i64,
}

/// The descriptor sent to the paid-test/order-creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDescriptor {
    /// Identifier of the participant in the assessment system.
    pub external_ref: String,
    /// Product being ordered.
    pub product_code: String,
}

/// A successful paid-test/order creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    /// The order identifier to persist on the session.
    pub order_id: String,
}

/// The analysis document returned by the analysis-retrieval endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDocument {
    /// The backend's message for this analysis.
    pub message: String,
    /// The analysis body, passed through untouched.
    pub body: Option<serde_json::Value>,
}
