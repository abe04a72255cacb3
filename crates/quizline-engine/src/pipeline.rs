//! Settlement pipeline.
//!
//! Turns a completed (or forcibly terminated) session into a settled result
//! through five dependent calls to the assessment system. Credential exchange
//! and credential persistence are fatal; everything after them degrades into
//! the structured [`SettlementOutcome`] instead of aborting, so a caller can
//! report partial success.
//!
//! There is no automatic retry and no compensating transaction: a fatal-step
//! failure aborts immediately, already-issued best-effort calls stay issued,
//! and re-running the whole pipeline is the caller's decision.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use quizline_assess::{
    ApiEnvelope, AssessClient, AssessError, Identity, OrderDescriptor, SubmissionBundle,
    SubmittedAnswer,
};
use quizline_store::{QuestionRow, SessionRow, Store};

use crate::error::{QuizError, Result};

/// Sentinel submitted for an unanswered question or a letter that maps to no
/// option line in the stored prompt.
pub const NO_ANSWER: &str = "no answer";

// ============================================================================
// Step results
// ============================================================================

/// Outcome of a single settlement step.
///
/// Best-effort steps fold their failures into this instead of raising, so
/// one aggregate can carry every step's raw result regardless of outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult<T> {
    /// The step succeeded with this payload.
    Ok {
        /// The step's raw result.
        payload: T,
    },
    /// The step failed; the settlement attempt continued without it.
    Failed {
        /// Why the step failed.
        message: String,
    },
}

impl<T> StepResult<T> {
    /// Returns `true` if the step succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// The failure message, if the step failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Failed { message } => Some(message),
        }
    }

    /// A reference to the success payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&T> {
        match self {
            Self::Ok { payload } => Some(payload),
            Self::Failed { .. } => None,
        }
    }
}

impl<T> From<std::result::Result<T, AssessError>> for StepResult<T> {
    fn from(result: std::result::Result<T, AssessError>) -> Self {
        match result {
            Ok(payload) => Self::Ok { payload },
            Err(err) => Self::Failed {
                message: err.to_string(),
            },
        }
    }
}

/// Result of the analysis-retrieval step.
///
/// This step is informational only and never raises: every failure path —
/// network error, non-2xx, or an error embedded in a 200 body — normalizes
/// into `success: false` here.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    /// Whether the analysis was retrieved.
    pub success: bool,
    /// The backend's message, or a fixed failure description.
    pub message: String,
    /// The underlying error, when retrieval failed.
    pub error: Option<String>,
}

/// Aggregate of every settlement step's result for one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    /// The settled session.
    pub session_id: i64,
    /// Scored answers reconstructed from the ledger, in ordinal order.
    pub answers: Vec<SubmittedAnswer>,
    /// Percentage of correct answers, 0–100.
    pub score_percent: u32,
    /// Wall-clock minutes from session creation to settlement.
    pub completion_minutes: i64,
    /// Result of the bulk answer submission.
    pub submission: StepResult<ApiEnvelope>,
    /// Result of the certificate claim.
    pub certificate: StepResult<ApiEnvelope>,
    /// Result of order creation; `None` when the caller skipped it or the
    /// variant never attempts it.
    pub order: Option<StepResult<String>>,
    /// Result of analysis retrieval.
    pub analysis: AnalysisOutcome,
}

impl SettlementOutcome {
    /// The order identifier to persist, when order creation succeeded.
    #[must_use]
    pub fn order_id(&self) -> Option<&str> {
        self.order
            .as_ref()
            .and_then(StepResult::payload)
            .map(String::as_str)
    }
}

/// Caller-supplied knobs for a settlement run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettleOptions {
    /// Skip the paid-test/order-creation step entirely.
    pub skip_order: bool,
}

// ============================================================================
// Pipeline
// ============================================================================

/// The settlement pipeline, constructed once and shared.
#[derive(Debug, Clone)]
pub struct SettlementPipeline {
    store: Arc<Store>,
    assess: AssessClient,
    credential_secret: String,
    product_code: String,
}

impl SettlementPipeline {
    /// Creates a pipeline over the given store and assessment client.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        assess: AssessClient,
        credential_secret: impl Into<String>,
        product_code: impl Into<String>,
    ) -> Self {
        Self {
            store,
            assess,
            credential_secret: credential_secret.into(),
            product_code: product_code.into(),
        }
    }

    /// Settles a session end to end: credential exchange and persistence
    /// (fatal), then answer submission, certificate claim, order creation
    /// (unless skipped), and analysis retrieval (all best-effort), then the
    /// single finalization write.
    pub async fn settle(
        &self,
        session_id: i64,
        options: SettleOptions,
    ) -> Result<SettlementOutcome> {
        let session = self.store.get_session(session_id)?;
        let user = self.store.get_user(session.user_id)?;

        let identity = Identity {
            name: user.full_name.unwrap_or_default(),
            phone: user.phone.unwrap_or_default(),
            external_ref: session.external_user_ref.clone(),
            password: derive_password(&session.external_user_ref, &self.credential_secret),
        };

        // Step 1: credential exchange. Fatal.
        let grant = self
            .assess
            .exchange_token(&identity)
            .await
            .map_err(|e| QuizError::settlement_failed("credential exchange", e.to_string()))?;

        // Step 2: credential persistence. Also fatal — no further external
        // call goes out under a token the session row does not reflect.
        self.store
            .set_bearer_token(session_id, &grant.token, grant.expires_at)
            .map_err(|e| QuizError::settlement_failed("credential persistence", e.to_string()))?;

        let create_order = if options.skip_order {
            OrderMode::Skip
        } else {
            OrderMode::Create
        };
        self.run_best_effort_steps(&session, &grant.token, create_order)
            .await
    }

    /// Settlement variant for a caller that already holds a fresh bearer
    /// credential: skips credential exchange, credential persistence, and
    /// order creation; finalization always records a null order identifier.
    pub async fn settle_with_token(
        &self,
        session_id: i64,
        token: &str,
    ) -> Result<SettlementOutcome> {
        let session = self.store.get_session(session_id)?;
        self.run_best_effort_steps(&session, token, OrderMode::Skip)
            .await
    }

    /// Steps 3–6 plus finalization. Nothing in here aborts the attempt.
    async fn run_best_effort_steps(
        &self,
        session: &SessionRow,
        token: &str,
        order_mode: OrderMode,
    ) -> Result<SettlementOutcome> {
        let questions = self.store.questions_for_session(session.id)?;
        let (answers, score_percent) = score_answers(&questions);
        let completion_minutes = (Utc::now() - session.created_at).num_minutes();

        // Step 3: bulk answer submission.
        let bundle = SubmissionBundle {
            external_ref: session.external_user_ref.clone(),
            answers: answers.clone(),
            score_percent,
            completion_minutes,
        };
        let submission: StepResult<ApiEnvelope> =
            self.assess.submit_answers(token, &bundle).await.into();
        if let Some(message) = submission.failure() {
            warn!(session_id = session.id, message, "answer submission failed");
        }

        // Step 4: certificate claim.
        let certificate: StepResult<ApiEnvelope> = self
            .assess
            .claim_certificate(token, &session.external_user_ref)
            .await
            .into();
        if let Some(message) = certificate.failure() {
            warn!(session_id = session.id, message, "certificate claim failed");
        }

        // Step 5: paid-test/order creation.
        let order = match order_mode {
            OrderMode::Skip => None,
            OrderMode::Create => Some(self.create_order(session, token).await),
        };

        // Step 6: analysis retrieval. Never raises.
        let analysis = self.fetch_analysis(session, token).await;

        // Finalization: exactly one session update.
        let payload = serde_json::to_string(&answers)?;
        let outcome = SettlementOutcome {
            session_id: session.id,
            answers,
            score_percent,
            completion_minutes,
            submission,
            certificate,
            order,
            analysis,
        };
        self.store.finalize_session(
            session.id,
            outcome.analysis.success,
            &payload,
            outcome.order_id(),
        )?;

        info!(
            session_id = session.id,
            score_percent,
            submitted = outcome.submission.is_ok(),
            certificate = outcome.certificate.is_ok(),
            order = outcome.order_id().is_some(),
            analysis = outcome.analysis.success,
            "session settled"
        );
        Ok(outcome)
    }

    async fn create_order(&self, session: &SessionRow, token: &str) -> StepResult<String> {
        let descriptor = OrderDescriptor {
            external_ref: session.external_user_ref.clone(),
            product_code: self.product_code.clone(),
        };
        match self.assess.create_order(token, &descriptor).await {
            Ok(receipt) => {
                if let Err(err) = self.store.set_order_id(session.id, &receipt.order_id) {
                    warn!(
                        session_id = session.id,
                        error = %err,
                        "order created but could not be persisted"
                    );
                    return StepResult::Failed {
                        message: err.to_string(),
                    };
                }
                StepResult::Ok {
                    payload: receipt.order_id,
                }
            }
            Err(err) => {
                warn!(session_id = session.id, error = %err, "order creation failed");
                StepResult::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    async fn fetch_analysis(&self, session: &SessionRow, token: &str) -> AnalysisOutcome {
        match self
            .assess
            .fetch_analysis(token, &session.external_user_ref)
            .await
        {
            Ok(document) => AnalysisOutcome {
                success: true,
                message: document.message,
                error: None,
            },
            Err(err) => {
                warn!(session_id = session.id, error = %err, "analysis retrieval failed");
                AnalysisOutcome {
                    success: false,
                    message: "analysis unavailable".to_string(),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderMode {
    Create,
    Skip,
}

// ============================================================================
// Scoring
// ============================================================================

/// Derives the deterministic password sent with the identity fields.
fn derive_password(external_ref: &str, secret: &str) -> String {
    format!("{external_ref}:{secret}")
}

/// Reconstructs the scored answer array from the ledger rows.
///
/// The recorded letter is mapped back to its display text by parsing the
/// option lines out of the stored prompt; an unanswered question or an
/// unmapped letter submits as [`NO_ANSWER`]. Returns the array together with
/// the percentage score.
fn score_answers(questions: &[QuestionRow]) -> (Vec<SubmittedAnswer>, u32) {
    let mut answers = Vec::with_capacity(questions.len());
    let mut correct_count: usize = 0;

    for question in questions {
        let letter = question.answer.trim().to_uppercase();
        let correct =
            question.answered && letter == question.correct_answer.trim().to_uppercase();
        if correct {
            correct_count += 1;
        }

        let answer_text = if question.answered {
            option_text(&question.prompt, &letter).unwrap_or_else(|| NO_ANSWER.to_string())
        } else {
            NO_ANSWER.to_string()
        };

        answers.push(SubmittedAnswer {
            question_no: question.question_no,
            bank_id: question.bank_id,
            answer_text,
            correct,
        });
    }

    let score_percent = if questions.is_empty() {
        0
    } else {
        let percent = correct_count * 100 / questions.len();
        u32::try_from(percent).unwrap_or(100)
    };
    (answers, score_percent)
}

/// Recovers the display text for an option letter from the prompt's option
/// lines (`A) text`, `B. text`, `C: text`).
fn option_text(prompt: &str, letter: &str) -> Option<String> {
    // Prompt formatting and data live together in the stored text, so the
    // option table is re-derived from it at settlement time.
    let Ok(re) = Regex::new(r"(?m)^\s*([A-D])[).:]\s*(.+)$") else {
        return None;
    };
    let result = re
        .captures_iter(prompt)
        .find(|cap| cap.get(1).map(|m| m.as_str()) == Some(letter))
        .and_then(|cap| cap.get(2).map(|m| m.as_str().trim().to_string()));
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn answered_question(question_no: u32, answer: &str, correct_answer: &str) -> QuestionRow {
        QuestionRow {
            id: i64::from(question_no),
            session_id: 1,
            user_id: 1,
            question_no,
            prompt: "Pick one.\nA) alpha\nB) beta\nC) gamma\nD) delta".to_string(),
            answer: answer.to_string(),
            correct_answer: correct_answer.to_string(),
            answered: !answer.is_empty(),
            bank_id: 99,
            scenario: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_option_text_maps_letters() {
        let prompt = "Which?\nA) first\nB. second\nC: third\nD) fourth";
        assert_eq!(option_text(prompt, "A").as_deref(), Some("first"));
        assert_eq!(option_text(prompt, "B").as_deref(), Some("second"));
        assert_eq!(option_text(prompt, "C").as_deref(), Some("third"));
        assert_eq!(option_text(prompt, "E"), None);
    }

    #[test]
    fn test_score_answers_maps_letters_to_display_text() {
        let questions = vec![
            answered_question(1, "B", "B"),
            answered_question(2, "a", "B"),
        ];
        let (answers, score) = score_answers(&questions);

        assert_eq!(answers[0].answer_text, "beta");
        assert!(answers[0].correct);
        // Lowercase letters are normalized before mapping and comparison.
        assert_eq!(answers[1].answer_text, "alpha");
        assert!(!answers[1].correct);
        assert_eq!(score, 50);
    }

    #[test]
    fn test_score_answers_unanswered_uses_sentinel() {
        let questions = vec![
            answered_question(1, "", "A"),
            answered_question(2, "A", "A"),
        ];
        let (answers, score) = score_answers(&questions);

        assert_eq!(answers[0].answer_text, NO_ANSWER);
        assert!(!answers[0].correct);
        assert_eq!(score, 50);
    }

    #[test]
    fn test_score_answers_unmapped_letter_uses_sentinel_but_still_scores() {
        let mut question = answered_question(1, "B", "B");
        question.prompt = "No options here at all".to_string();
        let (answers, score) = score_answers(&[question]);

        // The letter matched the correct answer even though the display text
        // could not be recovered.
        assert_eq!(answers[0].answer_text, NO_ANSWER);
        assert!(answers[0].correct);
        assert_eq!(score, 100);
    }

    #[test]
    fn test_score_answers_empty_ledger() {
        let (answers, score) = score_answers(&[]);
        assert!(answers.is_empty());
        assert_eq!(score, 0);
    }

    #[test]
    fn test_derive_password_is_deterministic() {
        assert_eq!(
            derive_password("ext-100", "sekrit"),
            derive_password("ext-100", "sekrit")
        );
        assert_ne!(
            derive_password("ext-100", "sekrit"),
            derive_password("ext-101", "sekrit")
        );
    }

    #[test]
    fn test_step_result_accessors() {
        let ok: StepResult<u32> = StepResult::Ok { payload: 7 };
        assert!(ok.is_ok());
        assert_eq!(ok.payload(), Some(&7));
        assert!(ok.failure().is_none());

        let failed: StepResult<u32> = StepResult::Failed {
            message: "backend said no".to_string(),
        };
        assert!(!failed.is_ok());
        assert_eq!(failed.failure(), Some("backend said no"));
    }

    #[test]
    fn test_step_result_serializes_with_status_tag() {
        let ok: StepResult<u32> = StepResult::Ok { payload: 7 };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""status":"ok""#));

        let failed: StepResult<u32> = StepResult::Failed {
            message: "nope".to_string(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains(r#""status":"failed""#));
    }
}
