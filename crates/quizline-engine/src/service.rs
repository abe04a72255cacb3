//! Quiz service façade.
//!
//! The explicit dependency-injection point: every collaborator is constructed
//! once at process start and passed in, so tests can substitute fakes and no
//! component reaches for a shared global.

use std::sync::Arc;

use quizline_assess::AssessClient;
use quizline_store::{NewQuestion, NextStep, QuestionRow, SessionRow, Store};

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{SettleOptions, SettlementOutcome, SettlementPipeline};
use crate::selector::{select_questions, QuestionPool};

/// The quiz engine's front door: session creation, answer progression, and
/// settlement, over a shared store and assessment client.
#[derive(Debug, Clone)]
pub struct QuizService {
    store: Arc<Store>,
    pipeline: SettlementPipeline,
    skip_order_creation: bool,
}

impl QuizService {
    /// Wires the service from its collaborators.
    #[must_use]
    pub fn new(store: Arc<Store>, assess: AssessClient, config: &Config) -> Self {
        let pipeline = SettlementPipeline::new(
            Arc::clone(&store),
            assess,
            config.credential_secret.clone(),
            config.product_code.clone(),
        );
        Self {
            store,
            pipeline,
            skip_order_creation: config.skip_order_creation,
        }
    }

    /// Starts a quiz for the user: creates the session, carves the question
    /// set out of the pool, and persists the rows in ordinal order.
    pub fn start_quiz(
        &self,
        user_id: i64,
        pool: &QuestionPool,
    ) -> Result<(SessionRow, Vec<QuestionRow>)> {
        let user = self.store.get_user(user_id)?;
        let session = self.store.create_session(user_id, &user.external_ref)?;
        let selected = select_questions(pool);
        let new_questions: Vec<NewQuestion> = selected.into_iter().map(Into::into).collect();
        let rows = self
            .store
            .create_questions(&new_questions, session.id, user_id)?;
        Ok((session, rows))
    }

    /// Records an answer and returns the next question or the completion
    /// signal.
    pub fn save_answer(
        &self,
        question_id: i64,
        answer: &str,
        session_id: i64,
    ) -> Result<NextStep> {
        Ok(self
            .store
            .save_answer_and_get_next(question_id, answer, session_id)?)
    }

    /// All question rows for a session, in ordinal order.
    pub fn questions(&self, session_id: i64) -> Result<Vec<QuestionRow>> {
        Ok(self.store.questions_for_session(session_id)?)
    }

    /// Settles a session through the full pipeline. Order creation follows
    /// the configured skip flag.
    pub async fn settle(&self, session_id: i64) -> Result<SettlementOutcome> {
        self.pipeline
            .settle(
                session_id,
                SettleOptions {
                    skip_order: self.skip_order_creation,
                },
            )
            .await
    }

    /// Settles a session with an already-valid bearer credential, skipping
    /// credential exchange, persistence, and order creation.
    pub async fn settle_with_token(
        &self,
        session_id: i64,
        token: &str,
    ) -> Result<SettlementOutcome> {
        self.pipeline.settle_with_token(session_id, token).await
    }
}
