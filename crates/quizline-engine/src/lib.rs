//! Quizline Engine
//!
//! Drives a conversational ten-question quiz: carves the question set out of
//! the bank pool, walks the session through answer-save/next-question
//! progression, settles completed sessions against the external assessment
//! system, and re-engages sessions that stalled on question one.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod selector;
pub mod service;

pub use config::Config;
pub use error::{QuizError, Result};
pub use pipeline::{
    AnalysisOutcome, SettleOptions, SettlementOutcome, SettlementPipeline, StepResult, NO_ANSWER,
};
pub use reconcile::{Reconciler, TickSummary};
pub use selector::{select_questions, PoolQuestion, QuestionPool, SelectedQuestion, Tier};
pub use service::QuizService;
