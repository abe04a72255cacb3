//! The question ledger: per-session question rows and their progression.
//!
//! Ordinals impose a strict linear progression contract: rows are inserted
//! with contiguous 1-based positions, answers are recorded against a
//! (question, session) pair, and the next question is always the one at
//! ordinal + 1 — its absence is the quiz-completion signal.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::store::{now_string, ts};
use crate::{
    NewQuestion, NextStep, QuestionRow, Result, Store, StoreError, HARD_SCENARIO_NO,
    MEDIUM_SCENARIO_NO,
};

impl Store {
    /// Inserts the selected questions for a session, in order, with 1-based
    /// ordinal positions.
    ///
    /// The session must exist and belong to `user_id`; otherwise the call
    /// fails fast with [`StoreError::SessionNotFound`] before any insert.
    /// Scenario text is persisted only at the designated medium and hard
    /// ordinals ([`MEDIUM_SCENARIO_NO`], [`HARD_SCENARIO_NO`]).
    ///
    /// Insertion is attempted row-by-row. A referential-integrity violation
    /// triggers a session re-check to distinguish "session deleted
    /// mid-insert" (reported as [`StoreError::SessionNotFound`], remaining
    /// inserts abandoned) from any other integrity problem (reported
    /// verbatim as [`StoreError::IntegrityConflict`]).
    ///
    /// Returns the full ordered list of created rows.
    pub fn create_questions(
        &self,
        questions: &[NewQuestion],
        session_id: i64,
        user_id: i64,
    ) -> Result<Vec<QuestionRow>> {
        let conn = self.lock();
        Self::verify_session_owner(&conn, session_id, user_id)?;

        let mut created = Vec::with_capacity(questions.len());
        let mut question_no: u32 = 0;
        for question in questions {
            question_no += 1;
            let scenario = scenario_for_ordinal(question_no, question.scenario.as_deref());
            let now = now_string();
            let inserted = conn.execute(
                "INSERT INTO questions
                     (session_id, user_id, question_no, prompt, answer, correct_answer,
                      answered, bank_id, scenario, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, '', ?5, 0, ?6, ?7, ?8, ?8)",
                params![
                    session_id,
                    user_id,
                    question_no,
                    question.prompt,
                    question.correct_answer,
                    question.bank_id,
                    scenario,
                    now,
                ],
            );
            match inserted {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    created.push(Self::question_by_id(&conn, id)?);
                }
                Err(err) if is_constraint_violation(&err) => {
                    // Disambiguate: did the session vanish under us?
                    if let Err(StoreError::SessionNotFound { .. }) =
                        Self::session_by_id(&conn, session_id)
                    {
                        warn!(session_id, question_no, "session deleted mid-insert");
                        return Err(StoreError::SessionNotFound { session_id });
                    }
                    return Err(StoreError::IntegrityConflict {
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!(session_id, count = created.len(), "questions created");
        Ok(created)
    }

    /// Records an answer and returns what to present next.
    ///
    /// A single transaction marks the question answered — scoped by both
    /// question id and session id, so an answer can never land in another
    /// session's row — and reads the question at the following ordinal. The
    /// answered question keeps its ordinal; re-saving overwrites the answer
    /// and nothing else.
    ///
    /// A missing next ordinal means the quiz is complete. A present one is
    /// returned together with its scenario, surfaced only at the designated
    /// ordinals and only when the stored text is non-blank after trimming.
    pub fn save_answer_and_get_next(
        &self,
        question_id: i64,
        answer: &str,
        session_id: i64,
    ) -> Result<NextStep> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE questions
             SET answer = ?1, answered = 1, updated_at = ?2
             WHERE id = ?3 AND session_id = ?4",
            params![answer, now_string(), question_id, session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::QuestionNotFound {
                question_id,
                session_id,
            });
        }

        let answered_no: u32 = tx.query_row(
            "SELECT question_no FROM questions WHERE id = ?1",
            params![question_id],
            |row| row.get(0),
        )?;
        let next = tx
            .query_row(
                &question_select("WHERE session_id = ?1 AND question_no = ?2"),
                params![session_id, answered_no + 1],
                Self::map_question_row,
            )
            .optional()?;
        tx.commit()?;

        match next {
            None => {
                debug!(session_id, answered_no, "quiz complete");
                Ok(NextStep::Complete)
            }
            Some(question) => {
                let scenario = presentable_scenario(&question);
                Ok(NextStep::Next { question, scenario })
            }
        }
    }

    /// All question rows for a session, in ordinal order.
    pub fn questions_for_session(&self, session_id: i64) -> Result<Vec<QuestionRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&question_select(
            "WHERE session_id = ?1 ORDER BY question_no",
        ))?;
        let rows = stmt.query_map(params![session_id], Self::map_question_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Direct answer update by question id, no progression lookup.
    pub fn update_question_answer(&self, question_id: i64, answer: &str) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE questions SET answer = ?1, answered = 1, updated_at = ?2 WHERE id = ?3",
            params![answer, now_string(), question_id],
        )?;
        if updated == 0 {
            return Err(StoreError::QuestionNotFound {
                question_id,
                session_id: 0,
            });
        }
        Ok(())
    }

    fn verify_session_owner(conn: &Connection, session_id: i64, user_id: i64) -> Result<()> {
        let owned: Option<i64> = conn
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1 AND user_id = ?2",
                params![session_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(StoreError::SessionNotFound { session_id });
        }
        Ok(())
    }

    fn question_by_id(conn: &Connection, id: i64) -> Result<QuestionRow> {
        Ok(conn.query_row(
            &question_select("WHERE id = ?1"),
            params![id],
            Self::map_question_row,
        )?)
    }

    fn map_question_row(row: &Row<'_>) -> rusqlite::Result<QuestionRow> {
        Ok(QuestionRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            question_no: row.get(3)?,
            prompt: row.get(4)?,
            answer: row.get(5)?,
            correct_answer: row.get(6)?,
            answered: row.get(7)?,
            bank_id: row.get(8)?,
            scenario: row.get(9)?,
            created_at: ts(row, 10)?,
            updated_at: ts(row, 11)?,
        })
    }
}

fn question_select(tail: &str) -> String {
    format!(
        "SELECT id, session_id, user_id, question_no, prompt, answer, correct_answer,
                answered, bank_id, scenario, created_at, updated_at
         FROM questions {tail}"
    )
}

/// Scenario text to persist at the given ordinal: the question's own text at
/// the designated ordinals, empty everywhere else.
fn scenario_for_ordinal(question_no: u32, scenario: Option<&str>) -> String {
    if question_no == MEDIUM_SCENARIO_NO || question_no == HARD_SCENARIO_NO {
        scenario.unwrap_or_default().to_string()
    } else {
        String::new()
    }
}

/// Scenario text to surface with a next-question payload, or `None`.
fn presentable_scenario(question: &QuestionRow) -> Option<String> {
    let designated = question.question_no == MEDIUM_SCENARIO_NO
        || question.question_no == HARD_SCENARIO_NO;
    if !designated {
        return None;
    }
    let trimmed = question.scenario.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
    )
}
