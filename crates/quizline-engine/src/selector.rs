//! Question distribution selector.
//!
//! Carves a fixed 4/3/3 easy/medium/hard question set out of a variable-size
//! pool. The bank does not guarantee a clean split or scenario placement, so
//! the selector degrades gracefully — fewer questions rather than a failed
//! quiz — while keeping the scenario-bearing question first in its tier.

use serde::{Deserialize, Serialize};
use tracing::warn;

use quizline_store::NewQuestion;

/// Tier quotas: positions 1–4 easy, 5–7 medium, 8–10 hard.
const EASY_QUOTA: usize = 4;
const MEDIUM_QUOTA: usize = 3;
const HARD_QUOTA: usize = 3;

/// Bank identifiers preferred per tier, tried before backfilling from the
/// start of the tier's pool.
const EASY_PREFERRED: &[i64] = &[101, 102, 104, 107];
const MEDIUM_PREFERRED: &[i64] = &[203, 205, 208];
const HARD_PREFERRED: &[i64] = &[301, 304, 309];

/// Difficulty class partitioning the question bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Positions 1–4.
    Easy,
    /// Positions 5–7.
    Medium,
    /// Positions 8–10.
    Hard,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Easy => write!(f, "easy"),
            Self::Medium => write!(f, "medium"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

/// A candidate question from the external bank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolQuestion {
    /// Identifier in the external bank. May recur across tiers.
    pub bank_id: i64,
    /// Formatted question text, options included.
    pub prompt: String,
    /// Correct answer letter.
    pub correct_answer: String,
    /// Raw code snippet accompanying the question, if any.
    #[serde(default)]
    pub code_snippet: Option<String>,
    /// Scenario title, if the question carries scenario metadata.
    #[serde(default)]
    pub scenario_title: Option<String>,
    /// Contextual scenario text, if the question carries scenario metadata.
    #[serde(default)]
    pub scenario_text: Option<String>,
}

impl PoolQuestion {
    /// Returns `true` if the question carries non-empty scenario metadata:
    /// either a scenario title or contextual text.
    #[must_use]
    pub fn has_scenario(&self) -> bool {
        let non_blank = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        non_blank(&self.scenario_title) || non_blank(&self.scenario_text)
    }

    /// Combines title and contextual text into a single scenario string.
    fn scenario(&self) -> Option<String> {
        let title = self
            .scenario_title
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let text = self
            .scenario_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (title, text) {
            (Some(title), Some(text)) => Some(format!("{title}\n\n{text}")),
            (Some(one), None) | (None, Some(one)) => Some(one.to_string()),
            (None, None) => None,
        }
    }
}

/// A raw question pool partitioned into the three difficulty tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionPool {
    /// Easy-tier candidates.
    pub easy: Vec<PoolQuestion>,
    /// Medium-tier candidates.
    pub medium: Vec<PoolQuestion>,
    /// Hard-tier candidates.
    pub hard: Vec<PoolQuestion>,
}

/// A question selected for a session, re-tagged with its position.
///
/// The position identifier replaces the bank identifier as the question's
/// identity so identifiers stay collision-free even when the same bank id
/// recurs across tiers; the bank id is kept alongside for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedQuestion {
    /// Sequential position identifier, 1..N.
    pub position: u32,
    /// Original identifier in the external bank.
    pub bank_id: i64,
    /// Prompt, augmented with a fenced code block when a snippet exists and
    /// is not already embedded.
    pub prompt: String,
    /// Correct answer letter.
    pub correct_answer: String,
    /// Combined scenario text carried by this question, if any.
    pub scenario: Option<String>,
}

impl From<SelectedQuestion> for NewQuestion {
    fn from(selected: SelectedQuestion) -> Self {
        Self {
            prompt: selected.prompt,
            correct_answer: selected.correct_answer,
            bank_id: selected.bank_id,
            scenario: selected.scenario,
        }
    }
}

/// Selects up to ten questions from the pool: four easy, three medium, three
/// hard, concatenated in tier order with sequential position identifiers.
///
/// Quotas are soft targets — an under-supplied tier yields fewer questions
/// and a warning, never a failure. Within the medium and hard tiers the first
/// scenario-bearing candidate is promoted to the tier's first slot.
#[must_use]
pub fn select_questions(pool: &QuestionPool) -> Vec<SelectedQuestion> {
    let mut picked = Vec::with_capacity(EASY_QUOTA + MEDIUM_QUOTA + HARD_QUOTA);
    picked.extend(pick_tier(&pool.easy, EASY_PREFERRED, EASY_QUOTA, Tier::Easy));
    picked.extend(pick_tier(
        &pool.medium,
        MEDIUM_PREFERRED,
        MEDIUM_QUOTA,
        Tier::Medium,
    ));
    picked.extend(pick_tier(&pool.hard, HARD_PREFERRED, HARD_QUOTA, Tier::Hard));

    let mut selected = Vec::with_capacity(picked.len());
    let mut position: u32 = 0;
    for candidate in picked {
        position += 1;
        selected.push(SelectedQuestion {
            position,
            bank_id: candidate.bank_id,
            prompt: augment_prompt(&candidate),
            correct_answer: candidate.correct_answer.clone(),
            scenario: candidate.scenario(),
        });
    }
    selected
}

/// Picks up to `quota` candidates from one tier: whitelist matches first, then
/// backfill from the start of the pool, then scenario promotion for the
/// medium and hard tiers.
fn pick_tier(
    candidates: &[PoolQuestion],
    preferred: &[i64],
    quota: usize,
    tier: Tier,
) -> Vec<PoolQuestion> {
    let mut chosen: Vec<usize> = Vec::with_capacity(quota);

    for (index, candidate) in candidates.iter().enumerate() {
        if chosen.len() == quota {
            break;
        }
        if preferred.contains(&candidate.bank_id) {
            chosen.push(index);
        }
    }

    // Backfill from the start of the pool until the quota is met or the pool
    // is exhausted.
    for index in 0..candidates.len() {
        if chosen.len() == quota {
            break;
        }
        if !chosen.contains(&index) {
            chosen.push(index);
        }
    }
    chosen.sort_unstable();

    if chosen.len() < quota {
        warn!(
            %tier,
            have = chosen.len(),
            quota,
            "question pool under-supplied"
        );
    }

    let mut tier_questions: Vec<PoolQuestion> =
        chosen.into_iter().map(|i| candidates[i].clone()).collect();

    if matches!(tier, Tier::Medium | Tier::Hard) {
        promote_first_scenario(&mut tier_questions);
    }
    tier_questions
}

/// Moves the first scenario-bearing question to the front, preserving the
/// relative order of the rest.
fn promote_first_scenario(questions: &mut Vec<PoolQuestion>) {
    if let Some(index) = questions.iter().position(PoolQuestion::has_scenario) {
        let promoted = questions.remove(index);
        questions.insert(0, promoted);
    }
}

/// Appends the question's code snippet as a fenced block unless the prompt
/// already embeds it.
fn augment_prompt(candidate: &PoolQuestion) -> String {
    let Some(snippet) = candidate
        .code_snippet
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return candidate.prompt.clone();
    };
    if candidate.prompt.contains(snippet) {
        return candidate.prompt.clone();
    }
    format!("{}\n\n```\n{snippet}\n```", candidate.prompt)
}
