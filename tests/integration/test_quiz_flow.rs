//! End-to-end quiz flow: pool selection, question persistence, and the full
//! answer-save/next-question progression down to the completion signal.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use quizline_assess::AssessClient;
use quizline_engine::{Config, PoolQuestion, QuestionPool, QuizService};
use quizline_store::{NextStep, Store};

fn bank_question(bank_id: i64) -> PoolQuestion {
    PoolQuestion {
        bank_id,
        prompt: format!("Question {bank_id}?\nA) alpha\nB) beta\nC) gamma\nD) delta"),
        correct_answer: "B".to_string(),
        ..Default::default()
    }
}

fn full_pool() -> QuestionPool {
    QuestionPool {
        easy: (1..=6).map(bank_question).collect(),
        medium: (11..=15).map(bank_question).collect(),
        hard: (21..=24).map(bank_question).collect(),
    }
}

fn service() -> (QuizService, i64) {
    let store = Arc::new(Store::in_memory().unwrap());
    let user = store
        .create_user(Some("+15550100"), Some("Avery Quinn"), "ext-100")
        .unwrap();
    let config = Config::default();
    let assess = AssessClient::new(config.assess_base_url.clone(), Duration::from_secs(10));
    (QuizService::new(store, assess, &config), user.id)
}

#[tokio::test]
async fn test_full_quiz_progression() {
    let (service, user_id) = service();
    let (session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();

    assert_eq!(rows.len(), 10);
    let ordinals: Vec<u32> = rows.iter().map(|q| q.question_no).collect();
    assert_eq!(ordinals, (1..=10).collect::<Vec<u32>>());

    // Answer all ten sequentially; only the tenth call reports completion.
    for (index, row) in rows.iter().enumerate() {
        let step = service.save_answer(row.id, "B", session.id).unwrap();
        match step {
            NextStep::Next { question, .. } => {
                assert!(index < 9, "completion expected on the tenth answer");
                assert_eq!(question.question_no as usize, index + 2);
            }
            NextStep::Complete => assert_eq!(index, 9),
        }
    }

    // Every row is answered, in ordinal order.
    let all = service.questions(session.id).unwrap();
    assert_eq!(all.len(), 10);
    assert!(all.iter().all(|q| q.answered));
    let ordinals: Vec<u32> = all.iter().map(|q| q.question_no).collect();
    assert_eq!(ordinals, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_selected_tiers_map_to_position_blocks() {
    let (service, user_id) = service();
    let (_session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();

    // Positions 1-4 easy bank ids, 5-7 medium, 8-10 hard.
    assert!(rows[..4].iter().all(|q| q.bank_id <= 6));
    assert!(rows[4..7].iter().all(|q| (11..=15).contains(&q.bank_id)));
    assert!(rows[7..].iter().all(|q| q.bank_id >= 21));
}

#[tokio::test]
async fn test_scenario_flows_from_pool_to_presented_question() {
    let (service, user_id) = service();
    let mut pool = full_pool();
    // The first medium candidate is the promoted scenario-bearer and opens
    // the medium block; the second lands at the designated scenario ordinal,
    // so its text is the one persisted and surfaced.
    pool.medium[0].scenario_title = Some("Warm-up".to_string());
    pool.medium[1].scenario_text = Some("A deploy went wrong at midnight.".to_string());

    let (session, rows) = service.start_quiz(user_id, &pool).unwrap();

    // The promoted candidate sits at the first medium position (ordinal 5);
    // scenario text is only persisted at the designated ordinal, 6.
    assert_eq!(rows[4].bank_id, 11);
    assert!(rows[4].scenario.is_empty());
    assert_eq!(rows[5].bank_id, 12);
    assert_eq!(rows[5].scenario, "A deploy went wrong at midnight.");

    // Walking the quiz surfaces that scenario exactly when question 6 is
    // presented, and nowhere else before it.
    for row in &rows[..4] {
        match service.save_answer(row.id, "B", session.id).unwrap() {
            NextStep::Next { scenario, .. } => assert!(scenario.is_none()),
            NextStep::Complete => panic!("quiz ended early"),
        }
    }
    match service.save_answer(rows[4].id, "B", session.id).unwrap() {
        NextStep::Next { question, scenario } => {
            assert_eq!(question.question_no, 6);
            assert_eq!(
                scenario.as_deref(),
                Some("A deploy went wrong at midnight.")
            );
        }
        NextStep::Complete => panic!("quiz ended early"),
    }
}

#[tokio::test]
async fn test_under_supplied_pool_still_walks_to_completion() {
    let (service, user_id) = service();
    let pool = QuestionPool {
        easy: (1..=2).map(bank_question).collect(),
        medium: (11..=12).map(bank_question).collect(),
        hard: (21..=22).map(bank_question).collect(),
    };
    let (session, rows) = service.start_quiz(user_id, &pool).unwrap();

    assert_eq!(rows.len(), 6);
    for (index, row) in rows.iter().enumerate() {
        let step = service.save_answer(row.id, "A", session.id).unwrap();
        assert_eq!(step.is_complete(), index == rows.len() - 1);
    }
}

#[tokio::test]
async fn test_resave_keeps_progression_stable() {
    let (service, user_id) = service();
    let (session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();

    service.save_answer(rows[0].id, "A", session.id).unwrap();
    let step = service.save_answer(rows[0].id, "C", session.id).unwrap();
    match step {
        NextStep::Next { question, .. } => assert_eq!(question.question_no, 2),
        NextStep::Complete => panic!("quiz ended early"),
    }

    let all = service.questions(session.id).unwrap();
    assert_eq!(all[0].answer, "C");
    assert_eq!(all[0].question_no, 1);
}
