//! Settlement pipeline and reconciliation against a live stub backend.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;

use quizline_assess::{AssessClient, EngageClient};
use quizline_engine::{Config, PoolQuestion, QuestionPool, QuizService, Reconciler, TickSummary};
use quizline_store::Store;

/// Call counters for the stub assessment backend.
#[derive(Debug, Default)]
struct BackendCalls {
    token: AtomicUsize,
    submission: AtomicUsize,
    certificate: AtomicUsize,
    order: AtomicUsize,
    analysis: AtomicUsize,
    nudge: AtomicUsize,
}

/// Serves a fully-successful stub backend (assessment endpoints plus the
/// re-engagement endpoint) and returns its base URL with the call counters.
async fn stub_backend() -> (String, Arc<BackendCalls>) {
    let calls = Arc::new(BackendCalls::default());

    let router = Router::new()
        .route(
            "/auth/token",
            post(|State(calls): State<Arc<BackendCalls>>| async move {
                calls.token.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({
                    "result": "success",
                    "message": "granted",
                    "token": "tok-int",
                    "expires_at": "2026-08-07T23:59:59Z",
                }))
            }),
        )
        .route(
            "/responses",
            post(|State(calls): State<Arc<BackendCalls>>| async move {
                calls.submission.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({"result": "success", "message": "recorded"}))
            }),
        )
        .route(
            "/certificates/claim",
            post(|State(calls): State<Arc<BackendCalls>>| async move {
                calls.certificate.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({"result": "success", "message": "claimed"}))
            }),
        )
        .route(
            "/orders",
            post(|State(calls): State<Arc<BackendCalls>>| async move {
                calls.order.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({
                    "result": "success",
                    "message": "created",
                    "order_id": "ord-int-1",
                }))
            }),
        )
        .route(
            "/analysis",
            get(|State(calls): State<Arc<BackendCalls>>| async move {
                calls.analysis.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({
                    "result": "success",
                    "message": "ready",
                    "status_code": 200,
                    "analysis": {"strengths": ["recall"], "gaps": ["syntax"]},
                }))
            }),
        )
        .route(
            "/nudge",
            post(|State(calls): State<Arc<BackendCalls>>| async move {
                calls.nudge.fetch_add(1, Ordering::SeqCst);
                axum::http::StatusCode::OK
            }),
        )
        .with_state(Arc::clone(&calls));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{addr}"), calls)
}

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
        easy: (1..=4).map(bank_question).collect(),
        medium: (11..=13).map(bank_question).collect(),
        hard: (21..=23).map(bank_question).collect(),
    }
}

fn wire(base_url: &str) -> (Arc<Store>, QuizService, i64) {
    let store = Arc::new(Store::in_memory().unwrap());
    let user = store
        .create_user(Some("+15550100"), Some("Avery Quinn"), "ext-100")
        .unwrap();
    let config = Config {
        assess_base_url: base_url.to_string(),
        engage_url: format!("{base_url}/nudge"),
        ..Config::default()
    };
    let assess = AssessClient::new(base_url, Duration::from_secs(10));
    let service = QuizService::new(Arc::clone(&store), assess, &config);
    (store, service, user.id)
}

#[tokio::test]
async fn test_full_journey_quiz_to_settlement() {
    let (base_url, calls) = stub_backend().await;
    let (store, service, user_id) = wire(&base_url);

    let (session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();
    for row in &rows {
        service.save_answer(row.id, "B", session.id).unwrap();
    }

    let outcome = service.settle(session.id).await.unwrap();
    assert!(outcome.submission.is_ok());
    assert!(outcome.certificate.is_ok());
    assert_eq!(outcome.order_id(), Some("ord-int-1"));
    assert!(outcome.analysis.success);
    assert_eq!(outcome.score_percent, 100);

    let settled = store.get_session(session.id).unwrap();
    assert!(settled.quiz_completed);
    assert!(settled.quiz_analysis_generated);
    assert_eq!(settled.bearer_token.as_deref(), Some("tok-int"));
    assert_eq!(settled.order_id.as_deref(), Some("ord-int-1"));

    // Each settlement step was called exactly once.
    assert_eq!(calls.token.load(Ordering::SeqCst), 1);
    assert_eq!(calls.submission.load(Ordering::SeqCst), 1);
    assert_eq!(calls.certificate.load(Ordering::SeqCst), 1);
    assert_eq!(calls.order.load(Ordering::SeqCst), 1);
    assert_eq!(calls.analysis.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_forced_submission_scores_unanswered_as_no_answer() {
    let (base_url, _calls) = stub_backend().await;
    let (store, service, user_id) = wire(&base_url);

    let (session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();
    // Only the first three questions get answered before a forced submit.
    for row in &rows[..3] {
        service.save_answer(row.id, "B", session.id).unwrap();
    }

    let outcome = service.settle(session.id).await.unwrap();
    assert_eq!(outcome.score_percent, 30);
    assert_eq!(outcome.answers.len(), 10);
    assert!(outcome.answers[..3]
        .iter()
        .all(|a| a.correct && a.answer_text == "beta"));
    assert!(outcome.answers[3..]
        .iter()
        .all(|a| !a.correct && a.answer_text == "no answer"));

    // The persisted payload carries the same sentinel entries.
    let payload = store
        .get_session(session.id)
        .unwrap()
        .settlement_payload
        .unwrap();
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&payload).unwrap();
    assert_eq!(parsed.len(), 10);
    assert_eq!(parsed[9]["answer_text"], "no answer");
}

#[tokio::test]
async fn test_reconciliation_fires_once_per_stalled_session() {
    let (base_url, calls) = stub_backend().await;
    let (store, service, user_id) = wire(&base_url);

    // A session with questions but no answers: stalled on question one.
    let (session, _rows) = service.start_quiz(user_id, &full_pool()).unwrap();
    let created = store.get_session(session.id).unwrap().created_at;

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        EngageClient::new(format!("{base_url}/nudge"), Duration::from_secs(10)),
        Duration::from_secs(60),
    );

    // 5.5 minutes after creation the session is inside the window.
    let now = created + ChronoDuration::seconds(330);
    let summary = reconciler.tick(now).await;
    assert_eq!(
        summary,
        TickSummary {
            processed: 1,
            triggered: 1,
            errors: 0
        }
    );
    assert_eq!(calls.nudge.load(Ordering::SeqCst), 1);

    let stamped = store.get_session(session.id).unwrap();
    assert!(stamped.reconciliation_fired_at.is_some());

    // Later ticks never re-engage: the stamp excludes the session even while
    // it is still inside the age window.
    let summary = reconciler.tick(now).await;
    assert_eq!(summary, TickSummary::default());
    let summary = reconciler.tick(created + ChronoDuration::seconds(350)).await;
    assert_eq!(summary, TickSummary::default());
    assert_eq!(calls.nudge.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_answered_session_is_never_reconciled() {
    let (base_url, calls) = stub_backend().await;
    let (store, service, user_id) = wire(&base_url);

    let (session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();
    service.save_answer(rows[0].id, "B", session.id).unwrap();
    let created = store.get_session(session.id).unwrap().created_at;

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        EngageClient::new(format!("{base_url}/nudge"), Duration::from_secs(10)),
        Duration::from_secs(60),
    );

    let summary = reconciler.tick(created + ChronoDuration::seconds(330)).await;
    assert_eq!(summary, TickSummary::default());
    assert_eq!(calls.nudge.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_settle_with_token_variant_records_null_order() {
    let (base_url, calls) = stub_backend().await;
    let (store, service, user_id) = wire(&base_url);

    let (session, rows) = service.start_quiz(user_id, &full_pool()).unwrap();
    for row in &rows {
        service.save_answer(row.id, "B", session.id).unwrap();
    }

    let outcome = service
        .settle_with_token(session.id, "tok-held")
        .await
        .unwrap();
    assert!(outcome.submission.is_ok());
    assert!(outcome.order.is_none());

    let settled = store.get_session(session.id).unwrap();
    assert!(settled.quiz_completed);
    assert!(settled.order_id.is_none());
    assert_eq!(calls.token.load(Ordering::SeqCst), 0);
    assert_eq!(calls.order.load(Ordering::SeqCst), 0);
}
