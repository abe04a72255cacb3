//! Reconciliation scheduler.
//!
//! A periodic job that finds sessions stalled at question one — created
//! between five and six minutes ago, never reconciled, first question absent
//! or unanswered — and fires a one-time re-engagement call for each. The job
//! polls every minute, so the one-minute-wide half-open window guarantees
//! each qualifying session is visited in at least one tick; the stamped
//! timestamp excludes it from every later tick immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use quizline_assess::EngageClient;
use quizline_store::{StalledSession, Store};

use crate::error::{QuizError, Result};

/// Lower age bound of the reconciliation window, inclusive, in minutes.
const WINDOW_MIN_AGE_MINUTES: i64 = 5;

/// Upper age bound of the reconciliation window, exclusive, in minutes.
const WINDOW_MAX_AGE_MINUTES: i64 = 6;

/// Aggregate result of one reconciliation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Stalled sessions examined this tick.
    pub processed: u64,
    /// Re-engagement calls that succeeded and were stamped.
    pub triggered: u64,
    /// Per-session failures, plus one for a tick that failed outright.
    pub errors: u64,
}

/// The reconciliation scheduler, constructed once and run as a single
/// periodic task alongside the request-handling workers.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<Store>,
    engage: EngageClient,
    interval: Duration,
}

impl Reconciler {
    /// Creates a scheduler ticking at the given interval.
    #[must_use]
    pub fn new(store: Arc<Store>, engage: EngageClient, interval: Duration) -> Self {
        Self {
            store,
            engage,
            interval,
        }
    }

    /// Runs the tick loop until the shutdown future resolves.
    ///
    /// Shutdown is only observed between ticks: an in-flight tick always
    /// runs to completion.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "reconciliation scheduler started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("reconciliation scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.tick(Utc::now()).await;
                    if summary.processed > 0 || summary.errors > 0 {
                        info!(
                            processed = summary.processed,
                            triggered = summary.triggered,
                            errors = summary.errors,
                            "reconciliation tick finished"
                        );
                    }
                }
            }
        }
    }

    /// Runs one tick against the given instant.
    ///
    /// Never fails: an error escaping the tick body is swallowed and reported
    /// as a degenerate `{0, 0, 1}` summary so one bad tick cannot kill the
    /// scheduler loop.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        match self.tick_inner(now).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "reconciliation tick failed");
                TickSummary {
                    processed: 0,
                    triggered: 0,
                    errors: 1,
                }
            }
        }
    }

    async fn tick_inner(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let newest = now - chrono::Duration::minutes(WINDOW_MIN_AGE_MINUTES);
        let oldest = now - chrono::Duration::minutes(WINDOW_MAX_AGE_MINUTES);

        // Cheap probe first; most ticks see nothing and skip the join.
        let pending = self.store.count_stalled_in_window(newest, oldest)?;
        if pending == 0 {
            debug!("no sessions in the reconciliation window");
            return Ok(TickSummary::default());
        }

        let stalled = self.store.stalled_sessions(newest, oldest)?;
        let mut summary = TickSummary {
            processed: stalled.len() as u64,
            triggered: 0,
            errors: 0,
        };

        for session in &stalled {
            match self.engage_session(session, now).await {
                Ok(()) => summary.triggered += 1,
                Err(err) => {
                    warn!(
                        session_id = session.session_id,
                        error = %err,
                        "re-engagement failed"
                    );
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Re-engages one stalled session: validates contact details, calls the
    /// re-engagement endpoint, and stamps the session on success. The stamp
    /// is the sole idempotency guard against re-triggering on a later tick.
    async fn engage_session(&self, session: &StalledSession, now: DateTime<Utc>) -> Result<()> {
        let contact = resolvable(&session.phone).ok_or(QuizError::MissingContact {
            session_id: session.session_id,
        })?;
        let name = resolvable(&session.full_name).ok_or(QuizError::MissingContact {
            session_id: session.session_id,
        })?;

        self.engage.send_nudge(contact, name).await?;
        self.store.stamp_reconciliation(session.session_id, now)?;
        info!(session_id = session.session_id, "stalled session re-engaged");
        Ok(())
    }
}

fn resolvable(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
