use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{FutureExt, StreamExt, stream};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::Prober;
use super::tracker::StatusTracker;
use super::types::CheckResult;
use crate::config::DispatcherConfig;
use crate::database::Database;
use crate::database::models::MonitoringCheck;

/// When a check becomes due again; `None` means it never ran
pub fn next_due_at(last_check_at: Option<DateTime<Utc>>, interval_seconds: u64) -> Option<DateTime<Utc>> {
    let last = last_check_at?;
    let due = i64::try_from(interval_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|interval| last.checked_add_signed(interval));
    Some(due.unwrap_or(DateTime::<Utc>::MAX_UTC))
}

/// A check is due if it never ran or its interval has fully elapsed.
///
/// Missed intervals do not pile up: an overdue check is simply due once.
pub fn is_due(last_check_at: Option<DateTime<Utc>>, interval_seconds: u64, now: DateTime<Utc>) -> bool {
    match next_due_at(last_check_at, interval_seconds) {
        None => true,
        Some(due) => now >= due,
    }
}

/// What happened to one check during a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Executed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub check_id: Uuid,
    pub check_name: String,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckOutcome {
    fn new(check: &MonitoringCheck, status: DispatchStatus) -> Self {
        Self {
            check_id: check.id,
            check_name: check.name.clone(),
            status,
            result: None,
            next_due: None,
            error: None,
        }
    }

    fn executed(check: &MonitoringCheck, result: CheckResult) -> Self {
        let next_due = next_due_at(Some(result.timestamp), check.check_interval_seconds);
        Self { result: Some(result), next_due, ..Self::new(check, DispatchStatus::Executed) }
    }

    fn skipped(check: &MonitoringCheck, next_due: Option<DateTime<Utc>>) -> Self {
        Self { next_due, ..Self::new(check, DispatchStatus::Skipped) }
    }

    fn error(check: &MonitoringCheck, error: String) -> Self {
        Self { error: Some(error), ..Self::new(check, DispatchStatus::Error) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_checks: usize,
    pub executed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BatchSummary {
    fn tally(outcomes: &[CheckOutcome]) -> Self {
        outcomes.iter().fold(
            Self { total_checks: outcomes.len(), ..Self::default() },
            |mut summary, outcome| {
                match outcome.status {
                    DispatchStatus::Executed => summary.executed += 1,
                    DispatchStatus::Skipped => summary.skipped += 1,
                    DispatchStatus::Error => summary.errors += 1,
                }
                summary
            },
        )
    }
}

/// Result of one dispatcher run, shaped for whoever triggered it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub results: Vec<CheckOutcome>,
    pub executed_at: DateTime<Utc>,
}

/// Check dispatcher - runs every due check once per batch
pub struct CheckDispatcher {
    database: Arc<dyn Database>,
    prober: Arc<dyn Prober>,
    tracker: StatusTracker,
    max_concurrency: usize,
    claim_before_probe: bool,
}

impl CheckDispatcher {
    pub fn new(database: Arc<dyn Database>, prober: Arc<dyn Prober>, config: &DispatcherConfig) -> Self {
        Self {
            tracker: StatusTracker::new(database.clone(), config.status_policy),
            database,
            prober,
            max_concurrency: config.max_concurrency.max(1),
            claim_before_probe: config.claim_before_probe,
        }
    }

    /// Run one batch against the current time
    pub async fn run_batch(&self) -> Result<BatchReport> {
        self.run_batch_at(Utc::now()).await
    }

    /// Run one batch, judging due-ness against `now`.
    ///
    /// Only failing to list the checks fails the batch; anything that goes
    /// wrong with a single check is reported in that check's outcome.
    pub async fn run_batch_at(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let mut checks = self.database.list_active_checks().await.context("Failed to load active checks")?;

        // Longest waiting first, never-run checks ahead of everything
        checks.sort_by_key(|check| check.last_check_at);

        let pending: Vec<_> = checks.iter().map(|check| self.process(check, now)).collect();
        let results: Vec<CheckOutcome> = stream::iter(pending).buffered(self.max_concurrency).collect().await;

        let summary = BatchSummary::tally(&results);
        info!(
            total = summary.total_checks,
            executed = summary.executed,
            skipped = summary.skipped,
            errors = summary.errors,
            "Dispatcher batch finished"
        );

        Ok(BatchReport { summary, results, executed_at: now })
    }

    async fn process(&self, check: &MonitoringCheck, now: DateTime<Utc>) -> CheckOutcome {
        if !is_due(check.last_check_at, check.check_interval_seconds, now) {
            let next_due = next_due_at(check.last_check_at, check.check_interval_seconds);
            debug!(check_id = %check.id, ?next_due, "Check not due yet");
            return CheckOutcome::skipped(check, next_due);
        }

        match AssertUnwindSafe(self.execute(check, now)).catch_unwind().await {
            Ok(Ok(Some(result))) => CheckOutcome::executed(check, result),
            Ok(Ok(None)) => {
                debug!(check_id = %check.id, "Check claimed by another dispatcher");
                CheckOutcome::skipped(check, next_due_at(Some(now), check.check_interval_seconds))
            }
            Ok(Err(e)) => {
                warn!(check_id = %check.id, "Failed to process check: {:#}", e);
                CheckOutcome::error(check, format!("{e:#}"))
            }
            Err(_) => {
                error!(check_id = %check.id, "Probe panicked");
                CheckOutcome::error(check, "Probe panicked".to_string())
            }
        }
    }

    /// Probe and record one due check; `None` when the claim was lost
    async fn execute(&self, check: &MonitoringCheck, now: DateTime<Utc>) -> Result<Option<CheckResult>> {
        if self.claim_before_probe && !self.database.claim_check(check.id, check.last_check_at, now).await? {
            return Ok(None);
        }

        let outcome = self.prober.probe(check).await;
        let (result, _) = self.tracker.record(check, &outcome, Utc::now().max(now)).await?;

        Ok(Some(result))
    }

    /// Trigger a batch every `every`, forever. Batch failures are logged and
    /// the next tick tries again.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;

                if let Err(e) = self.run_batch().await {
                    error!("Dispatcher batch failed: {:#}", e);
                }
            }
        })
    }
}
