use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use super::types::{CheckResult, CurrentStatus, ProbeOutcome};
use crate::database::Database;
use crate::database::models::{MonitoringCheck, StatusUpdate};

/// How probe outcomes translate into `current_status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// Every outcome flips the status straight away
    #[default]
    Immediate,
    /// Flip only after `failure_threshold` / `success_threshold` outcomes in a row
    Debounced,
}

impl fmt::Display for StatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusPolicy::Immediate => write!(f, "immediate"),
            StatusPolicy::Debounced => write!(f, "debounced"),
        }
    }
}

/// Compute the status columns a check gets after `outcome`
pub fn next_status(
    check: &MonitoringCheck,
    outcome: &ProbeOutcome,
    policy: StatusPolicy,
    now: DateTime<Utc>,
) -> StatusUpdate {
    match outcome {
        ProbeOutcome::Success { .. } => {
            let consecutive_successes = check.consecutive_successes.saturating_add(1);
            let current_status = match policy {
                StatusPolicy::Debounced if consecutive_successes < check.success_threshold.max(1) => {
                    check.current_status
                }
                _ => CurrentStatus::Up,
            };

            StatusUpdate {
                current_status,
                consecutive_failures: 0,
                consecutive_successes,
                last_check_at: now,
                last_success_at: Some(now),
                last_failure_at: check.last_failure_at,
                failure_message: None,
            }
        }
        ProbeOutcome::Failure { error_message, .. } => {
            let consecutive_failures = check.consecutive_failures.saturating_add(1);
            let current_status = match policy {
                StatusPolicy::Debounced if consecutive_failures < check.failure_threshold.max(1) => {
                    check.current_status
                }
                _ => CurrentStatus::Down,
            };

            StatusUpdate {
                current_status,
                consecutive_failures,
                consecutive_successes: 0,
                last_check_at: now,
                last_success_at: check.last_success_at,
                last_failure_at: Some(now),
                failure_message: Some(error_message.clone()),
            }
        }
    }
}

/// Persists probe outcomes: one history row plus the check's status columns
pub struct StatusTracker {
    database: Arc<dyn Database>,
    policy: StatusPolicy,
}

impl StatusTracker {
    pub fn new(database: Arc<dyn Database>, policy: StatusPolicy) -> Self {
        Self { database, policy }
    }

    /// Record `outcome` for `check` at `now`.
    ///
    /// The history insert is best effort; only a failed status update is
    /// returned as an error.
    pub async fn record(
        &self,
        check: &MonitoringCheck,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Result<(CheckResult, StatusUpdate)> {
        let result = CheckResult::from_outcome(check.id, outcome, now);

        if let Err(e) = self.database.insert_check_result(&result).await {
            error!(check_id = %check.id, "Failed to store check result: {:#}", e);
        }

        let update = next_status(check, outcome, self.policy, now);
        self.database.update_check_status(check.id, &update).await?;

        debug!(
            check_id = %check.id,
            status = %update.current_status,
            failures = update.consecutive_failures,
            "Check status updated"
        );

        Ok((result, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::test_support::MemoryDatabase;
    use crate::monitoring::types::CheckType;

    fn check() -> MonitoringCheck {
        MonitoringCheck::new("org".into(), "api".into(), CheckType::Http, "https://example.com".into())
    }

    #[test]
    fn test_success_marks_up_and_clears_message() {
        let mut check = check();
        check.current_status = CurrentStatus::Down;
        check.consecutive_failures = 3;
        check.failure_message = Some("old".into());
        let now = Utc::now();

        let update = next_status(&check, &ProbeOutcome::success(10, Some(200)), StatusPolicy::Immediate, now);

        assert_eq!(update.current_status, CurrentStatus::Up);
        assert_eq!(update.consecutive_failures, 0);
        assert_eq!(update.consecutive_successes, 1);
        assert_eq!(update.last_success_at, Some(now));
        assert_eq!(update.last_check_at, now);
        assert_eq!(update.failure_message, None);
    }

    #[test]
    fn test_failure_marks_down_immediately() {
        let mut check = check();
        check.current_status = CurrentStatus::Up;
        check.failure_threshold = 3;
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        check.last_success_at = Some(earlier);
        let now = Utc::now();

        let update = next_status(&check, &ProbeOutcome::failure(5, "Timeout after 30s"), StatusPolicy::Immediate, now);

        assert_eq!(update.current_status, CurrentStatus::Down);
        assert_eq!(update.last_failure_at, Some(now));
        assert_eq!(update.last_success_at, Some(earlier));
        assert_eq!(update.failure_message.as_deref(), Some("Timeout after 30s"));
    }

    #[test]
    fn test_debounced_waits_for_threshold() {
        let mut check = check();
        check.current_status = CurrentStatus::Up;
        check.failure_threshold = 2;
        let now = Utc::now();
        let failure = ProbeOutcome::failure(5, "refused");

        let first = next_status(&check, &failure, StatusPolicy::Debounced, now);
        assert_eq!(first.current_status, CurrentStatus::Up);
        assert_eq!(first.consecutive_failures, 1);
        // message and timestamps move even while the status holds
        assert_eq!(first.failure_message.as_deref(), Some("refused"));

        first.apply_to(&mut check);
        let second = next_status(&check, &failure, StatusPolicy::Debounced, now);
        assert_eq!(second.current_status, CurrentStatus::Down);
        assert_eq!(second.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_record_survives_history_failure() {
        let database = Arc::new(MemoryDatabase::default());
        let check = check();
        database.insert(check.clone());
        database.fail_result_inserts();

        let tracker = StatusTracker::new(database.clone(), StatusPolicy::Immediate);
        let (result, update) = tracker.record(&check, &ProbeOutcome::success(7, Some(200)), Utc::now()).await.unwrap();

        assert!(result.is_successful);
        assert_eq!(update.current_status, CurrentStatus::Up);
        assert_eq!(database.check(check.id).unwrap().current_status, CurrentStatus::Up);
        assert!(database.results().is_empty());
    }

    #[tokio::test]
    async fn test_record_reports_status_update_failure() {
        let database = Arc::new(MemoryDatabase::default());
        let check = check();
        database.insert(check.clone());
        database.fail_status_updates_for(check.id);

        let tracker = StatusTracker::new(database.clone(), StatusPolicy::Immediate);
        let outcome = ProbeOutcome::failure(7, "refused");

        assert!(tracker.record(&check, &outcome, Utc::now()).await.is_err());
        // the history row was still written first
        assert_eq!(database.results().len(), 1);
    }
}
