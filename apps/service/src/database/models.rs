use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::monitoring::types::{CheckStatus, CheckType, CurrentStatus};

/// Convert a timestamp to the unix milliseconds stored in the database
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored unix milliseconds back to a timestamp
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| anyhow!("Timestamp out of range: {millis}"))
}

/// A configured uptime check and its latest observed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringCheck {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,

    /// Raw check type; parsed when the probe runs so that a bad value is
    /// recorded as a failed result instead of breaking the listing
    pub check_type: String,
    pub target: String,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub expected_status_code: Option<u16>,
    pub timeout_seconds: Option<u64>,
    pub check_interval_seconds: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,

    pub status: CheckStatus,
    pub current_status: CurrentStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoringCheck {
    /// Create a new, never-run check
    pub fn new(organization_id: String, name: String, check_type: CheckType, target: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            check_type: check_type.to_string(),
            target,
            method: None,
            headers: BTreeMap::new(),
            body: None,
            expected_status_code: None,
            timeout_seconds: None,
            check_interval_seconds: 60,
            failure_threshold: 1,
            success_threshold: 1,
            status: CheckStatus::Active,
            current_status: CurrentStatus::Pending,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_at: None,
            last_success_at: None,
            last_failure_at: None,
            failure_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status columns written after every executed probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub current_status: CurrentStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
}

impl StatusUpdate {
    /// Apply the update to an in-memory copy of the check
    pub fn apply_to(&self, check: &mut MonitoringCheck) {
        check.current_status = self.current_status;
        check.consecutive_failures = self.consecutive_failures;
        check.consecutive_successes = self.consecutive_successes;
        check.last_check_at = Some(self.last_check_at);
        check.last_success_at = self.last_success_at;
        check.last_failure_at = self.last_failure_at;
        check.failure_message = self.failure_message.clone();
        check.updated_at = self.last_check_at;
    }
}

/// One member of an on-call rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMember {
    pub user_id: String,
    #[serde(default)]
    pub order: i64,
}

/// How an on-call schedule rotates between its members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    pub rotation_type: Option<String>,
    pub duration_hours: Option<f64>,
    pub rotation_interval_hours: Option<f64>,
    pub schedule_start: Option<DateTime<Utc>>,
    pub schedule_end: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
}

/// On-call schedule as stored; who is on call is never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallSchedule {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,
    pub members: Vec<ScheduleMember>,
    pub rotation_config: RotationConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnCallSchedule {
    pub fn new(organization_id: String, name: String, members: Vec<ScheduleMember>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            members,
            rotation_config: RotationConfig::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_conversion() {
        let now = from_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_millis(now), 1_700_000_000_123);
        assert!(from_millis(i64::MAX).is_err());
    }

    #[test]
    fn test_rotation_config_accepts_partial_json() {
        let config: RotationConfig =
            serde_json::from_str(r#"{"rotation_type":"weekly","duration_hours":12}"#).unwrap();
        assert_eq!(config.rotation_type.as_deref(), Some("weekly"));
        assert_eq!(config.duration_hours, Some(12.0));
        assert!(config.schedule_start.is_none());
    }

    #[test]
    fn test_status_update_apply() {
        let mut check = MonitoringCheck::new("org".into(), "api".into(), CheckType::Http, "https://a.test".into());
        let now = Utc::now();
        let update = StatusUpdate {
            current_status: CurrentStatus::Down,
            consecutive_failures: 1,
            consecutive_successes: 0,
            last_check_at: now,
            last_success_at: None,
            last_failure_at: Some(now),
            failure_message: Some("boom".into()),
        };

        update.apply_to(&mut check);

        assert_eq!(check.current_status, CurrentStatus::Down);
        assert_eq!(check.last_check_at, Some(now));
        assert_eq!(check.failure_message.as_deref(), Some("boom"));
    }
}
