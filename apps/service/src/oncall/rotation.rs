//! Who is on call, computed from a schedule's configuration and the clock.
//!
//! Nothing here is persisted: the answer is a pure function of the member
//! list, the rotation config and `now`.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::warn;

use crate::database::models::{OnCallSchedule, RotationConfig, ScheduleMember};

/// Rotation length used when the config names none
pub const DEFAULT_ROTATION_HOURS: f64 = 168.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Error, PartialEq)]
pub enum RotationError {
    #[error("Invalid rotation duration: {0} hours")]
    InvalidDuration(f64),
}

/// How far ahead of its start a schedule already shows its first assignee
pub fn grace_window() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Rotation length in hours, before validation
pub fn rotation_hours(config: &RotationConfig) -> f64 {
    config
        .duration_hours
        .or(config.rotation_interval_hours)
        .or_else(|| match config.rotation_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("daily") => Some(24.0),
            Some("weekly") => Some(168.0),
            _ => None,
        })
        .unwrap_or(DEFAULT_ROTATION_HOURS)
}

fn rotation_millis(config: &RotationConfig) -> Result<i64, RotationError> {
    let hours = rotation_hours(config);
    if !hours.is_finite() || hours <= 0.0 {
        return Err(RotationError::InvalidDuration(hours));
    }

    let millis = (hours * MILLIS_PER_HOUR).round();
    if millis < 1.0 || millis > i64::MAX as f64 {
        return Err(RotationError::InvalidDuration(hours));
    }

    Ok(millis as i64)
}

/// Members in rotation order; ties keep their stored order
pub fn rotation_order(members: &[ScheduleMember]) -> Vec<&ScheduleMember> {
    let mut ordered: Vec<&ScheduleMember> = members.iter().collect();
    ordered.sort_by_key(|member| member.order);
    ordered
}

/// The user on call for `schedule` at `now`, or `None` when nobody is.
///
/// Fails only on a rotation length that cannot be divided by.
pub fn current_on_call_user_id(
    schedule: &OnCallSchedule,
    now: DateTime<Utc>,
) -> Result<Option<String>, RotationError> {
    if schedule.members.is_empty() {
        return Ok(None);
    }

    let config = &schedule.rotation_config;
    let start = config.schedule_start.unwrap_or(schedule.created_at);

    if now < start && start - now > grace_window() {
        return Ok(None);
    }

    if config.schedule_end.is_some_and(|end| now > end) {
        return Ok(None);
    }

    let duration_ms = rotation_millis(config)?;

    // Inside the grace window the rotation has not begun yet
    let elapsed_ms = (now - start).num_milliseconds().max(0);
    let rotation_index = elapsed_ms / duration_ms;

    let members = rotation_order(&schedule.members);
    let slot = usize::try_from(rotation_index % members.len() as i64).unwrap_or(0);

    Ok(members.get(slot).map(|member| member.user_id.clone()))
}

/// Read-path variant: a broken rotation config means nobody is on call
pub fn on_call_user_or_none(schedule: &OnCallSchedule, now: DateTime<Utc>) -> Option<String> {
    match current_on_call_user_id(schedule, now) {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(schedule_id = %schedule.id, "Cannot compute on-call member: {}", e);
            None
        }
    }
}
