/// On-call module - answers "who is on call right now" for stored schedules
pub mod rotation;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::Database;

pub use rotation::{RotationError, current_on_call_user_id, on_call_user_or_none};

/// A schedule as read, with its current assignee filled in
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleView {
    pub schedule_id: Uuid,
    pub current_on_call_user_id: Option<String>,
}

pub struct OnCallResolver {
    database: Arc<dyn Database>,
}

impl OnCallResolver {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Load a schedule and compute who is on call at `now`; `None` if the
    /// schedule does not exist
    pub async fn current_on_call(&self, schedule_id: Uuid, now: DateTime<Utc>) -> Result<Option<ScheduleView>> {
        let schedule = self
            .database
            .get_schedule(schedule_id)
            .await
            .with_context(|| format!("Failed to load schedule {schedule_id}"))?;

        Ok(schedule.map(|schedule| ScheduleView {
            schedule_id: schedule.id,
            current_on_call_user_id: on_call_user_or_none(&schedule, now),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{OnCallSchedule, ScheduleMember};
    use crate::monitoring::test_support::MemoryDatabase;

    #[tokio::test]
    async fn test_resolves_stored_schedule() {
        let database = Arc::new(MemoryDatabase::default());
        let mut schedule = OnCallSchedule::new(
            "org".into(),
            "primary".into(),
            vec![ScheduleMember { user_id: "u1".into(), order: 0 }],
        );
        schedule.rotation_config.schedule_start = Some(Utc::now() - chrono::Duration::hours(1));
        database.insert_schedule(schedule.clone());

        let resolver = OnCallResolver::new(database);
        let view = resolver.current_on_call(schedule.id, Utc::now()).await.unwrap().unwrap();

        assert_eq!(view.schedule_id, schedule.id);
        assert_eq!(view.current_on_call_user_id.as_deref(), Some("u1"));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["currentOnCallUserId"], "u1");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_broken_rotation_is_nobody_not_an_error() {
        let database = Arc::new(MemoryDatabase::default());
        let mut schedule = OnCallSchedule::new(
            "org".into(),
            "broken".into(),
            vec![ScheduleMember { user_id: "u1".into(), order: 0 }],
        );
        schedule.rotation_config.duration_hours = Some(-1.0);
        database.insert_schedule(schedule.clone());

        let view = OnCallResolver::new(database).current_on_call(schedule.id, Utc::now()).await.unwrap().unwrap();

        assert_eq!(view.current_on_call_user_id, None);
    }

    #[tokio::test]
    async fn test_missing_schedule() {
        let resolver = OnCallResolver::new(Arc::new(MemoryDatabase::default()));
        assert!(resolver.current_on_call(Uuid::new_v4(), Utc::now()).await.unwrap().is_none());
    }
}
