use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use tracing::warn;
use uuid::Uuid;

use super::models::{MonitoringCheck, OnCallSchedule, StatusUpdate, from_millis, to_millis};
use crate::monitoring::types::{CheckResult, CheckStatus, CurrentStatus};
use crate::pool::LibsqlPool;

/// Storage operations the monitoring core depends on
#[async_trait]
pub trait Database: Send + Sync {
    /// All active checks, least recently checked first (never-run checks lead).
    ///
    /// Rows that cannot be decoded are logged and left out.
    async fn list_active_checks(&self) -> Result<Vec<MonitoringCheck>>;

    /// Get a check by id
    async fn get_check(&self, id: Uuid) -> Result<Option<MonitoringCheck>>;

    /// Insert or replace a check's configuration and state
    async fn save_check(&self, check: &MonitoringCheck) -> Result<()>;

    /// Move `last_check_at` to `now` only if it still equals `seen`.
    ///
    /// Returns `false` when another dispatcher got there first.
    async fn claim_check(
        &self,
        id: Uuid,
        seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Write the status columns of a check
    async fn update_check_status(&self, id: Uuid, update: &StatusUpdate) -> Result<()>;

    /// Append a probe result to the check's history
    async fn insert_check_result(&self, result: &CheckResult) -> Result<()>;

    /// Most recent results for a check, newest first
    async fn recent_results(&self, check_id: Uuid, limit: usize) -> Result<Vec<CheckResult>>;

    /// Get an on-call schedule by id
    async fn get_schedule(&self, id: Uuid) -> Result<Option<OnCallSchedule>>;

    /// Insert or replace an on-call schedule
    async fn save_schedule(&self, schedule: &OnCallSchedule) -> Result<()>;
}

const CHECK_COLUMNS: &str = "id, organization_id, name, check_type, target, method, headers, body, \
     expected_status_code, timeout_seconds, check_interval_seconds, failure_threshold, \
     success_threshold, status, current_status, consecutive_failures, consecutive_successes, \
     last_check_at, last_success_at, last_failure_at, failure_message, created_at, updated_at";

const RESULT_COLUMNS: &str =
    "id, monitoring_check_id, timestamp, is_successful, response_time_ms, status_code, error_message, ssl_info";

const SCHEDULE_COLUMNS: &str =
    "id, organization_id, name, members, rotation_config, is_active, created_at, updated_at";

fn optional_millis(value: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    value.map(from_millis).transpose()
}

fn check_from_row(row: &Row) -> Result<MonitoringCheck> {
    let id: String = row.get(0)?;
    let headers: String = row.get(6)?;
    let status: String = row.get(13)?;
    let current_status: String = row.get(14)?;

    Ok(MonitoringCheck {
        id: Uuid::parse_str(&id)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        check_type: row.get(3)?,
        target: row.get(4)?,
        method: row.get(5)?,
        headers: serde_json::from_str(&headers).context("Malformed headers column")?,
        body: row.get(7)?,
        expected_status_code: row.get::<Option<i64>>(8)?.map(u16::try_from).transpose()?,
        timeout_seconds: row.get::<Option<i64>>(9)?.map(u64::try_from).transpose()?,
        check_interval_seconds: u64::try_from(row.get::<i64>(10)?)?,
        failure_threshold: u32::try_from(row.get::<i64>(11)?)?,
        success_threshold: u32::try_from(row.get::<i64>(12)?)?,
        status: CheckStatus::parse_lossy(&status),
        current_status: CurrentStatus::parse_lossy(&current_status),
        consecutive_failures: u32::try_from(row.get::<i64>(15)?)?,
        consecutive_successes: u32::try_from(row.get::<i64>(16)?)?,
        last_check_at: optional_millis(row.get(17)?)?,
        last_success_at: optional_millis(row.get(18)?)?,
        last_failure_at: optional_millis(row.get(19)?)?,
        failure_message: row.get(20)?,
        created_at: from_millis(row.get(21)?)?,
        updated_at: from_millis(row.get(22)?)?,
    })
}

fn result_from_row(row: &Row) -> Result<CheckResult> {
    let id: String = row.get(0)?;
    let check_id: String = row.get(1)?;
    let ssl_info: Option<String> = row.get(7)?;

    Ok(CheckResult {
        id: Uuid::parse_str(&id)?,
        monitoring_check_id: Uuid::parse_str(&check_id)?,
        timestamp: from_millis(row.get(2)?)?,
        is_successful: row.get::<i64>(3)? != 0,
        response_time_ms: row.get::<Option<i64>>(4)?.map(u64::try_from).transpose()?,
        status_code: row.get::<Option<i64>>(5)?.map(u16::try_from).transpose()?,
        error_message: row.get(6)?,
        ssl_info: ssl_info.as_deref().map(serde_json::from_str).transpose()?,
    })
}

fn schedule_from_row(row: &Row) -> Result<OnCallSchedule> {
    let id: String = row.get(0)?;
    let members: String = row.get(3)?;
    let rotation_config: String = row.get(4)?;

    Ok(OnCallSchedule {
        id: Uuid::parse_str(&id)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        members: serde_json::from_str(&members).context("Malformed members column")?,
        rotation_config: serde_json::from_str(&rotation_config)
            .context("Malformed rotation_config column")?,
        is_active: row.get::<i64>(5)? != 0,
        created_at: from_millis(row.get(6)?)?,
        updated_at: from_millis(row.get(7)?)?,
    })
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_active_checks(&self) -> Result<Vec<MonitoringCheck>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {CHECK_COLUMNS} FROM monitoring_checks WHERE status = 'active' \
             ORDER BY last_check_at IS NOT NULL, last_check_at ASC"
        );

        let mut rows = conn.query(&sql, ()).await?;
        let mut checks = Vec::new();

        while let Some(row) = rows.next().await? {
            match check_from_row(&row) {
                Ok(check) => checks.push(check),
                Err(e) => {
                    let id = row.get::<String>(0).unwrap_or_default();
                    warn!(check_id = %id, "Skipping undecodable monitoring check: {:#}", e);
                }
            }
        }

        Ok(checks)
    }

    async fn get_check(&self, id: Uuid) -> Result<Option<MonitoringCheck>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {CHECK_COLUMNS} FROM monitoring_checks WHERE id = ?");

        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(check_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_check(&self, check: &MonitoringCheck) -> Result<()> {
        let headers = serde_json::to_string(&check.headers)?;
        let timeout_seconds = check
            .timeout_seconds
            .map(i64::try_from)
            .transpose()
            .context("timeout_seconds out of range")?;
        let check_interval_seconds =
            i64::try_from(check.check_interval_seconds).context("check_interval_seconds out of range")?;

        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO monitoring_checks (id, organization_id, name, check_type, target, method, headers, body, \
             expected_status_code, timeout_seconds, check_interval_seconds, failure_threshold, success_threshold, \
             status, current_status, consecutive_failures, consecutive_successes, last_check_at, last_success_at, \
             last_failure_at, failure_message, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id, name = excluded.name, \
             check_type = excluded.check_type, target = excluded.target, method = excluded.method, \
             headers = excluded.headers, body = excluded.body, expected_status_code = excluded.expected_status_code, \
             timeout_seconds = excluded.timeout_seconds, check_interval_seconds = excluded.check_interval_seconds, \
             failure_threshold = excluded.failure_threshold, success_threshold = excluded.success_threshold, \
             status = excluded.status, current_status = excluded.current_status, \
             consecutive_failures = excluded.consecutive_failures, consecutive_successes = excluded.consecutive_successes, \
             last_check_at = excluded.last_check_at, last_success_at = excluded.last_success_at, \
             last_failure_at = excluded.last_failure_at, failure_message = excluded.failure_message, \
             updated_at = excluded.updated_at",
            params![
                check.id.to_string(),
                check.organization_id.clone(),
                check.name.clone(),
                check.check_type.clone(),
                check.target.clone(),
                check.method.clone(),
                headers,
                check.body.clone(),
                check.expected_status_code.map(i64::from),
                timeout_seconds,
                check_interval_seconds,
                i64::from(check.failure_threshold),
                i64::from(check.success_threshold),
                check.status.to_string(),
                check.current_status.to_string(),
                i64::from(check.consecutive_failures),
                i64::from(check.consecutive_successes),
                check.last_check_at.map(to_millis),
                check.last_success_at.map(to_millis),
                check.last_failure_at.map(to_millis),
                check.failure_message.clone(),
                to_millis(check.created_at),
                to_millis(check.updated_at)
            ],
        )
        .await?;

        Ok(())
    }

    async fn claim_check(
        &self,
        id: Uuid,
        seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.get_conn().await?;

        // `IS` compares NULL to NULL as equal, which covers never-run checks
        let updated = conn
            .execute(
                "UPDATE monitoring_checks SET last_check_at = ? WHERE id = ? AND last_check_at IS ?",
                params![to_millis(now), id.to_string(), seen.map(to_millis)],
            )
            .await?;

        Ok(updated == 1)
    }

    async fn update_check_status(&self, id: Uuid, update: &StatusUpdate) -> Result<()> {
        let conn = self.get_conn().await?;

        let updated = conn
            .execute(
                "UPDATE monitoring_checks SET current_status = ?, consecutive_failures = ?, \
                 consecutive_successes = ?, last_check_at = ?, last_success_at = ?, last_failure_at = ?, \
                 failure_message = ?, updated_at = ? WHERE id = ?",
                params![
                    update.current_status.to_string(),
                    i64::from(update.consecutive_failures),
                    i64::from(update.consecutive_successes),
                    to_millis(update.last_check_at),
                    update.last_success_at.map(to_millis),
                    update.last_failure_at.map(to_millis),
                    update.failure_message.clone(),
                    to_millis(update.last_check_at),
                    id.to_string()
                ],
            )
            .await?;

        if updated == 0 {
            bail!("Monitoring check {id} not found");
        }

        Ok(())
    }

    async fn insert_check_result(&self, result: &CheckResult) -> Result<()> {
        let ssl_info = result.ssl_info.as_ref().map(serde_json::to_string).transpose()?;
        let response_time_ms = result.response_time_ms.map(i64::try_from).transpose()?;

        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO check_results (id, monitoring_check_id, timestamp, is_successful, response_time_ms, \
             status_code, error_message, ssl_info) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                result.id.to_string(),
                result.monitoring_check_id.to_string(),
                to_millis(result.timestamp),
                if result.is_successful { 1 } else { 0 },
                response_time_ms,
                result.status_code.map(i64::from),
                result.error_message.clone(),
                ssl_info
            ],
        )
        .await?;

        Ok(())
    }

    async fn recent_results(&self, check_id: Uuid, limit: usize) -> Result<Vec<CheckResult>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM check_results WHERE monitoring_check_id = ? \
             ORDER BY timestamp DESC LIMIT ?"
        );

        let mut rows = conn.query(&sql, params![check_id.to_string(), i64::try_from(limit).unwrap_or(i64::MAX)]).await?;
        let mut results = Vec::new();

        while let Some(row) = rows.next().await? {
            results.push(result_from_row(&row)?);
        }

        Ok(results)
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<OnCallSchedule>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM on_call_schedules WHERE id = ?");

        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(schedule_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_schedule(&self, schedule: &OnCallSchedule) -> Result<()> {
        let conn = self.get_conn().await?;
        let members = serde_json::to_string(&schedule.members)?;
        let rotation_config = serde_json::to_string(&schedule.rotation_config)?;

        conn.execute(
            "INSERT INTO on_call_schedules (id, organization_id, name, members, rotation_config, is_active, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id, name = excluded.name, \
             members = excluded.members, rotation_config = excluded.rotation_config, \
             is_active = excluded.is_active, updated_at = excluded.updated_at",
            params![
                schedule.id.to_string(),
                schedule.organization_id.clone(),
                schedule.name.clone(),
                members,
                rotation_config,
                if schedule.is_active { 1 } else { 0 },
                to_millis(schedule.created_at),
                to_millis(schedule.updated_at)
            ],
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::database::models::{ScheduleMember, from_millis};
    use crate::monitoring::scheduler::CheckDispatcher;
    use crate::monitoring::test_support::ScriptedProber;
    use crate::monitoring::types::{CheckType, ProbeOutcome, SslInfo};
    use chrono::Duration;
    use tempfile::TempDir;

    /// Helper to create a migrated database in a temp directory
    async fn create_test_database() -> Result<(DatabaseImpl, TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let pool = crate::database::open_pool(temp_dir.path().join("test.db"), 2).await?;
        Ok((DatabaseImpl::new_from_pool(pool), temp_dir))
    }

    fn at(millis: i64) -> DateTime<Utc> {
        from_millis(millis).unwrap()
    }

    fn sample_check(name: &str, last_check_at: Option<DateTime<Utc>>) -> MonitoringCheck {
        let mut check = MonitoringCheck::new(
            "org-1".to_string(),
            name.to_string(),
            CheckType::Http,
            "https://example.com/health".to_string(),
        );
        check.last_check_at = last_check_at;
        check.headers.insert("X-Probe".to_string(), "1".to_string());
        check.expected_status_code = Some(204);
        check
    }

    #[tokio::test]
    async fn test_check_round_trip() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let mut check = sample_check("api", Some(at(1_700_000_000_000)));
        check.created_at = at(1_600_000_000_000);
        check.updated_at = at(1_600_000_000_000);

        db.save_check(&check).await?;
        let loaded = db.get_check(check.id).await?.expect("check should exist");

        assert_eq!(loaded, check);
        assert!(db.get_check(Uuid::new_v4()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_active_checks_orders_never_run_first() -> Result<()> {
        let (db, _dir) = create_test_database().await?;

        let recent = sample_check("recent", Some(at(2_000_000)));
        let older = sample_check("older", Some(at(1_000_000)));
        let never = sample_check("never", None);
        let mut disabled = sample_check("disabled", None);
        disabled.status = CheckStatus::Disabled;

        for check in [&recent, &older, &never, &disabled] {
            db.save_check(check).await?;
        }

        let names: Vec<String> = db.list_active_checks().await?.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["never", "older", "recent"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_undecodable_row_does_not_hide_the_others() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let good = sample_check("good", None);
        let corrupt = sample_check("corrupt", None);
        db.save_check(&good).await?;
        db.save_check(&corrupt).await?;

        let conn = db.get_conn().await?;
        conn.execute(
            "UPDATE monitoring_checks SET headers = 'not json' WHERE id = ?",
            params![corrupt.id.to_string()],
        )
        .await?;
        drop(conn);

        let names: Vec<String> = db.list_active_checks().await?.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["good"]);

        // The healthy check still gets dispatched
        let db: std::sync::Arc<dyn Database> = std::sync::Arc::new(db);
        let prober = std::sync::Arc::new(ScriptedProber::default());
        let dispatcher = CheckDispatcher::new(db, prober.clone(), &DispatcherConfig::default());
        let report = dispatcher.run_batch().await?;
        assert_eq!(report.summary.executed, 1);
        assert_eq!(prober.calls(good.id), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_intervals_rejected_on_save() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let good = sample_check("good", None);
        db.save_check(&good).await?;

        let mut long_timeout = sample_check("long-timeout", None);
        long_timeout.timeout_seconds = Some(u64::MAX);
        assert!(db.save_check(&long_timeout).await.is_err());

        let mut long_interval = sample_check("long-interval", None);
        long_interval.check_interval_seconds = u64::MAX;
        assert!(db.save_check(&long_interval).await.is_err());

        assert!(db.get_check(long_timeout.id).await?.is_none());
        assert_eq!(db.list_active_checks().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_check_is_conditional() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let check = sample_check("claimed", None);
        db.save_check(&check).await?;

        let now = at(5_000_000);
        assert!(db.claim_check(check.id, None, now).await?);
        // A second dispatcher that read the old value loses the race
        assert!(!db.claim_check(check.id, None, now + Duration::seconds(1)).await?);
        assert!(db.claim_check(check.id, Some(now), now + Duration::seconds(1)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_and_results() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let check = sample_check("status", None);
        db.save_check(&check).await?;

        let now = at(9_000_000);
        let update = StatusUpdate {
            current_status: CurrentStatus::Down,
            consecutive_failures: 2,
            consecutive_successes: 0,
            last_check_at: now,
            last_success_at: None,
            last_failure_at: Some(now),
            failure_message: Some("Timeout after 30s".to_string()),
        };
        db.update_check_status(check.id, &update).await?;

        let loaded = db.get_check(check.id).await?.expect("check should exist");
        assert_eq!(loaded.current_status, CurrentStatus::Down);
        assert_eq!(loaded.consecutive_failures, 2);
        assert_eq!(loaded.last_check_at, Some(now));
        assert_eq!(loaded.failure_message.as_deref(), Some("Timeout after 30s"));

        assert!(db.update_check_status(Uuid::new_v4(), &update).await.is_err());

        let first = CheckResult::from_outcome(check.id, &ProbeOutcome::failure(30_000, "Timeout after 30s"), now);
        let second = CheckResult::from_outcome(
            check.id,
            &ProbeOutcome::success(12, Some(200)).with_ssl_info(SslInfo::placeholder()),
            now + Duration::seconds(60),
        );
        db.insert_check_result(&first).await?;
        db.insert_check_result(&second).await?;

        let history = db.recent_results(check.id, 10).await?;
        assert_eq!(history, vec![second, first]);
        assert_eq!(db.recent_results(check.id, 1).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_schedule_round_trip() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let mut schedule = OnCallSchedule::new(
            "org-1".to_string(),
            "primary".to_string(),
            vec![
                ScheduleMember { user_id: "alice".to_string(), order: 2 },
                ScheduleMember { user_id: "bob".to_string(), order: 1 },
            ],
        );
        schedule.rotation_config.duration_hours = Some(24.0);
        schedule.rotation_config.schedule_start = Some(at(1_700_000_000_000));
        schedule.created_at = at(1_600_000_000_000);
        schedule.updated_at = at(1_600_000_000_000);

        db.save_schedule(&schedule).await?;

        let loaded = db.get_schedule(schedule.id).await?.expect("schedule should exist");
        assert_eq!(loaded, schedule);
        assert!(db.get_schedule(Uuid::new_v4()).await?.is_none());
        Ok(())
    }
}
