//! In-memory test doubles for the storage and probe seams.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use super::executor::Prober;
use super::types::{CheckResult, CheckStatus, ProbeOutcome};
use crate::database::Database;
use crate::database::models::{MonitoringCheck, OnCallSchedule, StatusUpdate};

#[derive(Default)]
struct State {
    checks: Vec<MonitoringCheck>,
    results: Vec<CheckResult>,
    schedules: Vec<OnCallSchedule>,
    fail_listing: bool,
    fail_result_inserts: bool,
    failing_status_updates: HashSet<Uuid>,
}

/// `Database` kept in a mutex, with switches to inject failures
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn insert(&self, check: MonitoringCheck) {
        self.state.lock().unwrap().checks.push(check);
    }

    pub fn insert_schedule(&self, schedule: OnCallSchedule) {
        self.state.lock().unwrap().schedules.push(schedule);
    }

    pub fn check(&self, id: Uuid) -> Option<MonitoringCheck> {
        self.state.lock().unwrap().checks.iter().find(|c| c.id == id).cloned()
    }

    pub fn results(&self) -> Vec<CheckResult> {
        self.state.lock().unwrap().results.clone()
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn fail_result_inserts(&self) {
        self.state.lock().unwrap().fail_result_inserts = true;
    }

    pub fn fail_status_updates_for(&self, id: Uuid) {
        self.state.lock().unwrap().failing_status_updates.insert(id);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn list_active_checks(&self) -> Result<Vec<MonitoringCheck>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            bail!("database unavailable");
        }
        // Deliberately unsorted: ordering is the dispatcher's job
        Ok(state.checks.iter().filter(|c| c.status == CheckStatus::Active).cloned().collect())
    }

    async fn get_check(&self, id: Uuid) -> Result<Option<MonitoringCheck>> {
        Ok(self.check(id))
    }

    async fn save_check(&self, check: &MonitoringCheck) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.checks.retain(|c| c.id != check.id);
        state.checks.push(check.clone());
        Ok(())
    }

    async fn claim_check(&self, id: Uuid, seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let check = state.checks.iter_mut().find(|c| c.id == id).ok_or_else(|| anyhow!("missing check"))?;
        if check.last_check_at != seen {
            return Ok(false);
        }
        check.last_check_at = Some(now);
        Ok(true)
    }

    async fn update_check_status(&self, id: Uuid, update: &StatusUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_status_updates.contains(&id) {
            bail!("write failed for {id}");
        }
        let check = state.checks.iter_mut().find(|c| c.id == id).ok_or_else(|| anyhow!("missing check"))?;
        update.apply_to(check);
        Ok(())
    }

    async fn insert_check_result(&self, result: &CheckResult) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_result_inserts {
            bail!("history table unavailable");
        }
        state.results.push(result.clone());
        Ok(())
    }

    async fn recent_results(&self, check_id: Uuid, limit: usize) -> Result<Vec<CheckResult>> {
        let state = self.state.lock().unwrap();
        Ok(state.results.iter().rev().filter(|r| r.monitoring_check_id == check_id).take(limit).cloned().collect())
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<OnCallSchedule>> {
        Ok(self.state.lock().unwrap().schedules.iter().find(|s| s.id == id).cloned())
    }

    async fn save_schedule(&self, schedule: &OnCallSchedule) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.schedules.retain(|s| s.id != schedule.id);
        state.schedules.push(schedule.clone());
        Ok(())
    }
}

/// Prober answering from a table keyed by target, counting calls per check
#[derive(Default)]
pub struct ScriptedProber {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    calls: Mutex<HashMap<Uuid, usize>>,
}

impl ScriptedProber {
    pub fn respond(&self, target: &str, outcome: ProbeOutcome) {
        self.outcomes.lock().unwrap().insert(target.to_string(), outcome);
    }

    pub fn calls(&self, id: Uuid) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, check: &MonitoringCheck) -> ProbeOutcome {
        *self.calls.lock().unwrap().entry(check.id).or_default() += 1;
        self.outcomes
            .lock()
            .unwrap()
            .get(&check.target)
            .cloned()
            .unwrap_or_else(|| ProbeOutcome::success(1, Some(200)))
    }
}
