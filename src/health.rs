//! Read-only health snapshot consumed by the external HTTP layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::recorder::ExecutionEvent;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub version: String,
    pub now_utc: DateTime<Utc>,
    /// Jobs in configuration order, including disabled and invalid entries.
    pub schedule: Vec<ScheduleEntry>,
    /// Newest first.
    pub recent_events: Vec<ExecutionEvent>,
    pub failure_counters: HashMap<String, u32>,
    pub scheduler: SchedulerHealth,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub command: String,
    pub cron: String,
    pub zone: String,
    pub enabled: bool,
    pub allow_parallel: bool,
    pub concurrency_key: String,
    pub max_runtime_minutes: Option<u64>,
    pub next_run_utc: Option<DateTime<Utc>>,
    /// The same instant rendered in the job's zone, for operators.
    pub next_run_local: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerHealth {
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub seconds_since_heartbeat: i64,
    pub consecutive_errors: u32,
    pub poll_interval_seconds: u64,
}
