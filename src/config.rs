//! JSON configuration model.
//!
//! The file has three recognized sections — `Scheduler`, `ScheduledCommands`
//! and `Monitoring` — and unknown fields are ignored so the same document can
//! carry settings for the external HTTP layer and notifier transports.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

fn default_true() -> bool {
    true
}

fn default_poll_seconds() -> u64 {
    5
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_max_parallelism() -> usize {
    1
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_subject_template() -> String {
    "[cronhost] ${AlertType}: ${CommandId}".to_string()
}

fn default_body_template() -> String {
    "Command:   ${Command}\n\
     Started:   ${StartUtc}\n\
     Ended:     ${EndUtc}\n\
     Exit code: ${ExitCode}\n\
     Duration:  ${DurationMs} ms\n\
     Error:     ${Error}\n\
     Failures in a row: ${ConsecutiveFailures}\n\
     ${CustomMessage}"
        .to_string()
}

/// `Scheduler` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// When a captured run exits 0 but wrote to stderr, treat it as failed.
    #[serde(default = "default_true")]
    pub stderr_means_failure: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_seconds: default_poll_seconds(),
            default_time_zone: default_time_zone(),
            max_parallelism: default_max_parallelism(),
            stderr_means_failure: true,
        }
    }
}

impl SchedulerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }
}

/// One entry of the `ScheduledCommands` array, as written in the file.
/// Normalization and validation happen in the catalog builder.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEntry {
    /// Defaults to `command` when missing.
    #[serde(default)]
    pub id: Option<String>,
    pub command: String,
    /// 5-field cron expression: minute hour day-of-month month day-of-week.
    pub cron: String,
    /// Defaults to `Scheduler.defaultTimeZone`.
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_runtime_minutes: Option<u64>,
    #[serde(default)]
    pub allow_parallel: bool,
    /// Defaults to the command id.
    #[serde(default)]
    pub concurrency_key: Option<String>,
    #[serde(default)]
    pub capture_output: bool,
    /// Suppress the per-run start log line.
    #[serde(default)]
    pub quiet_start: bool,
    #[serde(default = "default_true")]
    pub alert_on_fail: bool,
    #[serde(default)]
    pub custom_alert_message: Option<String>,
}

/// Alert templating and thresholds consumed by the execution recorder. The
/// notifier transports configured alongside these are wired by the external
/// layer into an [`AlertSink`](crate::alert::AlertSink).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettings {
    #[serde(default = "default_subject_template")]
    pub subject_template: String,
    #[serde(default = "default_body_template")]
    pub body_template: String,
    #[serde(default = "default_failure_threshold")]
    pub consecutive_failure_threshold: u32,
    /// Successful runs at or above this duration raise a "slow run" alert.
    /// Off when unset.
    #[serde(default)]
    pub slow_run_seconds: Option<u64>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            subject_template: default_subject_template(),
            body_template: default_body_template(),
            consecutive_failure_threshold: default_failure_threshold(),
            slow_run_seconds: None,
        }
    }
}

/// `Monitoring` section. Only the alert subsection reaches the core.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSettings {
    #[serde(default)]
    pub alerts: AlertSettings,
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "Scheduler", default)]
    pub scheduler: SchedulerSettings,
    #[serde(rename = "ScheduledCommands", default)]
    pub scheduled_commands: Vec<CommandEntry>,
    #[serde(rename = "Monitoring", default)]
    pub monitoring: MonitoringSettings,
}

impl AppConfig {
    /// Read and deserialize the config file. A failure here never touches an
    /// already-active catalog; callers decide whether it is fatal (first
    /// start) or recoverable (reload).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&text)?;
        config.clamp_limits();
        Ok(config)
    }

    /// Out-of-range scheduler limits are clamped to their minimums and
    /// logged; they never fail the load.
    fn clamp_limits(&mut self) {
        if self.scheduler.poll_seconds < 1 {
            tracing::warn!("pollSeconds must be >= 1, clamping to 1");
            self.scheduler.poll_seconds = 1;
        }
        if self.scheduler.max_parallelism < 1 {
            tracing::warn!("maxParallelism must be >= 1, clamping to 1");
            self.scheduler.max_parallelism = 1;
        }
    }
}
