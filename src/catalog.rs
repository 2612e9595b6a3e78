//! The validated set of schedulable jobs, rebuilt atomically on every
//! (re)load.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono_tz::Tz;

use crate::config::AppConfig;
use crate::schedule::CronExpr;
use crate::timezone::ZoneResolver;

/// A validated job. Immutable for the lifetime of its catalog.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub command: String,
    /// The expression as configured, kept for the schedule view.
    pub cron_source: String,
    /// `None` when the expression failed to parse; such a job is never
    /// dispatched but stays visible in the schedule view.
    pub cron: Option<CronExpr>,
    pub zone: Tz,
    pub zone_name: String,
    pub zone_fell_back: bool,
    pub enabled: bool,
    pub max_runtime: Option<Duration>,
    pub allow_parallel: bool,
    pub concurrency_key: String,
    pub capture_output: bool,
    pub quiet_start: bool,
    pub alert_on_fail: bool,
    pub custom_alert_message: Option<String>,
}

impl Job {
    pub fn dispatchable(&self) -> bool {
        self.enabled && self.cron.is_some()
    }

    pub fn max_runtime_minutes(&self) -> Option<u64> {
        self.max_runtime.map(|d| d.as_secs() / 60)
    }
}

/// Immutable snapshot of the schedulable set, in configuration order.
#[derive(Debug, Default)]
pub struct Catalog {
    pub jobs: Vec<Arc<Job>>,
    /// Bumped on every rebuild so the scheduler can invalidate derived state.
    pub generation: u64,
}

/// Shared pointer to the live catalog. Readers clone the inner `Arc`; a
/// reload replaces it in one store, so an observer sees either the old or
/// the new catalog in full.
#[derive(Clone)]
pub struct CatalogHandle {
    inner: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn current(&self) -> Arc<Catalog> {
        self.inner.read().expect("catalog lock poisoned").clone()
    }

    pub fn swap(&self, catalog: Catalog) {
        *self.inner.write().expect("catalog lock poisoned") = Arc::new(catalog);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    InvalidCron,
    ZoneFallback,
    DuplicateId,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub id: String,
    pub kind: IssueKind,
    pub detail: String,
}

/// Totals and per-job issues from one catalog build.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub total: usize,
    pub valid_enabled: usize,
    pub disabled: usize,
    pub invalid_cron: usize,
    pub zone_fallbacks: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// A non-empty input that produced nothing runnable is worth a warning,
    /// but the load itself still succeeds.
    pub fn nothing_runnable(&self) -> bool {
        self.total > 0 && self.valid_enabled == 0
    }

    pub fn log(&self) {
        tracing::info!(
            total = self.total,
            valid_enabled = self.valid_enabled,
            disabled = self.disabled,
            invalid_cron = self.invalid_cron,
            zone_fallbacks = self.zone_fallbacks,
            "catalog loaded"
        );
        if self.nothing_runnable() {
            tracing::warn!("configuration contains no runnable commands");
        }
    }
}

/// Build a catalog from a parsed configuration.
///
/// Per entry: default `id` from `command` and `zone` from the scheduler
/// default, resolve the zone, parse the cron, then classify. A bad entry is
/// reported and isolated — it never takes the rest of the load down.
pub fn build_catalog(
    config: &AppConfig,
    resolver: &ZoneResolver,
    generation: u64,
) -> (Catalog, ValidationReport) {
    let mut report = ValidationReport::default();
    let mut jobs: Vec<Arc<Job>> = Vec::with_capacity(config.scheduled_commands.len());
    let mut seen: HashSet<String> = HashSet::new();

    for entry in &config.scheduled_commands {
        report.total += 1;

        let id = entry
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&entry.command)
            .to_string();

        if !seen.insert(id.clone()) {
            tracing::error!(command_id = %id, "duplicate command id, entry dropped");
            report.issues.push(ValidationIssue {
                id,
                kind: IssueKind::DuplicateId,
                detail: "duplicate id; entry dropped".to_string(),
            });
            continue;
        }

        let requested_zone = entry
            .zone
            .as_deref()
            .unwrap_or(&config.scheduler.default_time_zone);
        let zone = resolver.resolve(requested_zone);
        if zone.fell_back_to_utc {
            tracing::warn!(
                command_id = %id,
                zone = %zone.requested,
                "unknown time zone, falling back to UTC"
            );
            report.zone_fallbacks += 1;
            report.issues.push(ValidationIssue {
                id: id.clone(),
                kind: IssueKind::ZoneFallback,
                detail: format!("unknown zone '{}', using UTC", zone.requested),
            });
        }

        let cron = match CronExpr::parse(&entry.cron) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::error!(
                    command_id = %id,
                    error = %e,
                    "invalid cron expression, command will not be scheduled"
                );
                report.invalid_cron += 1;
                report.issues.push(ValidationIssue {
                    id: id.clone(),
                    kind: IssueKind::InvalidCron,
                    detail: e.to_string(),
                });
                None
            }
        };

        if cron.is_some() {
            if entry.enabled {
                report.valid_enabled += 1;
            } else {
                report.disabled += 1;
            }
        }

        let max_runtime = match entry.max_runtime_minutes {
            Some(0) => {
                tracing::warn!(command_id = %id, "maxRuntimeMinutes is 0, ignoring");
                None
            }
            Some(minutes) => Some(Duration::from_secs(minutes * 60)),
            None => None,
        };

        let concurrency_key = entry
            .concurrency_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&id)
            .to_string();

        jobs.push(Arc::new(Job {
            id,
            command: entry.command.clone(),
            cron_source: entry.cron.clone(),
            cron,
            zone: zone.tz,
            zone_name: zone.tz.name().to_string(),
            zone_fell_back: zone.fell_back_to_utc,
            enabled: entry.enabled,
            max_runtime,
            allow_parallel: entry.allow_parallel,
            concurrency_key,
            capture_output: entry.capture_output,
            quiet_start: entry.quiet_start,
            alert_on_fail: entry.alert_on_fail,
            custom_alert_message: entry.custom_alert_message.clone(),
        }));
    }

    (Catalog { jobs, generation }, report)
}
