//! The scheduler loop: polls for due jobs, dispatches them without blocking,
//! maintains the heartbeat and the next-run map, and backs off on its own
//! errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::alert::AlertSink;
use crate::catalog::{Catalog, CatalogHandle, Job};
use crate::clock::Clock;
use crate::config::SchedulerSettings;
use crate::error::{Error, Result};
use crate::gate::{Acquisition, ConcurrencyGate};
use crate::health::{HealthSnapshot, ScheduleEntry, SchedulerHealth};
use crate::recorder::{ExecutionEvent, ExecutionRecorder};
use crate::supervisor::{self, wait_for_shutdown};

/// Consecutive loop errors at which the condition is logged as critical.
const CRITICAL_ERROR_THRESHOLD: u32 = 3;

/// One next-run entry, tagged with the inputs it was derived from so a
/// reload that edits a job's cron or zone invalidates it.
#[derive(Debug, Clone)]
struct NextRun {
    /// `None` = the cron has no further occurrence; the job is quiescent.
    at: Option<DateTime<Utc>>,
    cron: String,
    zone: String,
}

/// State shared between the loop and the health monitor. The next-run map is
/// mutated only by the loop; the monitor reads it for the schedule view.
struct SchedulerState {
    last_heartbeat: Mutex<DateTime<Utc>>,
    consecutive_errors: AtomicU32,
    next_runs: Mutex<HashMap<String, NextRun>>,
}

pub struct Scheduler<C: Clock, S: AlertSink> {
    catalog: CatalogHandle,
    gate: Arc<ConcurrencyGate>,
    recorder: Arc<ExecutionRecorder<S>>,
    clock: C,
    state: Arc<SchedulerState>,
    poll_seconds: u64,
    stderr_means_failure: bool,
    seen_generation: Option<u64>,
    inflight: JoinSet<()>,
}

impl<C: Clock, S: AlertSink> Scheduler<C, S> {
    pub fn new(
        catalog: CatalogHandle,
        gate: Arc<ConcurrencyGate>,
        recorder: Arc<ExecutionRecorder<S>>,
        clock: C,
        settings: &SchedulerSettings,
    ) -> Self {
        let now = clock.now_utc();
        Self {
            catalog,
            gate,
            recorder,
            clock,
            state: Arc::new(SchedulerState {
                last_heartbeat: Mutex::new(now),
                consecutive_errors: AtomicU32::new(0),
                next_runs: Mutex::new(HashMap::new()),
            }),
            poll_seconds: settings.poll_seconds.max(1),
            stderr_means_failure: settings.stderr_means_failure,
            seen_generation: None,
            inflight: JoinSet::new(),
        }
    }

    /// A cloneable read-only view for the external monitoring surface.
    pub fn monitor(&self) -> Monitor<C, S> {
        Monitor {
            catalog: self.catalog.clone(),
            recorder: Arc::clone(&self.recorder),
            state: Arc::clone(&self.state),
            clock: self.clock.clone(),
            poll_seconds: self.poll_seconds,
        }
    }

    /// Run until the shutdown signal fires, then drain in-flight executions.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_seconds = self.poll_seconds,
            max_parallelism = self.gate.max_parallelism(),
            "scheduler loop started"
        );

        loop {
            let errors = match self.tick(&shutdown) {
                Ok(()) => {
                    self.state.consecutive_errors.store(0, Ordering::SeqCst);
                    0
                }
                Err(e) => {
                    let n = self.state.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::error!(error = %e, consecutive_errors = n, "scheduler iteration failed");
                    if n >= CRITICAL_ERROR_THRESHOLD {
                        tracing::error!(
                            consecutive_errors = n,
                            "scheduler is failing repeatedly; backing off"
                        );
                    }
                    n
                }
            };

            // Reap finished dispatches without blocking the loop.
            while self.inflight.try_join_next().is_some() {}

            let sleep_for = Duration::from_secs(self.poll_seconds) + backoff_extension(errors);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!(
            in_flight = self.inflight.len(),
            "scheduler stopping, waiting for running commands"
        );
        while self.inflight.join_next().await.is_some() {}
        tracing::info!("scheduler loop stopped");
    }

    /// One iteration: heartbeat, examine the catalog in order, dispatch what
    /// is due. Never waits on an execution.
    fn tick(&mut self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let now = self.clock.now_utc();
        *self
            .state
            .last_heartbeat
            .lock()
            .map_err(|_| Error::Loop("heartbeat lock poisoned".into()))? = now;

        let catalog = self.catalog.current();
        if self.seen_generation != Some(catalog.generation) {
            self.invalidate_next_runs(&catalog)?;
            self.seen_generation = Some(catalog.generation);
        }

        for job in catalog.jobs.iter().filter(|j| j.dispatchable()) {
            let Some(cron) = job.cron.as_ref() else {
                continue;
            };
            let due = {
                let mut next_runs = self
                    .state
                    .next_runs
                    .lock()
                    .map_err(|_| Error::Loop("next-run map lock poisoned".into()))?;
                let entry = next_runs.entry(job.id.clone()).or_insert_with(|| NextRun {
                    at: cron.next_after(now, job.zone),
                    cron: cron.source().to_string(),
                    zone: job.zone_name.clone(),
                });
                match entry.at {
                    Some(at) if at <= now => {
                        // Advance before dispatching so this tick cannot fire
                        // the same instant twice. Strictly-after semantics of
                        // next_after keep the sequence increasing.
                        entry.at =
                            cron.next_after(at + chrono::Duration::seconds(1), job.zone);
                        Some(at)
                    }
                    _ => None,
                }
            };
            if let Some(due) = due {
                tracing::debug!(command_id = %job.id, due = %due, "dispatching");
                self.dispatch(Arc::clone(job), shutdown.clone());
            }
        }
        Ok(())
    }

    /// Dispatch one execution: acquire permits, supervise, record. Runs on
    /// its own task, tracked in the JoinSet so shutdown can await quiescence.
    fn dispatch(&mut self, job: Arc<Job>, shutdown: watch::Receiver<bool>) {
        let gate = Arc::clone(&self.gate);
        let recorder = Arc::clone(&self.recorder);
        let clock = self.clock.clone();
        let stderr_means_failure = self.stderr_means_failure;
        self.inflight.spawn(async move {
            match gate.acquire(&job).await {
                Acquisition::Acquired(permits) => {
                    let event =
                        supervisor::run_command(&job, &clock, shutdown, stderr_means_failure)
                            .await;
                    recorder.record(&job, event);
                    drop(permits);
                }
                Acquisition::Conflict => {
                    tracing::info!(
                        command_id = %job.id,
                        concurrency_key = %job.concurrency_key,
                        "skipping run, concurrency key busy"
                    );
                    let now = clock.now_utc();
                    recorder.record(&job, ExecutionEvent::skipped(&job, now));
                }
            }
        });
    }

    /// Rebuild the next-run map after a catalog swap: entries survive only
    /// for ids whose cron and zone are unchanged, so an edited job is
    /// recomputed and a fixed cron starts firing.
    fn invalidate_next_runs(&self, catalog: &Catalog) -> Result<()> {
        let mut keep: HashMap<&str, (&str, &str)> = HashMap::new();
        for job in catalog.jobs.iter().filter(|j| j.dispatchable()) {
            if let Some(cron) = job.cron.as_ref() {
                keep.insert(&job.id, (cron.source(), &job.zone_name));
            }
        }
        let mut next_runs = self
            .state
            .next_runs
            .lock()
            .map_err(|_| Error::Loop("next-run map lock poisoned".into()))?;
        next_runs.retain(|id, entry| {
            keep.get(id.as_str()) == Some(&(entry.cron.as_str(), entry.zone.as_str()))
        });
        Ok(())
    }
}

/// Extra sleep applied after consecutive loop errors:
/// `min(60 s, 10 s * 2^min(errors-1, 3))`.
fn backoff_extension(errors: u32) -> Duration {
    if errors == 0 {
        return Duration::ZERO;
    }
    let exponent = (errors - 1).min(3);
    Duration::from_secs(60.min(10u64 << exponent))
}

/// Read-only view producing health snapshots for the external HTTP layer.
#[derive(Clone)]
pub struct Monitor<C: Clock, S: AlertSink> {
    catalog: CatalogHandle,
    recorder: Arc<ExecutionRecorder<S>>,
    state: Arc<SchedulerState>,
    clock: C,
    poll_seconds: u64,
}

impl<C: Clock, S: AlertSink> Monitor<C, S> {
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = self.clock.now_utc();
        let catalog = self.catalog.current();
        let next_runs = self
            .state
            .next_runs
            .lock()
            .expect("next-run map lock poisoned")
            .clone();

        let schedule = catalog
            .jobs
            .iter()
            .map(|job| {
                let next = next_runs.get(&job.id).and_then(|entry| entry.at);
                ScheduleEntry {
                    id: job.id.clone(),
                    command: job.command.clone(),
                    cron: job.cron_source.clone(),
                    zone: job.zone_name.clone(),
                    enabled: job.enabled,
                    allow_parallel: job.allow_parallel,
                    concurrency_key: job.concurrency_key.clone(),
                    max_runtime_minutes: job.max_runtime_minutes(),
                    next_run_utc: next,
                    next_run_local: next.map(|at| at.with_timezone(&job.zone).to_rfc3339()),
                }
            })
            .collect();

        let last_heartbeat = *self
            .state
            .last_heartbeat
            .lock()
            .expect("heartbeat lock poisoned");
        let seconds_since_heartbeat = (now - last_heartbeat).num_seconds().max(0);
        let consecutive_errors = self.state.consecutive_errors.load(Ordering::SeqCst);

        HealthSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            now_utc: now,
            schedule,
            recent_events: self.recorder.recent_events_newest_first(),
            failure_counters: self.recorder.failure_counters(),
            scheduler: SchedulerHealth {
                healthy: seconds_since_heartbeat < (3 * self.poll_seconds) as i64
                    && consecutive_errors == 0,
                last_heartbeat,
                seconds_since_heartbeat,
                consecutive_errors,
                poll_interval_seconds: self.poll_seconds,
            },
        }
    }
}
