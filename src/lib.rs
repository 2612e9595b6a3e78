//! # cronhost
//!
//! A long-running host that executes shell commands on cron schedules.
//!
//! ## Features
//!
//! - 5-field cron expressions evaluated against each job's own time zone —
//!   DST-safe: times erased by spring-forward fire at the first instant that
//!   exists again, ambiguous fall-back times fire once, on the earlier
//!   occurrence.
//! - Parallel execution bounded by a global cap, with keyed mutual exclusion
//!   (`concurrencyKey`) turning overlapping runs into recorded skips.
//! - Per-job runtime limits that kill the whole process tree, and a graceful
//!   shutdown that cancels in-flight runs without counting them as failures.
//! - Hot configuration reload: the catalog is rebuilt and swapped atomically;
//!   a broken file keeps the previous catalog in force.
//! - In-memory execution history (ring of 5 000 events), consecutive-failure
//!   counters, and templated alerts through a pluggable sink.
//! - A read-only health snapshot (heartbeat, schedule view, recent events)
//!   for an external dashboard to serve.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cronhost::{
//!     build_catalog, AppConfig, CatalogHandle, ConcurrencyGate, ExecutionRecorder,
//!     LogAlertSink, Scheduler, SystemClock, ZoneResolver,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::load("cronhost.json".as_ref()).unwrap();
//!     let (catalog, report) = build_catalog(&config, &ZoneResolver, 0);
//!     report.log();
//!
//!     let scheduler = Scheduler::new(
//!         CatalogHandle::new(catalog),
//!         Arc::new(ConcurrencyGate::new(config.scheduler.max_parallelism)),
//!         Arc::new(ExecutionRecorder::new(config.monitoring.alerts.clone(), LogAlertSink)),
//!         SystemClock,
//!         &config.scheduler,
//!     );
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     scheduler.run(shutdown_rx).await;
//! }
//! ```
//!
//! ## Job config example (entry of `ScheduledCommands`)
//!
//! ```json
//! {
//!   "id": "nightly-report",
//!   "command": "generate-report --all",
//!   "cron": "30 2 * * *",
//!   "zone": "America/New_York",
//!   "maxRuntimeMinutes": 15,
//!   "allowParallel": false,
//!   "concurrencyKey": "db",
//!   "captureOutput": true,
//!   "alertOnFail": true
//! }
//! ```

pub mod alert;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod recorder;
pub mod schedule;
pub mod scheduler;
pub mod supervisor;
pub mod timezone;
pub mod watcher;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use alert::{AlertSink, Fanout, LogAlertSink};
pub use catalog::{build_catalog, Catalog, CatalogHandle, Job, ValidationReport};
pub use clock::{Clock, SystemClock};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use gate::ConcurrencyGate;
pub use health::HealthSnapshot;
pub use recorder::{ExecutionEvent, ExecutionRecorder};
pub use schedule::CronExpr;
pub use scheduler::{Monitor, Scheduler};
pub use timezone::ZoneResolver;
pub use watcher::ConfigWatcher;
