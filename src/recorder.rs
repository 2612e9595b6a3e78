//! Execution history and alerting.
//!
//! The recorder owns the bounded recent-events buffer and the per-command
//! consecutive-failure counters. Alert delivery happens on a spawned task so
//! recording never blocks the supervisor's completion path.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::{render, AlertContext, AlertSink, AlertType};
use crate::catalog::Job;
use crate::config::AlertSettings;

/// Capacity of the in-memory recent-events ring.
pub const RECENT_CAPACITY: usize = 5_000;

/// One finished (or skipped) execution attempt. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub command_id: String,
    pub command: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub skipped_due_to_conflict: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl ExecutionEvent {
    /// The event recorded when a dispatch attempt loses its concurrency key:
    /// counted as neither success nor failure, zero duration, no process.
    pub fn skipped(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            command_id: job.id.clone(),
            command: job.command.clone(),
            start_utc: now,
            end_utc: now,
            exit_code: None,
            success: true,
            skipped_due_to_conflict: true,
            error: None,
            duration_ms: 0,
        }
    }
}

pub struct ExecutionRecorder<S: AlertSink> {
    recent: Mutex<VecDeque<ExecutionEvent>>,
    failures: Mutex<HashMap<String, u32>>,
    settings: AlertSettings,
    sink: S,
}

impl<S: AlertSink> ExecutionRecorder<S> {
    pub fn new(settings: AlertSettings, sink: S) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            failures: Mutex::new(HashMap::new()),
            settings,
            sink,
        }
    }

    /// Append the event, update counters, and raise whatever alerts apply.
    pub fn record(&self, job: &Job, mut event: ExecutionEvent) {
        event.duration_ms = (event.end_utc - event.start_utc).num_milliseconds().max(0);

        {
            let mut recent = self.recent.lock().expect("recent buffer poisoned");
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        if event.skipped_due_to_conflict {
            return;
        }

        if event.success {
            self.failures
                .lock()
                .expect("failure counters poisoned")
                .remove(&event.command_id);
            if let Some(limit) = self.settings.slow_run_seconds {
                if event.duration_ms >= (limit as i64).saturating_mul(1000) {
                    self.emit(job, &event, AlertType::SlowRun, 0);
                }
            }
            return;
        }

        let count = {
            let mut failures = self.failures.lock().expect("failure counters poisoned");
            let count = failures.entry(event.command_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if job.alert_on_fail {
            self.emit(job, &event, AlertType::Failure, count);
        }
        if count == self.settings.consecutive_failure_threshold {
            self.emit(job, &event, AlertType::ConsecutiveFailures(count), count);
        }
    }

    /// Fire-and-forget: the sink runs on its own task and is never awaited
    /// from the recording path.
    fn emit(&self, job: &Job, event: &ExecutionEvent, kind: AlertType, count: u32) {
        let ctx = AlertContext {
            event,
            kind,
            consecutive_failures: count,
            custom_message: job.custom_alert_message.as_deref().unwrap_or(""),
        };
        let subject = render(&self.settings.subject_template, &ctx);
        let body = render(&self.settings.body_template, &ctx);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            sink.notify(subject, body).await;
        });
    }

    pub fn consecutive_failures(&self, command_id: &str) -> u32 {
        self.failures
            .lock()
            .expect("failure counters poisoned")
            .get(command_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn failure_counters(&self) -> HashMap<String, u32> {
        self.failures
            .lock()
            .expect("failure counters poisoned")
            .clone()
    }

    pub fn recent_events_newest_first(&self) -> Vec<ExecutionEvent> {
        self.recent
            .lock()
            .expect("recent buffer poisoned")
            .iter()
            .rev()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::mocks::MockAlertSink;

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            command: format!("run-{id}"),
            cron_source: "* * * * *".to_string(),
            cron: None,
            zone: chrono_tz::Tz::UTC,
            zone_name: "UTC".to_string(),
            zone_fell_back: false,
            enabled: true,
            max_runtime: None,
            allow_parallel: false,
            concurrency_key: id.to_string(),
            capture_output: false,
            quiet_start: false,
            alert_on_fail: true,
            custom_alert_message: None,
        }
    }

    fn event(job: &Job, success: bool) -> ExecutionEvent {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        ExecutionEvent {
            command_id: job.id.clone(),
            command: job.command.clone(),
            start_utc: start,
            end_utc: start + Duration::seconds(2),
            exit_code: Some(if success { 0 } else { 1 }),
            success,
            skipped_due_to_conflict: false,
            error: None,
            duration_ms: 0,
        }
    }

    fn recorder(sink: MockAlertSink) -> ExecutionRecorder<MockAlertSink> {
        ExecutionRecorder::new(AlertSettings::default(), sink)
    }

    async fn settle() {
        // Let the fire-and-forget alert tasks run.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn counters_follow_the_counter_law() {
        let rec = recorder(MockAlertSink::new());
        let job = job("a");

        rec.record(&job, event(&job, false));
        rec.record(&job, event(&job, false));
        assert_eq!(rec.consecutive_failures("a"), 2);

        rec.record(&job, event(&job, true));
        assert_eq!(rec.consecutive_failures("a"), 0);

        rec.record(&job, event(&job, false));
        assert_eq!(rec.consecutive_failures("a"), 1);
    }

    #[tokio::test]
    async fn skips_touch_nothing_but_the_buffer() {
        let sink = MockAlertSink::new();
        let rec = recorder(sink.clone());
        let job = job("a");

        rec.record(&job, event(&job, false));
        let skip = ExecutionEvent::skipped(&job, Utc::now());
        rec.record(&job, skip);
        settle().await;

        assert_eq!(rec.consecutive_failures("a"), 1, "skip must not count");
        let recent = rec.recent_events_newest_first();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].skipped_due_to_conflict);
        assert_eq!(recent[0].duration_ms, 0);
        // Only the failure alert fired.
        assert_eq!(sink.alert_count(), 1);
    }

    #[tokio::test]
    async fn duration_is_derived_from_the_instants() {
        let rec = recorder(MockAlertSink::new());
        let job = job("a");
        rec.record(&job, event(&job, true));
        assert_eq!(rec.recent_events_newest_first()[0].duration_ms, 2000);
    }

    #[tokio::test]
    async fn ring_drops_oldest_beyond_capacity() {
        let rec = recorder(MockAlertSink::new());
        let job = job("a");
        for i in 0..(RECENT_CAPACITY + 5) {
            let mut e = event(&job, true);
            e.exit_code = Some(i as i32);
            rec.record(&job, e);
        }
        let recent = rec.recent_events_newest_first();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        // Newest first; the five oldest are gone.
        assert_eq!(recent[0].exit_code, Some((RECENT_CAPACITY + 4) as i32));
        assert_eq!(recent.last().unwrap().exit_code, Some(5));
    }

    #[tokio::test]
    async fn failure_alert_respects_job_flag() {
        let sink = MockAlertSink::new();
        let rec = recorder(sink.clone());

        let mut silent = job("silent");
        silent.alert_on_fail = false;
        rec.record(&silent, event(&silent, false));
        settle().await;
        assert_eq!(sink.alert_count(), 0);

        let loud = job("loud");
        rec.record(&loud, event(&loud, false));
        settle().await;
        assert_eq!(sink.alert_count(), 1);
        assert!(sink.alerts()[0].subject.contains("Failure"));
        assert!(sink.alerts()[0].subject.contains("loud"));
    }

    #[tokio::test]
    async fn consecutive_alert_fires_at_threshold_even_without_flag() {
        let sink = MockAlertSink::new();
        let rec = recorder(sink.clone());
        let mut job = job("flaky");
        job.alert_on_fail = false;

        for _ in 0..4 {
            rec.record(&job, event(&job, false));
        }
        settle().await;

        // Exactly one escalation, at the third failure.
        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].subject.contains("Consecutive failures (3)"));
    }

    #[tokio::test]
    async fn slow_run_alert_uses_threshold() {
        let sink = MockAlertSink::new();
        let settings = AlertSettings {
            slow_run_seconds: Some(1),
            ..AlertSettings::default()
        };
        let rec = ExecutionRecorder::new(settings, sink.clone());
        let job = job("slow");

        // 2 s run against a 1 s threshold.
        rec.record(&job, event(&job, true));
        settle().await;
        assert_eq!(sink.alert_count(), 1);
        assert!(sink.alerts()[0].subject.contains("Slow run"));

        // A fast run stays quiet.
        sink.clear();
        let mut fast = event(&job, true);
        fast.end_utc = fast.start_utc;
        rec.record(&job, fast);
        settle().await;
        assert_eq!(sink.alert_count(), 0);
    }

    #[tokio::test]
    async fn custom_message_reaches_the_body() {
        let sink = MockAlertSink::new();
        let rec = recorder(sink.clone());
        let mut job = job("a");
        job.custom_alert_message = Some("page the dba".to_string());

        rec.record(&job, event(&job, false));
        settle().await;
        assert!(sink.alerts()[0].body.contains("page the dba"));
    }
}
