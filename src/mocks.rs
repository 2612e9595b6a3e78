//! Mock implementations for unit testing without real time or transports.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cronhost = { path = "...", features = ["test-support"] }
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::alert::AlertSink;
use crate::clock::Clock;

// ── MockAlertSink ─────────────────────────────────────────────────────────────

/// Records every alert raised during a test run.
#[derive(Clone, Default)]
pub struct MockAlertSink {
    records: Arc<Mutex<Vec<RecordedAlert>>>,
}

#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub subject: String,
    pub body: String,
}

impl MockAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<RecordedAlert> {
        self.records.lock().unwrap().clone()
    }

    pub fn alert_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl AlertSink for MockAlertSink {
    async fn notify(&self, subject: String, body: String) {
        self.records
            .lock()
            .unwrap()
            .push(RecordedAlert { subject, body });
    }
}

// ── ManualClock ───────────────────────────────────────────────────────────────

/// Clock pinned to a settable instant for deterministic schedule tests.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
