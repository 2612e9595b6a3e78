//! Wall-clock reads behind a trait so schedule logic can be tested at a
//! pinned instant.

use chrono::{DateTime, Utc};

/// Read the current UTC instant.
///
/// One trait, one operation — implement this to replace wall-clock reads in
/// tests.
pub trait Clock: Send + Sync + Clone + 'static {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Zero-sized type — delegates to [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_tracks_wall_time() {
        let clock = SystemClock;
        let a = clock.now_utc();
        let b = clock.now_utc();
        assert!(b >= a);
        assert!((Utc::now() - b).num_seconds() < 2);
    }
}
