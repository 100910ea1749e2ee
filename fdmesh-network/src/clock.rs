//! Injectable millisecond clock (spec.md §9 design note: "may also expose an
//! injectable clock for tests"). All detector and consensus timing math is
//! expressed against this trait rather than calling `SystemTime::now()`
//! directly, so the boundary-behavior tests in spec.md §8 (e.g. "at exactly
//! 2500ms gap, it does not convict") can drive exact millisecond values
//! without racing a real timer.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// UTC wallclock timestamp, used only for the Preference message's
    /// tie-breaking `timestamp` field (spec.md §9: this is a distinct,
    /// correctness-critical use of wallclock rather than monotonic time).
    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// Real wall-clock time, used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

/// A clock whose value is set explicitly, for deterministic tests of the
/// boundary behaviors in spec.md §8.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self { millis: Arc::new(AtomicI64::new(start_millis)) }
    }

    pub fn advance(&self, by_millis: i64) {
        self.millis.fetch_add(by_millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_else(chrono::Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let c = ManualClock::new(1_000);
        assert_eq!(c.now_millis(), 1_000);
        c.advance(2_500);
        assert_eq!(c.now_millis(), 3_500);
    }
}
