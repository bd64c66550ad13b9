//! Clock discipline: local wall-clock plus a periodically refreshed offset vs. the
//! venue's time endpoint (spec §4.1 "Clock discipline"), grounded in
//! `original_source/TimeOffset.py`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Holds the last-measured offset (venue_time - local_time) in milliseconds.
#[derive(Debug, Default)]
pub struct ClockOffset {
    offset_ms: AtomicI64,
}

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local wall-clock adjusted by the last-refreshed venue offset. Signed requests
    /// must use this, not raw wall-clock.
    pub fn now_ms(&self) -> i64 {
        wall_clock_ms() + self.offset_ms.load(Ordering::Relaxed)
    }

    /// Record a fresh `(local_ms_at_send, venue_reported_ms)` pair.
    pub fn refresh(&self, local_ms_at_send: i64, venue_reported_ms: i64) {
        self.offset_ms
            .store(venue_reported_ms - local_ms_at_send, Ordering::Relaxed);
    }
}
