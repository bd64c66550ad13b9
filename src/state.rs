//! Process-wide flags and the sliding error budget.
//!
//! Each flag has exactly one documented writer, per the Design Notes' requirement that
//! global mutable state be explicitly owned rather than scattered KV reads. TTL-bearing
//! flags (`server_overload_pause`) clear themselves on read once expired.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use std::collections::VecDeque;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// The one-way kill switch (spec §3, invariant 6 in §8: monotonic once tripped).
#[derive(Debug, Default)]
pub struct KillSwitch {
    tripped: AtomicBool,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// One-way: once true, never resets.
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }
}

/// `only_exit`: 0 forbids new inventory-increasing trades, 1 allows them. Written only
/// by the Hedge Executor on a margin-insufficient error (spec §4.5).
#[derive(Debug)]
pub struct OnlyExitFlag {
    value: AtomicBool,
}

impl Default for OnlyExitFlag {
    fn default() -> Self {
        Self {
            value: AtomicBool::new(true),
        }
    }
}

impl OnlyExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allows_new_inventory(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, allow_new_inventory: bool) {
        self.value.store(allow_new_inventory, Ordering::SeqCst);
    }
}

/// `server_overload_pause`: a presence-with-TTL flag. Set by the Hedge Executor on
/// `server_overloaded`; auto-clears after its TTL (spec §4.5, §5 "Shared-resource
/// policy").
#[derive(Debug, Default)]
pub struct ServerOverloadPause {
    expires_at_ms: AtomicI64,
}

impl ServerOverloadPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_for(&self, duration_ms: i64) {
        self.expires_at_ms.store(now_ms() + duration_ms, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        now_ms() < self.expires_at_ms.load(Ordering::SeqCst)
    }
}

/// Sliding window of error timestamps; trips the kill switch at `trip_len` within
/// `window_secs` (spec §3 "Error budget", §7 "Budgeted").
pub struct ErrorBudget {
    window_secs: i64,
    trip_len: usize,
    events: Mutex<VecDeque<i64>>,
}

/// Default window/trip length, matching `EngineConfig`'s defaults (spec §3 "Error
/// budget").
impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new(300, 10)
    }
}

impl ErrorBudget {
    pub fn new(window_secs: i64, trip_len: usize) -> Self {
        Self {
            window_secs,
            trip_len,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Append-on-error only; there is no "clear on success" call (Design Notes
    /// ambiguity #2 — `check_and_update_error_state` never took a success argument in
    /// any live variant of the original system).
    pub fn record(&self, kill_switch: &KillSwitch) {
        let now = now_ms();
        let mut events = self.events.lock().expect("error budget mutex poisoned");
        events.push_back(now);
        let cutoff = now - self.window_secs * 1000;
        while matches!(events.front(), Some(&t) if t < cutoff) {
            events.pop_front();
        }
        if events.len() >= self.trip_len {
            kill_switch.trip();
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("error budget mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bundle of the process-wide flags a component needs, passed by `Arc`.
#[derive(Default)]
pub struct Flags {
    pub kill_switch: KillSwitch,
    pub only_exit: OnlyExitFlag,
    pub server_overload_pause: ServerOverloadPause,
    pub error_budget: ErrorBudget,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_switch_is_monotonic() {
        let ks = KillSwitch::new();
        assert!(!ks.is_tripped());
        ks.trip();
        assert!(ks.is_tripped());
        // Tripping again is a no-op, not a reset.
        ks.trip();
        assert!(ks.is_tripped());
    }

    #[test]
    fn error_budget_trips_at_threshold() {
        let ks = KillSwitch::new();
        let budget = ErrorBudget::new(300, 10);
        for _ in 0..9 {
            budget.record(&ks);
        }
        assert!(!ks.is_tripped());
        budget.record(&ks);
        assert!(ks.is_tripped());
    }

    #[test]
    fn server_overload_pause_expires() {
        let pause = ServerOverloadPause::new();
        assert!(!pause.is_active());
        pause.set_for(50);
        assert!(pause.is_active());
        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(!pause.is_active());
    }
}
