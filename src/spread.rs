//! Spread Aggregator (spec §4.3): joins two venues' top-of-book views into rate-limited
//! `SpreadSnapshot`s, appended to a bounded per-instrument ring buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::Venue;
use crate::orderbook::Assembler;
use crate::venue::types::Level;

pub const RING_BUFFER_CAPACITY: usize = 500;
const DEFAULT_GATE_MS: i64 = 25;
const CROSSED_WARN_INTERVAL_MS: i64 = 1_000;

/// One joined view of instrument `base` across quoting venue A and hedge venue B.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadSnapshot {
    pub instrument: String,
    pub timestamp_ms: i64,
    pub entry_spread: f64,
    pub exit_spread: f64,
    pub venue_a_bids: Vec<Level>,
    pub venue_a_asks: Vec<Level>,
    pub venue_b_bids: Vec<Level>,
    pub venue_b_asks: Vec<Level>,
    pub time_lag_ms: i64,
}

fn entry_spread(a_best_bid: f64, b_best_ask: f64) -> f64 {
    100.0 * (a_best_bid - b_best_ask) / b_best_ask
}

fn exit_spread(a_best_ask: f64, b_best_bid: f64) -> f64 {
    100.0 * (a_best_ask - b_best_bid) / b_best_bid
}

struct InstrumentState {
    ring: VecDeque<SpreadSnapshot>,
    last_emit_ms: i64,
    last_crossed_warn_ms: i64,
}

impl InstrumentState {
    fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(RING_BUFFER_CAPACITY),
            last_emit_ms: i64::MIN,
            last_crossed_warn_ms: i64::MIN,
        }
    }

    fn push(&mut self, snapshot: SpreadSnapshot) {
        if self.ring.len() == RING_BUFFER_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(snapshot);
    }
}

/// One configured cross-venue instrument pair: quoting venue A, hedge venue B.
#[derive(Debug, Clone)]
pub struct InstrumentPair {
    pub base: String,
    pub venue_a: Venue,
    pub venue_a_symbol: String,
    pub venue_b: Venue,
    pub venue_b_symbol: String,
}

/// Joins order-book views, rate-limits emission, maintains the per-instrument ring
/// buffer, and fans out to a drop-oldest consumer channel.
pub struct Aggregator {
    assembler: std::sync::Arc<Assembler>,
    gate_ms: i64,
    states: Mutex<HashMap<String, InstrumentState>>,
    consumer: broadcast::Sender<SpreadSnapshot>,
    now_ms: AtomicI64,
}

impl Aggregator {
    /// Returns the aggregator plus a subscription to its consumer channel (spec §4.3
    /// "Emission"). `broadcast` gives drop-oldest semantics for free: a lagging
    /// subscriber gets `Lagged(n)` and resumes from the oldest snapshot still buffered,
    /// rather than blocking the aggregator.
    pub fn new(
        assembler: std::sync::Arc<Assembler>,
        gate_ms: Option<i64>,
        consumer_capacity: usize,
    ) -> (Self, broadcast::Receiver<SpreadSnapshot>) {
        let (tx, rx) = broadcast::channel(consumer_capacity);
        (
            Self {
                assembler,
                gate_ms: gate_ms.unwrap_or(DEFAULT_GATE_MS),
                states: Mutex::new(HashMap::new()),
                consumer: tx,
                now_ms: AtomicI64::new(0),
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpreadSnapshot> {
        self.consumer.subscribe()
    }

    /// Re-evaluate `pair` at wall-clock `now_ms`. Internal ring-buffer state always
    /// updates; emission to the consumer channel obeys the rate-limit gate (spec §4.3
    /// "Rate limiting": "if the gate is closed the emission is skipped but internal
    /// state still updates").
    pub fn on_update(&self, pair: &InstrumentPair, now_ms: i64) -> Option<SpreadSnapshot> {
        self.now_ms.store(now_ms, Ordering::Relaxed);

        let (a_bid, a_ask, a_ts) = self.assembler.top_of_book(pair.venue_a, &pair.venue_a_symbol);
        let (b_bid, b_ask, b_ts) = self.assembler.top_of_book(pair.venue_b, &pair.venue_b_symbol);

        // Empty book on either side (spec §8 "Boundary behaviors"): emit nothing until
        // both venues have at least one real level on both sides.
        if a_bid.size == 0.0 || a_ask.size == 0.0 || b_bid.size == 0.0 || b_ask.size == 0.0 {
            return None;
        }

        let snapshot = SpreadSnapshot {
            instrument: pair.base.clone(),
            timestamp_ms: now_ms,
            entry_spread: entry_spread(a_bid.price, b_ask.price),
            exit_spread: exit_spread(a_ask.price, b_bid.price),
            venue_a_bids: self.assembler.levels(pair.venue_a, &pair.venue_a_symbol).0,
            venue_a_asks: self.assembler.levels(pair.venue_a, &pair.venue_a_symbol).1,
            venue_b_bids: self.assembler.levels(pair.venue_b, &pair.venue_b_symbol).0,
            venue_b_asks: self.assembler.levels(pair.venue_b, &pair.venue_b_symbol).1,
            time_lag_ms: now_ms - a_ts.min(b_ts),
        };

        let mut states = self.states.lock();
        let state = states
            .entry(pair.base.clone())
            .or_insert_with(InstrumentState::new);

        state.push(snapshot.clone());

        if a_bid.price > a_ask.price || b_bid.price > b_ask.price {
            if now_ms - state.last_crossed_warn_ms >= CROSSED_WARN_INTERVAL_MS {
                warn!(instrument = %pair.base, "crossed book detected");
                state.last_crossed_warn_ms = now_ms;
            }
        }

        if now_ms - state.last_emit_ms < self.gate_ms {
            return None;
        }
        state.last_emit_ms = now_ms;
        drop(states);

        // No receivers yet is not an error; nothing is consuming the feed.
        let _ = self.consumer.send(snapshot.clone());

        Some(snapshot)
    }

    /// Last `n` snapshots from `base`'s ring buffer, oldest first.
    pub fn recent(&self, base: &str, n: usize) -> Vec<SpreadSnapshot> {
        let states = self.states.lock();
        match states.get(base) {
            Some(state) => {
                let len = state.ring.len();
                let skip = len.saturating_sub(n);
                state.ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn ring_len(&self, base: &str) -> usize {
        self.states.lock().get(base).map(|s| s.ring.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::types::{BookEvent, BookEventKind};
    use std::sync::Arc;

    fn snapshot_event(venue: Venue, symbol: &str, ts: i64, bid: f64, ask: f64) -> BookEvent {
        BookEvent {
            venue,
            venue_symbol: symbol.to_string(),
            kind: BookEventKind::Snapshot,
            ts_ms: ts,
            bids: vec![Level { price: bid, size: 1.0 }],
            asks: vec![Level { price: ask, size: 1.0 }],
        }
    }

    fn pair() -> InstrumentPair {
        InstrumentPair {
            base: "BTC".to_string(),
            venue_a: Venue::Okx,
            venue_a_symbol: "BTC-USDT-SWAP".to_string(),
            venue_b: Venue::Bybit,
            venue_b_symbol: "BTCUSDT".to_string(),
        }
    }

    #[test]
    fn basic_spread_emission_matches_formula() {
        let assembler = Arc::new(Assembler::new());
        assembler.apply(&snapshot_event(Venue::Okx, "BTC-USDT-SWAP", 1000, 100.0, 101.0));
        assembler.apply(&snapshot_event(Venue::Bybit, "BTCUSDT", 1001, 99.0, 100.0));

        let (agg, _rx) = Aggregator::new(assembler, None, 16);
        let snap = agg.on_update(&pair(), 2000).expect("should emit");

        assert!((snap.entry_spread - 0.0).abs() < 1e-9);
        assert!((snap.exit_spread - 2.0202020202).abs() < 1e-6);
    }

    #[test]
    fn delta_removal_shifts_spread() {
        let assembler = Arc::new(Assembler::new());
        assembler.apply(&snapshot_event(Venue::Okx, "BTC-USDT-SWAP", 1000, 100.0, 101.0));
        assembler.apply(&snapshot_event(Venue::Bybit, "BTCUSDT", 1001, 99.0, 100.0));

        assembler.apply(&BookEvent {
            venue: Venue::Okx,
            venue_symbol: "BTC-USDT-SWAP".to_string(),
            kind: BookEventKind::Delta,
            ts_ms: 1002,
            bids: vec![Level { price: 100.0, size: 0.0 }, Level { price: 99.0, size: 2.0 }],
            asks: vec![],
        });

        let (agg, _rx) = Aggregator::new(assembler, None, 16);
        let snap = agg.on_update(&pair(), 2000).expect("should emit");
        assert!((snap.entry_spread - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn rate_limit_gate_skips_emission_but_updates_ring() {
        let assembler = Arc::new(Assembler::new());
        assembler.apply(&snapshot_event(Venue::Okx, "BTC-USDT-SWAP", 1000, 100.0, 101.0));
        assembler.apply(&snapshot_event(Venue::Bybit, "BTCUSDT", 1001, 99.0, 100.0));

        let (agg, _rx) = Aggregator::new(assembler, Some(25), 16);
        assert!(agg.on_update(&pair(), 1000).is_some());
        assert!(agg.on_update(&pair(), 1010).is_none());
        assert_eq!(agg.ring_len("BTC"), 2);
        assert!(agg.on_update(&pair(), 1026).is_some());
    }

    #[test]
    fn ring_buffer_is_bounded_at_500() {
        let assembler = Arc::new(Assembler::new());
        assembler.apply(&snapshot_event(Venue::Okx, "BTC-USDT-SWAP", 1000, 100.0, 101.0));
        assembler.apply(&snapshot_event(Venue::Bybit, "BTCUSDT", 1001, 99.0, 100.0));

        let (agg, _rx) = Aggregator::new(assembler, Some(0), 16);
        for i in 0..600 {
            agg.on_update(&pair(), 1000 + i);
        }
        assert_eq!(agg.ring_len("BTC"), RING_BUFFER_CAPACITY);
    }

    #[test]
    fn crossed_book_still_emits() {
        let assembler = Arc::new(Assembler::new());
        assembler.apply(&snapshot_event(Venue::Okx, "BTC-USDT-SWAP", 1000, 102.0, 101.0));
        assembler.apply(&snapshot_event(Venue::Bybit, "BTCUSDT", 1001, 99.0, 100.0));

        let (agg, _rx) = Aggregator::new(assembler, None, 16);
        let snap = agg.on_update(&pair(), 2000);
        assert!(snap.is_some());
    }
}
