//! Order-Book Assembler (spec §4.2): per-`(venue, venue_symbol)` top-N book maintained
//! from snapshots and deltas.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Venue;
use crate::venue::types::{BookEvent, BookEventKind, Level};

pub const TOP_N: usize = 5;

/// Sentinel bid level for unfilled slots: price 0, size 0.
const SENTINEL_BID: Level = Level { price: 0.0, size: 0.0 };
/// Sentinel ask level for unfilled slots: price +inf, size 0.
const SENTINEL_ASK: Level = Level {
    price: f64::INFINITY,
    size: 0.0,
};

#[derive(Debug, Clone)]
struct Book {
    bids: Vec<Level>,
    asks: Vec<Level>,
    sequence_ts: i64,
    has_snapshot: bool,
}

impl Book {
    fn empty() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            sequence_ts: i64::MIN,
            has_snapshot: false,
        }
    }

    fn apply_snapshot(&mut self, ts_ms: i64, mut bids: Vec<Level>, mut asks: Vec<Level>) {
        bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap());
        asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap());
        bids.truncate(TOP_N);
        asks.truncate(TOP_N);
        self.bids = bids;
        self.asks = asks;
        self.sequence_ts = ts_ms;
        self.has_snapshot = true;
    }

    fn apply_delta(&mut self, ts_ms: i64, updates_bids: Vec<Level>, updates_asks: Vec<Level>) {
        merge_side(&mut self.bids, updates_bids, true);
        merge_side(&mut self.asks, updates_asks, false);
        self.sequence_ts = ts_ms;
    }

    fn padded_bids(&self) -> Vec<Level> {
        let mut out = self.bids.clone();
        out.resize(TOP_N, SENTINEL_BID);
        out
    }

    fn padded_asks(&self) -> Vec<Level> {
        let mut out = self.asks.clone();
        out.resize(TOP_N, SENTINEL_ASK);
        out
    }

    fn best_bid(&self) -> Level {
        self.bids.first().copied().unwrap_or(SENTINEL_BID)
    }

    fn best_ask(&self) -> Level {
        self.asks.first().copied().unwrap_or(SENTINEL_ASK)
    }
}

/// Merge upserts into a sorted side, removing zero-size levels, keeping top N.
fn merge_side(side: &mut Vec<Level>, updates: Vec<Level>, descending: bool) {
    for update in updates {
        if let Some(pos) = side
            .iter()
            .position(|l| (l.price - update.price).abs() < f64::EPSILON)
        {
            if update.size == 0.0 {
                side.remove(pos);
            } else {
                side[pos].size = update.size;
            }
        } else if update.size > 0.0 {
            side.push(update);
        }
    }
    if descending {
        side.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap());
    } else {
        side.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap());
    }
    side.truncate(TOP_N);
}

/// Thread-safe per-`(venue, symbol)` book store. One mutex per book (spec §5
/// "Shared-resource policy": "written only by the owning Venue Adapter's reader task;
/// read by the Aggregator under a per-book mutex").
#[derive(Default)]
pub struct Assembler {
    books: RwLock<HashMap<(Venue, String), Arc<RwLock<Book>>>>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn book_handle(&self, venue: Venue, symbol: &str) -> Arc<RwLock<Book>> {
        if let Some(b) = self.books.read().get(&(venue, symbol.to_string())) {
            return b.clone();
        }
        let mut books = self.books.write();
        books
            .entry((venue, symbol.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(Book::empty())))
            .clone()
    }

    /// Apply one event. Stale events (ts_ms <= current sequence_ts) are discarded, as
    /// are deltas before the first snapshot (spec §4.2 "Stale suppression").
    pub fn apply(&self, event: &BookEvent) {
        let handle = self.book_handle(event.venue, &event.venue_symbol);
        let mut book = handle.write();

        if event.ts_ms <= book.sequence_ts && book.has_snapshot {
            return;
        }

        match event.kind {
            BookEventKind::Snapshot => {
                book.apply_snapshot(event.ts_ms, event.bids.clone(), event.asks.clone());
            }
            BookEventKind::Delta => {
                if !book.has_snapshot {
                    return;
                }
                book.apply_delta(event.ts_ms, event.bids.clone(), event.asks.clone());
            }
        }
    }

    /// `(best_bid, best_ask, ts_ms)`. Returns sentinel levels if no snapshot yet.
    pub fn top_of_book(&self, venue: Venue, symbol: &str) -> (Level, Level, i64) {
        let handle = self.book_handle(venue, symbol);
        let book = handle.read();
        (book.best_bid(), book.best_ask(), book.sequence_ts)
    }

    /// Top-N bid/ask levels, padded with sentinels.
    pub fn levels(&self, venue: Venue, symbol: &str) -> (Vec<Level>, Vec<Level>) {
        let handle = self.book_handle(venue, symbol);
        let book = handle.read();
        (book.padded_bids(), book.padded_asks())
    }

    pub fn last_update_ts(&self, venue: Venue, symbol: &str) -> i64 {
        let handle = self.book_handle(venue, symbol);
        handle.read().sequence_ts
    }

    pub fn has_book(&self, venue: Venue, symbol: &str) -> bool {
        let handle = self.book_handle(venue, symbol);
        handle.read().has_snapshot
    }
}
