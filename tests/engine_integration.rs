//! End-to-end scenarios spanning the Order-Book Assembler, Spread Aggregator, and
//! Hedge Executor, matching the concrete walkthroughs from the engine's testable
//! properties list.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use xvenue_mm_engine::alert::NullAlertSink;
use xvenue_mm_engine::config::Venue;
use xvenue_mm_engine::errors::{VenueError, VenueResult};
use xvenue_mm_engine::hedge::{HedgeExecutor, NullReconciler};
use xvenue_mm_engine::orderbook::Assembler;
use xvenue_mm_engine::spread::{Aggregator, InstrumentPair};
use xvenue_mm_engine::state::Flags;
use xvenue_mm_engine::venue::types::{BookEvent, BookEventKind, FillReport, Level, OrderAck, OrderEvent, OrderStatus, Side};
use xvenue_mm_engine::venue::VenueAdapter;

fn level(price: f64, size: f64) -> Level {
    Level { price, size }
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

/// Scenario 1 — basic spread emission.
#[test]
fn scenario_basic_spread_emission() {
    let assembler = Arc::new(Assembler::new());
    assembler.apply(&BookEvent {
        venue: Venue::Okx,
        venue_symbol: "BTC-USDT-SWAP".to_string(),
        kind: BookEventKind::Snapshot,
        ts_ms: 1000,
        bids: vec![level(100.0, 1.0)],
        asks: vec![level(101.0, 1.0)],
    });
    assembler.apply(&BookEvent {
        venue: Venue::Bybit,
        venue_symbol: "BTCUSDT".to_string(),
        kind: BookEventKind::Snapshot,
        ts_ms: 1001,
        bids: vec![level(99.0, 1.0)],
        asks: vec![level(100.0, 1.0)],
    });

    let (aggregator, _rx) = Aggregator::new(assembler, None, 16);
    let snapshot = aggregator.on_update(&pair(), 2000).expect("both books populated");

    assert!((snapshot.entry_spread - 0.0).abs() < 1e-9);
    assert!((snapshot.exit_spread - (100.0 * (101.0 - 99.0) / 99.0)).abs() < 1e-6);
}

/// Scenario 2 — delta removal shifts the top bid and the resulting spread.
#[test]
fn scenario_delta_removal_shifts_spread() {
    let assembler = Arc::new(Assembler::new());
    assembler.apply(&BookEvent {
        venue: Venue::Okx,
        venue_symbol: "BTC-USDT-SWAP".to_string(),
        kind: BookEventKind::Snapshot,
        ts_ms: 1000,
        bids: vec![level(100.0, 1.0)],
        asks: vec![level(101.0, 1.0)],
    });
    assembler.apply(&BookEvent {
        venue: Venue::Bybit,
        venue_symbol: "BTCUSDT".to_string(),
        kind: BookEventKind::Snapshot,
        ts_ms: 1001,
        bids: vec![level(99.0, 1.0)],
        asks: vec![level(100.0, 1.0)],
    });
    assembler.apply(&BookEvent {
        venue: Venue::Okx,
        venue_symbol: "BTC-USDT-SWAP".to_string(),
        kind: BookEventKind::Delta,
        ts_ms: 1002,
        bids: vec![level(100.0, 0.0), level(99.0, 2.0)],
        asks: vec![],
    });

    let (aggregator, _rx) = Aggregator::new(assembler, None, 16);
    let snapshot = aggregator.on_update(&pair(), 2000).expect("both books populated");

    assert!((snapshot.entry_spread - (100.0 * (99.0 - 100.0) / 100.0)).abs() < 1e-9);
}

/// Scenario 3 — rate limit: 40 updates in 100ms at a 25ms gate yields ~5 emissions.
#[test]
fn scenario_rate_limit_bounds_emission_count() {
    let assembler = Arc::new(Assembler::new());
    let (aggregator, _rx) = Aggregator::new(assembler.clone(), Some(25), 64);
    let p = pair();

    let mut emitted = 0u32;
    for i in 0..40 {
        let now = (i as f64 * 2.5) as i64;
        assembler.apply(&BookEvent {
            venue: Venue::Okx,
            venue_symbol: "BTC-USDT-SWAP".to_string(),
            kind: BookEventKind::Snapshot,
            ts_ms: now,
            bids: vec![level(100.0, 1.0)],
            asks: vec![level(101.0, 1.0)],
        });
        assembler.apply(&BookEvent {
            venue: Venue::Bybit,
            venue_symbol: "BTCUSDT".to_string(),
            kind: BookEventKind::Snapshot,
            ts_ms: now,
            bids: vec![level(99.0, 1.0)],
            asks: vec![level(100.0, 1.0)],
        });
        if aggregator.on_update(&p, now).is_some() {
            emitted += 1;
        }
    }

    assert!(emitted <= 6, "expected at most ~5 emissions in 100ms at a 25ms gate, got {emitted}");
}

struct HedgeMockAdapter {
    place_market_calls: AtomicU32,
    place_qtys: parking_lot::Mutex<Vec<f64>>,
}

#[async_trait]
impl VenueAdapter for HedgeMockAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn place_post_only(&self, _symbol: &str, _side: Side, _qty: f64, _price: f64) -> VenueResult<OrderAck> {
        unimplemented!()
    }

    async fn amend(&self, _order_id: &str, _symbol: &str, _side: Side, _qty: f64, _price: f64) -> VenueResult<OrderAck> {
        unimplemented!()
    }

    async fn cancel(&self, _order_id: &str, _symbol: &str) -> VenueResult<()> {
        Ok(())
    }

    async fn place_market(&self, _symbol: &str, _side: Side, qty: f64) -> VenueResult<FillReport> {
        self.place_market_calls.fetch_add(1, Ordering::SeqCst);
        self.place_qtys.lock().push(qty);
        Ok(FillReport {
            order_id: "ord".to_string(),
            filled_size: qty,
            avg_price: 100.0,
        })
    }
}

fn fill(side: Side, fill_size: f64, fill_index: u64) -> OrderEvent {
    OrderEvent {
        venue_symbol: "BTCUSDT".to_string(),
        side,
        fill_size,
        fill_index,
        client_id: "mmXXXXXXXXXX".to_string(),
        price: 100.0,
        ts_ms: 1,
        status: OrderStatus::Filled,
    }
}

/// Scenario 4 — hedge rounding across two consecutive fills with contract multiplier 10.
#[tokio::test]
async fn scenario_hedge_rounding_two_fills() {
    let adapter = Arc::new(HedgeMockAdapter {
        place_market_calls: AtomicU32::new(0),
        place_qtys: parking_lot::Mutex::new(Vec::new()),
    });
    let exec = HedgeExecutor::new(
        adapter.clone(),
        Arc::new(NullReconciler),
        Arc::new(NullAlertSink),
        Arc::new(Flags::new()),
        "mm".to_string(),
    );

    // Each fill hedges immediately rather than accumulating first, so the residual
    // returns to 0 after every successful hedge, not just after the second fill.
    exec.handle_fill(&fill(Side::Buy, 1.0, 1), "BTCUSDT", 10.0, 0.1).await;
    assert!((exec.residual("BTCUSDT") - 0.0).abs() < 1e-9);

    exec.handle_fill(&fill(Side::Buy, 1.0, 2), "BTCUSDT", 10.0, 0.1).await;
    assert!((exec.residual("BTCUSDT") - 0.0).abs() < 1e-9);

    assert_eq!(adapter.place_market_calls.load(Ordering::SeqCst), 2);
    let qtys = adapter.place_qtys.lock();
    assert!((qtys[0] - 10.0).abs() < 1e-9);
    assert!((qtys[1] - 10.0).abs() < 1e-9);
}

/// Scenario 5 — residual accumulates below the hedge step without placing an order
/// until it crosses a step boundary.
#[tokio::test]
async fn scenario_residual_accumulation_below_step() {
    let adapter = Arc::new(HedgeMockAdapter {
        place_market_calls: AtomicU32::new(0),
        place_qtys: parking_lot::Mutex::new(Vec::new()),
    });
    let exec = HedgeExecutor::new(
        adapter.clone(),
        Arc::new(NullReconciler),
        Arc::new(NullAlertSink),
        Arc::new(Flags::new()),
        "mm".to_string(),
    );

    exec.handle_fill(&fill(Side::Buy, 0.03, 1), "BTCUSDT", 1.0, 0.1).await;
    exec.handle_fill(&fill(Side::Buy, 0.04, 2), "BTCUSDT", 1.0, 0.1).await;
    assert_eq!(adapter.place_market_calls.load(Ordering::SeqCst), 0);
    assert!((exec.residual("BTCUSDT") - (-0.07)).abs() < 1e-9);

    exec.handle_fill(&fill(Side::Buy, 0.04, 3), "BTCUSDT", 1.0, 0.1).await;
    assert_eq!(adapter.place_market_calls.load(Ordering::SeqCst), 1);
    assert!((exec.residual("BTCUSDT") - (-0.01)).abs() < 1e-9);
}

struct AlwaysFailingAdapter;

#[async_trait]
impl VenueAdapter for AlwaysFailingAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }
    async fn place_post_only(&self, _: &str, _: Side, _: f64, _: f64) -> VenueResult<OrderAck> {
        unimplemented!()
    }
    async fn amend(&self, _: &str, _: &str, _: Side, _: f64, _: f64) -> VenueResult<OrderAck> {
        unimplemented!()
    }
    async fn cancel(&self, _: &str, _: &str) -> VenueResult<()> {
        Ok(())
    }
    async fn place_market(&self, _: &str, _: Side, _: f64) -> VenueResult<FillReport> {
        Err(VenueError::ServiceTemporarilyUnavailable)
    }
}

/// Scenario 6 — kill switch trips after 10 hedge failures within the error budget
/// window; each failed fill exhausts its 3 retries then records one error budget entry.
#[tokio::test(start_paused = true)]
async fn scenario_kill_switch_trips_on_error_storm() {
    let flags = Arc::new(Flags::new());
    let exec = HedgeExecutor::new(
        Arc::new(AlwaysFailingAdapter),
        Arc::new(NullReconciler),
        Arc::new(NullAlertSink),
        flags.clone(),
        "mm".to_string(),
    );

    for i in 0..10 {
        exec.handle_fill(&fill(Side::Buy, 1.0, i), "BTCUSDT", 1.0, 0.1).await;
    }

    assert!(flags.kill_switch.is_tripped());
}
