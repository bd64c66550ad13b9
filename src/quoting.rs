//! Quoting Engine (spec §4.4): one loop per instrument. Reads the joined spread feed,
//! current parameters, trend data, and funding adjustment; derives bands and a limit
//! price; drives a tiny order-management state machine against the quoting venue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bands::{compute_bands, skew};
use crate::config::{BotParams, Venue};
use crate::errors::VenueError;
use crate::external::{FlagStore, FundingRateStore, ParamStore, TrendDataStore};
use crate::spread::SpreadSnapshot;
use crate::state::Flags;
use crate::venue::types::{generate_client_id, OrderAck, Side};
use crate::venue::VenueAdapter;

const MA_WINDOW_MS: i64 = 1_000;
const SENTINEL_ENTRY_MA: f64 = -10.0;
const SENTINEL_EXIT_MA: f64 = 10.0;
const LOOP_CADENCE: Duration = Duration::from_millis(25);
const ERROR_SLEEP: Duration = Duration::from_millis(500);

/// The order-management state machine (spec §4.4 "Order management state machine").
#[derive(Debug, Clone)]
pub enum OrderState {
    NoLiveOrder,
    LiveOrder {
        id: String,
        client_id: String,
        side: Side,
        price: f64,
        qty: f64,
    },
}

/// Per-instrument mutable state carried across loop iterations.
pub struct InstrumentRuntime {
    pub base: String,
    pub contract_multiplier: f64,
    pub step_size: f64,
    pub max_notional_cap: f64,
    pub order_state: OrderState,
    pub inventory: f64,
    pub last_external_position: f64,
    pub adjustment_value: Option<f64>,
}

impl InstrumentRuntime {
    pub fn new(base: &str, contract_multiplier: f64, step_size: f64, max_notional_cap: f64) -> Self {
        Self {
            base: base.to_string(),
            contract_multiplier,
            step_size,
            max_notional_cap,
            order_state: OrderState::NoLiveOrder,
            inventory: 0.0,
            last_external_position: 0.0,
            adjustment_value: None,
        }
    }

    /// Capture the 10%-of-best-bid adjustment value once at startup (spec §4.4
    /// "Limit price"). Idempotent: later calls are no-ops.
    pub fn ensure_adjustment_value(&mut self, startup_best_bid: f64) {
        if self.adjustment_value.is_none() {
            self.adjustment_value = Some(startup_best_bid * 0.1);
        }
    }

    /// Reset the local inventory counter whenever the externally reported position
    /// changes (spec §3 "Inventory counter": "reset whenever the external
    /// `position_size` changes").
    pub fn reconcile_external_position(&mut self, reported_position: f64) {
        if (reported_position - self.last_external_position).abs() > f64::EPSILON {
            self.inventory = 0.0;
            self.last_external_position = reported_position;
        }
    }
}

fn moving_average<F: Fn(&SpreadSnapshot) -> f64>(
    snapshots: &[SpreadSnapshot],
    now_ms: i64,
    field: F,
    sentinel: f64,
) -> f64 {
    let windowed: Vec<f64> = snapshots
        .iter()
        .filter(|s| now_ms - s.timestamp_ms <= MA_WINDOW_MS)
        .map(&field)
        .collect();

    if !windowed.is_empty() {
        return windowed.iter().sum::<f64>() / windowed.len() as f64;
    }
    if let Some(last) = snapshots.last() {
        return field(last);
    }
    sentinel
}

#[derive(Debug, Clone, Copy)]
struct DesiredQuote {
    side: Side,
    price: f64,
    in_range: bool,
}

/// Side selection plus limit-price computation (spec §4.4 "Side selection", "Limit
/// price").
#[allow(clippy::too_many_arguments)]
fn select_quote(
    params: &BotParams,
    entry_ma: f64,
    exit_ma: f64,
    sell_bound: f64,
    buy_bound: f64,
    a_best_bid: f64,
    a_best_ask: f64,
    adjustment_value: f64,
    overload_pause: bool,
) -> Option<DesiredQuote> {
    if params.max_notional == 0.0 && params.notional_per_trade == 0.0 {
        return None;
    }

    let would_exceed = (params.position_size.abs() + params.notional_per_trade) > params.max_notional;
    let side = if would_exceed {
        if params.position_size > 0.0 {
            Side::Sell
        } else {
            Side::Buy
        }
    } else {
        let sell_distance = sell_bound - entry_ma;
        let buy_distance = exit_ma - buy_bound;
        if sell_distance <= buy_distance {
            Side::Sell
        } else {
            Side::Buy
        }
    };

    let (base_limit, outside_band) = match side {
        Side::Sell => (a_best_ask, entry_ma < sell_bound),
        Side::Buy => (a_best_bid, exit_ma > buy_bound),
    };

    let push_out = outside_band || overload_pause;
    let price = match side {
        Side::Sell => {
            if push_out {
                base_limit + adjustment_value
            } else {
                base_limit
            }
        }
        Side::Buy => {
            if push_out {
                base_limit - adjustment_value
            } else {
                base_limit
            }
        }
    };

    let in_range = (price - base_limit).abs() < f64::EPSILON;

    Some(DesiredQuote { side, price, in_range })
}

/// Dependencies the per-instrument loop needs, gathered so `run_instrument_loop` can be
/// unit-exercised without a live adapter.
pub struct QuotingContext<A, P, T, F, G> {
    pub adapter: Arc<A>,
    pub params_store: Arc<P>,
    pub trend_store: Arc<T>,
    pub funding_store: Arc<F>,
    pub flag_store: Arc<G>,
    pub flags: Arc<Flags>,
    pub strategy_prefix: String,
}

/// Apply one order-entry error per spec §4.4 "Order-entry error handling", returning
/// whether the caller should additionally sleep the 500ms error-recovery pause.
fn handle_order_error(err: &VenueError, runtime: &mut InstrumentRuntime, params: &BotParams) -> bool {
    match err {
        VenueError::OrderAlreadyFilledOrCanceled => {
            if let OrderState::LiveOrder { side, .. } = &runtime.order_state {
                let delta = match side {
                    Side::Buy => params.notional_per_trade,
                    Side::Sell => -params.notional_per_trade,
                };
                runtime.inventory += delta;
            }
            runtime.order_state = OrderState::NoLiveOrder;
            info!(base = %runtime.base, "order already filled or canceled, treated as terminal fill");
            false
        }
        VenueError::InProgressModificationLimitExceeded
        | VenueError::ServerOverloaded
        | VenueError::ServiceTemporarilyUnavailable => true,
        VenueError::NotionalBelowMinimum => true,
        VenueError::OrderNotFound => {
            runtime.order_state = OrderState::NoLiveOrder;
            false
        }
        other => {
            warn!(base = %runtime.base, error = %other, state = ?runtime.order_state, "unhandled order-entry error");
            false
        }
    }
}

/// Run one iteration of the per-instrument loop against the given recent snapshots and
/// current external state. Returns `true` if the loop should continue, `false` if the
/// kill switch requires it to exit.
pub async fn step<A, P, T, F, G>(
    ctx: &QuotingContext<A, P, T, F, G>,
    runtime: &mut InstrumentRuntime,
    recent_snapshots: &[SpreadSnapshot],
    now_ms: i64,
    a_best_bid: f64,
    a_best_ask: f64,
) -> bool
where
    A: VenueAdapter,
    P: ParamStore,
    T: TrendDataStore,
    F: FundingRateStore,
    G: FlagStore,
{
    if ctx.flags.kill_switch.is_tripped() || ctx.flag_store.stop_bot() {
        if let OrderState::LiveOrder { id, .. } = &runtime.order_state {
            let _ = ctx.adapter.cancel(id, &runtime.base).await;
        }
        runtime.order_state = OrderState::NoLiveOrder;
        return false;
    }

    runtime.ensure_adjustment_value(a_best_bid);

    let Some(mut params) = ctx.params_store.get(&runtime.base) else {
        return true;
    };
    runtime.reconcile_external_position(params.position_size);
    params.position_size = runtime.inventory;

    let Some(trend) = ctx.trend_store.get(&format!("{}/USDT", runtime.base)) else {
        return true;
    };
    let fr_adj = ctx.funding_store.get(&runtime.base, now_ms);
    let skew_term = skew(params.position_size, runtime.max_notional_cap, params.max_skew);
    let bands = compute_bands(&trend, params.min_width, params.std_coeff, fr_adj, skew_term);

    let entry_ma = moving_average(recent_snapshots, now_ms, |s| s.entry_spread, SENTINEL_ENTRY_MA);
    let exit_ma = moving_average(recent_snapshots, now_ms, |s| s.exit_spread, SENTINEL_EXIT_MA);

    let overload_pause = ctx.flags.server_overload_pause.is_active() || ctx.flag_store.server_overload_pause();
    let adjustment_value = runtime.adjustment_value.unwrap_or(0.0);

    let Some(quote) = select_quote(
        &params,
        entry_ma,
        exit_ma,
        bands.sell_bound,
        bands.buy_bound,
        a_best_bid,
        a_best_ask,
        adjustment_value,
        overload_pause,
    ) else {
        return true;
    };

    let qty = params.contracts_per_trade(runtime.contract_multiplier) as f64;

    match (&runtime.order_state, quote.in_range) {
        (OrderState::NoLiveOrder, true) => {
            let client_id = generate_client_id(&ctx.strategy_prefix);
            match ctx
                .adapter
                .place_post_only(&runtime.base, quote.side, qty, quote.price)
                .await
            {
                Ok(OrderAck { order_id, .. }) => {
                    runtime.order_state = OrderState::LiveOrder {
                        id: order_id,
                        client_id,
                        side: quote.side,
                        price: quote.price,
                        qty,
                    };
                }
                Err(e) => {
                    if handle_order_error(&e, runtime, &params) {
                        tokio::time::sleep(ERROR_SLEEP).await;
                    }
                }
            }
        }
        (OrderState::LiveOrder { id, client_id, .. }, true) => {
            let id = id.clone();
            let client_id = client_id.clone();
            if let Err(e) = ctx.adapter.amend(&id, &runtime.base, quote.side, qty, quote.price).await {
                if handle_order_error(&e, runtime, &params) {
                    tokio::time::sleep(ERROR_SLEEP).await;
                }
            } else {
                runtime.order_state = OrderState::LiveOrder {
                    id,
                    client_id,
                    side: quote.side,
                    price: quote.price,
                    qty,
                };
            }
        }
        (OrderState::LiveOrder { id, .. }, false) => {
            let id = id.clone();
            if let Err(e) = ctx.adapter.cancel(&id, &runtime.base).await {
                handle_order_error(&e, runtime, &params);
            }
            runtime.order_state = OrderState::NoLiveOrder;
        }
        (OrderState::NoLiveOrder, false) => {}
    }

    true
}

/// Top-level loop: runs `step` at the ~25ms cadence mandated by spec §5 ("mandatory
/// `sleep(25 ms)` floor") until the kill switch trips.
pub async fn run_instrument_loop<A, P, T, F, G>(
    ctx: QuotingContext<A, P, T, F, G>,
    mut runtime: InstrumentRuntime,
    mut snapshots: tokio::sync::broadcast::Receiver<SpreadSnapshot>,
    top_of_book: impl Fn() -> (f64, f64) + Send + Sync,
) where
    A: VenueAdapter,
    P: ParamStore,
    T: TrendDataStore,
    F: FundingRateStore,
    G: FlagStore,
{
    let mut recent: Vec<SpreadSnapshot> = Vec::new();
    loop {
        while let Ok(snap) = snapshots.try_recv() {
            recent.push(snap);
            if recent.len() > 10_000 {
                recent.drain(0..recent.len() - 10_000);
            }
        }

        let now_ms = recent
            .last()
            .map(|s| s.timestamp_ms)
            .unwrap_or(0);
        let (best_bid, best_ask) = top_of_book();

        let keep_going = step(&ctx, &mut runtime, &recent, now_ms, best_bid, best_ask).await;
        if !keep_going {
            break;
        }

        tokio::time::sleep(LOOP_CADENCE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(notional: f64, max_notional: f64, position: f64) -> BotParams {
        BotParams {
            notional_per_trade: notional,
            max_notional,
            ma_window: 100,
            std_coeff: 1.0,
            min_width: 0.07,
            max_skew: 0.02,
            mark_price: Some(100.0),
            position_size: position,
            default_max_notional: max_notional,
        }
    }

    #[test]
    fn max_notional_and_trade_zero_means_no_trade() {
        let p = params(0.0, 0.0, 0.0);
        let quote = select_quote(&p, 0.0, 0.0, 1.0, -1.0, 100.0, 101.0, 10.0, false);
        assert!(quote.is_none());
    }

    #[test]
    fn inventory_over_cap_forces_reducing_side() {
        let p = params(10.0, 100.0, 95.0);
        let quote = select_quote(&p, 0.0, 0.0, 1.0, -1.0, 100.0, 101.0, 10.0, false).unwrap();
        assert_eq!(quote.side, Side::Sell);
    }

    #[test]
    fn short_inventory_over_cap_forces_buy() {
        let p = params(10.0, 100.0, -95.0);
        let quote = select_quote(&p, 0.0, 0.0, 1.0, -1.0, 100.0, 101.0, 10.0, false).unwrap();
        assert_eq!(quote.side, Side::Buy);
    }

    #[test]
    fn picks_side_with_smaller_distance_to_band() {
        let p = params(10.0, 1000.0, 0.0);
        // sell_distance = sell_bound - entry_ma = 1.0 - 0.9 = 0.1
        // buy_distance = exit_ma - buy_bound = -0.9 - (-1.0) = 0.1 -> tie favors sell
        let quote = select_quote(&p, 0.9, -0.9, 1.0, -1.0, 100.0, 101.0, 10.0, false).unwrap();
        assert_eq!(quote.side, Side::Sell);

        // Make buy clearly closer.
        let quote2 = select_quote(&p, 0.0, -0.99, 1.0, -1.0, 100.0, 101.0, 10.0, false).unwrap();
        assert_eq!(quote2.side, Side::Buy);
    }

    #[test]
    fn in_range_quote_equals_top_of_book() {
        let p = params(10.0, 1000.0, 0.0);
        // entry_ma well inside band: entry_ma=0.0 < sell_bound=1.0, so push_out is true
        // unless we choose values where entry_ma >= sell_bound.
        let quote = select_quote(&p, 1.5, -0.9, 1.0, -1.0, 100.0, 101.0, 10.0, false).unwrap();
        assert_eq!(quote.side, Side::Sell);
        assert!(quote.in_range);
        assert_eq!(quote.price, 101.0);
    }

    #[test]
    fn out_of_band_quote_is_pushed_out_by_adjustment_value() {
        let p = params(10.0, 1000.0, 0.0);
        let quote = select_quote(&p, 0.0, -0.9, 1.0, -1.0, 100.0, 101.0, 10.0, false).unwrap();
        assert_eq!(quote.side, Side::Sell);
        assert!(!quote.in_range);
        assert_eq!(quote.price, 111.0);
    }

    #[test]
    fn overload_pause_pushes_quote_out_even_in_band() {
        let p = params(10.0, 1000.0, 0.0);
        let quote = select_quote(&p, 1.5, -0.9, 1.0, -1.0, 100.0, 101.0, 10.0, true).unwrap();
        assert!(!quote.in_range);
    }

    #[test]
    fn moving_average_falls_back_to_sentinel_when_empty() {
        let ma = moving_average(&[], 1000, |s: &SpreadSnapshot| s.entry_spread, SENTINEL_ENTRY_MA);
        assert_eq!(ma, SENTINEL_ENTRY_MA);
    }

    #[test]
    fn moving_average_uses_last_value_outside_window() {
        let snap = SpreadSnapshot {
            instrument: "BTC".into(),
            timestamp_ms: 0,
            entry_spread: 2.5,
            exit_spread: 0.0,
            venue_a_bids: vec![],
            venue_a_asks: vec![],
            venue_b_bids: vec![],
            venue_b_asks: vec![],
            time_lag_ms: 0,
        };
        let ma = moving_average(&[snap], 5_000, |s: &SpreadSnapshot| s.entry_spread, SENTINEL_ENTRY_MA);
        assert_eq!(ma, 2.5);
    }
}
