//! Hedge Executor (spec §4.5): consumes the quoting venue's private order-event stream,
//! translates each fill into an opposite-side hedge, and maintains a signed residual
//! accumulator so successive sub-step fills eventually clear.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::alert::{Alert, AlertKind, AlertSink};
use crate::config::round_to_step;
use crate::errors::VenueError;
use crate::state::Flags;
use crate::venue::types::{OrderEvent, OrderStatus, Side};
use crate::venue::VenueAdapter;

const MAX_ATTEMPTS: u32 = 3;
const OVERLOAD_PAUSE_MS: i64 = 30_000;

/// Per-instrument signed residual accumulator (spec §3 "Unhedged residual").
#[derive(Default)]
struct Residual {
    value: f64,
}

/// Reconciliation hook invoked when hedge retries are exhausted (spec §4.5 "On
/// exhaustion: trigger a reconciliation fetch").
#[async_trait::async_trait]
pub trait PositionReconciler: Send + Sync {
    async fn reconcile(&self, venue_symbol: &str);
}

pub struct NullReconciler;

#[async_trait::async_trait]
impl PositionReconciler for NullReconciler {
    async fn reconcile(&self, _venue_symbol: &str) {}
}

pub struct HedgeExecutor<A, R> {
    adapter: Arc<A>,
    reconciler: Arc<R>,
    alert_sink: Arc<dyn AlertSink>,
    flags: Arc<Flags>,
    strategy_prefix: String,
    residuals: parking_lot::Mutex<HashMap<String, Residual>>,
    seen_fills: parking_lot::Mutex<HashSet<(String, u64)>>,
}

impl<A, R> HedgeExecutor<A, R>
where
    A: VenueAdapter,
    R: PositionReconciler,
{
    pub fn new(
        adapter: Arc<A>,
        reconciler: Arc<R>,
        alert_sink: Arc<dyn AlertSink>,
        flags: Arc<Flags>,
        strategy_prefix: String,
    ) -> Self {
        Self {
            adapter,
            reconciler,
            alert_sink,
            flags,
            strategy_prefix,
            residuals: parking_lot::Mutex::new(HashMap::new()),
            seen_fills: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Current residual for an instrument; exposed for the `|residual| < step`
    /// invariant test (spec §8, invariant 3).
    pub fn residual(&self, venue_symbol: &str) -> f64 {
        self.residuals
            .lock()
            .get(venue_symbol)
            .map(|r| r.value)
            .unwrap_or(0.0)
    }

    /// Process one private `OrderEvent` from the quoting venue (spec §4.5 "Input",
    /// "Translation", "Residual maintenance"). `hedge_venue_symbol` is `event.venue_symbol`
    /// already translated (via the shared `{base,venue,market_type} -> venue_symbol` table,
    /// spec §3 "Instrument") from the quoting venue's wire symbol to the hedging venue's;
    /// the residual is tracked per hedge-venue symbol and orders are placed against it,
    /// never against the quoting venue's symbol string. `contract_multiplier` is the
    /// quoting venue's (it converts the fill's contract count to coin units); `step_size`
    /// is the hedging venue's (spec §4.5 "hedge quantities are floored to a multiple of
    /// step" on the venue the hedge order is actually placed on).
    pub async fn handle_fill(
        &self,
        event: &OrderEvent,
        hedge_venue_symbol: &str,
        contract_multiplier: f64,
        step_size: f64,
    ) {
        if event.fill_size <= 0.0 || event.status == OrderStatus::Cancelled {
            return;
        }
        if !event.client_id.starts_with(&self.strategy_prefix) {
            return;
        }
        if !self
            .seen_fills
            .lock()
            .insert((event.client_id.clone(), event.fill_index))
        {
            return;
        }

        let hedge_side = event.side.opposite();
        let hedge_coin_amount = event.fill_size * contract_multiplier;

        let (intended, sign): (f64, f64) = {
            let mut residuals = self.residuals.lock();
            let residual = residuals.entry(hedge_venue_symbol.to_string()).or_default();
            match hedge_side {
                Side::Buy => residual.value += hedge_coin_amount,
                Side::Sell => residual.value -= hedge_coin_amount,
            }
            let intended = round_to_step(residual.value.abs(), step_size);
            let sign = if residual.value >= 0.0 { 1.0 } else { -1.0 };
            (intended, sign)
        };

        if intended == 0.0 {
            return;
        }

        let place_side = if sign > 0.0 { Side::Buy } else { Side::Sell };
        self.place_hedge(hedge_venue_symbol, place_side, intended, sign, step_size)
            .await;
    }

    async fn place_hedge(&self, venue_symbol: &str, side: Side, qty: f64, sign: f64, step_size: f64) {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.adapter.place_market(venue_symbol, side, qty).await {
                Ok(_fill) => {
                    let mut residuals = self.residuals.lock();
                    let residual = residuals.entry(venue_symbol.to_string()).or_default();
                    // Subtract exactly the intended (already step-rounded) amount, per
                    // spec §4.5 "On success: R -= sign * intended".
                    residual.value -= sign * qty;
                    debug_assert!(residual.value.abs() < step_size + 1e-9);
                    info!(venue_symbol, ?side, qty, "hedge placed");
                    return;
                }
                Err(VenueError::ServerOverloaded) => {
                    self.flags.server_overload_pause.set_for(OVERLOAD_PAUSE_MS);
                    warn!(venue_symbol, "hedge venue overloaded, pausing quoting engines");
                }
                Err(VenueError::MarginInsufficient) => {
                    self.flags.only_exit.set(false);
                    self.alert_sink
                        .send(Alert {
                            kind: AlertKind::MarginInsufficient,
                            instrument: venue_symbol.to_string(),
                            venue: None,
                            residual: Some(self.residual(venue_symbol)),
                            message: "margin insufficient while hedging".to_string(),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(venue_symbol, attempt, error = %e, "hedge attempt failed");
                }
            }

            if attempt < MAX_ATTEMPTS {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        error!(venue_symbol, "hedge retries exhausted, triggering reconciliation");
        self.reconciler.reconcile(venue_symbol).await;
        self.flags.error_budget.record(&self.flags.kill_switch);
        self.alert_sink
            .send(Alert {
                kind: AlertKind::PositionReconciliation,
                instrument: venue_symbol.to_string(),
                venue: None,
                residual: Some(self.residual(venue_symbol)),
                message: "hedge retries exhausted".to_string(),
            })
            .await;
    }
}

/// Activation-ping keep-alive (spec §4.5 "Activation ping (optional)"), gated off by
/// default via `EngineConfig::activation_ping_enabled` (see DESIGN.md). Must not share a
/// client id with real hedge orders.
pub mod activation_ping {
    use super::*;

    const MIN_INTERVAL_SECS: u64 = 15;

    pub async fn run<A: VenueAdapter>(
        adapter: Arc<A>,
        keepalive_symbol: String,
        keepalive_price: f64,
        client_prefix: String,
    ) {
        loop {
            tokio::time::sleep(Duration::from_secs(MIN_INTERVAL_SECS)).await;
            match adapter
                .place_post_only(&keepalive_symbol, Side::Buy, 0.0, keepalive_price)
                .await
            {
                Ok(ack) => {
                    let _ = adapter.cancel(&ack.order_id, &keepalive_symbol).await;
                }
                Err(e) => {
                    warn!(symbol = %keepalive_symbol, error = %e, "activation ping failed");
                }
            }
            let _ = &client_prefix;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VenueResult;
    use crate::venue::types::{FillReport, OrderAck};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockAdapter {
        place_market_calls: AtomicU32,
        fail_until: u32,
        fill_size: f64,
    }

    #[async_trait]
    impl VenueAdapter for MockAdapter {
        fn venue(&self) -> crate::config::Venue {
            crate::config::Venue::Bybit
        }

        async fn place_post_only(
            &self,
            _symbol: &str,
            _side: Side,
            _qty: f64,
            _price: f64,
        ) -> VenueResult<OrderAck> {
            unimplemented!()
        }

        async fn amend(
            &self,
            _order_id: &str,
            _symbol: &str,
            _side: Side,
            _qty: f64,
            _price: f64,
        ) -> VenueResult<OrderAck> {
            unimplemented!()
        }

        async fn cancel(&self, _order_id: &str, _symbol: &str) -> VenueResult<()> {
            Ok(())
        }

        async fn place_market(&self, _symbol: &str, _side: Side, qty: f64) -> VenueResult<FillReport> {
            let n = self.place_market_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.fail_until {
                return Err(VenueError::ServiceTemporarilyUnavailable);
            }
            Ok(FillReport {
                order_id: "ord-1".to_string(),
                filled_size: self.fill_size.min(qty).max(qty),
                avg_price: 100.0,
            })
        }
    }

    fn event(side: Side, fill_size: f64, client_id: &str, fill_index: u64) -> OrderEvent {
        OrderEvent {
            venue_symbol: "BTC-USDT-SWAP".to_string(),
            side,
            fill_size,
            fill_index,
            client_id: client_id.to_string(),
            price: 100.0,
            ts_ms: 1,
            status: OrderStatus::Filled,
        }
    }

    fn executor(adapter: MockAdapter) -> HedgeExecutor<MockAdapter, NullReconciler> {
        HedgeExecutor::new(
            Arc::new(adapter),
            Arc::new(NullReconciler),
            Arc::new(crate::alert::NullAlertSink),
            Arc::new(Flags::new()),
            "mm".to_string(),
        )
    }

    #[tokio::test]
    async fn residual_stays_below_step_after_successful_hedge() {
        let exec = executor(MockAdapter {
            place_market_calls: AtomicU32::new(0),
            fail_until: 1,
            fill_size: 0.07,
        });
        exec.handle_fill(&event(Side::Buy, 0.07, "mmABCDEFGHIJ", 1), "BTC-USDT-SWAP", 1.0, 0.01).await;
        assert!(exec.residual("BTC-USDT-SWAP").abs() < 0.01 + 1e-9);
    }

    #[tokio::test]
    async fn residual_accumulates_below_step_without_placing() {
        let adapter = MockAdapter {
            place_market_calls: AtomicU32::new(0),
            fail_until: 1,
            fill_size: 0.005,
        };
        let exec = executor(adapter);
        exec.handle_fill(&event(Side::Buy, 0.005, "mmABCDEFGHIJ", 1), "BTC-USDT-SWAP", 1.0, 0.01).await;
        assert_eq!(exec.residual("BTC-USDT-SWAP"), -0.005);
        assert_eq!(exec.adapter.place_market_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_fill_index_is_ignored() {
        let exec = executor(MockAdapter {
            place_market_calls: AtomicU32::new(0),
            fail_until: 1,
            fill_size: 0.07,
        });
        let e = event(Side::Buy, 0.07, "mmABCDEFGHIJ", 1);
        exec.handle_fill(&e, "BTC-USDT-SWAP", 1.0, 0.01).await;
        let residual_after_first = exec.residual("BTC-USDT-SWAP");
        exec.handle_fill(&e, "BTC-USDT-SWAP", 1.0, 0.01).await;
        assert_eq!(exec.residual("BTC-USDT-SWAP"), residual_after_first);
    }

    #[tokio::test]
    async fn foreign_strategy_prefix_is_ignored() {
        let exec = executor(MockAdapter {
            place_market_calls: AtomicU32::new(0),
            fail_until: 1,
            fill_size: 0.07,
        });
        exec.handle_fill(&event(Side::Buy, 0.07, "otherABCDEFG", 1), "BTC-USDT-SWAP", 1.0, 0.01).await;
        assert_eq!(exec.residual("BTC-USDT-SWAP"), 0.0);
    }

    #[tokio::test]
    async fn margin_insufficient_sets_only_exit_false() {
        struct AlwaysMarginInsufficient;
        #[async_trait]
        impl VenueAdapter for AlwaysMarginInsufficient {
            fn venue(&self) -> crate::config::Venue {
                crate::config::Venue::Bybit
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
                Err(VenueError::MarginInsufficient)
            }
        }

        let flags = Arc::new(Flags::new());
        let exec = HedgeExecutor::new(
            Arc::new(AlwaysMarginInsufficient),
            Arc::new(NullReconciler),
            Arc::new(crate::alert::NullAlertSink) as Arc<dyn AlertSink>,
            flags.clone(),
            "mm".to_string(),
        );
        exec.handle_fill(&event(Side::Buy, 0.07, "mmABCDEFGHIJ", 1), "BTC-USDT-SWAP", 1.0, 0.01).await;
        assert!(!flags.only_exit.allows_new_inventory());
    }
}
