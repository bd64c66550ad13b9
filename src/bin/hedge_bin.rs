//! `hedge` binary (spec §6 "CLI surface"): consumes the quoting venue's private
//! order-event stream and drives the Hedge Executor against the hedging venue.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use xvenue_mm_engine::alert::{AlertSink, NullAlertSink, WebhookAlertSink};
use xvenue_mm_engine::config::{
    ContractSizeTable, EngineConfig, MarketType, StepSizeTable, SymbolMap, Venue, VenueCredentials,
};
use xvenue_mm_engine::hedge::{HedgeExecutor, PositionReconciler};
use xvenue_mm_engine::state::Flags;
use xvenue_mm_engine::venue::adapter::OrderStreamHandle;
use xvenue_mm_engine::venue::clock::ClockOffset;
use xvenue_mm_engine::venue::{bybit, okx, VenueAdapter};

#[derive(Parser, Debug)]
#[command(name = "hedge")]
struct Cli {
    /// Quoting venue whose private order stream drives hedging decisions.
    #[arg(long)]
    quoting: String,

    /// Hedging venue that receives the compensating market orders.
    #[arg(long)]
    hedging: String,

    /// Comma-separated base assets, e.g. `BTC,ETH`.
    #[arg(long, value_delimiter = ',')]
    instruments: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if cli.instruments.is_empty() {
        error!("--instruments must name at least one base asset");
        return ExitCode::from(2);
    }
    let Some(quoting_venue) = Venue::from_str(&cli.quoting) else {
        error!(venue = %cli.quoting, "unknown --quoting");
        return ExitCode::from(2);
    };
    let Some(hedging_venue) = Venue::from_str(&cli.hedging) else {
        error!(venue = %cli.hedging, "unknown --hedging");
        return ExitCode::from(2);
    };
    if quoting_venue == hedging_venue {
        error!("--quoting and --hedging must name different venues");
        return ExitCode::from(2);
    }

    let engine_config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load engine config");
            return ExitCode::from(2);
        }
    };
    let quoting_creds = match VenueCredentials::from_env(quoting_venue) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load quoting venue credentials");
            return ExitCode::from(2);
        }
    };
    let hedging_creds = match VenueCredentials::from_env(hedging_venue) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load hedging venue credentials");
            return ExitCode::from(2);
        }
    };

    let bases: Vec<&str> = cli.instruments.iter().map(String::as_str).collect();
    let symbol_map = SymbolMap::with_defaults(&bases);
    let contract_sizes = Arc::new(ContractSizeTable::new());
    let step_sizes = Arc::new(StepSizeTable::new());

    // quoting_venue's wire symbol -> hedging_venue's wire symbol, per spec §3's shared
    // `{base,venue,market_type} -> venue_symbol` table. Private order events only carry
    // the quoting venue's symbol, so every fill must be translated before it is used to
    // look up the hedging venue's step size or placed as an order on that venue.
    let mut symbol_translation: HashMap<String, String> = HashMap::new();
    for base in &cli.instruments {
        let (Some(quoting_symbol), Some(hedging_symbol)) = (
            symbol_map.lookup(base, quoting_venue, MarketType::Swap),
            symbol_map.lookup(base, hedging_venue, MarketType::Swap),
        ) else {
            continue;
        };
        symbol_translation.insert(quoting_symbol.to_string(), hedging_symbol.to_string());
    }
    let symbol_translation = Arc::new(symbol_translation);

    let flags = Arc::new(Flags::new());
    let alert_sink: Arc<dyn AlertSink> = match std::env::var("ALERT_WEBHOOK_URL") {
        Ok(url) => Arc::new(WebhookAlertSink::new(url)),
        Err(_) => Arc::new(NullAlertSink),
    };

    let quoting_clock = Arc::new(ClockOffset::new());
    let hedging_clock = Arc::new(ClockOffset::new());

    let quoting_handle = match quoting_venue {
        Venue::Okx => okx::spawn_private_order_stream(quoting_creds, quoting_clock),
        Venue::Bybit => bybit::spawn_private_order_stream(quoting_creds, quoting_clock),
    };

    let reconciler = Arc::new(xvenue_mm_engine::hedge::NullReconciler);
    match hedging_venue {
        Venue::Okx => {
            let adapter = Arc::new(okx::OkxAdapter::new(hedging_creds, hedging_clock));
            let executor = Arc::new(HedgeExecutor::new(
                adapter,
                reconciler,
                alert_sink,
                flags,
                engine_config.strategy_prefix.clone(),
            ));
            drain_order_stream(
                quoting_handle,
                executor,
                quoting_venue,
                hedging_venue,
                symbol_translation,
                contract_sizes,
                step_sizes,
            )
            .await;
        }
        Venue::Bybit => {
            let adapter = Arc::new(bybit::BybitAdapter::new(hedging_creds, hedging_clock));
            let executor = Arc::new(HedgeExecutor::new(
                adapter,
                reconciler,
                alert_sink,
                flags,
                engine_config.strategy_prefix.clone(),
            ));
            drain_order_stream(
                quoting_handle,
                executor,
                quoting_venue,
                hedging_venue,
                symbol_translation,
                contract_sizes,
                step_sizes,
            )
            .await;
        }
    }

    info!("hedge shutting down");
    ExitCode::SUCCESS
}

/// Dedupe-and-translate loop: every private fill on the quoting venue becomes one
/// `HedgeExecutor::handle_fill` call against the hedging venue (spec §4.5 "Input").
#[allow(clippy::too_many_arguments)]
async fn drain_order_stream<A, R>(
    mut handle: OrderStreamHandle,
    executor: Arc<HedgeExecutor<A, R>>,
    quoting_venue: Venue,
    hedging_venue: Venue,
    symbol_translation: Arc<HashMap<String, String>>,
    contract_sizes: Arc<ContractSizeTable>,
    step_sizes: Arc<StepSizeTable>,
) where
    A: VenueAdapter + 'static,
    R: PositionReconciler + 'static,
{
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            event = handle.events.recv() => {
                match event {
                    Some(event) => {
                        let Some(hedge_symbol) = symbol_translation.get(&event.venue_symbol) else {
                            error!(symbol = %event.venue_symbol, "no hedge-venue symbol mapping, dropping fill");
                            continue;
                        };
                        let contract_multiplier = contract_sizes.get(quoting_venue, &event.venue_symbol);
                        let step_size = step_sizes.get(hedging_venue, hedge_symbol);
                        executor.handle_fill(&event, hedge_symbol, contract_multiplier, step_size).await;
                    }
                    None => {
                        error!("private order stream ended");
                        return;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("hedge shutting down on ctrl-c");
                return;
            }
        }
    }
}
