//! `quote-engine` binary (spec §6 "CLI surface"): runs one Quoting Engine loop per
//! configured instrument against venue A's book/spread feed, fed by a background
//! aggregator loop joining venue A and venue B's order books.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{error, info};

use xvenue_mm_engine::config::{
    ContractSizeTable, EngineConfig, MarketType, StepSizeTable, SymbolMap, Venue, VenueCredentials,
};
use xvenue_mm_engine::external::InMemoryKv;
use xvenue_mm_engine::orderbook::Assembler;
use xvenue_mm_engine::quoting::{run_instrument_loop, InstrumentRuntime, QuotingContext};
use xvenue_mm_engine::spread::{Aggregator, InstrumentPair};
use xvenue_mm_engine::state::Flags;
use xvenue_mm_engine::venue::clock::ClockOffset;
use xvenue_mm_engine::venue::VenueAdapter;
use xvenue_mm_engine::venue::{bybit, okx};

#[derive(Parser, Debug)]
#[command(name = "quote-engine")]
struct Cli {
    /// Comma-separated base assets, e.g. `BTC,ETH`.
    #[arg(long, value_delimiter = ',')]
    instruments: Vec<String>,

    /// Quoting venue.
    #[arg(long)]
    venue_a: String,

    /// Hedge/reference venue, used for the joined spread feed.
    #[arg(long)]
    venue_b: String,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if cli.instruments.is_empty() {
        error!("--instruments must name at least one base asset");
        return ExitCode::from(2);
    }
    let Some(venue_a) = Venue::from_str(&cli.venue_a) else {
        error!(venue = %cli.venue_a, "unknown --venue-a");
        return ExitCode::from(2);
    };
    let Some(venue_b) = Venue::from_str(&cli.venue_b) else {
        error!(venue = %cli.venue_b, "unknown --venue-b");
        return ExitCode::from(2);
    };

    let engine_config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load engine config");
            return ExitCode::from(2);
        }
    };
    let creds_a = match VenueCredentials::from_env(venue_a) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load venue A credentials");
            return ExitCode::from(2);
        }
    };

    let bases: Vec<&str> = cli.instruments.iter().map(String::as_str).collect();
    let symbol_map = Arc::new(SymbolMap::with_defaults(&bases));
    let contract_sizes = Arc::new(ContractSizeTable::new());
    let step_sizes = Arc::new(StepSizeTable::new());

    let assembler = Arc::new(Assembler::new());
    let (aggregator, _rx) = Aggregator::new(assembler.clone(), Some(engine_config.spread_gate_ms as i64), 256);
    let aggregator = Arc::new(aggregator);

    let flags = Arc::new(Flags::new());
    let kv = Arc::new(InMemoryKv::new());

    let mut okx_symbols = Vec::new();
    let mut bybit_symbols = Vec::new();
    let mut pairs = Vec::new();
    for base in &cli.instruments {
        let Some(symbol_a) = symbol_map.lookup(base, venue_a, MarketType::Swap) else {
            continue;
        };
        let Some(symbol_b) = symbol_map.lookup(base, venue_b, MarketType::Swap) else {
            continue;
        };
        pairs.push(InstrumentPair {
            base: base.clone(),
            venue_a,
            venue_a_symbol: symbol_a.to_string(),
            venue_b,
            venue_b_symbol: symbol_b.to_string(),
        });
        match venue_a {
            Venue::Okx => okx_symbols.push(symbol_a.to_string()),
            Venue::Bybit => bybit_symbols.push(symbol_a.to_string()),
        }
        match venue_b {
            Venue::Okx => okx_symbols.push(symbol_b.to_string()),
            Venue::Bybit => bybit_symbols.push(symbol_b.to_string()),
        }
    }

    if !okx_symbols.is_empty() {
        let mut handle = okx::spawn_public_book_stream(okx_symbols);
        let assembler = assembler.clone();
        tokio::spawn(async move {
            while let Some(event) = handle.events.recv().await {
                assembler.apply(&event);
            }
        });
    }
    if !bybit_symbols.is_empty() {
        let mut handle = bybit::spawn_public_book_stream(bybit_symbols);
        let assembler = assembler.clone();
        tokio::spawn(async move {
            while let Some(event) = handle.events.recv().await {
                assembler.apply(&event);
            }
        });
    }

    let feeder_aggregator = aggregator.clone();
    tokio::spawn(async move {
        loop {
            let now = now_ms();
            for pair in &pairs {
                feeder_aggregator.on_update(pair, now);
            }
            tokio::time::sleep(std::time::Duration::from_millis(engine_config.spread_gate_ms)).await;
        }
    });

    let clock = Arc::new(ClockOffset::new());
    let strategy_prefix = engine_config.strategy_prefix.clone();
    match venue_a {
        Venue::Okx => {
            let adapter = Arc::new(okx::OkxAdapter::new(creds_a, clock));
            run_all_instruments(&cli, adapter, aggregator, assembler, symbol_map, contract_sizes, step_sizes, flags, kv, strategy_prefix).await;
        }
        Venue::Bybit => {
            let adapter = Arc::new(bybit::BybitAdapter::new(creds_a, clock));
            run_all_instruments(&cli, adapter, aggregator, assembler, symbol_map, contract_sizes, step_sizes, flags, kv, strategy_prefix).await;
        }
    }

    info!("quote-engine shutting down");
    ExitCode::SUCCESS
}

#[allow(clippy::too_many_arguments)]
async fn run_all_instruments<A: VenueAdapter + 'static>(
    cli: &Cli,
    adapter: Arc<A>,
    aggregator: Arc<Aggregator>,
    assembler: Arc<Assembler>,
    symbol_map: Arc<SymbolMap>,
    contract_sizes: Arc<ContractSizeTable>,
    step_sizes: Arc<StepSizeTable>,
    flags: Arc<Flags>,
    kv: Arc<InMemoryKv>,
    strategy_prefix: String,
) {
    let mut tasks = Vec::new();

    for base in &cli.instruments {
        let Some(symbol_a) = symbol_map.lookup(base, adapter.venue(), MarketType::Swap).map(str::to_string) else {
            continue;
        };

        let contract_multiplier = contract_sizes.get(adapter.venue(), &symbol_a);
        let step_size = step_sizes.get(adapter.venue(), &symbol_a);
        let max_notional_cap = kv
            .get(base)
            .map(|p| p.default_max_notional)
            .unwrap_or(0.0);

        let ctx = QuotingContext {
            adapter: adapter.clone(),
            params_store: kv.clone(),
            trend_store: kv.clone(),
            funding_store: kv.clone(),
            flag_store: kv.clone(),
            flags: flags.clone(),
            strategy_prefix: strategy_prefix.clone(),
        };
        let runtime = InstrumentRuntime::new(base, contract_multiplier, step_size, max_notional_cap);
        let rx = aggregator.subscribe();
        let assembler = assembler.clone();
        let venue_a = adapter.venue();

        tasks.push(tokio::spawn(async move {
            run_instrument_loop(ctx, runtime, rx, move || {
                let (bid, ask, _) = assembler.top_of_book(venue_a, &symbol_a);
                (bid.price, ask.price)
            })
            .await;
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}
