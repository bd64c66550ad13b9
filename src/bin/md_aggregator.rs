//! `md-aggregator` binary (spec §6 "CLI surface"): runs the market-data pipeline alone —
//! Venue Adapter public streams, Order-Book Assembler, Spread Aggregator — with no
//! quoting or hedging.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{error, info};

use xvenue_mm_engine::config::Venue;
use xvenue_mm_engine::orderbook::Assembler;
use xvenue_mm_engine::spread::{Aggregator, InstrumentPair};
use xvenue_mm_engine::venue::{bybit, okx};

/// One `venue:venue_symbol` leg of a `~`-joined pair, e.g. `okx:BTC-USDT-SWAP`.
struct Leg {
    venue: Venue,
    symbol: String,
}

fn parse_leg(s: &str) -> anyhow::Result<Leg> {
    let (venue_str, symbol) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected venue:symbol, got {s}"))?;
    let venue = Venue::from_str(venue_str).ok_or_else(|| anyhow::anyhow!("unknown venue {venue_str}"))?;
    Ok(Leg {
        venue,
        symbol: symbol.to_string(),
    })
}

fn parse_pairs(raw: &str) -> anyhow::Result<Vec<(Leg, Leg)>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (a, b) = pair
                .split_once('~')
                .ok_or_else(|| anyhow::anyhow!("expected venueA:symA~venueB:symB, got {pair}"))?;
            Ok((parse_leg(a)?, parse_leg(b)?))
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(name = "md-aggregator")]
struct Cli {
    /// `okx:BTC-USDT-SWAP~bybit:BTCUSDT,okx:ETH-USDT-SWAP~bybit:ETHUSDT,...`
    #[arg(long)]
    pairs: String,
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

    let pairs = match parse_pairs(&cli.pairs) {
        Ok(p) if !p.is_empty() => p,
        Ok(_) => {
            error!("--pairs must name at least one instrument pair");
            return ExitCode::from(2);
        }
        Err(e) => {
            error!(error = %e, "invalid --pairs");
            return ExitCode::from(2);
        }
    };

    let assembler = Arc::new(Assembler::new());
    let (aggregator, mut consumer) = Aggregator::new(assembler.clone(), None, 256);
    let aggregator = Arc::new(aggregator);

    let mut instrument_pairs = Vec::new();
    let mut okx_symbols = Vec::new();
    let mut bybit_symbols = Vec::new();

    for (i, (a, b)) in pairs.into_iter().enumerate() {
        for leg in [&a, &b] {
            match leg.venue {
                Venue::Okx => okx_symbols.push(leg.symbol.clone()),
                Venue::Bybit => bybit_symbols.push(leg.symbol.clone()),
            }
        }
        instrument_pairs.push(InstrumentPair {
            base: format!("pair-{i}"),
            venue_a: a.venue,
            venue_a_symbol: a.symbol,
            venue_b: b.venue,
            venue_b_symbol: b.symbol,
        });
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

    tokio::spawn(async move {
        while let Ok(snap) = consumer.recv().await {
            info!(
                instrument = %snap.instrument,
                entry_spread = snap.entry_spread,
                exit_spread = snap.exit_spread,
                time_lag_ms = snap.time_lag_ms,
                "spread snapshot"
            );
        }
    });

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(25)) => {
                let now = now_ms();
                for pair in &instrument_pairs {
                    aggregator.on_update(pair, now);
                }
            }
            _ = &mut shutdown => {
                info!("md-aggregator shutting down on ctrl-c");
                return ExitCode::SUCCESS;
            }
        }
    }
}
