//! Process configuration: venue credentials, symbol maps, contract/step tables.
//!
//! Follows the teacher's `models::Config::from_env()` convention: read once at process
//! start, fall back to sane defaults, never panic on a missing optional var.

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};

/// A tradable base asset, e.g. `BTC`.
pub type Base = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Venue {
    Okx,
    Bybit,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Okx => "okx",
            Venue::Bybit => "bybit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "okx" => Some(Venue::Okx),
            "bybit" => Some(Venue::Bybit),
            _ => None,
        }
    }

    pub fn env_prefix(&self) -> &'static str {
        match self {
            Venue::Okx => "OKX",
            Venue::Bybit => "BYBIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MarketType {
    Swap,
    Spot,
}

/// `{base, venue, market_type} -> venue_symbol`.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    table: HashMap<(Base, Venue, MarketType), String>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, base: &str, venue: Venue, market: MarketType, venue_symbol: &str) {
        self.table
            .insert((base.to_string(), venue, market), venue_symbol.to_string());
    }

    pub fn lookup(&self, base: &str, venue: Venue, market: MarketType) -> Option<&str> {
        self.table
            .get(&(base.to_string(), venue, market))
            .map(|s| s.as_str())
    }

    /// Default OKX/Bybit perpetual-swap conventions, used when no override is configured.
    pub fn with_defaults(bases: &[&str]) -> Self {
        let mut map = Self::new();
        for base in bases {
            map.insert(base, Venue::Okx, MarketType::Swap, &format!("{base}-USDT-SWAP"));
            map.insert(base, Venue::Bybit, MarketType::Swap, &format!("{base}USDT"));
            map.insert(base, Venue::Okx, MarketType::Spot, &format!("{base}-USDT"));
            map.insert(base, Venue::Bybit, MarketType::Spot, &format!("{base}USDT"));
        }
        map
    }
}

/// `{venue, venue_symbol} -> contract_multiplier`. Defaults to 1.0 when absent.
#[derive(Debug, Clone, Default)]
pub struct ContractSizeTable {
    table: HashMap<(Venue, String), f64>,
}

impl ContractSizeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, venue: Venue, venue_symbol: &str, multiplier: f64) {
        assert!(multiplier > 0.0, "contract multiplier must be positive");
        self.table.insert((venue, venue_symbol.to_string()), multiplier);
    }

    pub fn get(&self, venue: Venue, venue_symbol: &str) -> f64 {
        self.table
            .get(&(venue, venue_symbol.to_string()))
            .copied()
            .unwrap_or(1.0)
    }
}

/// `{venue, venue_symbol} -> step`. The smallest orderable quantity increment.
#[derive(Debug, Clone, Default)]
pub struct StepSizeTable {
    table: HashMap<(Venue, String), f64>,
}

impl StepSizeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, venue: Venue, venue_symbol: &str, step: f64) {
        assert!(step > 0.0, "step size must be positive");
        self.table.insert((venue, venue_symbol.to_string()), step);
    }

    pub fn get(&self, venue: Venue, venue_symbol: &str) -> f64 {
        self.table
            .get(&(venue, venue_symbol.to_string()))
            .copied()
            .unwrap_or(0.001)
    }
}

/// Floor `amount` to the nearest multiple of `step` (towards zero).
pub fn round_to_step(amount: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return amount;
    }
    (amount / step).trunc() * step
}

/// Per-instrument bot parameters (spec §3 "Bot parameters"). Written by an external
/// collaborator; the Quoting Engine only reads.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BotParams {
    pub notional_per_trade: f64,
    pub max_notional: f64,
    pub ma_window: usize,
    pub std_coeff: f64,
    pub min_width: f64,
    pub max_skew: f64,
    pub mark_price: Option<f64>,
    pub position_size: f64,
    pub default_max_notional: f64,
}

impl Default for BotParams {
    fn default() -> Self {
        Self {
            notional_per_trade: 0.0,
            max_notional: 0.0,
            ma_window: 100,
            std_coeff: 1.0,
            min_width: 0.07,
            max_skew: 0.02,
            mark_price: None,
            position_size: 0.0,
            default_max_notional: 0.0,
        }
    }
}

impl BotParams {
    /// Number of contracts per trade, derived from notional and mark price, matching
    /// `HighFrequencyBot_PP.py::update_params` (round to nearest whole contract).
    pub fn contracts_per_trade(&self, contract_multiplier: f64) -> u64 {
        match self.mark_price {
            Some(mark) if mark > 0.0 => {
                let raw = self.notional_per_trade / (mark * contract_multiplier);
                raw.round().max(0.0) as u64
            }
            _ => 0,
        }
    }
}

/// Environment-derived process configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy_prefix: String,
    pub reconnect_delay_secs: u64,
    pub quote_loop_cadence_ms: u64,
    pub spread_gate_ms: u64,
    pub ring_buffer_capacity: usize,
    pub error_budget_window_secs: i64,
    pub error_budget_trip_len: usize,
    pub activation_ping_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy_prefix: "mm".to_string(),
            reconnect_delay_secs: 5,
            quote_loop_cadence_ms: 25,
            spread_gate_ms: 25,
            ring_buffer_capacity: 500,
            error_budget_window_secs: 300,
            error_budget_trip_len: 10,
            activation_ping_enabled: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();

        if let Ok(v) = env::var("STRATEGY_PREFIX") {
            cfg.strategy_prefix = v;
        }
        if let Ok(v) = env::var("QUOTE_LOOP_CADENCE_MS") {
            cfg.quote_loop_cadence_ms = v.parse().context("QUOTE_LOOP_CADENCE_MS")?;
        }
        if let Ok(v) = env::var("SPREAD_GATE_MS") {
            cfg.spread_gate_ms = v.parse().context("SPREAD_GATE_MS")?;
        }
        if let Ok(v) = env::var("ACTIVATION_PING_ENABLED") {
            cfg.activation_ping_enabled = matches!(v.as_str(), "1" | "true" | "TRUE" | "on");
        }

        Ok(cfg)
    }
}

/// Reads `<VENUE>_API_KEY` / `<VENUE>_SECRET_KEY` (+ `OKX_PASSPHRASE`) per spec §6.
#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: Option<String>,
}

impl VenueCredentials {
    pub fn from_env(venue: Venue) -> Result<Self> {
        let prefix = venue.env_prefix();
        let api_key = env::var(format!("{prefix}_API_KEY"))
            .with_context(|| format!("missing {prefix}_API_KEY"))?;
        let secret_key = env::var(format!("{prefix}_SECRET_KEY"))
            .with_context(|| format!("missing {prefix}_SECRET_KEY"))?;
        let passphrase = if venue == Venue::Okx {
            Some(
                env::var("OKX_PASSPHRASE")
                    .context("missing OKX_PASSPHRASE")?,
            )
        } else {
            None
        };

        Ok(Self {
            api_key,
            secret_key,
            passphrase,
        })
    }
}
