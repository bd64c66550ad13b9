//! External collaborators (spec §6): parameter store, trend data, funding-rate
//! adjustment, and kill/only-exit/overload flags. The core only consumes these; an
//! external job (out of scope, §1) is responsible for populating them. `InMemoryKv`
//! backs them with a process-local map for tests and for `md-aggregator`/single-process
//! deployments; a real deployment points these traits at whatever shared KV store the
//! operator runs (Redis in the original system, per `original_source/RedisFlags.py`).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::BotParams;

/// `trend_data` hash entry (spec §6 "Trend data (consumed)").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrendData {
    pub buy_spread_ma_m: f64,
    pub sell_spread_ma_m: f64,
    pub buy_spread_sd_m: f64,
    pub sell_spread_sd_m: f64,
    pub buy_spread_ma_l: f64,
    pub sell_spread_ma_l: f64,
    pub buy_spread_sd_l: f64,
    pub sell_spread_sd_l: f64,
    pub current_buy_spread: f64,
    pub current_sell_spread: f64,
}

/// `funding_rates:<BASE>` record (spec §6 "Funding-rate adjustment (consumed)").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FundingRateAdjustment {
    pub fr_adjustment_factor: f64,
}

pub trait ParamStore: Send + Sync {
    fn get(&self, base: &str) -> Option<BotParams>;
    fn get_perp_perp(&self, base: &str) -> Option<BotParams>;
}

pub trait TrendDataStore: Send + Sync {
    fn get(&self, base_usdt: &str) -> Option<TrendData>;
}

pub trait FundingRateStore: Send + Sync {
    /// Adjustment for `base`, with the "just-paid" override already applied: spec §6
    /// says to treat this as 0 within the first 5 minutes of a 4-hour funding boundary.
    fn get(&self, base: &str, now_ms: i64) -> f64 {
        let raw = self.raw(base);
        if within_funding_grace_period(now_ms) {
            0.0
        } else {
            raw
        }
    }

    fn raw(&self, base: &str) -> f64;
}

const FOUR_HOURS_MS: i64 = 4 * 60 * 60 * 1000;
const FUNDING_GRACE_MS: i64 = 5 * 60 * 1000;

/// True when `now_ms` falls within the first 5 minutes after a 4-hour funding boundary.
pub fn within_funding_grace_period(now_ms: i64) -> bool {
    now_ms.rem_euclid(FOUR_HOURS_MS) < FUNDING_GRACE_MS
}

pub trait FlagStore: Send + Sync {
    fn stop_bot(&self) -> bool;
    /// Mirrors `state::OnlyExitFlag::allows_new_inventory` semantics: `true` (numeric
    /// `1`) allows new inventory-increasing trades, `false` (`0`) restricts to
    /// reducing-only (spec §6: "when 0, the external position-sizing job refuses new
    /// inventory").
    fn allows_new_inventory(&self) -> bool;
    /// `server_overload_pause` is a presence-with-TTL flag (spec §5): `true` while set,
    /// auto-clears after 30s without an explicit unset call.
    fn server_overload_pause(&self) -> bool;
}

/// Process-local backing store: a plain map behind a lock, matching the teacher's
/// `lazy_static`-backed shared-state convention (`src/models.rs`) adapted to
/// `parking_lot::RwLock` for the read-heavy access pattern here.
pub struct InMemoryKv {
    params: RwLock<HashMap<String, BotParams>>,
    perp_perp_params: RwLock<HashMap<String, BotParams>>,
    trend: RwLock<HashMap<String, TrendData>>,
    funding: RwLock<HashMap<String, f64>>,
    stop_bot: RwLock<bool>,
    allows_new_inventory: RwLock<bool>,
    overload_pause: RwLock<Option<std::time::Instant>>,
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self {
            params: RwLock::new(HashMap::new()),
            perp_perp_params: RwLock::new(HashMap::new()),
            trend: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            stop_bot: RwLock::new(false),
            allows_new_inventory: RwLock::new(true),
            overload_pause: RwLock::new(None),
        }
    }
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_params(&self, base: &str, params: BotParams) {
        self.params.write().insert(base.to_string(), params);
    }

    pub fn set_perp_perp_params(&self, base: &str, params: BotParams) {
        self.perp_perp_params.write().insert(base.to_string(), params);
    }

    pub fn set_trend(&self, base_usdt: &str, data: TrendData) {
        self.trend.write().insert(base_usdt.to_string(), data);
    }

    pub fn set_funding(&self, base: &str, fr_adjustment_factor: f64) {
        self.funding.write().insert(base.to_string(), fr_adjustment_factor);
    }

    pub fn set_stop_bot(&self, value: bool) {
        *self.stop_bot.write() = value;
    }

    pub fn set_allows_new_inventory(&self, value: bool) {
        *self.allows_new_inventory.write() = value;
    }

    /// Set the overload-pause flag with a 30s TTL (spec §5: "pause auto-clears after
    /// 30 s").
    pub fn set_server_overload_pause(&self) {
        *self.overload_pause.write() = Some(std::time::Instant::now());
    }

    pub fn clear_server_overload_pause(&self) {
        *self.overload_pause.write() = None;
    }
}

const OVERLOAD_PAUSE_TTL: std::time::Duration = std::time::Duration::from_secs(30);

impl ParamStore for InMemoryKv {
    fn get(&self, base: &str) -> Option<BotParams> {
        self.params.read().get(base).cloned()
    }

    fn get_perp_perp(&self, base: &str) -> Option<BotParams> {
        self.perp_perp_params.read().get(base).cloned()
    }
}

impl TrendDataStore for InMemoryKv {
    fn get(&self, base_usdt: &str) -> Option<TrendData> {
        self.trend.read().get(base_usdt).copied()
    }
}

impl FundingRateStore for InMemoryKv {
    fn raw(&self, base: &str) -> f64 {
        self.funding.read().get(base).copied().unwrap_or(0.0)
    }
}

impl FlagStore for InMemoryKv {
    fn stop_bot(&self) -> bool {
        *self.stop_bot.read()
    }

    fn allows_new_inventory(&self) -> bool {
        *self.allows_new_inventory.read()
    }

    fn server_overload_pause(&self) -> bool {
        match *self.overload_pause.read() {
            Some(set_at) => set_at.elapsed() < OVERLOAD_PAUSE_TTL,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_grace_period_covers_first_five_minutes_of_boundary() {
        assert!(within_funding_grace_period(0));
        assert!(within_funding_grace_period(4 * 60 * 1000));
        assert!(!within_funding_grace_period(6 * 60 * 1000));
        assert!(within_funding_grace_period(FOUR_HOURS_MS));
        assert!(!within_funding_grace_period(FOUR_HOURS_MS + FUNDING_GRACE_MS + 1));
    }

    #[test]
    fn funding_rate_store_zeroes_during_grace_period() {
        let kv = InMemoryKv::new();
        kv.set_funding("BTC", 0.0005);
        assert_eq!(FundingRateStore::get(&kv, "BTC", 1_000), 0.0);
        assert_eq!(FundingRateStore::get(&kv, "BTC", 10 * 60 * 1000), 0.0005);
    }

    #[test]
    fn overload_pause_is_set_until_cleared() {
        let kv = InMemoryKv::new();
        assert!(!kv.server_overload_pause());
        kv.set_server_overload_pause();
        assert!(kv.server_overload_pause());
        kv.clear_server_overload_pause();
        assert!(!kv.server_overload_pause());
    }

    #[test]
    fn stop_bot_and_inventory_flags_round_trip() {
        let kv = InMemoryKv::new();
        assert!(!kv.stop_bot());
        kv.set_stop_bot(true);
        assert!(kv.stop_bot());

        assert!(kv.allows_new_inventory());
        kv.set_allows_new_inventory(false);
        assert!(!kv.allows_new_inventory());
    }
}
