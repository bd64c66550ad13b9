//! Trading bands formula (spec §3 "Trading bands"). Derived fresh each Quoting Engine
//! loop iteration; never persisted.

use crate::external::TrendData;

/// Inventory skew term: `-sign(c) * c^2 * max_skew` with `c = position_size / cap`
/// clamped to `[-1, 1]`.
pub fn skew(position_size: f64, cap: f64, max_skew: f64) -> f64 {
    if cap == 0.0 {
        return 0.0;
    }
    let c = (position_size / cap).clamp(-1.0, 1.0);
    -c.signum() * c * c * max_skew
}

#[derive(Debug, Clone, Copy)]
pub struct Bands {
    pub sell_bound: f64,
    pub buy_bound: f64,
}

/// Compute sell/buy bounds from `trend_data` (spec §3).
///
/// `mid_ma = (buy_spread_ma + sell_spread_ma) / 2`; `sd` is the longer-window stddev of
/// the sell/buy spread respectively; `fr_adj` is the funding-rate-derived offset;
/// `skew_term` is `skew()` above.
pub fn compute_bands(trend: &TrendData, min_width: f64, std_coeff: f64, fr_adj: f64, skew_term: f64) -> Bands {
    let mid_ma = (trend.buy_spread_ma_m + trend.sell_spread_ma_m) / 2.0;

    let sell_bound = f64::max(
        mid_ma + trend.sell_spread_sd_l * std_coeff,
        mid_ma + min_width / 2.0,
    ) + fr_adj.max(0.0)
        + skew_term;

    let buy_bound = f64::min(
        mid_ma - trend.buy_spread_sd_l * std_coeff,
        mid_ma - min_width / 2.0,
    ) + fr_adj.min(0.0)
        + skew_term;

    Bands { sell_bound, buy_bound }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(ma: f64, sd: f64) -> TrendData {
        TrendData {
            buy_spread_ma_m: ma,
            sell_spread_ma_m: ma,
            buy_spread_sd_m: sd,
            sell_spread_sd_m: sd,
            buy_spread_ma_l: ma,
            sell_spread_ma_l: ma,
            buy_spread_sd_l: sd,
            sell_spread_sd_l: sd,
            current_buy_spread: 0.0,
            current_sell_spread: 0.0,
        }
    }

    #[test]
    fn min_width_zero_collapses_to_mid_ma_plus_sd_times_coeff() {
        let t = trend(1.0, 2.0);
        let bands = compute_bands(&t, 0.0, 1.0, 0.0, 0.0);
        assert!((bands.sell_bound - 3.0).abs() < 1e-9);
        assert!((bands.buy_bound - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn min_width_dominates_when_wider_than_sd_band() {
        let t = trend(1.0, 0.01);
        let bands = compute_bands(&t, 2.0, 1.0, 0.0, 0.0);
        assert!((bands.sell_bound - 2.0).abs() < 1e-9);
        assert!((bands.buy_bound - 0.0).abs() < 1e-9);
    }

    #[test]
    fn positive_funding_adjustment_only_widens_sell_bound() {
        let t = trend(0.0, 1.0);
        let bands = compute_bands(&t, 0.0, 1.0, 0.5, 0.0);
        assert!((bands.sell_bound - 1.5).abs() < 1e-9);
        assert!((bands.buy_bound - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn negative_funding_adjustment_only_widens_buy_bound() {
        let t = trend(0.0, 1.0);
        let bands = compute_bands(&t, 0.0, 1.0, -0.5, 0.0);
        assert!((bands.sell_bound - 1.0).abs() < 1e-9);
        assert!((bands.buy_bound - (-1.5)).abs() < 1e-9);
    }

    #[test]
    fn skew_is_zero_at_zero_position() {
        assert_eq!(skew(0.0, 100.0, 0.02), 0.0);
    }

    #[test]
    fn skew_is_negative_for_long_position() {
        let s = skew(50.0, 100.0, 0.02);
        assert!(s < 0.0);
        assert!((s - (-0.005)).abs() < 1e-9);
    }

    #[test]
    fn skew_is_positive_for_short_position() {
        let s = skew(-50.0, 100.0, 0.02);
        assert!(s > 0.0);
    }

    #[test]
    fn skew_clamps_beyond_cap() {
        assert_eq!(skew(500.0, 100.0, 0.02), skew(100.0, 100.0, 0.02));
    }

    #[test]
    fn skew_handles_zero_cap_without_dividing_by_zero() {
        assert_eq!(skew(10.0, 0.0, 0.02), 0.0);
    }
}
