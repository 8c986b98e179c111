//! Liquidity levels and price-action triggers.
//!
//! Everything here is a pure function over candle windows: previous-day
//! levels, VWAP standard-deviation bands, equal-high/low clusters, the
//! stop-hunt / pullback / breakout-retest / VWAP-reversion triggers,
//! structural stops, and liquidity-pool targets.

use crate::indicators::{supertrend, volume_stats, vwap_session, BandDirection};
use edgebot_core::config::{StopConfig, TakeProfitConfig};
use edgebot_core::types::{Candle, Side};

/// Previous-day high/low, assuming 1h bars: the 24 bars before the last 24.
#[must_use]
pub fn previous_day_levels(k1h: &[Candle]) -> Option<(f64, f64)> {
    if k1h.len() < 48 {
        return None;
    }
    let prev = &k1h[k1h.len() - 48..k1h.len() - 24];
    let pdh = prev.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let pdl = prev.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    Some((pdh, pdl))
}

/// VWAP with ±1σ and ±2σ bands from the dispersion of closes around it.
#[derive(Debug, Clone, Copy)]
pub struct VwapBands {
    pub vwap: f64,
    pub k1_up: f64,
    pub k1_dn: f64,
    pub k2_up: f64,
    pub k2_dn: f64,
}

#[must_use]
pub fn vwap_bands(k1h: &[Candle]) -> Option<VwapBands> {
    let vw = vwap_session(k1h);
    if vw.is_nan() {
        return None;
    }
    let devs: Vec<f64> = k1h.iter().map(|c| c.close - vw).collect();
    let m = devs.iter().sum::<f64>() / devs.len() as f64;
    let std = (devs.iter().map(|d| (d - m).powi(2)).sum::<f64>() / devs.len() as f64).sqrt();
    Some(VwapBands {
        vwap: vw,
        k1_up: vw + std,
        k1_dn: vw - std,
        k2_up: vw + 2.0 * std,
        k2_dn: vw - 2.0 * std,
    })
}

/// Clusters of local peaks within `tol` relative distance; a cluster needs
/// at least two members to count as an equal-level pool.
#[must_use]
pub fn equal_levels(series: &[f64], tol: f64) -> Vec<f64> {
    if series.len() < 5 {
        return Vec::new();
    }
    let mut levels: Vec<f64> = Vec::new();
    for i in 2..series.len() - 2 {
        let window_max = series[i - 2..=i + 2].iter().fold(f64::MIN, |a, &b| a.max(b));
        if series[i] >= window_max {
            levels.push(series[i]);
        }
    }
    levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut clusters: Vec<Vec<f64>> = Vec::new();
    for x in levels {
        match clusters.last_mut() {
            Some(cluster) if cluster.last().is_some_and(|l| ((x - l) / x).abs() <= tol) => {
                cluster.push(x)
            }
            _ => clusters.push(vec![x]),
        }
    }
    clusters
        .into_iter()
        .filter(|c| c.len() >= 2)
        .map(|c| c.iter().sum::<f64>() / c.len() as f64)
        .collect()
}

fn last(k: &[Candle]) -> Option<&Candle> {
    k.last()
}

fn lower_wick_ratio(c: &Candle) -> f64 {
    let range = (c.high - c.low).max(1e-9);
    (c.open.min(c.close) - c.low) / range
}

fn upper_wick_ratio(c: &Candle) -> f64 {
    let range = (c.high - c.low).max(1e-9);
    (c.high - c.open.max(c.close)) / range
}

/// Volume spike: last volume above mean + sigma·std of the last 50 bars.
/// Short histories pass by default.
#[must_use]
pub fn volume_spike(k15: &[Candle], sigma: f64) -> bool {
    if k15.len() < 10 {
        return true;
    }
    let (m, s) = volume_stats(k15, 50);
    let Some(c) = k15.last() else { return true };
    if s.is_nan() {
        return true;
    }
    c.volume > m + sigma * s
}

/// Wick sweep below the previous-day low that closes back above it, on a
/// volume spike, with a minimum lower-wick share of the bar range.
#[must_use]
pub fn stop_hunt_long(k15: &[Candle], pdl: Option<f64>, wick_min: f64, vol_sigma: f64) -> bool {
    let (Some(c), Some(pdl)) = (last(k15), pdl) else {
        return false;
    };
    let swept = c.low < pdl && c.close > pdl;
    swept && volume_spike(k15, vol_sigma) && lower_wick_ratio(c) >= wick_min
}

#[must_use]
pub fn stop_hunt_short(k15: &[Candle], pdh: Option<f64>, wick_min: f64, vol_sigma: f64) -> bool {
    let (Some(c), Some(pdh)) = (last(k15), pdh) else {
        return false;
    };
    let swept = c.high > pdh && c.close < pdh;
    swept && volume_spike(k15, vol_sigma) && upper_wick_ratio(c) >= wick_min
}

/// Relaxed VWAP-band mean reversion: a dip through the lower band closing
/// back above VWAP (mirrored for shorts).
#[must_use]
pub fn vwap_reversion_long(k15: &[Candle], k1h: &[Candle], wick_min: f64, vol_sigma: f64) -> bool {
    let (Some(c), Some(bands)) = (last(k15), vwap_bands(k1h)) else {
        return false;
    };
    c.close > bands.vwap
        && c.low <= bands.k1_dn
        && volume_spike(k15, vol_sigma)
        && lower_wick_ratio(c) >= wick_min
}

#[must_use]
pub fn vwap_reversion_short(k15: &[Candle], k1h: &[Candle], wick_min: f64, vol_sigma: f64) -> bool {
    let (Some(c), Some(bands)) = (last(k15), vwap_bands(k1h)) else {
        return false;
    };
    c.close < bands.vwap
        && c.high >= bands.k1_up
        && volume_spike(k15, vol_sigma)
        && upper_wick_ratio(c) >= wick_min
}

/// Supertrend-aligned pullback into the lower VWAP band that gets reclaimed.
#[must_use]
pub fn pullback_long(k15: &[Candle], k1h: &[Candle]) -> bool {
    if k1h.len() < 30 || k15.len() < 5 {
        return false;
    }
    let highs: Vec<f64> = k1h.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = k1h.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = k1h.iter().map(|c| c.close).collect();
    if supertrend(&highs, &lows, &closes, 10, 3.0) != BandDirection::Long {
        return false;
    }
    let (Some(c), Some(bands)) = (last(k15), vwap_bands(k1h)) else {
        return false;
    };
    c.low <= bands.k1_dn && c.close >= bands.k1_dn
}

#[must_use]
pub fn pullback_short(k15: &[Candle], k1h: &[Candle]) -> bool {
    if k1h.len() < 30 || k15.len() < 5 {
        return false;
    }
    let highs: Vec<f64> = k1h.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = k1h.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = k1h.iter().map(|c| c.close).collect();
    if supertrend(&highs, &lows, &closes, 10, 3.0) != BandDirection::Short {
        return false;
    }
    let (Some(c), Some(bands)) = (last(k15), vwap_bands(k1h)) else {
        return false;
    };
    c.high >= bands.k1_up && c.close <= bands.k1_up
}

/// Prior breakout of the previous-day high followed by a retest within
/// tolerance in the last 5 bars that closes back above the level.
#[must_use]
pub fn breakout_retest_long(k15: &[Candle], pdh: Option<f64>, lookback: usize) -> bool {
    let Some(pdh) = pdh else { return false };
    if k15.len() < lookback {
        return false;
    }
    let window = &k15[k15.len() - lookback..];
    let breakout = window[..window.len() - 5]
        .iter()
        .any(|c| c.close > pdh);
    if !breakout {
        return false;
    }
    window[window.len() - 5..]
        .iter()
        .any(|c| c.low <= pdh * 1.0005 && c.close >= pdh)
}

#[must_use]
pub fn breakout_retest_short(k15: &[Candle], pdl: Option<f64>, lookback: usize) -> bool {
    let Some(pdl) = pdl else { return false };
    if k15.len() < lookback {
        return false;
    }
    let window = &k15[k15.len() - lookback..];
    let breakdown = window[..window.len() - 5]
        .iter()
        .any(|c| c.close < pdl);
    if !breakdown {
        return false;
    }
    window[window.len() - 5..]
        .iter()
        .any(|c| c.high >= pdl * 0.9995 && c.close <= pdl)
}

/// Structural stop below a sweep wick: the level minus
/// max(buffer_atr_mult·ATR, 10 ticks).
#[must_use]
pub fn structural_sl_long(wick_low: f64, atr15: f64, tick: f64, stops: &StopConfig) -> f64 {
    wick_low - (stops.buffer_atr_mult * atr15).max(10.0 * tick)
}

#[must_use]
pub fn structural_sl_short(wick_high: f64, atr15: f64, tick: f64, stops: &StopConfig) -> f64 {
    wick_high + (stops.buffer_atr_mult * atr15).max(10.0 * tick)
}

/// Strict-mode stop-distance check with slightly relaxed bounds to reduce
/// false rejections.
#[must_use]
pub fn validate_stop_distance(entry: f64, sl: f64, atr15: f64, stops: &StopConfig) -> bool {
    let dist = (entry - sl).abs();
    let min_mult = stops.min_atr_mult * 0.9;
    let max_mult = stops.max_atr_mult * 1.1;
    dist >= min_mult * atr15 && dist <= max_mult * atr15
}

/// Dynamic bounds: widened to [0.4, 3.0] ATR multiples for micro-priced or
/// ultra-low-volatility instruments, where the configured band would
/// spuriously reject everything.
#[must_use]
pub fn validate_stop_distance_dynamic(entry: f64, sl: f64, atr15: f64, stops: &StopConfig) -> bool {
    if entry <= 0.0 || atr15.is_nan() {
        return false;
    }
    let dist = (entry - sl).abs();
    let atrp = atr15 / entry;
    let (min_mult, max_mult) = if entry < 1.0 || atrp < 0.01 {
        (0.4, 3.0)
    } else {
        (stops.min_atr_mult, stops.max_atr_mult)
    };
    dist >= min_mult * atr15 && dist <= max_mult * atr15
}

/// Liquidity-pool targets for a long: nearest internal equal-high cluster
/// (below the previous-day high), the upper VWAP band, then the
/// previous-day high or the nearest external pool.
#[must_use]
pub fn smc_targets_long(k1h: &[Candle], entry: f64, pdh: Option<f64>, lookback: usize) -> (f64, f64) {
    let start = k1h.len().saturating_sub(lookback);
    let highs: Vec<f64> = k1h[start..].iter().map(|c| c.high).collect();
    let bands = vwap_bands(k1h);
    let eqh = equal_levels(&highs, 0.001);

    let mut t1 = entry;
    if let Some(b) = bands {
        if !b.k1_up.is_nan() {
            t1 = t1.max(b.k1_up);
        }
    }
    let internal_max = eqh
        .iter()
        .copied()
        .filter(|&x| x > entry && pdh.is_none_or(|p| x < p))
        .fold(f64::NAN, f64::max);
    if !internal_max.is_nan() {
        t1 = t1.max(internal_max);
    }

    let mut t2 = t1;
    if let Some(p) = pdh {
        t2 = t2.max(p);
    }
    let external_min = eqh
        .iter()
        .copied()
        .filter(|&x| x >= t1)
        .fold(f64::NAN, f64::min);
    if !external_min.is_nan() {
        t2 = t2.max(external_min);
    }
    (t1, t2)
}

#[must_use]
pub fn smc_targets_short(k1h: &[Candle], entry: f64, pdl: Option<f64>, lookback: usize) -> (f64, f64) {
    let start = k1h.len().saturating_sub(lookback);
    // reuse the peak clustering on inverted lows to find equal-low pools
    let inv_lows: Vec<f64> = k1h[start..].iter().map(|c| -c.low).collect();
    let eql: Vec<f64> = equal_levels(&inv_lows, 0.001).into_iter().map(|x| -x).collect();
    let bands = vwap_bands(k1h);

    let mut t1 = entry;
    if let Some(b) = bands {
        if !b.k1_dn.is_nan() {
            t1 = t1.min(b.k1_dn);
        }
    }
    let internal_min = eql
        .iter()
        .copied()
        .filter(|&x| x < entry && pdl.is_none_or(|p| x > p))
        .fold(f64::NAN, f64::min);
    if !internal_min.is_nan() {
        t1 = t1.min(internal_min);
    }

    let mut t2 = t1;
    if let Some(p) = pdl {
        t2 = t2.min(p);
    }
    let external_max = eql
        .iter()
        .copied()
        .filter(|&x| x <= t1)
        .fold(f64::NAN, f64::max);
    if !external_max.is_nan() {
        t2 = t2.min(external_max);
    }
    (t1, t2)
}

/// Pushes raw targets out to the enforced minimum distances:
/// t1 at least max(min_t1·ATR, 3 ticks) from entry, t2 at least
/// max(min_t2·ATR, 3 ticks) beyond t1, mirrored for shorts. Guarantees
/// strict ordering regardless of the raw cluster computation.
#[must_use]
pub fn enforce_target_distances(
    side: Side,
    entry: f64,
    t1: f64,
    t2: f64,
    atr15: f64,
    tick: f64,
    tp: &TakeProfitConfig,
) -> (f64, f64) {
    let d1 = (tp.min_t1_atr_mult * atr15).max(3.0 * tick);
    let d2 = (tp.min_t2_atr_mult * atr15).max(3.0 * tick);
    match side {
        Side::Long => {
            let t1 = t1.max(entry + d1);
            let t2 = t2.max(t1 + d2);
            (t1, t2)
        }
        Side::Short => {
            let t1 = t1.min(entry - d1);
            let t2 = t2.min(t1 - d2);
            (t1, t2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        Candle {
            open_time: t,
            open,
            high,
            low,
            close,
            volume,
            close_time: t,
        }
    }

    fn flat_series(n: usize, price: f64, volume: f64) -> Vec<Candle> {
        (0..n)
            .map(|_| bar(price, price + 1.0, price - 1.0, price, volume))
            .collect()
    }

    #[test]
    fn previous_day_levels_use_prior_window() {
        let mut k1h = flat_series(24, 110.0, 10.0); // previous day
        k1h.extend(flat_series(24, 100.0, 10.0)); // current day
        let (pdh, pdl) = previous_day_levels(&k1h).unwrap();
        assert_eq!(pdh, 111.0);
        assert_eq!(pdl, 109.0);
        assert!(previous_day_levels(&k1h[..40]).is_none());
    }

    #[test]
    fn stop_hunt_long_fires_on_sweep_with_spike() {
        let mut k15 = flat_series(60, 100.0, 10.0);
        // sweep below pdl=98 with a long lower wick and 5x volume
        k15.push(bar(100.0, 100.5, 96.0, 99.5, 50.0));
        assert!(stop_hunt_long(&k15, Some(98.0), 0.35, 1.6));
        // no sweep: low stays above the level
        let mut calm = flat_series(60, 100.0, 10.0);
        calm.push(bar(100.0, 100.5, 99.0, 99.5, 50.0));
        assert!(!stop_hunt_long(&calm, Some(98.0), 0.35, 1.6));
        // unknown level never fires
        assert!(!stop_hunt_long(&k15, None, 0.35, 1.6));
    }

    #[test]
    fn breakout_retest_long_needs_break_then_retest() {
        let pdh = 105.0;
        let mut k15 = flat_series(20, 100.0, 10.0);
        // breakout leg
        k15.extend(flat_series(15, 108.0, 10.0));
        // retest leg: dip to the level, close back above
        k15.extend((0..5).map(|_| bar(106.0, 106.5, 104.9, 105.5, 10.0)));
        assert!(breakout_retest_long(&k15, Some(pdh), 40));
        // without the breakout leg there is nothing to retest
        let mut no_break = flat_series(35, 100.0, 10.0);
        no_break.extend((0..5).map(|_| bar(106.0, 106.5, 104.9, 105.5, 10.0)));
        assert!(!breakout_retest_long(&no_break, Some(pdh), 40));
    }

    #[test]
    fn structural_stop_has_tick_floor() {
        let stops = StopConfig {
            min_atr_mult: 0.5,
            max_atr_mult: 2.5,
            buffer_atr_mult: 0.3,
        };
        // tiny ATR: the 10-tick floor dominates
        let sl = structural_sl_long(100.0, 0.001, 0.01, &stops);
        assert!((sl - (100.0 - 0.1)).abs() < 1e-9);
        // large ATR: the ATR buffer dominates
        let sl = structural_sl_long(100.0, 2.0, 0.01, &stops);
        assert!((sl - (100.0 - 0.6)).abs() < 1e-9);
    }

    #[test]
    fn stop_distance_bands() {
        let stops = StopConfig {
            min_atr_mult: 0.5,
            max_atr_mult: 2.5,
            buffer_atr_mult: 0.3,
        };
        let atr15 = 2.0;
        assert!(validate_stop_distance(100.0, 98.0, atr15, &stops)); // 1 ATR
        assert!(!validate_stop_distance(100.0, 99.9, atr15, &stops)); // too tight
        assert!(!validate_stop_distance(100.0, 90.0, atr15, &stops)); // too wide

        // sub-$1 instrument widens to [0.4, 3.0]
        assert!(validate_stop_distance_dynamic(0.5, 0.47, 0.011, &stops));
        assert!(!validate_stop_distance_dynamic(-1.0, 0.47, 0.011, &stops));
        assert!(!validate_stop_distance_dynamic(0.5, 0.47, f64::NAN, &stops));
    }

    #[test]
    fn target_ordering_enforced_for_both_sides() {
        let tp = TakeProfitConfig {
            t1_rr: 1.0,
            min_t1_atr_mult: 0.6,
            min_t2_atr_mult: 0.8,
        };
        // raw targets collapsed onto entry
        let (t1, t2) = enforce_target_distances(Side::Long, 100.0, 100.0, 100.0, 5.0, 0.01, &tp);
        assert!(100.0 < t1 && t1 < t2);
        assert!((t1 - 103.0).abs() < 1e-9); // 0.6 * 5 ATR
        assert!((t2 - 107.0).abs() < 1e-9); // t1 + 0.8 * 5 ATR

        let (t1, t2) = enforce_target_distances(Side::Short, 100.0, 100.3, 100.2, 5.0, 0.01, &tp);
        assert!(100.0 > t1 && t1 > t2);
    }

    #[test]
    fn long_targets_respect_entry_and_pdh() {
        let k1h = flat_series(120, 100.0, 10.0);
        let (t1, t2) = smc_targets_long(&k1h, 100.0, Some(104.0), 120);
        assert!(t1 >= 100.0);
        assert!(t2 >= t1);
        assert!(t2 >= 104.0);
    }

    #[test]
    fn equal_levels_clusters_peaks() {
        // two clusters of repeated peaks around 110 and 120
        let mut series = vec![100.0, 101.0];
        for _ in 0..3 {
            series.extend_from_slice(&[110.0, 100.0, 100.0]);
        }
        for _ in 0..3 {
            series.extend_from_slice(&[120.0, 100.0, 100.0]);
        }
        let levels = equal_levels(&series, 0.001);
        assert!(levels.iter().any(|l| (l - 110.0).abs() < 0.2));
        assert!(levels.iter().any(|l| (l - 120.0).abs() < 0.2));
    }
}
