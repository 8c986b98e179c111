//! Bar-window indicator primitives.
//!
//! These are the simplified single-value variants the engine needs (mean-TR
//! ATR, DX-style ADX, session VWAP, a last-bar supertrend band), not full
//! streaming indicator series. NaN means "unavailable"; callers treat it as
//! a rejected or neutral reading.

use edgebot_core::types::Candle;

/// Supertrend-style band direction for the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandDirection {
    Long,
    Short,
    Neutral,
}

/// Exponential moving average seeded at the first value.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> f64 {
    if values.len() < period || period == 0 {
        return f64::NAN;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for v in &values[1..] {
        ema = v * k + ema * (1.0 - k);
    }
    ema
}

fn true_ranges(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    (1..closes.len())
        .map(|i| {
            (highs[i] - lows[i])
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs())
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Average true range: mean of the last `period` true ranges.
#[must_use]
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return f64::NAN;
    }
    let trs = true_ranges(highs, lows, closes);
    mean(&trs[trs.len() - period..])
}

/// Directional-movement strength (single DX value from mean ±DM over the
/// last `period` bars).
#[must_use]
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return f64::NAN;
    }
    let mut plus_dm = Vec::with_capacity(closes.len() - 1);
    let mut minus_dm = Vec::with_capacity(closes.len() - 1);
    for i in 1..closes.len() {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }
    let trs = true_ranges(highs, lows, closes);
    let atr_val = if trs.len() >= period {
        mean(&trs[trs.len() - period..])
    } else {
        mean(&trs)
    };
    if !(atr_val > 0.0) {
        return 0.0;
    }
    let plus_di = 100.0 * mean(&plus_dm[plus_dm.len() - period..]) / atr_val;
    let minus_di = 100.0 * mean(&minus_dm[minus_dm.len() - period..]) / atr_val;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        return 0.0;
    }
    100.0 * (plus_di - minus_di).abs() / sum
}

/// Session VWAP over the given candles (typical price, volume weighted).
#[must_use]
pub fn vwap_session(candles: &[Candle]) -> f64 {
    let mut pv = 0.0;
    let mut vol = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        vol += c.volume;
    }
    if vol > 0.0 {
        pv / vol
    } else {
        f64::NAN
    }
}

/// Supertrend direction as a single band check on the latest bar: long
/// only when the latest close clears `hl2 + multiplier * ATR` of that same
/// bar, short below the mirrored lower band, neutral in between. A
/// wide-range breakout bar recenters its own band, so one bar alone rarely
/// flips the reading.
#[must_use]
pub fn supertrend(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    multiplier: f64,
) -> BandDirection {
    let n = closes.len();
    if n < period + 1 || highs.len() != n || lows.len() != n {
        return BandDirection::Neutral;
    }
    let atr_val = atr(highs, lows, closes, period);
    if atr_val.is_nan() {
        return BandDirection::Neutral;
    }
    let hl2 = (highs[n - 1] + lows[n - 1]) / 2.0;
    let upper = hl2 + multiplier * atr_val;
    let lower = hl2 - multiplier * atr_val;
    if closes[n - 1] > upper {
        BandDirection::Long
    } else if closes[n - 1] < lower {
        BandDirection::Short
    } else {
        BandDirection::Neutral
    }
}

/// Simple returns of a close series.
#[must_use]
pub fn simple_returns(closes: &[f64]) -> Vec<f64> {
    (1..closes.len())
        .map(|i| closes[i] / closes[i - 1] - 1.0)
        .collect()
}

/// Pearson correlation over the overlapping tail of two series; 0.0 when
/// either side is degenerate or too short.
#[must_use]
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 10 {
        return 0.0;
    }
    let x = &x[x.len() - n..];
    let y = &y[y.len() - n..];
    let (mx, my) = (mean(x), mean(y));
    let (sx, sy) = (std_dev(x), std_dev(y));
    if !(sx > 0.0) || !(sy > 0.0) {
        return 0.0;
    }
    let cov = x
        .iter()
        .zip(y.iter())
        .map(|(a, b)| (a - mx) * (b - my))
        .sum::<f64>()
        / n as f64;
    (cov / (sx * sy)).clamp(-1.0, 1.0)
}

/// Least-squares slope of a series against its index.
#[must_use]
pub fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let xs_mean = (n as f64 - 1.0) / 2.0;
    let ys_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, v) in values.iter().enumerate() {
        let dx = i as f64 - xs_mean;
        num += dx * (v - ys_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

/// Mean and standard deviation of the last `window` volumes.
#[must_use]
pub fn volume_stats(candles: &[Candle], window: usize) -> (f64, f64) {
    let start = candles.len().saturating_sub(window);
    let vols: Vec<f64> = candles[start..].iter().map(|c| c.volume).collect();
    (mean(&vols), std_dev(&vols))
}
