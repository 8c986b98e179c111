//! Market-regime gate on the reference asset.
//!
//! Failing a gate does not abort the cycle: the caller switches to a more
//! conservative mode and scales risk with `risk_scale`, so the result
//! always carries both the verdict and the scale.

use crate::indicators::{adx, atr};
use edgebot_core::config::RegimeConfig;
use edgebot_core::types::Candle;
use tracing::debug;

/// Outcome of the regime gate.
#[derive(Debug, Clone)]
pub struct RegimeResult {
    pub ok: bool,
    /// Daily ATR as a fraction of the last close.
    pub atr_percent: f64,
    pub adx_4h: f64,
    pub funding_abs: f64,
    /// Multiplier applied to per-trade risk, ×0.5 on a funding breach and
    /// ×0.6 on extreme daily range; callers clamp the product to [0.2, 1.0].
    pub risk_scale: f64,
    pub reason: String,
}

/// Evaluates the regime on the reference asset's daily and 4h candles.
///
/// Gates: daily ATR% within `[atrp_min, atrp_max]`, 4h ADX at or above
/// `adx_min`, absolute funding at or below `funding_abs_max`. Any failure
/// sets `ok = false` with the first failing gate in `reason`.
#[must_use]
pub fn regime_filter(
    cfg: &RegimeConfig,
    ref_1d: &[Candle],
    ref_4h: &[Candle],
    funding_abs: f64,
) -> RegimeResult {
    if ref_1d.len() < 15 || ref_4h.len() < 30 {
        return RegimeResult {
            ok: false,
            atr_percent: f64::NAN,
            adx_4h: f64::NAN,
            funding_abs,
            risk_scale: 1.0,
            reason: "insufficient reference history".into(),
        };
    }
    let highs: Vec<f64> = ref_1d.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = ref_1d.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = ref_1d.iter().map(|c| c.close).collect();
    let atr_1d = atr(&highs, &lows, &closes, 14);
    let last_close = closes[closes.len() - 1];
    let atr_percent = if last_close > 0.0 { atr_1d / last_close } else { f64::NAN };

    let h4: Vec<f64> = ref_4h.iter().map(|c| c.high).collect();
    let l4: Vec<f64> = ref_4h.iter().map(|c| c.low).collect();
    let c4: Vec<f64> = ref_4h.iter().map(|c| c.close).collect();
    let adx_4h = adx(&h4, &l4, &c4, 14);

    let mut reason = String::from("ok");
    if !(atr_percent >= cfg.atrp_min && atr_percent <= cfg.atrp_max) {
        reason = format!(
            "daily ATR% {atr_percent:.4} outside [{:.4}, {:.4}]",
            cfg.atrp_min, cfg.atrp_max
        );
    } else if adx_4h < cfg.adx_min {
        reason = format!("4h ADX {adx_4h:.1} below {:.1}", cfg.adx_min);
    } else if funding_abs > cfg.funding_abs_max {
        reason = format!("|funding| {funding_abs:.5} above {:.5}", cfg.funding_abs_max);
    }
    let ok = reason == "ok";

    let mut risk_scale = 1.0;
    if funding_abs > cfg.funding_abs_max {
        risk_scale *= 0.5;
        debug!(funding_abs, "funding breach, halving risk");
    }
    if atr_percent > 0.10 {
        risk_scale *= 0.6;
        debug!(atr_percent, "extreme daily range, scaling risk");
    }

    RegimeResult {
        ok,
        atr_percent,
        adx_4h,
        funding_abs,
        risk_scale,
        reason,
    }
}
