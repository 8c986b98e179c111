//! Higher-timeframe trend filter.
//!
//! Direction comes from the 4h EMA stack and ADX; the 1h chart has to
//! confirm with price on the right side of VWAP and an aligned supertrend.

use crate::indicators::{adx, ema, supertrend, vwap_session, BandDirection};
use edgebot_core::config::TrendConfig;
use edgebot_core::types::{Candle, Direction};

#[derive(Debug, Clone)]
pub struct TrendResult {
    pub ok: bool,
    pub direction: Direction,
    pub ema200_4h: f64,
    pub ema50_4h: f64,
    pub adx_4h: f64,
    pub vwap_1h: f64,
    pub band_1h: BandDirection,
    pub reason: String,
}

impl TrendResult {
    fn flat(reason: String) -> Self {
        Self {
            ok: false,
            direction: Direction::Flat,
            ema200_4h: f64::NAN,
            ema50_4h: f64::NAN,
            adx_4h: f64::NAN,
            vwap_1h: f64::NAN,
            band_1h: BandDirection::Neutral,
            reason,
        }
    }
}

/// Classifies the trend from 4h and 1h candles. Needs a full 200 bars of
/// 4h history; anything less reads as flat.
///
/// Long: close above both the 200 and 50 EMA with the 50 above the 200,
/// ADX at or above the configured floor, price above the 1h VWAP and the
/// 1h supertrend long. Short is the mirror image. Anything else is flat.
#[must_use]
pub fn trend_filter(cfg: &TrendConfig, k4h: &[Candle], k1h: &[Candle]) -> TrendResult {
    if k4h.len() < 200 || k1h.len() < 30 {
        return TrendResult::flat("insufficient history for trend".into());
    }
    let closes_4h: Vec<f64> = k4h.iter().map(|c| c.close).collect();
    let highs_4h: Vec<f64> = k4h.iter().map(|c| c.high).collect();
    let lows_4h: Vec<f64> = k4h.iter().map(|c| c.low).collect();

    let ema200 = ema(&closes_4h[closes_4h.len() - 200..], 200);
    let ema50 = ema(&closes_4h[closes_4h.len() - 50..], 50);
    let adx_4h = adx(&highs_4h, &lows_4h, &closes_4h, cfg.adx_period);
    let last_4h = closes_4h[closes_4h.len() - 1];

    let (long_stack, short_stack) = (
        last_4h > ema200 && last_4h > ema50 && ema50 > ema200,
        last_4h < ema200 && last_4h < ema50 && ema50 < ema200,
    );

    let vwap_1h = vwap_session(k1h);
    let highs_1h: Vec<f64> = k1h.iter().map(|c| c.high).collect();
    let lows_1h: Vec<f64> = k1h.iter().map(|c| c.low).collect();
    let closes_1h: Vec<f64> = k1h.iter().map(|c| c.close).collect();
    let band_1h = supertrend(&highs_1h, &lows_1h, &closes_1h, 10, 3.0);
    let last_1h = closes_1h[closes_1h.len() - 1];

    let base = TrendResult {
        ok: false,
        direction: Direction::Flat,
        ema200_4h: ema200,
        ema50_4h: ema50,
        adx_4h,
        vwap_1h,
        band_1h,
        reason: String::new(),
    };

    if adx_4h < cfg.adx_min {
        return TrendResult {
            reason: format!("4h ADX {adx_4h:.1} below {:.1}", cfg.adx_min),
            ..base
        };
    }

    let vwap_long = vwap_1h.is_nan() || last_1h > vwap_1h;
    let vwap_short = vwap_1h.is_nan() || last_1h < vwap_1h;

    if long_stack && vwap_long && band_1h == BandDirection::Long {
        return TrendResult {
            ok: true,
            direction: Direction::Long,
            reason: "long".into(),
            ..base
        };
    }
    if short_stack && vwap_short && band_1h == BandDirection::Short {
        return TrendResult {
            ok: true,
            direction: Direction::Short,
            reason: "short".into(),
            ..base
        };
    }
    TrendResult {
        reason: "no aligned trend".into(),
        ..base
    }
}
