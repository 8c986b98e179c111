//! Universe scoring.
//!
//! Two-stage: every quote-matching symbol gets a cheap liquidity score from
//! the 24h tickers; only the deepest-liquidity top-N are fetched and scored
//! on the full composite. Per-symbol failures are counted and skipped, they
//! never abort the scan.

use std::collections::HashMap;

use anyhow::Result;
use edgebot_core::traits::ExchangeContext;
use edgebot_core::types::Interval;
use tracing::{debug, warn};

use crate::indicators::{correlation, simple_returns, slope};

const W_LIQUIDITY: f64 = 0.25;
const W_MOMENTUM: f64 = 0.20;
const W_FUNDING: f64 = 0.15;
const W_BASIS: f64 = 0.10;
const W_CORRELATION: f64 = 0.15;
const W_RELATIVE_STRENGTH: f64 = 0.15;

// Basis-spread data is not wired up yet; score it neutral.
const BASIS_NEUTRAL: f64 = 0.5;

/// Per-symbol component breakdown.
#[derive(Debug, Clone)]
pub struct ScoreDetail {
    pub liquidity: f64,
    pub momentum: f64,
    pub funding: f64,
    pub basis: f64,
    pub correlation: f64,
    pub relative_strength: f64,
    pub score: f64,
    /// Liquidity-only score, no history fetched.
    pub light: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UniverseMeta {
    pub total: usize,
    pub deep: usize,
    pub light: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct UniverseScores {
    /// `(symbol, score)` sorted by score descending.
    pub ranked: Vec<(String, f64)>,
    pub details: HashMap<String, ScoreDetail>,
    pub meta: UniverseMeta,
}

fn norm01(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() || hi == lo {
        return 0.0;
    }
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Dual-horizon (3d/7d of 1h bars) tanh-squashed momentum, neutral 0.5 on
/// short history.
fn momentum_score(closes: &[f64], bars_3d: usize, bars_7d: usize) -> f64 {
    let n = closes.len();
    if n < bars_3d.max(bars_7d) + 1 {
        return 0.5;
    }
    let r3 = closes[n - 1] / closes[n - bars_3d] - 1.0;
    let r7 = closes[n - 1] / closes[n - bars_7d] - 1.0;
    let s3 = 0.5 * (r3.tanh() + 1.0);
    let s7 = 0.5 * (r7.tanh() + 1.0);
    0.5 * (s3 + s7)
}

/// Mean absolute funding scaled so 0.3% per interval saturates at 1.
fn funding_pain(rates: &[f64]) -> f64 {
    if rates.is_empty() {
        return 0.5;
    }
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    (mean.abs() / 0.003).clamp(0.0, 1.0)
}

/// One minus the absolute return correlation to the reference; neutral 0.5
/// when the overlap is too short to mean anything.
fn decorrelation(ref_returns: &[f64], coin_returns: &[f64]) -> f64 {
    if ref_returns.len().min(coin_returns.len()) < 10 {
        return 0.5;
    }
    1.0 - correlation(ref_returns, coin_returns).abs()
}

/// Slope of the coin/reference price ratio mapped into (−0.5, 1.5) via
/// arctan, so 0.5 is flat relative strength.
fn relative_strength(coin_closes: &[f64], ref_closes: &[f64], window: usize) -> f64 {
    if coin_closes.len() < window + 1 || ref_closes.len() < window + 1 {
        return 0.5;
    }
    let ratio: Vec<f64> = coin_closes[coin_closes.len() - window..]
        .iter()
        .zip(&ref_closes[ref_closes.len() - window..])
        .map(|(c, r)| c / r)
        .collect();
    0.5 + (2.0 / std::f64::consts::PI) * slope(&ratio).atan()
}

/// Scores the quote-matching universe against the reference symbol.
///
/// `top_n` bounds the whole universe by 24h quote volume, `deep_top_n`
/// (floored at 30) bounds the symbols that get history fetched, and
/// `min_volume_usd` drops deep-scored names below the volume floor.
///
/// # Errors
///
/// Fails only when the 24h ticker snapshot itself is unavailable; everything
/// per-symbol degrades into `meta.errors`.
pub async fn build_universe_scores(
    ctx: &dyn ExchangeContext,
    reference: &str,
    quote: &str,
    top_n: usize,
    deep_top_n: usize,
    min_volume_usd: f64,
) -> Result<UniverseScores> {
    let tickers = ctx.day_tickers().await?;
    let mut liq_pairs: Vec<(String, f64)> = tickers
        .into_iter()
        .filter(|t| t.symbol.ends_with(quote) && t.symbol != reference)
        .map(|t| (t.symbol, t.quote_volume))
        .collect();
    liq_pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    liq_pairs.truncate(top_n);

    let deep_n = deep_top_n.max(30);
    let (v_lo, v_hi) = liq_pairs
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), (_, v)| (lo.min(*v), hi.max(*v)));

    let ref_closes: Vec<f64> = ctx
        .candles(reference, Interval::H1, 200)
        .await
        .unwrap_or_default()
        .iter()
        .map(|c| c.close)
        .collect();
    let ref_returns = simple_returns(&ref_closes);

    let mut meta = UniverseMeta {
        total: liq_pairs.len(),
        ..UniverseMeta::default()
    };
    let mut details: HashMap<String, ScoreDetail> = HashMap::new();
    let mut ranked: Vec<(String, f64)> = Vec::new();

    for (rank, (symbol, qv)) in liq_pairs.iter().enumerate() {
        let liquidity = norm01(*qv, v_lo, v_hi);

        if rank >= deep_n {
            let score = W_LIQUIDITY * liquidity;
            details.insert(
                symbol.clone(),
                ScoreDetail {
                    liquidity,
                    momentum: 0.5,
                    funding: 0.5,
                    basis: BASIS_NEUTRAL,
                    correlation: 0.5,
                    relative_strength: 0.5,
                    score,
                    light: true,
                },
            );
            ranked.push((symbol.clone(), score));
            meta.light += 1;
            continue;
        }

        match deep_score(ctx, symbol, liquidity, &ref_closes, &ref_returns).await {
            Ok(detail) => {
                if min_volume_usd > 0.0 && *qv < min_volume_usd {
                    debug!(symbol, qv, "below 24h volume floor, dropped");
                    meta.light += 1;
                    continue;
                }
                meta.deep += 1;
                ranked.push((symbol.clone(), detail.score));
                details.insert(symbol.clone(), detail);
            }
            Err(err) => {
                warn!(symbol, %err, "scoring failed, skipping symbol");
                meta.errors += 1;
            }
        }
    }

    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    debug!(
        total = meta.total,
        deep = meta.deep,
        light = meta.light,
        errors = meta.errors,
        "universe scored"
    );
    Ok(UniverseScores { ranked, details, meta })
}

async fn deep_score(
    ctx: &dyn ExchangeContext,
    symbol: &str,
    liquidity: f64,
    ref_closes: &[f64],
    ref_returns: &[f64],
) -> Result<ScoreDetail> {
    if !ctx.symbol_tradable(symbol).await? {
        anyhow::bail!("symbol not tradable");
    }
    let closes: Vec<f64> = ctx
        .candles(symbol, Interval::H1, 200)
        .await?
        .iter()
        .map(|c| c.close)
        .collect();
    let returns = simple_returns(&closes);

    let momentum = momentum_score(&closes, 72, 168);
    let rates = ctx.funding_rates(symbol, 8).await.unwrap_or_default();
    let funding = funding_pain(&rates);
    let corr = decorrelation(ref_returns, &returns);
    let rs = relative_strength(&closes, ref_closes, 72);

    let score = W_LIQUIDITY * liquidity
        + W_MOMENTUM * momentum
        + W_FUNDING * funding
        + W_BASIS * BASIS_NEUTRAL
        + W_CORRELATION * corr
        + W_RELATIVE_STRENGTH * rs;

    Ok(ScoreDetail {
        liquidity,
        momentum,
        funding,
        basis: BASIS_NEUTRAL,
        correlation: corr,
        relative_strength: rs,
        score,
        light: false,
    })
}
