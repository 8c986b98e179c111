//! One scan cycle: regime, trend, universe, scan, sizing, execution.
//!
//! The cycle is a straight pipeline with soft degradation: a failed regime
//! or trend gate narrows risk and mode instead of aborting, and capacity
//! conditions (daily loss cap, max open, no plans) halt only their own
//! scope with an explicit log line. External cadence is the caller's
//! problem; this function runs exactly once.

use anyhow::{Context, Result};
use edgebot_core::config::{AppConfig, TradeMode};
use edgebot_core::session::DayStateStore;
use edgebot_core::traits::ExchangeContext;
use edgebot_core::types::{Candle, Interval, MarginMode, Position, Side, TradePlan};
use edgebot_execution::{EntryStyle, Executor};
use edgebot_risk::{
    apply_leverage_cap, diversify_plans, dynamic_leverage, dynamic_leverage_cap,
    dynamic_r_per_trade, RiskEngine,
};
use edgebot_signals::indicators::atr;
use edgebot_signals::liquidity::{
    enforce_target_distances, previous_day_levels, smc_targets_long, smc_targets_short,
    structural_sl_long, structural_sl_short,
};
use edgebot_signals::{build_universe_scores, regime_filter, scan_symbol, trend_filter, ScanParams};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::news::{resolve_news_context, NewsMode};
use crate::shadow::{ShadowFeatures, ShadowLogger};

/// Directions the operator allows the scan to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionChoice {
    Long,
    Short,
    Both,
}

impl DirectionChoice {
    fn sides(self) -> Vec<Side> {
        match self {
            Self::Long => vec![Side::Long],
            Self::Short => vec![Side::Short],
            Self::Both => vec![Side::Long, Side::Short],
        }
    }
}

impl FromStr for DirectionChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            "both" => Ok(Self::Both),
            other => anyhow::bail!("unknown direction {other:?} (expected long, short, or both)"),
        }
    }
}

/// What to do when the reference trend filter does not align.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendFallback {
    /// Wait for alignment; the cycle halts.
    None,
    /// Force relaxed mode and scan both directions.
    Relaxed,
    /// Scan both directions in the current mode.
    Ignore,
}

impl FromStr for TrendFallback {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "relaxed" => Ok(Self::Relaxed),
            "ignore" => Ok(Self::Ignore),
            other => anyhow::bail!("unknown fallback {other:?} (expected none, relaxed, or ignore)"),
        }
    }
}

/// Operator surface for one cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub execute: bool,
    pub dry_run: bool,
    /// Attach missing protection to open positions and exit.
    pub protect_only: bool,
    pub ignore_trend: bool,
    pub relaxed: bool,
    pub override_direction: Option<DirectionChoice>,
    pub entry_style: EntryStyle,
    pub margin: MarginMode,
    pub fallback_on_trend: TrendFallback,
    /// Overrides the mode's universe score floor.
    pub min_score: Option<f64>,
    pub only_core_triggers: bool,
    pub news_mode: NewsMode,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            execute: false,
            dry_run: false,
            protect_only: false,
            ignore_trend: false,
            relaxed: false,
            override_direction: None,
            entry_style: EntryStyle::StopLimit,
            margin: MarginMode::Crossed,
            fallback_on_trend: TrendFallback::Relaxed,
            min_score: None,
            only_core_triggers: false,
            news_mode: NewsMode::Off,
        }
    }
}

/// What one cycle decided and did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub mode: TradeMode,
    pub universe: Vec<String>,
    pub plans: Vec<TradePlan>,
    /// Symbols whose entry order was placed.
    pub executed: Vec<String>,
    /// Set when the cycle stopped before the execute phase.
    pub halted: Option<String>,
}

impl CycleReport {
    fn halt(mode: TradeMode, reason: impl Into<String>) -> Self {
        Self {
            mode,
            universe: Vec::new(),
            plans: Vec::new(),
            executed: Vec::new(),
            halted: Some(reason.into()),
        }
    }
}

/// Per-symbol context carried from the scan into the execute phase.
struct ScanContext {
    atr15: f64,
    pdh: Option<f64>,
    pdl: Option<f64>,
}

impl ScanContext {
    fn pd_level(&self, side: Side) -> Option<f64> {
        match side {
            Side::Long => self.pdl,
            Side::Short => self.pdh,
        }
    }
}

/// Strict mode only when the flags, the regime, the news context, and a
/// non-green day all permit it. A green day flips to relaxed so winners
/// are not given back on lower-conviction afternoon setups.
fn select_mode(
    relaxed_flag: bool,
    forced_relaxed: bool,
    news_forced: bool,
    regime_ok: bool,
    day_net_r: f64,
) -> TradeMode {
    if relaxed_flag || forced_relaxed || news_forced || !regime_ok || day_net_r > 0.0 {
        TradeMode::Relaxed
    } else {
        TradeMode::Strict
    }
}

/// Score-thresholded top-N universe, falling back to the plain volume/score
/// ranking when the threshold empties it.
fn select_universe(ranked: &[(String, f64)], min_score: f64, top_n: usize) -> Vec<String> {
    let filtered: Vec<String> = ranked
        .iter()
        .filter(|(_, score)| *score >= min_score)
        .take(top_n)
        .map(|(symbol, _)| symbol.clone())
        .collect();
    if filtered.is_empty() {
        ranked.iter().take(top_n).map(|(s, _)| s.clone()).collect()
    } else {
        filtered
    }
}

/// Equity-scaled minimum order notional: max(150, min(2% of equity, 400)),
/// never below the configured static floor.
fn dynamic_notional_floor(equity: f64, static_floor: f64) -> f64 {
    static_floor.max(150.0_f64.max((0.02 * equity).min(400.0)))
}

/// Books the relaxed-mode hourly signal and per-symbol cooldowns for every
/// attempted plan. Runs on attempts, not fills, so rejected orders still
/// count against the hourly cap.
fn record_relaxed_signals(
    day: &mut DayStateStore,
    mode: TradeMode,
    plans: &[TradePlan],
    cooldown_min: i64,
) {
    if mode != TradeMode::Relaxed || plans.is_empty() {
        return;
    }
    day.inc_signals();
    for plan in plans {
        day.set_cooldown(&plan.symbol, cooldown_min);
    }
}

fn atr15_of(k15: &[Candle]) -> f64 {
    let highs: Vec<f64> = k15.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = k15.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = k15.iter().map(|c| c.close).collect();
    let v = atr(&highs, &lows, &closes, 15);
    if v.is_nan() {
        match k15.last() {
            Some(c) => (c.high - c.low).max(1e-9),
            None => 1e-9,
        }
    } else {
        v
    }
}

/// Runs one full scan cycle.
pub async fn run_cycle<E: ExchangeContext>(
    ctx: Arc<E>,
    cfg: &AppConfig,
    opts: &CycleOptions,
) -> Result<CycleReport> {
    let boot_executor = Executor::new(
        Arc::clone(&ctx),
        cfg.entry.cancel_after_bars,
        cfg.risk.min_notional_floor_usd,
    );
    if let Err(e) = boot_executor.cleanup_stale_protection().await {
        warn!(error = %e, "startup protection cleanup failed");
    }

    if opts.protect_only {
        protect_open_positions(ctx.as_ref(), cfg, &boot_executor).await;
        return Ok(CycleReport {
            mode: TradeMode::Strict,
            universe: Vec::new(),
            plans: Vec::new(),
            executed: Vec::new(),
            halted: None,
        });
    }
    if opts.execute {
        // Failsafe for positions left over from a previous run.
        protect_open_positions(ctx.as_ref(), cfg, &boot_executor).await;
    }

    // Quote detection: a USDC-only account trades the USDC-margined pairs.
    let mut quote = cfg.runtime.quote.clone();
    if let Ok(balances) = ctx.balances().await {
        let usdc = balances.get("USDC").copied().unwrap_or(0.0);
        let usdt = balances.get("USDT").copied().unwrap_or(0.0);
        if usdc > 0.0 && usdt == 0.0 {
            quote = "USDC".to_string();
        }
    }
    let reference = format!("{}{}", cfg.runtime.base_asset, quote);

    let ref_1d = ctx
        .candles(&reference, Interval::D1, 220)
        .await
        .with_context(|| format!("daily candles for {reference}"))?;
    let ref_4h = ctx
        .candles(&reference, Interval::H4, 220)
        .await
        .with_context(|| format!("4h candles for {reference}"))?;
    let ref_1h = ctx
        .candles(&reference, Interval::H1, 200)
        .await
        .with_context(|| format!("1h candles for {reference}"))?;

    let funding_abs = ctx
        .funding_rates(&reference, 8)
        .await
        .unwrap_or_default()
        .last()
        .map_or(0.0, |r| r.abs());

    let regime = regime_filter(&cfg.regime, &ref_1d, &ref_4h, funding_abs);
    info!(
        ok = regime.ok,
        atr_percent = regime.atr_percent,
        risk_scale = regime.risk_scale,
        reason = %regime.reason,
        "regime"
    );

    let news = resolve_news_context(opts.news_mode).await;
    let mut forced_relaxed = !regime.ok && !opts.ignore_trend;

    let trend = trend_filter(&cfg.trend, &ref_4h, &ref_1h);
    info!(ok = trend.ok, direction = ?trend.direction, reason = %trend.reason, "reference trend");

    let both = || vec![Side::Long, Side::Short];
    let directions: Vec<Side> = if let Some(choice) = opts.override_direction {
        choice.sides()
    } else if trend.ok || opts.ignore_trend {
        trend.direction.as_side().map_or_else(both, |s| vec![s])
    } else {
        match opts.fallback_on_trend {
            TrendFallback::Ignore => both(),
            TrendFallback::Relaxed => {
                forced_relaxed = true;
                both()
            }
            TrendFallback::None => {
                info!("waiting: trend not aligned");
                return Ok(CycleReport::halt(TradeMode::Strict, "trend not aligned"));
            }
        }
    };
    let scan_direction: Option<Side> = match directions.as_slice() {
        [side] => Some(*side),
        _ => None,
    };

    let mut day = DayStateStore::open(&cfg.runtime.day_state_path);
    let mode = select_mode(
        opts.relaxed,
        forced_relaxed,
        news.force_relaxed,
        regime.ok,
        day.state().net_r,
    );
    let mcfg = cfg.mode(mode).clone();
    let min_score = opts.min_score.unwrap_or(mcfg.min_score);

    if !day.can_trade_today(cfg.risk.max_daily_loss_r) {
        info!("no-trade: daily loss cap reached");
        return Ok(CycleReport::halt(mode, "daily loss cap reached"));
    }

    let scores = build_universe_scores(
        ctx.as_ref(),
        &reference,
        &quote,
        cfg.runtime.scored_top_n,
        cfg.runtime.deep_liq_top_n,
        cfg.runtime.min_24h_volume_usd,
    )
    .await?;
    let universe = select_universe(&scores.ranked, min_score, cfg.runtime.universe_top_n);
    info!(
        mode = mode.as_str(),
        universe = ?universe,
        deep = scores.meta.deep,
        light = scores.meta.light,
        errors = scores.meta.errors,
        "universe selected"
    );

    let equity = ctx
        .equity()
        .await
        .unwrap_or(cfg.runtime.demo_equity)
        .max(0.0);

    let mut risk = RiskEngine::new(&cfg.risk, equity);
    if opts.execute {
        let r = dynamic_r_per_trade(cfg, mode, equity, regime.atr_percent, news.r_cap)
            * regime.risk_scale.clamp(0.2, 1.0);
        risk.set_r_per_trade(r);
    }
    let lev_cap_dyn = dynamic_leverage_cap(
        regime.atr_percent,
        news.leverage_cap.unwrap_or(cfg.risk.leverage_cap),
    );

    let pos_symbols: HashSet<String> = ctx
        .positions(None)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.is_flat())
        .map(|p| p.symbol)
        .collect();

    let shadow = ShadowLogger::new(&cfg.runtime.shadow_log_path);
    let mut plans: Vec<TradePlan> = Vec::new();
    let mut sym_ctx: HashMap<String, ScanContext> = HashMap::new();

    for symbol in &universe {
        if pos_symbols.contains(symbol) {
            debug!(symbol, "skip: position already open");
            continue;
        }

        let k4h = ctx.candles(symbol, Interval::H4, 220).await.unwrap_or_default();
        let k1h = ctx.candles(symbol, Interval::H1, 120).await.unwrap_or_default();
        let k15 = ctx.candles(symbol, Interval::M15, 200).await.unwrap_or_default();
        if k4h.is_empty() || k1h.is_empty() || k15.is_empty() {
            debug!(symbol, "skip: insufficient bars");
            continue;
        }

        let coin_trend = trend_filter(&cfg.trend, &k4h, &k1h);
        let rs = scores
            .details
            .get(symbol)
            .map_or(0.5, |d| d.relative_strength);

        // Effective directions: the operator override wins, then the
        // reference direction, then the coin's own trend.
        let mut eff_dirs: Vec<Side> =
            if matches!(opts.override_direction, Some(DirectionChoice::Both)) {
                both()
            } else if let Some(side) = scan_direction {
                vec![side]
            } else {
                coin_trend.direction.as_side().map_or_else(both, |s| vec![s])
            };

        if mode == TradeMode::Strict {
            // Hard gate on the coin trend, with a relative-strength
            // override for coins moving against the reference.
            if !coin_trend.ok {
                debug!(symbol, "skip: coin trend not ok");
                continue;
            }
            if let Some(dir) = scan_direction {
                if coin_trend.direction.as_side() != Some(dir) {
                    if rs >= mcfg.ignore_trend_if_rs {
                        match coin_trend.direction.as_side() {
                            Some(s) => eff_dirs = vec![s],
                            None => continue,
                        }
                        debug!(symbol, rs, "relative-strength override of reference direction");
                    } else {
                        debug!(symbol, rs, "skip: coin direction against reference");
                        continue;
                    }
                }
            }
        }

        let atr15 = atr15_of(&k15);
        let last_close = k15[k15.len() - 1].close;
        if cfg.runtime.min_coin_atr_percent > 0.0
            && last_close > 0.0
            && atr15 / last_close < cfg.runtime.min_coin_atr_percent
        {
            debug!(symbol, "skip: below ATR% floor");
            continue;
        }

        if mode == TradeMode::Relaxed {
            if !day.can_signal(mcfg.hourly_signal_cap) {
                debug!("hourly signal cap reached");
                continue;
            }
            if day.on_cooldown(symbol) {
                debug!(symbol, "skip: cooldown active");
                continue;
            }
        }

        let tick = ctx
            .instrument_filters(symbol)
            .await
            .map_or(0.01, |f| f.tick_size);
        let params = ScanParams {
            mode,
            tick,
            atr15,
            only_core_triggers: opts.only_core_triggers,
            coin_trend_ok: coin_trend.ok,
            coin_trend_dir: coin_trend.direction,
        };
        let levels = previous_day_levels(&k1h);
        sym_ctx.insert(
            symbol.clone(),
            ScanContext {
                atr15,
                pdh: levels.map(|(h, _)| h),
                pdl: levels.map(|(_, l)| l),
            },
        );

        for cand in scan_symbol(cfg, &params, symbol, &eff_dirs, &k1h, &k15) {
            let stop_dist = (cand.entry - cand.stop).abs().max(1e-9);
            let qty = risk.position_size(stop_dist);
            if cand.entry <= 0.0 || qty <= 0.0 {
                debug!(symbol, "skip candidate: degenerate sizing");
                continue;
            }
            let leverage = dynamic_leverage(stop_dist, cand.entry, cand.risk_reward);
            let (qty, _) = apply_leverage_cap(cand.entry, qty, equity, f64::from(leverage));
            let (qty, _) = apply_leverage_cap(cand.entry, qty, equity, lev_cap_dyn);

            let plan = TradePlan {
                side: cand.side,
                symbol: cand.symbol.clone(),
                entry: cand.entry,
                stop: cand.stop,
                target1: cand.target1,
                target2: cand.target2,
                quantity: qty,
                leverage,
                risk_reward: cand.risk_reward,
            };
            shadow.log_candidate(
                &plan,
                mode,
                &ShadowFeatures::from_detail(scores.details.get(symbol)),
            );
            plans.push(plan);
        }
    }

    if plans.is_empty() {
        info!("no plans found under current settings");
        return Ok(CycleReport {
            mode,
            universe,
            plans,
            executed: Vec::new(),
            halted: Some("no plans".to_string()),
        });
    }

    let allowed_slots = mcfg.max_open.saturating_sub(pos_symbols.len());
    if allowed_slots == 0 {
        info!("no-execute: max open positions reached for mode");
        return Ok(CycleReport {
            mode,
            universe,
            plans,
            executed: Vec::new(),
            halted: Some("max open positions reached".to_string()),
        });
    }

    // Correlation screen over recent 1h closes.
    let mut hist_closes: HashMap<String, Vec<f64>> = HashMap::new();
    for plan in &plans {
        if hist_closes.contains_key(&plan.symbol) {
            continue;
        }
        if let Ok(k1h) = ctx.candles(&plan.symbol, Interval::H1, 100).await {
            hist_closes.insert(plan.symbol.clone(), k1h.iter().map(|c| c.close).collect());
        }
    }
    let mut plans = diversify_plans(plans, &hist_closes);
    plans.truncate(allowed_slots);

    if !opts.execute || opts.dry_run {
        for plan in &plans {
            info!(
                side = plan.side.as_str(),
                symbol = %plan.symbol,
                mode = mode.as_str(),
                entry = plan.entry,
                stop = plan.stop,
                t1 = plan.target1,
                t2 = plan.target2,
                qty = plan.quantity,
                leverage = plan.leverage,
                rr = plan.risk_reward,
                "plan"
            );
        }
        return Ok(CycleReport {
            mode,
            universe,
            plans,
            executed: Vec::new(),
            halted: None,
        });
    }

    let executor = Executor::new(
        Arc::clone(&ctx),
        cfg.entry.cancel_after_bars,
        dynamic_notional_floor(equity, cfg.risk.min_notional_floor_usd),
    );
    // Multi-assets margin lets USDC collateral back USDT-margined contracts.
    if let Err(e) = ctx.set_multi_assets_margin(true).await {
        debug!(error = %e, "multi-assets margin not enabled");
    }

    let mut executed: Vec<String> = Vec::new();
    for plan in &plans {
        let sctx = sym_ctx.get(&plan.symbol);
        let atr15 = sctx.map_or(0.0, |c| c.atr15);
        let pd_level = sctx.and_then(|c| c.pd_level(plan.side));

        match executor
            .manage_open_entries(plan, opts.entry_style, atr15, pd_level, &mut day)
            .await
        {
            Ok(true) => {
                debug!(symbol = %plan.symbol, "skip: existing entry order managed");
                continue;
            }
            Ok(false) => {}
            Err(e) => warn!(symbol = %plan.symbol, error = %e, "entry-order management failed"),
        }

        // A position may have appeared since the scan.
        if let Ok(positions) = ctx.positions(Some(&plan.symbol)).await {
            if positions.iter().any(|p| !p.is_flat()) {
                debug!(symbol = %plan.symbol, "skip: position opened meanwhile");
                continue;
            }
        }

        if let Err(e) = ctx.set_margin_mode(&plan.symbol, opts.margin).await {
            warn!(symbol = %plan.symbol, error = %e, "margin mode change failed");
        }
        if let Err(e) = ctx.set_leverage(&plan.symbol, plan.leverage).await {
            warn!(symbol = %plan.symbol, error = %e, "leverage change failed");
        }

        match executor.place_entry(plan, opts.entry_style, pd_level).await {
            Ok(outcome) => {
                info!(
                    side = plan.side.as_str(),
                    symbol = %plan.symbol,
                    order_id = outcome.order_id,
                    qty = outcome.quantity,
                    state = ?outcome.state,
                    "executed"
                );
                executed.push(plan.symbol.clone());
                if let Err(e) = executor.ensure_protection(plan).await {
                    warn!(symbol = %plan.symbol, error = %e, "protection failsafe failed");
                }
                if let Err(e) = executor
                    .maybe_promote_trailing(&plan.symbol, plan.side, plan.entry, atr15)
                    .await
                {
                    warn!(symbol = %plan.symbol, error = %e, "trailing promotion check failed");
                }
                if let Err(e) = executor.cancel_protection_if_flat(&plan.symbol).await {
                    warn!(symbol = %plan.symbol, error = %e, "flat cleanup failed");
                }
                shadow.log_post_trade(plan, mode);
            }
            Err(e) => warn!(symbol = %plan.symbol, error = %e, "entry placement failed"),
        }
    }

    record_relaxed_signals(&mut day, mode, &plans, mcfg.same_coin_cooldown_min);

    if let Err(e) = executor.cleanup_stale_protection().await {
        warn!(error = %e, "final protection cleanup failed");
    }

    Ok(CycleReport {
        mode,
        universe,
        plans,
        executed,
        halted: None,
    })
}

/// Recomputes structural protection for every open position from current
/// context and attaches whatever is missing. Best-effort per symbol.
async fn protect_open_positions<E: ExchangeContext>(
    ctx: &E,
    cfg: &AppConfig,
    executor: &Executor<E>,
) {
    let positions = match ctx.positions(None).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "position query failed, protection pass skipped");
            return;
        }
    };
    for position in positions.iter().filter(|p| !p.is_flat()) {
        if let Err(e) = protect_position(ctx, cfg, executor, position).await {
            warn!(symbol = %position.symbol, error = %e, "protection pass failed");
        }
    }
}

async fn protect_position<E: ExchangeContext>(
    ctx: &E,
    cfg: &AppConfig,
    executor: &Executor<E>,
    position: &Position,
) -> Result<()> {
    let Some(side) = position.side() else {
        return Ok(());
    };
    let symbol = position.symbol.as_str();
    let k1h = ctx.candles(symbol, Interval::H1, 120).await?;
    let k15 = ctx.candles(symbol, Interval::M15, 60).await?;
    anyhow::ensure!(!k15.is_empty(), "no recent bars for {symbol}");

    let atr15 = atr15_of(&k15);
    let tick = ctx
        .instrument_filters(symbol)
        .await
        .map_or(0.01, |f| f.tick_size);
    let levels = previous_day_levels(&k1h);
    let entry = if position.entry_price > 0.0 {
        position.entry_price
    } else {
        k15[k15.len() - 1].close
    };

    let tail = &k15[k15.len().saturating_sub(5)..];
    let (stop, t1, t2) = match side {
        Side::Long => {
            let wick_low = tail.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            let anchor = levels.map_or(wick_low, |(_, pdl)| wick_low.min(pdl));
            let structural = structural_sl_long(anchor, atr15, tick, &cfg.stops);
            let dist = (entry - structural)
                .clamp(cfg.stops.min_atr_mult * atr15, cfg.stops.max_atr_mult * atr15);
            let (t1, t2) = smc_targets_long(&k1h, entry, levels.map(|(pdh, _)| pdh), 120);
            let (t1, t2) =
                enforce_target_distances(side, entry, t1, t2, atr15, tick, &cfg.take_profits);
            (entry - dist, t1, t2)
        }
        Side::Short => {
            let wick_high = tail.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let anchor = levels.map_or(wick_high, |(pdh, _)| wick_high.max(pdh));
            let structural = structural_sl_short(anchor, atr15, tick, &cfg.stops);
            let dist = (structural - entry)
                .clamp(cfg.stops.min_atr_mult * atr15, cfg.stops.max_atr_mult * atr15);
            let (t1, t2) = smc_targets_short(&k1h, entry, levels.map(|(_, pdl)| pdl), 120);
            let (t1, t2) =
                enforce_target_distances(side, entry, t1, t2, atr15, tick, &cfg.take_profits);
            (entry + dist, t1, t2)
        }
    };

    let stop_dist = (entry - stop).abs().max(1e-9);
    let plan = TradePlan {
        side,
        symbol: position.symbol.clone(),
        entry,
        stop,
        target1: t1,
        target2: t2,
        quantity: position.qty(),
        leverage: 1,
        risk_reward: (t1 - entry).abs() / stop_dist,
    };
    executor.ensure_protection(&plan).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use edgebot_core::types::{InstrumentFilters, OpenOrder, OrderRef, OrderSpec, Ticker24h};

    /// Exchange with no market data and no account state.
    struct EmptyExchange;

    #[async_trait]
    impl ExchangeContext for EmptyExchange {
        async fn candles(&self, _: &str, _: Interval, _: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn positions(&self, _: Option<&str>) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn open_orders(&self, _: Option<&str>) -> Result<Vec<OpenOrder>> {
            Ok(Vec::new())
        }

        async fn order_status(&self, _: &str, _: i64) -> Result<OpenOrder> {
            anyhow::bail!("no orders")
        }

        async fn recent_orders(&self, _: &str, _: usize) -> Result<Vec<OpenOrder>> {
            Ok(Vec::new())
        }

        async fn instrument_filters(&self, _: &str) -> Result<InstrumentFilters> {
            Ok(InstrumentFilters::default())
        }

        async fn symbol_tradable(&self, _: &str) -> Result<bool> {
            Ok(true)
        }

        async fn equity(&self) -> Result<f64> {
            Ok(10_000.0)
        }

        async fn balances(&self) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }

        async fn funding_rates(&self, _: &str, _: usize) -> Result<Vec<f64>> {
            Ok(Vec::new())
        }

        async fn mark_price(&self, _: &str) -> Result<f64> {
            Ok(0.0)
        }

        async fn day_tickers(&self) -> Result<Vec<Ticker24h>> {
            Ok(Vec::new())
        }

        async fn create_order(&self, _: &OrderSpec) -> Result<OrderRef> {
            anyhow::bail!("order placement not expected")
        }

        async fn cancel_order(&self, _: &str, _: i64) -> Result<()> {
            Ok(())
        }

        async fn set_leverage(&self, _: &str, _: u32) -> Result<()> {
            Ok(())
        }

        async fn set_margin_mode(&self, _: &str, _: MarginMode) -> Result<()> {
            Ok(())
        }

        async fn set_multi_assets_margin(&self, _: bool) -> Result<()> {
            Ok(())
        }
    }

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.runtime.day_state_path = dir.join("day.json").to_string_lossy().into_owned();
        cfg.runtime.shadow_log_path = dir.join("shadow.jsonl").to_string_lossy().into_owned();
        cfg
    }

    #[tokio::test]
    async fn empty_market_halts_without_plans() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let report = run_cycle(Arc::new(EmptyExchange), &cfg, &CycleOptions::default())
            .await
            .unwrap();
        // short reference history fails the regime softly: relaxed mode,
        // empty universe, explicit halt
        assert_eq!(report.mode, TradeMode::Relaxed);
        assert!(report.universe.is_empty());
        assert!(report.plans.is_empty());
        assert_eq!(report.halted.as_deref(), Some("no plans"));
    }

    #[tokio::test]
    async fn trend_wait_halts_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let opts = CycleOptions {
            ignore_trend: false,
            fallback_on_trend: TrendFallback::None,
            ..CycleOptions::default()
        };
        let report = run_cycle(Arc::new(EmptyExchange), &cfg, &opts).await.unwrap();
        assert_eq!(report.halted.as_deref(), Some("trend not aligned"));
        assert!(report.plans.is_empty());
    }

    #[tokio::test]
    async fn protect_only_exits_early() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let opts = CycleOptions {
            protect_only: true,
            ..CycleOptions::default()
        };
        let report = run_cycle(Arc::new(EmptyExchange), &cfg, &opts).await.unwrap();
        assert!(report.halted.is_none());
        assert!(report.universe.is_empty());
        assert!(report.executed.is_empty());
    }

    fn eth_plan() -> TradePlan {
        TradePlan {
            side: Side::Long,
            symbol: "ETHUSDT".to_string(),
            entry: 100.0,
            stop: 98.0,
            target1: 104.0,
            target2: 107.0,
            quantity: 1.0,
            leverage: 3,
            risk_reward: 2.0,
        }
    }

    #[test]
    fn relaxed_accounting_runs_on_attempts_not_fills() {
        let dir = tempfile::tempdir().unwrap();
        let mut day = DayStateStore::open(dir.path().join("day.json"));
        // booking happens per attempted plan, so a cycle whose orders were
        // all rejected still burns the hourly signal and the cooldown
        record_relaxed_signals(&mut day, TradeMode::Relaxed, &[eth_plan()], 60);
        assert!(day.on_cooldown("ETHUSDT"));
        assert!(!day.can_signal(1));

        let mut strict_day = DayStateStore::open(dir.path().join("strict.json"));
        record_relaxed_signals(&mut strict_day, TradeMode::Strict, &[eth_plan()], 60);
        assert!(!strict_day.on_cooldown("ETHUSDT"));
        assert!(strict_day.can_signal(1));
    }

    #[test]
    fn strict_requires_everything_aligned() {
        assert_eq!(select_mode(false, false, false, true, -0.5), TradeMode::Strict);
        assert_eq!(select_mode(false, false, false, true, 0.0), TradeMode::Strict);
    }

    #[test]
    fn relaxed_triggers() {
        // any single condition flips to relaxed
        assert_eq!(select_mode(true, false, false, true, 0.0), TradeMode::Relaxed);
        assert_eq!(select_mode(false, true, false, true, 0.0), TradeMode::Relaxed);
        assert_eq!(select_mode(false, false, true, true, 0.0), TradeMode::Relaxed);
        assert_eq!(select_mode(false, false, false, false, 0.0), TradeMode::Relaxed);
        // green day trades relaxed
        assert_eq!(select_mode(false, false, false, true, 0.7), TradeMode::Relaxed);
    }

    #[test]
    fn universe_threshold_with_fallback() {
        let ranked = vec![
            ("AAAUSDT".to_string(), 0.9),
            ("BBBUSDT".to_string(), 0.6),
            ("CCCUSDT".to_string(), 0.4),
        ];
        assert_eq!(
            select_universe(&ranked, 0.5, 5),
            vec!["AAAUSDT".to_string(), "BBBUSDT".to_string()]
        );
        assert_eq!(select_universe(&ranked, 0.5, 1), vec!["AAAUSDT".to_string()]);
        // threshold excludes everything: fall back to the raw ranking
        assert_eq!(
            select_universe(&ranked, 0.95, 2),
            vec!["AAAUSDT".to_string(), "BBBUSDT".to_string()]
        );
    }

    #[test]
    fn notional_floor_scales_with_equity() {
        assert_eq!(dynamic_notional_floor(5_000.0, 50.0), 150.0);
        assert_eq!(dynamic_notional_floor(10_000.0, 50.0), 200.0);
        assert_eq!(dynamic_notional_floor(50_000.0, 50.0), 400.0);
        // static floor above the dynamic one wins
        assert_eq!(dynamic_notional_floor(1_000.0, 500.0), 500.0);
    }

    #[test]
    fn option_parsing() {
        assert_eq!("both".parse::<DirectionChoice>().unwrap(), DirectionChoice::Both);
        assert!("sideways".parse::<DirectionChoice>().is_err());
        assert_eq!("none".parse::<TrendFallback>().unwrap(), TrendFallback::None);
        assert_eq!("relaxed".parse::<TrendFallback>().unwrap(), TrendFallback::Relaxed);
        assert!("hope".parse::<TrendFallback>().is_err());
    }

    #[test]
    fn direction_sides() {
        assert_eq!(DirectionChoice::Long.sides(), vec![Side::Long]);
        assert_eq!(DirectionChoice::Both.sides(), vec![Side::Long, Side::Short]);
    }
}
