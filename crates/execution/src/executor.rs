//! Order placement and position protection against a live exchange.
//!
//! Everything here re-reads exchange state immediately before acting on it:
//! positions are the ground truth for fills, open orders are the ground
//! truth for protection. Local bookkeeping (reprice counters, cooldowns)
//! lives in the day-state store, not here.

use anyhow::{Context, Result};
use chrono::Utc;
use edgebot_core::quantize::{format_by_step, round_step, RoundMode};
use edgebot_core::session::DayStateStore;
use edgebot_core::traits::ExchangeContext;
use edgebot_core::types::{
    InstrumentFilters, OpenOrder, OrderSpec, OrderStatus, OrderType, Position, Side, TradePlan,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleState;

/// How an entry order is expressed on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStyle {
    /// Stop-triggered limit above (long) or below (short) the mark, for
    /// momentum continuation through the level.
    StopLimit,
    /// Resting limit at the retest level, waiting for price to come back.
    RetestLimit,
}

/// Result of one entry attempt.
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub order_id: i64,
    /// Quantity actually sent, after step rounding and the notional bump.
    pub quantity: f64,
    pub state: LifecycleState,
    /// Present when the entry filled and protection was attached inline.
    pub protection: Option<ProtectionReport>,
}

/// What `ensure_protection` did for one symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectionReport {
    pub placed_stop: bool,
    /// Number of take-profit orders placed (0 when already covered).
    pub placed_tps: u32,
    /// True when there was no position to protect.
    pub no_position: bool,
}

impl ProtectionReport {
    #[must_use]
    pub fn placed_anything(&self) -> bool {
        self.placed_stop || self.placed_tps > 0
    }
}

const DEFAULT_FILL_WAIT: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 15m bars; entry TTL is expressed in these.
const BAR_SECONDS: i64 = 900;

/// Cancel a resting entry when the mark has drifted this many ATRs away.
const MAX_DRIFT_ATR: f64 = 0.8;
/// Cancel a resting entry when its reward-to-risk has decayed below this.
const MIN_RESTING_RR: f64 = 1.0;
/// At most this many reprices per symbol per day.
const MAX_REPRICES: u32 = 2;

/// Trailing stop callback bounds, in percent.
const CALLBACK_MIN_PCT: f64 = 0.4;
const CALLBACK_MAX_PCT: f64 = 1.2;

/// Places entries, attaches protection, and manages resting orders.
pub struct Executor<E: ExchangeContext> {
    ctx: Arc<E>,
    cancel_after_bars: u32,
    min_notional_floor_usd: f64,
    fill_wait: Duration,
    poll_interval: Duration,
}

impl<E: ExchangeContext> Executor<E> {
    #[must_use]
    pub fn new(ctx: Arc<E>, cancel_after_bars: u32, min_notional_floor_usd: f64) -> Self {
        Self {
            ctx,
            cancel_after_bars,
            min_notional_floor_usd,
            fill_wait: DEFAULT_FILL_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the fill-wait window and poll cadence.
    #[must_use]
    pub fn with_timing(mut self, fill_wait: Duration, poll_interval: Duration) -> Self {
        self.fill_wait = fill_wait;
        self.poll_interval = poll_interval;
        self
    }

    /// Places the entry order for a plan, waits briefly for a fill, and
    /// attaches protection if the fill lands inside the wait window. An
    /// unfilled order is left resting (`EntryPlaced`); later cycles manage
    /// it through [`Executor::manage_open_entries`].
    pub async fn place_entry(
        &self,
        plan: &TradePlan,
        style: EntryStyle,
        pd_level: Option<f64>,
    ) -> Result<EntryOutcome> {
        let symbol = plan.symbol.as_str();
        let filters = self
            .ctx
            .instrument_filters(symbol)
            .await
            .with_context(|| format!("filters for {symbol}"))?;
        let mark = self.ctx.mark_price(symbol).await?;

        let qty = self.entry_quantity(plan, &filters);
        let qty_s = format_by_step(qty, filters.step_size, RoundMode::Down);

        let order_side = plan.side.entry_order_side();
        let spec = match style {
            EntryStyle::StopLimit => {
                let (stop_px, limit_px) = stop_entry_prices(plan.side, plan.entry, mark, &filters);
                OrderSpec::entry_stop_limit(
                    symbol,
                    order_side,
                    format_price(stop_px, plan.side, &filters),
                    format_price(limit_px, plan.side, &filters),
                    qty_s,
                )
            }
            EntryStyle::RetestLimit => {
                let px = retest_price(plan.side, plan.entry, pd_level, mark, filters.tick_size);
                OrderSpec::entry_limit(symbol, order_side, format_price(px, plan.side, &filters), qty_s)
            }
        };

        let order = self.ctx.create_order(&spec).await?;
        info!(
            symbol,
            order_id = order.order_id,
            side = plan.side.as_str(),
            qty,
            entry = plan.entry,
            stop = plan.stop,
            style = ?style,
            "entry order placed"
        );

        if !self.wait_for_fill(symbol, order.order_id).await {
            return Ok(EntryOutcome {
                order_id: order.order_id,
                quantity: qty,
                state: LifecycleState::EntryPlaced,
                protection: None,
            });
        }

        let protection = self.ensure_protection(plan).await?;
        Ok(EntryOutcome {
            order_id: order.order_id,
            quantity: qty,
            state: LifecycleState::ProtectionEnsured,
            protection: Some(protection),
        })
    }

    /// Step-rounds the plan quantity and bumps it up to the exchange and
    /// account notional floors.
    fn entry_quantity(&self, plan: &TradePlan, filters: &InstrumentFilters) -> f64 {
        let mut qty =
            round_step(plan.quantity, filters.step_size, RoundMode::Down).max(filters.min_qty);
        let floor = filters.min_notional.max(self.min_notional_floor_usd);
        if plan.entry > 0.0 && plan.entry * qty < floor {
            qty = round_step(floor / plan.entry, filters.step_size, RoundMode::Up)
                .max(filters.min_qty);
        }
        qty
    }

    /// Polls until the order fills, the wait window lapses, or the position
    /// shows up. A non-zero position counts as filled even when the order
    /// status lags, because positions are the ground truth.
    async fn wait_for_fill(&self, symbol: &str, order_id: i64) -> bool {
        let deadline = tokio::time::Instant::now() + self.fill_wait;
        loop {
            if let Ok(order) = self.ctx.order_status(symbol, order_id).await {
                if order.status == OrderStatus::Filled {
                    return true;
                }
            }
            if let Ok(positions) = self.ctx.positions(Some(symbol)).await {
                if positions.iter().any(|p| !p.is_flat()) {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Attaches whatever protection the position is missing: a closePosition
    /// stop-loss and a split take-profit ladder. Idempotent: existing
    /// protection is left alone, so this doubles as the post-restart
    /// failsafe pass.
    pub async fn ensure_protection(&self, plan: &TradePlan) -> Result<ProtectionReport> {
        let symbol = plan.symbol.as_str();
        let positions = self.ctx.positions(Some(symbol)).await?;
        let Some(position) = positions.iter().find(|p| !p.is_flat()) else {
            return Ok(ProtectionReport {
                no_position: true,
                ..ProtectionReport::default()
            });
        };
        let side = match position.side() {
            Some(s) => s,
            None => return Ok(ProtectionReport::default()),
        };

        let open = self.ctx.open_orders(Some(symbol)).await?;
        let has_sl = open.iter().any(OpenOrder::is_stop_loss);
        let has_tp = open.iter().any(OpenOrder::is_take_profit);
        if has_sl && has_tp {
            debug!(symbol, "protection already in place");
            return Ok(ProtectionReport::default());
        }

        let filters = self.ctx.instrument_filters(symbol).await?;
        let mark = self.ctx.mark_price(symbol).await?;
        let buf = protection_buffer(mark, filters.tick_size);
        let close_side = side.close_order_side();
        let mut report = ProtectionReport::default();

        if !has_sl {
            // Keep the trigger on the safe side of the mark so the exchange
            // accepts it even after an adverse move.
            let sl_px = match side {
                Side::Long => plan.stop.min(mark - buf),
                Side::Short => plan.stop.max(mark + buf),
            };
            let spec = OrderSpec::stop_market_close(
                symbol,
                close_side,
                format_price(sl_px, side, &filters),
            );
            self.ctx.create_order(&spec).await?;
            info!(symbol, stop = sl_px, "stop-loss placed");
            report.placed_stop = true;
        }

        if !has_tp {
            report.placed_tps = self
                .place_take_profits(plan, position, side, mark, buf, &filters)
                .await?;
        }

        Ok(report)
    }

    /// Two reduce-only limit targets at 50/50, collapsing to one order (or
    /// a closePosition take-profit) when the split would violate minimums.
    async fn place_take_profits(
        &self,
        plan: &TradePlan,
        position: &Position,
        side: Side,
        mark: f64,
        buf: f64,
        filters: &InstrumentFilters,
    ) -> Result<u32> {
        let symbol = plan.symbol.as_str();
        let close_side = side.close_order_side();
        let qty = position.qty();

        if qty < filters.min_qty {
            // Too small to split or even to reduce; close the whole thing at
            // a mark-triggered take-profit.
            let tp_px = match side {
                Side::Long => plan.target1.max(mark + buf),
                Side::Short => plan.target1.min(mark - buf),
            };
            let spec = OrderSpec::tp_market_close(
                symbol,
                close_side,
                format_target_price(tp_px, side, filters),
            );
            self.ctx.create_order(&spec).await?;
            info!(symbol, target = tp_px, "closePosition take-profit placed");
            return Ok(1);
        }

        let q1 = round_step(qty * 0.5, filters.step_size, RoundMode::Down);
        let q2 = round_step(qty - q1, filters.step_size, RoundMode::Down);

        if q1 < filters.min_qty || q2 < filters.min_qty {
            let spec = OrderSpec::tp_limit_reduce_only(
                symbol,
                close_side,
                format_target_price(plan.target1, side, filters),
                format_by_step(qty, filters.step_size, RoundMode::Down),
            );
            self.ctx.create_order(&spec).await?;
            info!(symbol, target = plan.target1, qty, "single take-profit placed");
            return Ok(1);
        }

        for (target, q) in [(plan.target1, q1), (plan.target2, q2)] {
            let spec = OrderSpec::tp_limit_reduce_only(
                symbol,
                close_side,
                format_target_price(target, side, filters),
                format_by_step(q, filters.step_size, RoundMode::Down),
            );
            self.ctx.create_order(&spec).await?;
        }
        info!(symbol, t1 = plan.target1, t2 = plan.target2, q1, q2, "take-profit ladder placed");
        Ok(2)
    }

    /// Once the first target has filled, swaps the remaining fixed target
    /// and stop for a trailing stop on the runner half. Returns true when
    /// the promotion happened.
    pub async fn maybe_promote_trailing(
        &self,
        symbol: &str,
        side: Side,
        entry: f64,
        atr15: f64,
    ) -> Result<bool> {
        let open = self.ctx.open_orders(Some(symbol)).await?;
        let tp_limits: Vec<&OpenOrder> = open.iter().filter(|o| o.is_tp_limit()).collect();
        // Exactly one TP limit resting means either nothing has filled yet
        // (with a two-order ladder there would be two) or the first target
        // is gone; history disambiguates.
        if tp_limits.len() != 1 {
            return Ok(false);
        }

        let tp1_filled = match self.ctx.recent_orders(symbol, 20).await {
            Ok(history) => history.iter().any(|o| {
                o.status == OrderStatus::Filled && o.reduce_only && o.order_type == OrderType::Limit
            }),
            Err(e) => {
                // Can't prove the ladder is intact; assume the first target
                // filled rather than leaving the runner unmanaged.
                warn!(symbol, error = %e, "order history unavailable, assuming first target filled");
                true
            }
        };
        if !tp1_filled {
            return Ok(false);
        }

        let mut to_cancel: Vec<i64> = tp_limits.iter().map(|o| o.order_id).collect();
        to_cancel.extend(open.iter().filter(|o| o.is_stop_loss()).map(|o| o.order_id));
        for order_id in to_cancel {
            self.ctx.cancel_order(symbol, order_id).await?;
        }

        let filters = self.ctx.instrument_filters(symbol).await?;
        let atr_pct = if entry > 0.0 { atr15 / entry } else { 0.0 };
        let callback = (0.6 * atr_pct * 100.0).clamp(CALLBACK_MIN_PCT, CALLBACK_MAX_PCT);
        let activation = match side {
            Side::Long => entry + 0.5 * atr15,
            Side::Short => entry - 0.5 * atr15,
        };
        let spec = OrderSpec::trailing_stop_close(
            symbol,
            side.close_order_side(),
            format!("{callback:.2}"),
            format_price(activation, side, &filters),
        );
        self.ctx.create_order(&spec).await?;
        info!(symbol, callback, activation, "promoted runner to trailing stop");
        Ok(true)
    }

    /// Manages a resting entry order for a symbol: expires it past the TTL,
    /// cancels it when the setup has decayed, and reprices retest limits
    /// toward the mark a bounded number of times. Returns true when an
    /// entry order is (still) being managed, meaning no new entry should be
    /// placed this cycle.
    pub async fn manage_open_entries(
        &self,
        plan: &TradePlan,
        style: EntryStyle,
        atr15: f64,
        pd_level: Option<f64>,
        day: &mut DayStateStore,
    ) -> Result<bool> {
        let symbol = plan.symbol.as_str();
        let open = self.ctx.open_orders(Some(symbol)).await?;
        let Some(entry) = open.iter().find(|o| o.is_entry()) else {
            day.reset_reprice(symbol);
            return Ok(false);
        };

        let bars_elapsed = (Utc::now() - entry.update_time).num_seconds() / BAR_SECONDS;
        let ttl_bars = i64::from(self.cancel_after_bars).saturating_sub(2);
        if bars_elapsed >= ttl_bars {
            self.ctx.cancel_order(symbol, entry.order_id).await?;
            day.reset_reprice(symbol);
            info!(symbol, order_id = entry.order_id, bars_elapsed, "entry order expired");
            return Ok(true);
        }

        if style != EntryStyle::RetestLimit {
            return Ok(true);
        }

        let mark = self.ctx.mark_price(symbol).await?;
        let drift_atr = if atr15 > 0.0 {
            (mark - entry.price).abs() / atr15
        } else {
            0.0
        };
        let rr = resting_rr(plan.side, entry.price, plan.stop, plan.target1);

        if drift_atr > MAX_DRIFT_ATR || rr < MIN_RESTING_RR {
            self.ctx.cancel_order(symbol, entry.order_id).await?;
            day.reset_reprice(symbol);
            info!(symbol, drift_atr, rr, "entry cancelled, setup decayed");
            return Ok(true);
        }

        if day.reprice_count(symbol) < MAX_REPRICES {
            let filters = self.ctx.instrument_filters(symbol).await?;
            let px = retest_price(plan.side, plan.entry, pd_level, mark, filters.tick_size);
            if px != entry.price {
                self.ctx.cancel_order(symbol, entry.order_id).await?;
                let spec = OrderSpec::entry_limit(
                    symbol,
                    plan.side.entry_order_side(),
                    format_price(px, plan.side, &filters),
                    format_by_step(entry.orig_qty, filters.step_size, RoundMode::Down),
                );
                self.ctx.create_order(&spec).await?;
                let count = day.inc_reprice(symbol);
                info!(symbol, price = px, count, "entry repriced toward mark");
            }
        }
        Ok(true)
    }

    /// Cancels all resting protection on one symbol if its position is
    /// flat. Returns the number of cancellations.
    pub async fn cancel_protection_if_flat(&self, symbol: &str) -> Result<usize> {
        let positions = self.ctx.positions(Some(symbol)).await?;
        if positions.iter().any(|p| !p.is_flat()) {
            return Ok(0);
        }
        let open = self.ctx.open_orders(Some(symbol)).await?;
        let mut cancelled = 0;
        for order in open.iter().filter(|o| o.is_protection()) {
            self.ctx.cancel_order(symbol, order.order_id).await?;
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(symbol, cancelled, "flat symbol, protection cleared");
        }
        Ok(cancelled)
    }

    /// Account-wide sweep: closePosition protective orders on symbols with
    /// no position are leftovers from closed trades and get cancelled.
    pub async fn cleanup_stale_protection(&self) -> Result<usize> {
        let open = self.ctx.open_orders(None).await?;
        let positions = self.ctx.positions(None).await?;
        let held: std::collections::HashSet<&str> = positions
            .iter()
            .filter(|p| !p.is_flat())
            .map(|p| p.symbol.as_str())
            .collect();

        let mut cancelled = 0;
        for order in &open {
            if order.close_position
                && order.order_type.is_protective()
                && !held.contains(order.symbol.as_str())
            {
                if let Err(e) = self.ctx.cancel_order(&order.symbol, order.order_id).await {
                    warn!(symbol = %order.symbol, order_id = order.order_id, error = %e, "stale protection cancel failed");
                    continue;
                }
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "stale protection orders cleaned up");
        }
        Ok(cancelled)
    }
}

/// Buffer that keeps protective triggers clear of the mark: at least five
/// ticks, at least five basis points.
fn protection_buffer(mark: f64, tick: f64) -> f64 {
    (5.0 * tick).max(0.0005 * mark)
}

/// Stop-limit entry prices: trigger three ticks beyond the mark (or at the
/// planned entry, whichever is further), limit two ticks past the trigger.
fn stop_entry_prices(side: Side, entry: f64, mark: f64, filters: &InstrumentFilters) -> (f64, f64) {
    let tick = filters.tick_size;
    match side {
        Side::Long => {
            let stop_px = entry.max(mark + 3.0 * tick);
            (stop_px, stop_px + 2.0 * tick)
        }
        Side::Short => {
            let stop_px = entry.min(mark - 3.0 * tick);
            (stop_px, stop_px - 2.0 * tick)
        }
    }
}

/// Resting limit price for a retest entry: never further from the level than
/// the planned entry, never closer to the mark than five ticks, never below
/// (long) / above (short) the retest level itself.
fn retest_price(side: Side, entry: f64, pd_level: Option<f64>, mark: f64, tick: f64) -> f64 {
    match side {
        Side::Long => {
            let near_mark = mark - 5.0 * tick;
            let anchored = pd_level.map_or(near_mark, |l| near_mark.max(l + tick));
            entry.min(anchored)
        }
        Side::Short => {
            let near_mark = mark + 5.0 * tick;
            let anchored = pd_level.map_or(near_mark, |l| near_mark.min(l - tick));
            entry.max(anchored)
        }
    }
}

/// Reward-to-risk of a resting entry at its current price.
fn resting_rr(side: Side, price: f64, stop: f64, target1: f64) -> f64 {
    let (reward, risk) = match side {
        Side::Long => (target1 - price, price - stop),
        Side::Short => (price - target1, stop - price),
    };
    if risk <= 0.0 {
        return 0.0;
    }
    reward / risk
}

/// Entry and stop prices round toward the position (down for long, up for
/// short) so quantization never crosses the intended level.
fn format_price(px: f64, side: Side, filters: &InstrumentFilters) -> String {
    let mode = match side {
        Side::Long => RoundMode::Down,
        Side::Short => RoundMode::Up,
    };
    format_by_step(px, filters.tick_size, mode)
}

/// Take-profit prices round away from entry (up for long, down for short)
/// so a target is never quantized closer than planned.
fn format_target_price(px: f64, side: Side, filters: &InstrumentFilters) -> String {
    let mode = match side {
        Side::Long => RoundMode::Up,
        Side::Short => RoundMode::Down,
    };
    format_by_step(px, filters.tick_size, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use edgebot_core::types::{
        Candle, Interval, MarginMode, OrderRef, OrderSide, Ticker24h,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        positions: Vec<Position>,
        open_orders: Vec<OpenOrder>,
        recent: Vec<OpenOrder>,
        created: Vec<OrderSpec>,
        cancelled: Vec<i64>,
        mark: f64,
        filters: InstrumentFilters,
        next_id: i64,
        fill_entries: bool,
        history_fails: bool,
    }

    struct MockExchange {
        state: Mutex<MockState>,
    }

    impl MockExchange {
        fn new(state: MockState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
            })
        }

        fn created(&self) -> Vec<OrderSpec> {
            self.state.lock().unwrap().created.clone()
        }

        fn cancelled(&self) -> Vec<i64> {
            self.state.lock().unwrap().cancelled.clone()
        }
    }

    #[async_trait]
    impl ExchangeContext for MockExchange {
        async fn candles(&self, _: &str, _: Interval, _: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
            let s = self.state.lock().unwrap();
            Ok(s.positions
                .iter()
                .filter(|p| symbol.is_none_or(|sym| p.symbol == sym))
                .cloned()
                .collect())
        }

        async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
            let s = self.state.lock().unwrap();
            Ok(s.open_orders
                .iter()
                .filter(|o| symbol.is_none_or(|sym| o.symbol == sym))
                .cloned()
                .collect())
        }

        async fn order_status(&self, _: &str, order_id: i64) -> Result<OpenOrder> {
            let s = self.state.lock().unwrap();
            s.open_orders
                .iter()
                .chain(s.recent.iter())
                .find(|o| o.order_id == order_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown order {order_id}"))
        }

        async fn recent_orders(&self, _: &str, _: usize) -> Result<Vec<OpenOrder>> {
            let s = self.state.lock().unwrap();
            if s.history_fails {
                anyhow::bail!("history unavailable");
            }
            Ok(s.recent.clone())
        }

        async fn instrument_filters(&self, _: &str) -> Result<InstrumentFilters> {
            Ok(self.state.lock().unwrap().filters)
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
            Ok(self.state.lock().unwrap().mark)
        }

        async fn day_tickers(&self) -> Result<Vec<Ticker24h>> {
            Ok(Vec::new())
        }

        async fn create_order(&self, spec: &OrderSpec) -> Result<OrderRef> {
            let mut s = self.state.lock().unwrap();
            s.next_id += 1;
            let order_id = s.next_id;
            s.created.push(spec.clone());
            if s.fill_entries && !spec.reduce_only && !spec.close_position {
                let qty: f64 = spec.quantity.as_deref().unwrap_or("0").parse().unwrap();
                let signed = if spec.side == OrderSide::Buy { qty } else { -qty };
                s.positions.push(Position {
                    symbol: spec.symbol.clone(),
                    position_amt: signed,
                    entry_price: spec
                        .price
                        .as_deref()
                        .unwrap_or("0")
                        .parse()
                        .unwrap(),
                });
            }
            Ok(OrderRef { order_id })
        }

        async fn cancel_order(&self, _: &str, order_id: i64) -> Result<()> {
            let mut s = self.state.lock().unwrap();
            s.open_orders.retain(|o| o.order_id != order_id);
            s.cancelled.push(order_id);
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

    fn plan() -> TradePlan {
        TradePlan {
            side: Side::Long,
            symbol: "ETHUSDT".to_string(),
            entry: 100.0,
            stop: 98.0,
            target1: 104.0,
            target2: 107.0,
            quantity: 3.0,
            leverage: 10,
            risk_reward: 2.0,
        }
    }

    fn long_position(qty: f64) -> Position {
        Position {
            symbol: "ETHUSDT".to_string(),
            position_amt: qty,
            entry_price: 100.0,
        }
    }

    fn order(
        order_id: i64,
        order_type: OrderType,
        reduce_only: bool,
        close_position: bool,
    ) -> OpenOrder {
        OpenOrder {
            order_id,
            symbol: "ETHUSDT".to_string(),
            order_type,
            side: OrderSide::Sell,
            price: 104.0,
            stop_price: 98.0,
            orig_qty: 1.5,
            executed_qty: 0.0,
            reduce_only,
            close_position,
            status: OrderStatus::New,
            update_time: Utc::now(),
        }
    }

    fn filters() -> InstrumentFilters {
        InstrumentFilters {
            tick_size: 0.01,
            step_size: 0.001,
            min_qty: 0.001,
            min_notional: 20.0,
        }
    }

    fn executor(ctx: &Arc<MockExchange>) -> Executor<MockExchange> {
        Executor::new(Arc::clone(ctx), 16, 150.0)
            .with_timing(Duration::from_millis(5), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn ensure_protection_is_idempotent() {
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(3.0)],
            open_orders: vec![
                order(1, OrderType::StopMarket, false, true),
                order(2, OrderType::Limit, true, false),
            ],
            mark: 100.5,
            filters: filters(),
            ..MockState::default()
        });
        let report = executor(&ctx).ensure_protection(&plan()).await.unwrap();
        assert!(!report.placed_anything());
        assert!(ctx.created().is_empty());
    }

    #[tokio::test]
    async fn ensure_protection_places_stop_and_split_targets() {
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(3.0)],
            mark: 100.5,
            filters: filters(),
            ..MockState::default()
        });
        let report = executor(&ctx).ensure_protection(&plan()).await.unwrap();
        assert!(report.placed_stop);
        assert_eq!(report.placed_tps, 2);

        let created = ctx.created();
        assert_eq!(created.len(), 3);
        let sl = &created[0];
        assert_eq!(sl.order_type, OrderType::StopMarket);
        assert!(sl.close_position);
        assert_eq!(sl.side, OrderSide::Sell);
        // stop stays below mark minus buffer: min(98, 100.5 - 0.0502...)
        assert_eq!(sl.stop_price.as_deref(), Some("98.00"));

        let tps: Vec<&OrderSpec> = created[1..].iter().collect();
        assert!(tps.iter().all(|s| s.reduce_only && s.order_type == OrderType::Limit));
        assert_eq!(tps[0].quantity.as_deref(), Some("1.500"));
        assert_eq!(tps[1].quantity.as_deref(), Some("1.500"));
        assert_eq!(tps[0].price.as_deref(), Some("104.00"));
        assert_eq!(tps[1].price.as_deref(), Some("107.00"));
    }

    #[tokio::test]
    async fn protective_prices_round_off_the_entry_side() {
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(3.0)],
            mark: 100.5,
            filters: filters(),
            ..MockState::default()
        });
        let mut off_grid = plan();
        off_grid.stop = 97.996;
        off_grid.target1 = 104.003;
        off_grid.target2 = 107.007;
        executor(&ctx).ensure_protection(&off_grid).await.unwrap();

        let created = ctx.created();
        assert_eq!(created.len(), 3);
        // long: the stop trigger rounds down (toward the position), the
        // targets round up (away from entry)
        assert_eq!(created[0].stop_price.as_deref(), Some("97.99"));
        assert_eq!(created[1].price.as_deref(), Some("104.01"));
        assert_eq!(created[2].price.as_deref(), Some("107.01"));
    }

    #[tokio::test]
    async fn dust_position_collapses_to_close_position_target() {
        let mut f = filters();
        f.min_qty = 0.1;
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(0.05)],
            mark: 100.5,
            filters: f,
            ..MockState::default()
        });
        let report = executor(&ctx).ensure_protection(&plan()).await.unwrap();
        assert_eq!(report.placed_tps, 1);

        let created = ctx.created();
        let tp = created
            .iter()
            .find(|s| s.order_type == OrderType::TakeProfitMarket)
            .unwrap();
        assert!(tp.close_position);
        assert!(tp.quantity.is_none());
    }

    #[tokio::test]
    async fn half_split_below_minimum_collapses_to_single_target() {
        let mut f = filters();
        f.min_qty = 2.0;
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(3.0)],
            mark: 100.5,
            filters: f,
            ..MockState::default()
        });
        let report = executor(&ctx).ensure_protection(&plan()).await.unwrap();
        assert_eq!(report.placed_tps, 1);

        let created = ctx.created();
        let tp = created.iter().find(|s| s.reduce_only).unwrap();
        assert_eq!(tp.order_type, OrderType::Limit);
        assert_eq!(tp.quantity.as_deref(), Some("3.000"));
        assert_eq!(tp.price.as_deref(), Some("104.00"));
    }

    #[tokio::test]
    async fn no_position_skips_protection() {
        let ctx = MockExchange::new(MockState {
            mark: 100.5,
            filters: filters(),
            ..MockState::default()
        });
        let report = executor(&ctx).ensure_protection(&plan()).await.unwrap();
        assert!(report.no_position);
        assert!(ctx.created().is_empty());
    }

    #[tokio::test]
    async fn entry_fill_attaches_protection() {
        let ctx = MockExchange::new(MockState {
            mark: 100.0,
            filters: filters(),
            fill_entries: true,
            ..MockState::default()
        });
        let outcome = executor(&ctx)
            .place_entry(&plan(), EntryStyle::StopLimit, Some(99.0))
            .await
            .unwrap();
        assert_eq!(outcome.state, LifecycleState::ProtectionEnsured);
        assert!(outcome.protection.unwrap().placed_stop);

        let created = ctx.created();
        let entry = &created[0];
        assert_eq!(entry.order_type, OrderType::Stop);
        assert_eq!(entry.side, OrderSide::Buy);
        // trigger = max(100, 100 + 3 ticks), limit two ticks above
        assert_eq!(entry.stop_price.as_deref(), Some("100.03"));
        assert_eq!(entry.price.as_deref(), Some("100.05"));
        assert_eq!(entry.quantity.as_deref(), Some("3.000"));
    }

    #[tokio::test]
    async fn small_notional_bumps_quantity_to_floor() {
        let ctx = MockExchange::new(MockState {
            mark: 100.0,
            filters: filters(),
            ..MockState::default()
        });
        let mut p = plan();
        p.quantity = 0.5; // 50 USDT, below the 150 floor
        let outcome = executor(&ctx)
            .place_entry(&p, EntryStyle::RetestLimit, None)
            .await
            .unwrap();
        assert_eq!(outcome.state, LifecycleState::EntryPlaced);
        assert!((outcome.quantity - 1.5).abs() < 1e-9);
        assert_eq!(ctx.created()[0].quantity.as_deref(), Some("1.500"));
    }

    #[tokio::test]
    async fn retest_price_respects_level_and_mark() {
        let f = filters();
        // mark well above entry: rest at the planned entry
        assert_eq!(retest_price(Side::Long, 100.0, Some(99.0), 105.0, f.tick_size), 100.0);
        // mark converging: price chases it but never below level + tick
        let px = retest_price(Side::Long, 100.0, Some(99.98), 100.0, f.tick_size);
        assert!((px - 99.99).abs() < 1e-9);
        // short mirror
        assert_eq!(retest_price(Side::Short, 100.0, Some(101.0), 95.0, f.tick_size), 100.0);
    }

    #[tokio::test]
    async fn stale_entry_is_expired() {
        let mut entry = order(7, OrderType::Limit, false, false);
        entry.update_time = Utc::now() - ChronoDuration::hours(6);
        let ctx = MockExchange::new(MockState {
            open_orders: vec![entry],
            mark: 100.0,
            filters: filters(),
            ..MockState::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let mut day = DayStateStore::open(dir.path().join("day.json"));

        // cancel_after_bars 16 -> TTL at 14 bars = 3.5h; 6h is past it
        let managed = executor(&ctx)
            .manage_open_entries(&plan(), EntryStyle::RetestLimit, 1.0, Some(99.0), &mut day)
            .await
            .unwrap();
        assert!(managed);
        assert_eq!(ctx.cancelled(), vec![7]);
    }

    #[tokio::test]
    async fn drifted_entry_is_cancelled_not_repriced() {
        let mut entry = order(9, OrderType::Limit, false, false);
        entry.price = 100.0;
        entry.reduce_only = false;
        entry.close_position = false;
        let ctx = MockExchange::new(MockState {
            open_orders: vec![entry],
            mark: 103.0, // 3 ATRs away at atr15 = 1.0
            filters: filters(),
            ..MockState::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let mut day = DayStateStore::open(dir.path().join("day.json"));

        let managed = executor(&ctx)
            .manage_open_entries(&plan(), EntryStyle::RetestLimit, 1.0, Some(99.0), &mut day)
            .await
            .unwrap();
        assert!(managed);
        assert_eq!(ctx.cancelled(), vec![9]);
        // cancelled outright, no replacement placed
        assert!(ctx.created().is_empty());
    }

    #[tokio::test]
    async fn reprice_is_bounded() {
        let mut entry = order(11, OrderType::Limit, false, false);
        entry.price = 100.0;
        entry.reduce_only = false;
        entry.close_position = false;
        let ctx = MockExchange::new(MockState {
            open_orders: vec![entry],
            mark: 100.5, // half an ATR: inside the drift band, price moves
            filters: filters(),
            ..MockState::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let mut day = DayStateStore::open(dir.path().join("day.json"));
        day.inc_reprice("ETHUSDT");
        day.inc_reprice("ETHUSDT");

        let managed = executor(&ctx)
            .manage_open_entries(&plan(), EntryStyle::RetestLimit, 1.0, Some(99.0), &mut day)
            .await
            .unwrap();
        assert!(managed);
        // at the reprice cap: order left alone
        assert!(ctx.cancelled().is_empty());
        assert!(ctx.created().is_empty());
    }

    #[tokio::test]
    async fn trailing_promotion_after_first_target_fills() {
        let mut filled_tp = order(20, OrderType::Limit, true, false);
        filled_tp.status = OrderStatus::Filled;
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(1.5)],
            open_orders: vec![
                order(21, OrderType::Limit, true, false),
                order(22, OrderType::StopMarket, false, true),
            ],
            recent: vec![filled_tp],
            mark: 104.5,
            filters: filters(),
            ..MockState::default()
        });

        let promoted = executor(&ctx)
            .maybe_promote_trailing("ETHUSDT", Side::Long, 100.0, 1.5)
            .await
            .unwrap();
        assert!(promoted);
        assert_eq!(ctx.cancelled(), vec![21, 22]);

        let created = ctx.created();
        assert_eq!(created.len(), 1);
        let trail = &created[0];
        assert_eq!(trail.order_type, OrderType::TrailingStopMarket);
        assert!(trail.close_position);
        // 0.6 * (1.5/100) * 100 = 0.9, inside the clamp
        assert_eq!(trail.callback_rate.as_deref(), Some("0.90"));
        // activation = 100 + 0.75
        assert_eq!(trail.activation_price.as_deref(), Some("100.75"));
    }

    #[tokio::test]
    async fn trailing_promotion_waits_for_first_fill() {
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(3.0)],
            open_orders: vec![order(30, OrderType::Limit, true, false)],
            recent: Vec::new(), // nothing filled yet
            mark: 101.0,
            filters: filters(),
            ..MockState::default()
        });
        let promoted = executor(&ctx)
            .maybe_promote_trailing("ETHUSDT", Side::Long, 100.0, 1.5)
            .await
            .unwrap();
        assert!(!promoted);
        assert!(ctx.created().is_empty());
        assert!(ctx.cancelled().is_empty());
    }

    #[tokio::test]
    async fn callback_rate_is_clamped() {
        let ctx = MockExchange::new(MockState {
            positions: vec![long_position(1.5)],
            open_orders: vec![order(41, OrderType::Limit, true, false)],
            history_fails: true, // failure assumes the first target filled
            mark: 104.5,
            filters: filters(),
            ..MockState::default()
        });
        // huge ATR: 0.6 * 10% * 100 = 6.0 -> clamped to 1.2
        let promoted = executor(&ctx)
            .maybe_promote_trailing("ETHUSDT", Side::Long, 100.0, 10.0)
            .await
            .unwrap();
        assert!(promoted);
        assert_eq!(ctx.created()[0].callback_rate.as_deref(), Some("1.20"));
    }

    #[tokio::test]
    async fn flat_symbol_loses_protection() {
        let ctx = MockExchange::new(MockState {
            open_orders: vec![
                order(50, OrderType::StopMarket, false, true),
                order(51, OrderType::Limit, true, false),
                order(52, OrderType::Limit, false, false), // entry, kept
            ],
            filters: filters(),
            mark: 100.0,
            ..MockState::default()
        });
        let cancelled = executor(&ctx)
            .cancel_protection_if_flat("ETHUSDT")
            .await
            .unwrap();
        assert_eq!(cancelled, 2);
        assert_eq!(ctx.cancelled(), vec![50, 51]);
    }

    #[tokio::test]
    async fn cleanup_spares_symbols_with_positions() {
        let mut held_sl = order(60, OrderType::StopMarket, false, true);
        held_sl.symbol = "BTCUSDT".to_string();
        let ctx = MockExchange::new(MockState {
            positions: vec![Position {
                symbol: "BTCUSDT".to_string(),
                position_amt: 0.5,
                entry_price: 60_000.0,
            }],
            open_orders: vec![
                held_sl,
                order(61, OrderType::StopMarket, false, true), // ETHUSDT, flat
            ],
            filters: filters(),
            mark: 100.0,
            ..MockState::default()
        });
        let cancelled = executor(&ctx).cleanup_stale_protection().await.unwrap();
        assert_eq!(cancelled, 1);
        assert_eq!(ctx.cancelled(), vec![61]);
    }
}
