use crate::types::{
    Candle, InstrumentFilters, Interval, MarginMode, OpenOrder, OrderRef, OrderSpec, Position,
    Ticker24h,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// The market-data and account collaborator the engine runs against.
///
/// Implementations are assumed eventually-consistent and occasionally
/// failing; callers treat every method as best-effort and re-read exchange
/// state immediately before acting on it.
#[async_trait]
pub trait ExchangeContext: Send + Sync {
    /// OHLCV candles, ordered by time ascending.
    async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>>;

    /// Open positions; `None` returns all symbols.
    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>>;

    /// Open orders; `None` returns all symbols.
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>>;

    /// Current status of one order.
    async fn order_status(&self, symbol: &str, order_id: i64) -> Result<OpenOrder>;

    /// Most recent orders for a symbol, including filled and cancelled ones.
    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<OpenOrder>>;

    /// Tick/step/minimum filters for a symbol. Implementations cache the
    /// underlying exchange info for ~300s.
    async fn instrument_filters(&self, symbol: &str) -> Result<InstrumentFilters>;

    /// Whether a symbol exists and is currently tradable.
    async fn symbol_tradable(&self, symbol: &str) -> Result<bool>;

    /// Account equity in quote currency.
    async fn equity(&self) -> Result<f64>;

    /// Available balance per asset.
    async fn balances(&self) -> Result<HashMap<String, f64>>;

    /// Recent funding rates, oldest first.
    async fn funding_rates(&self, symbol: &str, limit: usize) -> Result<Vec<f64>>;

    /// Mark price used for trigger evaluation.
    async fn mark_price(&self, symbol: &str) -> Result<f64>;

    /// 24h tickers for the whole market.
    async fn day_tickers(&self) -> Result<Vec<Ticker24h>>;

    /// Places an order. Exchange rejection surfaces as `Err`; callers record
    /// it per order rather than failing the cycle.
    async fn create_order(&self, spec: &OrderSpec) -> Result<OrderRef>;

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<()>;

    async fn set_multi_assets_margin(&self, enabled: bool) -> Result<()>;
}
