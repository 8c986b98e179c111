use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a trade plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction.
    #[must_use]
    pub const fn entry_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes a position in this direction.
    #[must_use]
    pub const fn close_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

/// Exchange-level order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Trend direction, including "no edge".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    #[must_use]
    pub const fn as_side(self) -> Option<Side> {
        match self {
            Self::Long => Some(Side::Long),
            Self::Short => Some(Side::Short),
            Self::Flat => None,
        }
    }
}

/// Candle interval supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Interval {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }
}

/// One OHLCV bar. Immutable once fetched; series are ordered by time ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

/// Exchange-imposed quantization rules per symbol. Cached with a freshness
/// window; staleness is tolerated because filters change rarely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFilters {
    pub tick_size: f64,
    pub step_size: f64,
    pub min_qty: f64,
    pub min_notional: f64,
}

impl Default for InstrumentFilters {
    fn default() -> Self {
        Self {
            tick_size: 0.01,
            step_size: 0.001,
            min_qty: 0.0,
            min_notional: 20.0,
        }
    }
}

/// Exchange-side position truth. Never mutated locally; always re-read
/// before acting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed quantity: positive long, negative short.
    pub position_amt: f64,
    pub entry_price: f64,
}

impl Position {
    #[must_use]
    pub fn qty(&self) -> f64 {
        self.position_amt.abs()
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.position_amt == 0.0
    }

    #[must_use]
    pub fn side(&self) -> Option<Side> {
        if self.position_amt > 0.0 {
            Some(Side::Long)
        } else if self.position_amt < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl OrderType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
            Self::Stop => "STOP",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            Self::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }

    /// Order types that act as protection for an open position.
    #[must_use]
    pub const fn is_protective(self) -> bool {
        matches!(
            self,
            Self::Stop
                | Self::StopMarket
                | Self::TakeProfit
                | Self::TakeProfitMarket
                | Self::TrailingStopMarket
        )
    }
}

/// An open (or historical) order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: i64,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub price: f64,
    pub stop_price: f64,
    pub orig_qty: f64,
    pub executed_qty: f64,
    pub reduce_only: bool,
    pub close_position: bool,
    pub status: OrderStatus,
    pub update_time: DateTime<Utc>,
}

impl OpenOrder {
    /// A pending entry order: neither reduce-only nor closePosition.
    #[must_use]
    pub fn is_entry(&self) -> bool {
        !self.reduce_only
            && !self.close_position
            && matches!(self.order_type, OrderType::Stop | OrderType::Limit)
    }

    /// A protective stop/target attached to a position.
    #[must_use]
    pub fn is_protection(&self) -> bool {
        self.order_type.is_protective() && (self.close_position || self.reduce_only)
    }

    /// An active closePosition stop-loss.
    #[must_use]
    pub fn is_stop_loss(&self) -> bool {
        matches!(self.order_type, OrderType::Stop | OrderType::StopMarket) && self.close_position
    }

    /// A reduce-only limit take-profit.
    #[must_use]
    pub fn is_tp_limit(&self) -> bool {
        self.order_type == OrderType::Limit && self.reduce_only
    }

    /// Any form of take-profit: reduce-only limit or closePosition TP.
    #[must_use]
    pub fn is_take_profit(&self) -> bool {
        self.is_tp_limit()
            || (matches!(
                self.order_type,
                OrderType::TakeProfit | OrderType::TakeProfitMarket
            ) && self.close_position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginMode {
    Isolated,
    Crossed,
}

impl MarginMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Isolated => "ISOLATED",
            Self::Crossed => "CROSSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

/// Order request produced by the execution layer. Prices and quantities are
/// pre-quantized strings so the wire value is exactly what was computed.
/// `close_position` and `quantity` are mutually exclusive; the constructors
/// below keep that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<String>,
    pub price: Option<String>,
    pub stop_price: Option<String>,
    pub time_in_force_gtc: bool,
    pub reduce_only: bool,
    pub close_position: bool,
    pub working_type: WorkingType,
    pub price_protect: bool,
    pub callback_rate: Option<String>,
    pub activation_price: Option<String>,
}

impl OrderSpec {
    fn base(symbol: &str, side: OrderSide, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: None,
            price: None,
            stop_price: None,
            time_in_force_gtc: false,
            reduce_only: false,
            close_position: false,
            working_type: WorkingType::MarkPrice,
            price_protect: false,
            callback_rate: None,
            activation_price: None,
        }
    }

    /// Stop-triggered limit entry (GTC, mark-price trigger).
    #[must_use]
    pub fn entry_stop_limit(
        symbol: &str,
        side: OrderSide,
        stop_price: String,
        price: String,
        quantity: String,
    ) -> Self {
        let mut spec = Self::base(symbol, side, OrderType::Stop);
        spec.stop_price = Some(stop_price);
        spec.price = Some(price);
        spec.quantity = Some(quantity);
        spec.time_in_force_gtc = true;
        spec
    }

    /// Plain limit entry (GTC).
    #[must_use]
    pub fn entry_limit(symbol: &str, side: OrderSide, price: String, quantity: String) -> Self {
        let mut spec = Self::base(symbol, side, OrderType::Limit);
        spec.price = Some(price);
        spec.quantity = Some(quantity);
        spec.time_in_force_gtc = true;
        spec
    }

    /// Protective stop-loss closing the whole position at a mark-price trigger.
    #[must_use]
    pub fn stop_market_close(symbol: &str, side: OrderSide, stop_price: String) -> Self {
        let mut spec = Self::base(symbol, side, OrderType::StopMarket);
        spec.stop_price = Some(stop_price);
        spec.close_position = true;
        spec.price_protect = true;
        spec
    }

    /// Reduce-only limit take-profit for a fixed quantity.
    #[must_use]
    pub fn tp_limit_reduce_only(
        symbol: &str,
        side: OrderSide,
        price: String,
        quantity: String,
    ) -> Self {
        let mut spec = Self::base(symbol, side, OrderType::Limit);
        spec.price = Some(price);
        spec.quantity = Some(quantity);
        spec.time_in_force_gtc = true;
        spec.reduce_only = true;
        spec
    }

    /// Take-profit that closes the whole position; used when the remainder
    /// is below the minimum tradable quantity.
    #[must_use]
    pub fn tp_market_close(symbol: &str, side: OrderSide, stop_price: String) -> Self {
        let mut spec = Self::base(symbol, side, OrderType::TakeProfitMarket);
        spec.stop_price = Some(stop_price);
        spec.close_position = true;
        spec.price_protect = true;
        spec
    }

    /// Trailing stop that closes the whole position.
    #[must_use]
    pub fn trailing_stop_close(
        symbol: &str,
        side: OrderSide,
        callback_rate: String,
        activation_price: String,
    ) -> Self {
        let mut spec = Self::base(symbol, side, OrderType::TrailingStopMarket);
        spec.callback_rate = Some(callback_rate);
        spec.activation_price = Some(activation_price);
        spec.close_position = true;
        spec.price_protect = true;
        spec
    }
}

/// Reference to an order accepted by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: i64,
}

/// 24h ticker snapshot used for liquidity ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    pub quote_volume: f64,
    pub last_price: f64,
}

/// A fully sized trade candidate. Created once per scan cycle and consumed
/// exactly once by the execution state machine; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub side: Side,
    pub symbol: String,
    pub entry: f64,
    pub stop: f64,
    pub target1: f64,
    pub target2: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub risk_reward: f64,
}

impl TradePlan {
    #[must_use]
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop).abs()
    }
}
