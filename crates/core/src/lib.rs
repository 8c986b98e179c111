pub mod config;
pub mod config_loader;
pub mod quantize;
pub mod session;
pub mod traits;
pub mod types;

pub use config::{AppConfig, TradeMode};
pub use traits::ExchangeContext;
pub use types::{Candle, Direction, InstrumentFilters, Interval, Position, Side, TradePlan};
