//! Typed wire models for the futures REST API.
//!
//! Binance sends most numbers as JSON strings; `de_str_f64` parses them at
//! the deserialization boundary so everything downstream works in `f64`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use edgebot_core::types::{
    Candle, InstrumentFilters, OpenOrder, OrderSide, OrderStatus, OrderType, Position, Ticker24h,
};

pub(crate) fn de_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

fn de_opt_str_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// One kline row comes back as a positional array:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub(crate) fn parse_kline_row(row: &[Value]) -> Option<Candle> {
    fn num(v: &Value) -> Option<f64> {
        v.as_str()?.parse().ok()
    }
    if row.len() < 7 {
        return None;
    }
    Some(Candle {
        open_time: millis_to_utc(row[0].as_i64()?),
        open: num(&row[1])?,
        high: num(&row[2])?,
        low: num(&row[3])?,
        close: num(&row[4])?,
        volume: num(&row[5])?,
        close_time: millis_to_utc(row[6].as_i64()?),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PremiumIndex {
    #[serde(deserialize_with = "de_str_f64")]
    pub mark_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FundingRateEntry {
    #[serde(deserialize_with = "de_str_f64")]
    pub funding_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTicker24h {
    pub symbol: String,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub quote_volume: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub last_price: Option<f64>,
}

impl From<RawTicker24h> for Ticker24h {
    fn from(t: RawTicker24h) -> Self {
        Self {
            symbol: t.symbol,
            quote_volume: t.quote_volume.unwrap_or(0.0),
            last_price: t.last_price.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Only the filter kinds the engine needs; the rest deserialize with all
/// fields `None` and are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SymbolFilter {
    pub filter_type: String,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub tick_size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub step_size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub min_qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub notional: Option<f64>,
}

impl SymbolInfo {
    pub(crate) fn instrument_filters(&self) -> InstrumentFilters {
        let mut f = InstrumentFilters::default();
        for filter in &self.filters {
            match filter.filter_type.as_str() {
                "PRICE_FILTER" => {
                    if let Some(t) = filter.tick_size {
                        f.tick_size = t;
                    }
                }
                "LOT_SIZE" => {
                    if let Some(s) = filter.step_size {
                        f.step_size = s;
                    }
                    if let Some(q) = filter.min_qty {
                        f.min_qty = q;
                    }
                }
                "MIN_NOTIONAL" => {
                    if let Some(n) = filter.notional {
                        f.min_notional = n;
                    }
                }
                _ => {}
            }
        }
        f
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PositionRisk {
    pub symbol: String,
    #[serde(deserialize_with = "de_str_f64")]
    pub position_amt: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub entry_price: f64,
}

impl From<PositionRisk> for Position {
    fn from(p: PositionRisk) -> Self {
        Self {
            symbol: p.symbol,
            position_amt: p.position_amt,
            entry_price: p.entry_price,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrder {
    pub order_id: i64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub stop_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub orig_qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub executed_qty: Option<f64>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    pub status: OrderStatus,
    #[serde(default)]
    pub update_time: i64,
}

impl From<RawOrder> for OpenOrder {
    fn from(o: RawOrder) -> Self {
        Self {
            order_id: o.order_id,
            symbol: o.symbol,
            order_type: o.order_type,
            side: o.side,
            price: o.price.unwrap_or(0.0),
            stop_price: o.stop_price.unwrap_or(0.0),
            orig_qty: o.orig_qty.unwrap_or(0.0),
            executed_qty: o.executed_qty.unwrap_or(0.0),
            reduce_only: o.reduce_only,
            close_position: o.close_position,
            status: o.status,
            update_time: millis_to_utc(o.update_time),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountInfo {
    #[serde(deserialize_with = "de_str_f64")]
    pub total_margin_balance: f64,
    #[serde(default)]
    pub assets: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssetBalance {
    pub asset: String,
    #[serde(deserialize_with = "de_str_f64")]
    pub wallet_balance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderAck {
    pub order_id: i64,
}

/// Error payload Binance returns alongside a non-2xx status.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kline_row_parses() {
        let row = json!([
            1700000000000i64,
            "61000.10",
            "61500.00",
            "60900.00",
            "61200.50",
            "1234.5",
            1700000899999i64,
            "0",
            100,
            "0",
            "0",
            "0"
        ]);
        let c = parse_kline_row(row.as_array().unwrap()).unwrap();
        assert!((c.open - 61000.10).abs() < 1e-9);
        assert!((c.close - 61200.50).abs() < 1e-9);
        assert!((c.volume - 1234.5).abs() < 1e-9);
        assert!(c.close_time > c.open_time);
    }

    #[test]
    fn malformed_kline_row_is_none() {
        let row = json!([1700000000000i64, "not-a-number"]);
        assert!(parse_kline_row(row.as_array().unwrap()).is_none());
    }

    #[test]
    fn exchange_info_filters_extract() {
        let info: SymbolInfo = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "status": "TRADING",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10", "minPrice": "100"},
                {"filterType": "LOT_SIZE", "stepSize": "0.001", "minQty": "0.001", "maxQty": "100"},
                {"filterType": "MIN_NOTIONAL", "notional": "100"},
                {"filterType": "PERCENT_PRICE", "multiplierUp": "1.1"}
            ]
        }))
        .unwrap();
        let f = info.instrument_filters();
        assert!((f.tick_size - 0.10).abs() < 1e-12);
        assert!((f.step_size - 0.001).abs() < 1e-12);
        assert!((f.min_qty - 0.001).abs() < 1e-12);
        assert!((f.min_notional - 100.0).abs() < 1e-12);
    }

    #[test]
    fn raw_order_maps_into_open_order() {
        let raw: RawOrder = serde_json::from_value(json!({
            "orderId": 42,
            "symbol": "ETHUSDT",
            "type": "STOP_MARKET",
            "side": "SELL",
            "stopPrice": "3000.5",
            "reduceOnly": false,
            "closePosition": true,
            "status": "NEW",
            "updateTime": 1700000000000i64
        }))
        .unwrap();
        let o: OpenOrder = raw.into();
        assert_eq!(o.order_id, 42);
        assert!(o.close_position);
        assert!(o.is_stop_loss());
        assert!((o.stop_price - 3000.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_order_status_tolerated() {
        let raw: RawOrder = serde_json::from_value(json!({
            "orderId": 7,
            "symbol": "ETHUSDT",
            "type": "LIMIT",
            "side": "BUY",
            "price": "3000",
            "status": "SOME_FUTURE_STATUS",
            "updateTime": 0
        }))
        .unwrap();
        assert_eq!(raw.status, OrderStatus::Unknown);
    }
}
