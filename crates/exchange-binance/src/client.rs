//! Signed REST client for Binance USDⓈ-M futures.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;

use edgebot_core::traits::ExchangeContext;
use edgebot_core::types::{
    Candle, InstrumentFilters, Interval, MarginMode, OpenOrder, OrderRef, OrderSpec, Position,
    Ticker24h,
};

use crate::error::{self, BinanceError};
use crate::models::{
    parse_kline_row, AccountInfo, ApiErrorBody, ExchangeInfo, FundingRateEntry, OrderAck,
    PositionRisk, PremiumIndex, RawOrder, RawTicker24h,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const RECV_WINDOW_MS: u32 = 5_000;
const EXCHANGE_INFO_TTL: Duration = Duration::from_secs(300);

struct InfoCache {
    fetched_at: Instant,
    // symbol -> (filters, tradable)
    symbols: HashMap<String, (InstrumentFilters, bool)>,
}

pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
    info_cache: RwLock<Option<InfoCache>>,
}

impl BinanceClient {
    #[must_use]
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self::with_base_url(api_key, api_secret, DEFAULT_BASE_URL.to_string())
    }

    #[must_use]
    pub fn with_base_url(api_key: String, api_secret: String, base_url: String) -> Self {
        // 1200 weight per minute, keep comfortably under it
        let quota = Quota::per_second(NonZeroU32::new(20).unwrap());
        Self {
            http: Client::new(),
            base_url,
            api_key,
            api_secret,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            info_cache: RwLock::new(None),
        }
    }

    fn sign(&self, query: &str) -> error::Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BinanceError::Auth(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encode_query(params: &[(String, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> error::Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => Err(BinanceError::api(err.code, err.msg)),
                Err(_) => Err(BinanceError::api(i64::from(status.as_u16()), body)),
            };
        }
        serde_json::from_str(&body).map_err(BinanceError::from)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> error::Result<T> {
        self.rate_limiter.until_ready().await;
        let mut url = format!("{}{}", self.base_url, path);
        if !params.is_empty() {
            url = format!("{url}?{}", Self::encode_query(params));
        }
        let response = self.http.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> error::Result<T> {
        self.rate_limiter.until_ready().await;
        params.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));
        params.push(("timestamp".to_string(), Utc::now().timestamp_millis().to_string()));
        let query = Self::encode_query(&params);
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn refresh_exchange_info(&self) -> error::Result<()> {
        {
            let cache = self.info_cache.read().await;
            if let Some(c) = cache.as_ref() {
                if c.fetched_at.elapsed() < EXCHANGE_INFO_TTL {
                    return Ok(());
                }
            }
        }
        let info: ExchangeInfo = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let symbols = info
            .symbols
            .iter()
            .map(|s| {
                (
                    s.symbol.clone(),
                    (s.instrument_filters(), s.status == "TRADING"),
                )
            })
            .collect();
        let mut cache = self.info_cache.write().await;
        *cache = Some(InfoCache {
            fetched_at: Instant::now(),
            symbols,
        });
        debug!("exchange info refreshed");
        Ok(())
    }

    async fn symbol_entry(&self, symbol: &str) -> error::Result<Option<(InstrumentFilters, bool)>> {
        self.refresh_exchange_info().await?;
        let cache = self.info_cache.read().await;
        Ok(cache
            .as_ref()
            .and_then(|c| c.symbols.get(symbol).cloned()))
    }

    fn order_params(spec: &OrderSpec) -> Vec<(String, String)> {
        let mut params = vec![
            ("symbol".to_string(), spec.symbol.clone()),
            ("side".to_string(), spec.side.as_str().to_string()),
            ("type".to_string(), spec.order_type.as_str().to_string()),
        ];
        if let Some(q) = &spec.quantity {
            params.push(("quantity".to_string(), q.clone()));
        }
        if let Some(p) = &spec.price {
            params.push(("price".to_string(), p.clone()));
        }
        if let Some(sp) = &spec.stop_price {
            params.push(("stopPrice".to_string(), sp.clone()));
        }
        if spec.time_in_force_gtc {
            params.push(("timeInForce".to_string(), "GTC".to_string()));
        }
        if spec.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        if spec.close_position {
            params.push(("closePosition".to_string(), "true".to_string()));
        }
        params.push((
            "workingType".to_string(),
            match spec.working_type {
                edgebot_core::types::WorkingType::MarkPrice => "MARK_PRICE".to_string(),
                edgebot_core::types::WorkingType::ContractPrice => "CONTRACT_PRICE".to_string(),
            },
        ));
        if spec.price_protect {
            params.push(("priceProtect".to_string(), "TRUE".to_string()));
        }
        if let Some(cb) = &spec.callback_rate {
            params.push(("callbackRate".to_string(), cb.clone()));
        }
        if let Some(ap) = &spec.activation_price {
            params.push(("activationPrice".to_string(), ap.clone()));
        }
        params
    }
}

#[async_trait]
impl ExchangeContext for BinanceClient {
    async fn candles(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/fapi/v1/klines",
                &[
                    ("symbol".to_string(), symbol.to_string()),
                    ("interval".to_string(), interval.as_str().to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| parse_kline_row(r)).collect())
    }

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        let mut params = Vec::new();
        if let Some(s) = symbol {
            params.push(("symbol".to_string(), s.to_string()));
        }
        let raw: Vec<PositionRisk> = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", params)
            .await?;
        Ok(raw
            .into_iter()
            .filter(|p| p.position_amt != 0.0)
            .map(Position::from)
            .collect())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
        let mut params = Vec::new();
        if let Some(s) = symbol {
            params.push(("symbol".to_string(), s.to_string()));
        }
        let raw: Vec<RawOrder> = self
            .signed_request(Method::GET, "/fapi/v1/openOrders", params)
            .await?;
        Ok(raw.into_iter().map(OpenOrder::from).collect())
    }

    async fn order_status(&self, symbol: &str, order_id: i64) -> Result<OpenOrder> {
        let raw: RawOrder = self
            .signed_request(
                Method::GET,
                "/fapi/v1/order",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("orderId".to_string(), order_id.to_string()),
                ],
            )
            .await?;
        Ok(raw.into())
    }

    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<OpenOrder>> {
        let raw: Vec<RawOrder> = self
            .signed_request(
                Method::GET,
                "/fapi/v1/allOrders",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        Ok(raw.into_iter().map(OpenOrder::from).collect())
    }

    async fn instrument_filters(&self, symbol: &str) -> Result<InstrumentFilters> {
        match self.symbol_entry(symbol).await? {
            Some((filters, _)) => Ok(filters),
            None => anyhow::bail!("unknown symbol {symbol}"),
        }
    }

    async fn symbol_tradable(&self, symbol: &str) -> Result<bool> {
        Ok(self
            .symbol_entry(symbol)
            .await?
            .is_some_and(|(_, tradable)| tradable))
    }

    async fn equity(&self) -> Result<f64> {
        let account: AccountInfo = self
            .signed_request(Method::GET, "/fapi/v2/account", Vec::new())
            .await?;
        Ok(account.total_margin_balance)
    }

    async fn balances(&self) -> Result<HashMap<String, f64>> {
        let account: AccountInfo = self
            .signed_request(Method::GET, "/fapi/v2/account", Vec::new())
            .await?;
        Ok(account
            .assets
            .into_iter()
            .map(|a| (a.asset, a.wallet_balance))
            .collect())
    }

    async fn funding_rates(&self, symbol: &str, limit: usize) -> Result<Vec<f64>> {
        let raw: Vec<FundingRateEntry> = self
            .public_get(
                "/fapi/v1/fundingRate",
                &[
                    ("symbol".to_string(), symbol.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await?;
        Ok(raw.into_iter().map(|e| e.funding_rate).collect())
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let premium: PremiumIndex = self
            .public_get(
                "/fapi/v1/premiumIndex",
                &[("symbol".to_string(), symbol.to_string())],
            )
            .await?;
        Ok(premium.mark_price)
    }

    async fn day_tickers(&self) -> Result<Vec<Ticker24h>> {
        let raw: Vec<RawTicker24h> = self.public_get("/fapi/v1/ticker/24hr", &[]).await?;
        Ok(raw.into_iter().map(Ticker24h::from).collect())
    }

    async fn create_order(&self, spec: &OrderSpec) -> Result<OrderRef> {
        let ack: OrderAck = self
            .signed_request(Method::POST, "/fapi/v1/order", Self::order_params(spec))
            .await?;
        debug!(symbol = %spec.symbol, order_id = ack.order_id, "order placed");
        Ok(OrderRef {
            order_id: ack.order_id,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::DELETE,
                "/fapi/v1/order",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("orderId".to_string(), order_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("leverage".to_string(), leverage.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<()> {
        let result: error::Result<serde_json::Value> = self
            .signed_request(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("marginType".to_string(), mode.as_str().to_string()),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // -4046: margin type is already what was requested
            Err(BinanceError::Api { code: -4046, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_multi_assets_margin(&self, enabled: bool) -> Result<()> {
        let result: error::Result<serde_json::Value> = self
            .signed_request(
                Method::POST,
                "/fapi/v1/multiAssetsMargin",
                vec![(
                    "multiAssetsMargin".to_string(),
                    if enabled { "true" } else { "false" }.to_string(),
                )],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // -4171: already in the requested mode
            Err(BinanceError::Api { code: -4171, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
