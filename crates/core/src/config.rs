use serde::{Deserialize, Serialize};

/// Scan/trade mode. Strict demands more confluence; relaxed trades smaller
/// and throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Strict,
    Relaxed,
}

impl TradeMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub risk: RiskConfig,
    pub stops: StopConfig,
    pub take_profits: TakeProfitConfig,
    pub entry: EntryConfig,
    pub trend: TrendConfig,
    pub regime: RegimeConfig,
    pub modes: ModesConfig,
}

impl AppConfig {
    #[must_use]
    pub fn mode(&self, mode: TradeMode) -> &ModeConfig {
        match mode {
            TradeMode::Strict => &self.modes.strict,
            TradeMode::Relaxed => &self.modes.relaxed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Reference instrument base asset; the traded pair is base + quote.
    pub base_asset: String,
    /// Preferred quote asset; may be switched to USDC by balance detection.
    pub quote: String,
    /// Final universe size after score truncation.
    pub universe_top_n: usize,
    /// How many symbols (by 24h volume) enter scoring at all.
    pub scored_top_n: usize,
    /// Liquidity rank cutoff for deep scoring; below it only the cheap
    /// liquidity score is computed.
    pub deep_liq_top_n: usize,
    /// 24h quote-volume floor for deep-scored symbols; 0 disables.
    pub min_24h_volume_usd: f64,
    /// ATR% floor below which a symbol is skipped entirely; 0 disables.
    pub min_coin_atr_percent: f64,
    /// Equity assumed when the account query fails in dry runs.
    pub demo_equity: f64,
    pub day_state_path: String,
    pub shadow_log_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_asset: "BTC".to_string(),
            quote: "USDT".to_string(),
            universe_top_n: 5,
            scored_top_n: 300,
            deep_liq_top_n: 120,
            min_24h_volume_usd: 0.0,
            min_coin_atr_percent: 0.0,
            demo_equity: 10_000.0,
            day_state_path: "day_state.json".to_string(),
            shadow_log_path: "shadow_log.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Base risk fraction of equity per trade.
    pub r_per_trade: f64,
    /// Hard ceiling on the dynamic risk fraction.
    pub max_r_per_trade: f64,
    /// Daily circuit breaker, in R units.
    pub max_daily_loss_r: f64,
    /// Base notional leverage cap (before the volatility adjustment).
    pub leverage_cap: f64,
    /// Static minimum order notional in USD.
    pub min_notional_floor_usd: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            r_per_trade: 0.003,
            max_r_per_trade: 0.010,
            max_daily_loss_r: 2.0,
            leverage_cap: 3.0,
            min_notional_floor_usd: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Lower bound of the stop distance, in ATR multiples.
    pub min_atr_mult: f64,
    /// Upper bound of the stop distance, in ATR multiples.
    pub max_atr_mult: f64,
    /// Buffer beyond the structural level, in ATR multiples.
    pub buffer_atr_mult: f64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            min_atr_mult: 0.5,
            max_atr_mult: 2.5,
            buffer_atr_mult: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    /// Minimum risk/reward to the first target in strict mode.
    pub t1_rr: f64,
    /// Minimum distance of T1 from entry, in ATR multiples.
    pub min_t1_atr_mult: f64,
    /// Minimum distance of T2 from T1, in ATR multiples.
    pub min_t2_atr_mult: f64,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            t1_rr: 1.0,
            min_t1_atr_mult: 0.6,
            min_t2_atr_mult: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Minimum wick-to-range ratio for sweep triggers.
    pub wick_min_ratio: f64,
    /// Volume spike threshold, in standard deviations above the mean.
    pub volume_spike_sigma: f64,
    /// Entry order time-to-live, in 15m bar equivalents.
    pub cancel_after_bars: u32,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            wick_min_ratio: 0.35,
            volume_spike_sigma: 1.6,
            cancel_after_bars: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// DMI/ADX averaging period.
    pub adx_period: usize,
    /// ADX floor for accepting a 4h direction.
    pub adx_min: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            adx_period: 14,
            adx_min: 14.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub adx_min: f64,
    pub atrp_min: f64,
    pub atrp_max: f64,
    pub funding_abs_max: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            adx_min: 18.0,
            atrp_min: 0.02,
            atrp_max: 0.08,
            funding_abs_max: 0.0015,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub strict: ModeConfig,
    pub relaxed: ModeConfig,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            strict: ModeConfig::default(),
            relaxed: ModeConfig::relaxed_defaults(),
        }
    }
}

/// Per-mode thresholds. The relaxed defaults (rr floor 0.65, score floor
/// 0.48) are empirically tuned values carried as configuration, not law.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub wick_min: f64,
    pub volume_spike_sigma: f64,
    pub min_score: f64,
    pub min_rr: f64,
    pub hourly_signal_cap: u32,
    pub same_coin_cooldown_min: i64,
    pub max_open: usize,
    pub enable_vwap_trigger: bool,
    /// Relative-strength level at which a coin may trade against the
    /// reference direction in strict mode.
    pub ignore_trend_if_rs: f64,
    /// Optional per-mode override of the base risk fraction.
    pub r_per_trade: Option<f64>,
}

impl Default for ModeConfig {
    fn default() -> Self {
        // Strict defaults; the relaxed profile is provided by `ModesConfig`
        // consumers via config files or `relaxed_defaults`.
        Self {
            wick_min: 0.35,
            volume_spike_sigma: 1.6,
            min_score: 0.65,
            min_rr: 1.0,
            hourly_signal_cap: 6,
            same_coin_cooldown_min: 60,
            max_open: 3,
            enable_vwap_trigger: false,
            ignore_trend_if_rs: 0.8,
            r_per_trade: None,
        }
    }
}

impl ModeConfig {
    /// Built-in relaxed profile used when the config file does not override it.
    #[must_use]
    pub fn relaxed_defaults() -> Self {
        Self {
            wick_min: 0.25,
            volume_spike_sigma: 1.0,
            min_score: 0.48,
            min_rr: 0.65,
            hourly_signal_cap: 3,
            same_coin_cooldown_min: 45,
            max_open: 2,
            enable_vwap_trigger: true,
            ignore_trend_if_rs: 0.8,
            r_per_trade: Some(0.003),
        }
    }
}
