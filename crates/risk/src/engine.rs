//! Sizing, leverage, and the daily circuit breaker.

use edgebot_core::config::{AppConfig, RiskConfig, TradeMode};
use tracing::debug;

/// Per-cycle risk state: equity snapshot, accumulated day P&L in R units,
/// and the consecutive-loss counter.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    pub equity: f64,
    pub day_r_pnl: f64,
    pub losing_streak: u32,
    r_per_trade: f64,
    max_daily_loss_r: f64,
}

impl RiskEngine {
    #[must_use]
    pub fn new(cfg: &RiskConfig, equity: f64) -> Self {
        Self {
            equity,
            day_r_pnl: 0.0,
            losing_streak: 0,
            r_per_trade: cfg.r_per_trade,
            max_daily_loss_r: cfg.max_daily_loss_r,
        }
    }

    /// Replaces the base risk fraction with a dynamically computed one.
    pub fn set_r_per_trade(&mut self, r: f64) {
        self.r_per_trade = r;
    }

    #[must_use]
    pub fn can_trade_today(&self) -> bool {
        self.day_r_pnl > -self.max_daily_loss_r
    }

    /// Quantity risking `equity * r` dollars over the stop distance.
    /// A losing streak of 3 or more halves the fraction.
    #[must_use]
    pub fn position_size(&self, stop_distance: f64) -> f64 {
        if stop_distance <= 0.0 {
            return 0.0;
        }
        let mut r = self.r_per_trade;
        if self.losing_streak >= 3 {
            r *= 0.5;
        }
        (self.equity * r / stop_distance).max(0.0)
    }

    pub fn on_trade_result(&mut self, r_result: f64) {
        self.day_r_pnl += r_result;
        if r_result < 0.0 {
            self.losing_streak += 1;
        } else {
            self.losing_streak = 0;
        }
    }
}

/// Equity-scaled risk fraction: `base_r * sqrt(equity / 10_000)`, clamped to
/// [0.003, 0.010] with the ceiling tightened to 0.008 when ATR% exceeds 7%,
/// then capped by any news-supplied ceiling and the global maximum.
#[must_use]
pub fn dynamic_r_per_trade(
    cfg: &AppConfig,
    mode: TradeMode,
    equity: f64,
    atr_percent: f64,
    news_r_cap: Option<f64>,
) -> f64 {
    let base_r = cfg.mode(mode).r_per_trade.unwrap_or(cfg.risk.r_per_trade);
    let eq = equity.max(1.0);
    let mut r = base_r * (eq / 10_000.0).sqrt();

    let ceiling = if atr_percent > 0.07 { 0.008 } else { 0.010 };
    r = r.clamp(0.003, ceiling);
    if let Some(cap) = news_r_cap {
        r = r.min(cap);
    }
    let r = r.min(cfg.risk.max_r_per_trade).max(0.0);
    debug!(r, equity, atr_percent, "dynamic r per trade");
    r
}

/// Leverage from the stop-tightness/reward table, bounded [5, 20].
#[must_use]
pub fn dynamic_leverage(stop_distance: f64, entry: f64, rr: f64) -> u32 {
    let stop_pct = stop_distance.abs() / entry.max(1e-9);
    let lev = if stop_pct <= 0.005 && rr >= 1.5 {
        20
    } else if stop_pct <= 0.008 && rr >= 1.2 {
        15
    } else if stop_pct <= 0.012 {
        10
    } else {
        5
    };
    lev.clamp(5, 20)
}

/// Volatility-adjusted notional leverage ceiling: calm markets allow up to 3,
/// violent ones only 2, both bounded by the configured base cap.
#[must_use]
pub fn dynamic_leverage_cap(atr_percent: f64, base_cap: f64) -> f64 {
    if atr_percent.is_nan() {
        return base_cap;
    }
    if atr_percent <= 0.03 {
        base_cap.min(3.0)
    } else if atr_percent >= 0.07 {
        base_cap.min(2.0)
    } else {
        base_cap
    }
}

/// Scales quantity down so implied leverage `entry*qty/equity` never exceeds
/// the cap; returns the adjusted quantity and the implied leverage.
#[must_use]
pub fn apply_leverage_cap(entry: f64, qty: f64, equity: f64, lev_cap: f64) -> (f64, f64) {
    let implied = if equity > 0.0 { entry * qty / equity } else { 0.0 };
    if implied > lev_cap && implied > 0.0 {
        let qty = qty * lev_cap / implied;
        let implied = if equity > 0.0 { entry * qty / equity } else { 0.0 };
        (qty, implied)
    } else {
        (qty, implied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgebot_core::config::AppConfig;

    #[test]
    fn base_sizing_scenario() {
        // equity 10k, r 0.003 -> $30 at risk, $50 stop -> 0.6 units
        let engine = RiskEngine::new(&RiskConfig::default(), 10_000.0);
        assert!((engine.position_size(50.0) - 0.6).abs() < 1e-9);
        assert_eq!(engine.position_size(0.0), 0.0);
    }

    #[test]
    fn losing_streak_halves_risk() {
        let mut engine = RiskEngine::new(&RiskConfig::default(), 10_000.0);
        for _ in 0..3 {
            engine.on_trade_result(-1.0);
        }
        assert!((engine.position_size(50.0) - 0.3).abs() < 1e-9);
        // a single win resets the streak
        engine.on_trade_result(0.5);
        assert!((engine.position_size(50.0) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn daily_breaker_trips_at_threshold() {
        let mut engine = RiskEngine::new(&RiskConfig::default(), 10_000.0);
        engine.on_trade_result(-1.5);
        assert!(engine.can_trade_today());
        engine.on_trade_result(-0.6);
        assert!(!engine.can_trade_today());
    }

    #[test]
    fn dynamic_r_scales_with_equity() {
        let cfg = AppConfig::default();
        // at 10k the sqrt scale is 1 and the floor holds
        let r = dynamic_r_per_trade(&cfg, TradeMode::Strict, 10_000.0, 0.03, None);
        assert!((r - 0.003).abs() < 1e-12);
        // at 90k the scale is 3 -> 0.009, inside [0.003, 0.010]
        let r = dynamic_r_per_trade(&cfg, TradeMode::Strict, 90_000.0, 0.03, None);
        assert!((r - 0.009).abs() < 1e-12);
        // hot markets tighten the ceiling to 0.008
        let r = dynamic_r_per_trade(&cfg, TradeMode::Strict, 1_000_000.0, 0.08, None);
        assert!((r - 0.008).abs() < 1e-12);
        // news cap wins when lower
        let r = dynamic_r_per_trade(&cfg, TradeMode::Strict, 90_000.0, 0.03, Some(0.0025));
        assert!((r - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn leverage_table_rows() {
        assert_eq!(dynamic_leverage(0.4, 100.0, 2.0), 20); // 0.4% stop, rr 2
        assert_eq!(dynamic_leverage(0.7, 100.0, 1.3), 15);
        assert_eq!(dynamic_leverage(1.0, 100.0, 0.8), 10);
        assert_eq!(dynamic_leverage(2.0, 100.0, 3.0), 5);
        // tight stop but poor reward drops through the table
        assert_eq!(dynamic_leverage(0.4, 100.0, 0.5), 10);
    }

    #[test]
    fn volatility_caps_leverage() {
        assert_eq!(dynamic_leverage_cap(0.02, 5.0), 3.0);
        assert_eq!(dynamic_leverage_cap(0.10, 5.0), 2.0);
        assert_eq!(dynamic_leverage_cap(0.05, 5.0), 5.0);
        assert_eq!(dynamic_leverage_cap(f64::NAN, 5.0), 5.0);
    }

    #[test]
    fn leverage_cap_bounds_notional() {
        // 100 * 500 / 10k = implied 5x, capped to 2x
        let (qty, implied) = apply_leverage_cap(100.0, 500.0, 10_000.0, 2.0);
        assert!((qty - 200.0).abs() < 1e-9);
        assert!(implied <= 2.0 + 1e-12);
        // under the cap nothing changes
        let (qty, implied) = apply_leverage_cap(100.0, 100.0, 10_000.0, 2.0);
        assert!((qty - 100.0).abs() < 1e-9);
        assert!((implied - 1.0).abs() < 1e-9);
        // zero equity degrades to zero implied leverage
        let (_, implied) = apply_leverage_cap(100.0, 100.0, 0.0, 2.0);
        assert_eq!(implied, 0.0);
    }
}
