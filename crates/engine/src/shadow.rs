//! Append-only shadow-scoring log.
//!
//! Every candidate and execution is recorded as one JSON line together
//! with a placeholder model probability, so a real model can later be
//! trained and compared offline. Logging is strictly best-effort; an
//! unwritable log never disturbs the cycle.

use chrono::Utc;
use edgebot_core::config::TradeMode;
use edgebot_core::types::TradePlan;
use edgebot_signals::ScoreDetail;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// Universe-score components reused as the candidate feature vector.
/// Missing details fall back to the neutral 0.5.
#[derive(Debug, Clone, Copy)]
pub struct ShadowFeatures {
    pub liquidity: f64,
    pub momentum: f64,
    pub funding: f64,
    pub correlation: f64,
    pub relative_strength: f64,
}

impl Default for ShadowFeatures {
    fn default() -> Self {
        Self {
            liquidity: 0.5,
            momentum: 0.5,
            funding: 0.5,
            correlation: 0.5,
            relative_strength: 0.5,
        }
    }
}

impl ShadowFeatures {
    #[must_use]
    pub fn from_detail(detail: Option<&ScoreDetail>) -> Self {
        detail.map_or_else(Self::default, |d| Self {
            liquidity: d.liquidity,
            momentum: d.momentum,
            funding: d.funding,
            correlation: d.correlation,
            relative_strength: d.relative_strength,
        })
    }
}

pub struct ShadowLogger {
    path: PathBuf,
}

impl ShadowLogger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Placeholder probability: a weighted sum of the feature vector
    /// clamped to [0, 1]. Stands in for a trained model.
    #[must_use]
    pub fn score(&self, f: &ShadowFeatures) -> f64 {
        let s = 0.25 * f.liquidity
            + 0.20 * f.momentum
            + 0.15 * f.funding
            + 0.15 * f.correlation
            + 0.25 * f.relative_strength;
        s.clamp(0.0, 1.0)
    }

    pub fn log_candidate(&self, plan: &TradePlan, mode: TradeMode, features: &ShadowFeatures) {
        self.append(&json!({
            "ts": Utc::now().to_rfc3339(),
            "symbol": plan.symbol,
            "side": plan.side.as_str(),
            "entry": plan.entry,
            "sl": plan.stop,
            "t1": plan.target1,
            "rr": plan.risk_reward,
            "mode": mode.as_str(),
            "features": {
                "L": features.liquidity,
                "M": features.momentum,
                "F": features.funding,
                "C": features.correlation,
                "RS": features.relative_strength,
            },
            "ai_prob": self.score(features),
            "realized_R": null,
        }));
    }

    /// Post-execution skeleton; `realized_R` stays null until a PnL hook
    /// fills it in.
    pub fn log_post_trade(&self, plan: &TradePlan, mode: TradeMode) {
        self.append(&json!({
            "ts": Utc::now().to_rfc3339(),
            "symbol": plan.symbol,
            "side": plan.side.as_str(),
            "entry": plan.entry,
            "sl": plan.stop,
            "t1": plan.target1,
            "t2": plan.target2,
            "qty": plan.quantity,
            "mode": mode.as_str(),
            "realized_R": null,
            "post_trade": true,
        }));
    }

    fn append(&self, record: &serde_json::Value) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{record}"));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "shadow log append failed");
        }
    }
}
