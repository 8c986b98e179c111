//! Per-day session state: signal throttles, cooldowns, reprice counters,
//! and the accumulated R that feeds the daily circuit breaker.
//!
//! State lives in a single JSON file keyed by UTC date. Loading discards
//! records from a previous day; every mutation rewrites the whole file
//! atomically (temp file + rename). Persistence failures are logged and
//! tolerated; the engine must keep running on exchange-side truth alone.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayState {
    /// UTC date key, `YYYY-MM-DD`.
    pub date: String,
    /// Accumulated P&L for the day, in R units.
    pub net_r: f64,
    pub signals_this_hour: u32,
    pub hour: u32,
    pub cooldown_until: HashMap<String, DateTime<Utc>>,
    pub reprice_count: HashMap<String, u32>,
}

impl DayState {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            date: date_key(now),
            net_r: 0.0,
            signals_this_hour: 0,
            hour: now.hour(),
            cooldown_until: HashMap::new(),
            reprice_count: HashMap::new(),
        }
    }
}

fn date_key(now: DateTime<Utc>) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        now.year(),
        now.month(),
        now.day()
    )
}

/// Owns the day-state file. Single-writer by design: the scan cycle is the
/// only thread mutating it, so atomic whole-file rewrite is all the locking
/// needed.
#[derive(Debug)]
pub struct DayStateStore {
    path: PathBuf,
    state: DayState,
}

impl DayStateStore {
    /// Loads today's state from `path`, starting fresh if the file is
    /// missing, unreadable, or from a previous UTC day.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let now = Utc::now();
        let state = Self::load(&path, now).unwrap_or_else(|| DayState::fresh(now));
        Self { path, state }
    }

    fn load(path: &Path, now: DateTime<Utc>) -> Option<DayState> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<DayState>(&raw) {
            Ok(state) if state.date == date_key(now) => Some(state),
            Ok(_) => None, // previous day; start fresh
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt day state, starting fresh");
                None
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> &DayState {
        &self.state
    }

    /// Atomic whole-file rewrite. Best-effort: failure is logged, not fatal.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!(path = %self.path.display(), error = %e, "failed to persist day state");
        }
    }

    fn try_save(&self) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&self.state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// True until the accumulated day loss reaches the breaker threshold.
    #[must_use]
    pub fn can_trade_today(&self, max_daily_loss_r: f64) -> bool {
        self.state.net_r > -max_daily_loss_r
    }

    pub fn add_r(&mut self, r: f64) {
        self.state.net_r += r;
        self.save();
    }

    fn reset_hour(&mut self) {
        let hour = Utc::now().hour();
        if hour != self.state.hour {
            self.state.hour = hour;
            self.state.signals_this_hour = 0;
            self.save();
        }
    }

    /// Rolls the hour window, then checks the hourly signal cap.
    pub fn can_signal(&mut self, hourly_cap: u32) -> bool {
        self.reset_hour();
        self.state.signals_this_hour < hourly_cap
    }

    pub fn inc_signals(&mut self) {
        self.state.signals_this_hour += 1;
        self.save();
    }

    pub fn set_cooldown(&mut self, symbol: &str, minutes: i64) {
        let until = Utc::now() + Duration::minutes(minutes);
        self.state.cooldown_until.insert(symbol.to_string(), until);
        self.save();
    }

    #[must_use]
    pub fn on_cooldown(&self, symbol: &str) -> bool {
        self.state
            .cooldown_until
            .get(symbol)
            .is_some_and(|until| Utc::now() < *until)
    }

    #[must_use]
    pub fn reprice_count(&self, symbol: &str) -> u32 {
        self.state.reprice_count.get(symbol).copied().unwrap_or(0)
    }

    pub fn inc_reprice(&mut self, symbol: &str) -> u32 {
        let next = self.reprice_count(symbol) + 1;
        self.state.reprice_count.insert(symbol.to_string(), next);
        self.save();
        next
    }

    pub fn reset_reprice(&mut self, symbol: &str) {
        if self.state.reprice_count.remove(symbol).is_some() {
            self.save();
        }
    }
}
