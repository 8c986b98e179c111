pub mod indicators;
pub mod liquidity;
pub mod regime;
pub mod scorer;
pub mod setups;
pub mod trend;

pub use regime::{regime_filter, RegimeResult};
pub use scorer::{build_universe_scores, ScoreDetail, UniverseMeta, UniverseScores};
pub use setups::{scan_symbol, Candidate, ScanParams, TriggerSet};
pub use trend::{trend_filter, TrendResult};
