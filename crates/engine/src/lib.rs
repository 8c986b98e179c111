//! Scan-cycle orchestration: regime and trend gating, universe scoring,
//! candidate sizing, and the execute path, plus the news context and the
//! shadow-scoring log.

pub mod cycle;
pub mod news;
pub mod shadow;

pub use cycle::{run_cycle, CycleOptions, CycleReport, DirectionChoice, TrendFallback};
pub use news::{resolve_news_context, score_impact, NewsContext, NewsImpact, NewsMode};
pub use shadow::{ShadowFeatures, ShadowLogger};
