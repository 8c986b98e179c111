//! Diversification pass over ranked trade plans.

use std::collections::HashMap;

use edgebot_core::types::TradePlan;
use edgebot_signals::indicators::{correlation, simple_returns};
use tracing::debug;

const MAX_ABS_CORRELATION: f64 = 0.8;
const MAX_PER_SEGMENT: usize = 2;
const CORR_WINDOW: usize = 80;

// naive sector heuristic
fn segment_of(symbol: &str) -> &str {
    symbol.get(..3).unwrap_or(symbol)
}

fn return_correlation(a: &[f64], b: &[f64]) -> f64 {
    let ra = simple_returns(&a[a.len().saturating_sub(CORR_WINDOW)..]);
    let rb = simple_returns(&b[b.len().saturating_sub(CORR_WINDOW)..]);
    correlation(&ra, &rb)
}

/// Sorts plans by risk/reward descending, then drops any plan whose recent
/// 1h return correlation with an already-accepted plan exceeds 0.8 in
/// magnitude, and caps accepted plans at 2 per 3-character symbol prefix.
/// If the pass would reject everything, the ranked input is kept as-is.
#[must_use]
pub fn diversify_plans(
    mut plans: Vec<TradePlan>,
    closes: &HashMap<String, Vec<f64>>,
) -> Vec<TradePlan> {
    plans.sort_by(|a, b| {
        b.risk_reward
            .partial_cmp(&a.risk_reward)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut accepted: Vec<TradePlan> = Vec::new();
    let mut segment_count: HashMap<String, usize> = HashMap::new();

    for plan in &plans {
        let correlated = accepted.iter().any(|other| {
            match (closes.get(&plan.symbol), closes.get(&other.symbol)) {
                (Some(a), Some(b)) => return_correlation(a, b).abs() > MAX_ABS_CORRELATION,
                _ => false,
            }
        });
        if correlated {
            debug!(symbol = %plan.symbol, "dropped: correlated with accepted plan");
            continue;
        }
        let seg = segment_of(&plan.symbol).to_string();
        let count = segment_count.entry(seg).or_insert(0);
        if *count >= MAX_PER_SEGMENT {
            debug!(symbol = %plan.symbol, "dropped: segment cap reached");
            continue;
        }
        *count += 1;
        accepted.push(plan.clone());
    }

    if accepted.is_empty() {
        plans
    } else {
        accepted
    }
}
