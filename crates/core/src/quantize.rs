//! Tick/step quantization for exchange-bound prices and quantities.
//!
//! Rounding runs through `rust_decimal` so the result is an exact multiple
//! of the step and quantizing twice equals quantizing once.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    Down,
    Up,
}

/// Rounds `value` to a multiple of `step`. A non-positive or non-finite
/// step returns the value unchanged.
#[must_use]
pub fn round_step(value: f64, step: f64, mode: RoundMode) -> f64 {
    if step <= 0.0 || !step.is_finite() || !value.is_finite() {
        return value;
    }
    let (Some(v), Some(s)) = (Decimal::from_f64(value), Decimal::from_f64(step)) else {
        return value;
    };
    let q = match mode {
        RoundMode::Down => (v / s).floor(),
        RoundMode::Up => (v / s).ceil(),
    };
    (q * s).to_f64().unwrap_or(value)
}

/// Number of decimal places implied by a step size (0.001 -> 3).
#[must_use]
pub fn decimals_from_step(step: f64) -> u32 {
    Decimal::from_f64(step).map_or(0, |d| d.normalize().scale())
}

/// Rounds to the step and formats with exactly the step's decimal places,
/// the way the exchange expects wire values.
#[must_use]
pub fn format_by_step(value: f64, step: f64, mode: RoundMode) -> String {
    let rounded = round_step(value, step, mode);
    let decimals = decimals_from_step(step);
    let mut d = Decimal::from_f64(rounded).unwrap_or_default();
    d.rescale(decimals);
    d.to_string()
}
