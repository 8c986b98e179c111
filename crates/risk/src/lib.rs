pub mod diversify;
pub mod engine;

pub use diversify::diversify_plans;
pub use engine::{
    apply_leverage_cap, dynamic_leverage, dynamic_leverage_cap, dynamic_r_per_trade, RiskEngine,
};
