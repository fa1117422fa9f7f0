//! Risk engine: every order passes through [`RiskGate::pre_trade`] before
//! it may touch the book, and every trader whose position changed is
//! checked against maintenance margin afterwards. The gate mutates nothing
//! except the admitted order's rate-limit token.

mod config;
mod gate;
mod margin;
mod rate_limit;

pub use config::{MarginMode, RiskConfig, RiskConfigError};
pub use gate::{OrderCheck, Rejection, RiskGate};
pub use margin::{initial_margin_required, maintenance_breached, maintenance_margin_required};
pub use rate_limit::TokenBucket;
