use gavel::{Notional, Qty, SCALE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    Disabled,
    InitialOnly,
    #[default]
    InitialAndMaintenance,
}

/// Risk limits, fixed at session start. Rates are 10^8-scaled fractions
/// (`5_000_000` is 5%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Smallest price increment, in raw fixed-point units.
    pub tick_size: i64,
    /// Limit prices must sit within this fraction of the last trade.
    pub price_collar_pct: i64,
    /// Hard per-order quantity cap.
    pub max_order_qty: Qty,
    /// Per-order notional cap for limit orders, raw fixed-point units.
    pub max_order_notional: i128,
    /// Token bucket refill rate, orders per second.
    pub rate_limit_tokens_per_sec: u32,
    /// Token bucket burst capacity.
    pub rate_limit_burst: u32,
    /// Cash handed to each account on first touch.
    pub starting_capital: Notional,
    pub margin_mode: MarginMode,
    pub initial_margin_rate: i64,
    pub maintenance_margin_rate: i64,
    /// Liquidation attempts per trader per command, and the number of
    /// consecutive breached scans tolerated before the account freezes.
    pub liquidation_max_attempts: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            tick_size: 1,
            price_collar_pct: SCALE / 20, // 5%
            max_order_qty: 10_000,
            max_order_notional: 1_000_000_000_000,
            rate_limit_tokens_per_sec: 1_000,
            rate_limit_burst: 1_000,
            starting_capital: Notional::from_units(10_000),
            margin_mode: MarginMode::default(),
            initial_margin_rate: SCALE / 5,      // 20%
            maintenance_margin_rate: SCALE / 10, // 10%
            liquidation_max_attempts: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RiskConfigError {
    #[error("tick size must be positive")]
    TickSize,
    #[error("max order quantity must be positive")]
    MaxQty,
    #[error("rate limit burst must be positive")]
    Burst,
    #[error("margin rates must be positive and initial >= maintenance")]
    MarginRates,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        if self.tick_size <= 0 {
            return Err(RiskConfigError::TickSize);
        }
        if self.max_order_qty == 0 {
            return Err(RiskConfigError::MaxQty);
        }
        if self.rate_limit_burst == 0 {
            return Err(RiskConfigError::Burst);
        }
        if self.margin_mode != MarginMode::Disabled
            && (self.initial_margin_rate <= 0
                || self.maintenance_margin_rate <= 0
                || self.initial_margin_rate < self.maintenance_margin_rate)
        {
            return Err(RiskConfigError::MarginRates);
        }
        Ok(())
    }
}
