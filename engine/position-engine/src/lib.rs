//! Position engine: applies both legs of every fill and keeps per-trader
//! position, cash, weighted average entry, and realized PnL. Unrealized
//! PnL and equity are derived on demand from a mark price and never stored.

mod account;

pub use account::{AccountingFault, PositionEngine, PositionSnapshot, TraderAccount};
