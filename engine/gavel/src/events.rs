// engine/gavel/src/events.rs
//
// Canonical outbound event set. Every event the engine emits is one of
// these bodies, wrapped by the sequencer with a sequence number and the
// timestamp of the command that caused it.

use crate::{Notional, OrderId, Price, Qty, Side, TradeId, TraderId};
use serde::{Deserialize, Serialize};

/// Terminal rejection reasons. Closed set; the wire names are the
/// snake_case form of the variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidMessage,
    ExchangeHalted,
    InvalidPriceReference,
    OrderSizeCap,
    NotionalCap,
    RateLimited,
    InitialMarginInsufficient,
    NoLiquidity,
    FillOrKillUnfillable,
    UnknownOrder,
    AccountFrozen,
    /// Informational only; a skipped resting order is not a terminal state.
    SelfMatchSkipped,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationReason {
    MaintenanceMarginBreach,
    LiquidityExhausted,
}

/// Structured context attached to rejections. Only populated fields are
/// serialized, so most rejections carry a bare `reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RejectDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equity: Option<Notional>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_margin: Option<Notional>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl RejectDetails {
    pub fn message(text: impl Into<String>) -> Self {
        RejectDetails { message: Some(text.into()), ..Default::default() }
    }
}

/// One price level of a depth snapshot: `[price, total_qty]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel(pub Price, pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    OrderAccepted {
        order_id: OrderId,
        trader_id: TraderId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_order_id: Option<String>,
    },
    OrderRejected {
        reason: RejectReason,
        #[serde(default)]
        details: RejectDetails,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trader_id: Option<TraderId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_order_id: Option<String>,
    },
    OrderCancelled {
        order_id: OrderId,
        trader_id: TraderId,
    },
    CancelRejected {
        reason: RejectReason,
        order_id: OrderId,
        trader_id: TraderId,
    },
    Trade {
        trade_id: TradeId,
        price: Price,
        qty: Qty,
        buy_trader_id: TraderId,
        sell_trader_id: TraderId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
    },
    BookUpdate {
        best_bid: Option<Price>,
        best_ask: Option<Price>,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    },
    PositionUpdate {
        trader_id: TraderId,
        position: i64,
        cash: Notional,
        avg_entry_price: Price,
        realized_pnl: Notional,
        unrealized_pnl: Notional,
        total_equity: Notional,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mark_price: Option<Price>,
    },
    Liquidation {
        trader_id: TraderId,
        reason: LiquidationReason,
        qty: Qty,
        side: Side,
    },
    EngineFault {
        invariant: String,
        details: String,
    },
}

/// An event as subscribers see it: body plus the sequencer's stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    pub timestamp_ns: u64,
    #[serde(flatten)]
    pub body: EventBody,
}
