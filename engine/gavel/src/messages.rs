// Inbound command set. One tagged document per command, framed by the
// transport as a single line of JSON.

use crate::{ArrivalSeq, OrderId, OrderKind, Price, Qty, Side, TimeInForce, TraderId, TsNs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMsg {
    SubmitOrder {
        trader_id: TraderId,
        side: Side,
        kind: OrderKind,
        qty: Qty,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price: Option<Price>,
        #[serde(default)]
        tif: TimeInForce,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_order_id: Option<String>,
    },
    CancelOrder {
        trader_id: TraderId,
        order_id: OrderId,
    },
    /// Synthetic command injected by the transport on client disconnect.
    CancelAll {
        trader_id: TraderId,
    },
    AdminHalt {
        token: String,
    },
    AdminResume {
        token: String,
    },
}

impl CommandMsg {
    pub fn trader_id(&self) -> Option<&TraderId> {
        match self {
            CommandMsg::SubmitOrder { trader_id, .. }
            | CommandMsg::CancelOrder { trader_id, .. }
            | CommandMsg::CancelAll { trader_id } => Some(trader_id),
            CommandMsg::AdminHalt { .. } | CommandMsg::AdminResume { .. } => None,
        }
    }
}

/// A command stamped by ingress. `arrival_seq` is the canonical ordering
/// across all clients; `ts_ns` is captured once at the boundary so every
/// downstream decision (rate limits, event timestamps) replays identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedCommand {
    pub arrival_seq: ArrivalSeq,
    pub ts_ns: TsNs,
    #[serde(flatten)]
    pub msg: CommandMsg,
}
