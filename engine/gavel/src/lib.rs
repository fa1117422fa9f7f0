// Gavel - deterministic price-time matching engine for a single instrument.
//
// Determinism assumptions:
// - Single-threaded access; the caller processes one command to completion.
// - Monotonic arrival sequence numbers decide ties.
// - Ordered price ladders; no unordered iteration on the matching path.

mod book;
mod events;
mod fixed;
mod messages;
mod types;

pub use book::{Book, MakerFill, MatchLoc, RestingOrder};
pub use events::{
    BookLevel, EventBody, LiquidationReason, RejectDetails, RejectReason, SequencedEvent,
};
pub use fixed::{Notional, ParseFixedError, Price, DECIMALS, SCALE};
pub use messages::{CommandMsg, SequencedCommand};
pub use types::{ArrivalSeq, OrderId, OrderKind, Qty, Side, TimeInForce, TradeId, TraderId, TsNs};

use serde::{Deserialize, Serialize};

/// What happens when an incoming order would trade against the same
/// trader's resting order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelfMatchPolicy {
    /// Leave the resting order untouched and look deeper for a counterparty.
    #[default]
    SkipResting,
    /// Cancel the resting order and keep matching.
    CancelResting,
    /// Discard the incoming remainder.
    CancelIncoming,
}

/// One execution. The maker's price is the execution price.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub trade_id: TradeId,
    pub price: Price,
    pub qty: Qty,
    pub taker_side: Side,
    pub taker_order_id: OrderId,
    pub taker_trader_id: TraderId,
    pub maker_order_id: OrderId,
    pub maker_trader_id: TraderId,
}

impl Fill {
    /// (trader, order) pair on the buy side of the trade.
    pub fn buyer(&self) -> (&TraderId, OrderId) {
        match self.taker_side {
            Side::Buy => (&self.taker_trader_id, self.taker_order_id),
            Side::Sell => (&self.maker_trader_id, self.maker_order_id),
        }
    }

    /// (trader, order) pair on the sell side of the trade.
    pub fn seller(&self) -> (&TraderId, OrderId) {
        match self.taker_side {
            Side::Sell => (&self.taker_trader_id, self.taker_order_id),
            Side::Buy => (&self.maker_trader_id, self.maker_order_id),
        }
    }
}

/// Result of running one admitted order through the matching loop.
#[derive(Debug, Default)]
pub struct SubmitOutcome {
    pub order_id: OrderId,
    pub fills: Vec<Fill>,
    /// Resting orders cancelled by the `cancel_resting` policy.
    pub self_cancels: Vec<(Side, RestingOrder)>,
    /// Residual quantity that rested on the book (limit GTC only).
    pub rested_qty: Qty,
    /// Terminal rejection decided inside matching.
    pub reject: Option<RejectReason>,
}

impl SubmitOutcome {
    pub fn book_changed(&self) -> bool {
        !self.fills.is_empty() || !self.self_cancels.is_empty() || self.rested_qty > 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("crossed book after match: best bid {bid} >= best ask {ask}")]
    CrossedBook { bid: Price, ask: Price },
}

/// The matching engine: a book, id allocators, and the last trade print.
pub struct MatchEngine {
    book: Book,
    policy: SelfMatchPolicy,
    next_order_id: OrderId,
    next_trade_id: TradeId,
    last_trade_price: Option<Price>,
}

impl MatchEngine {
    pub fn new(policy: SelfMatchPolicy) -> Self {
        Self {
            book: Book::new(),
            policy,
            next_order_id: 1,
            next_trade_id: 1,
            last_trade_price: None,
        }
    }

    #[inline]
    pub fn book(&self) -> &Book {
        &self.book
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.book.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.book.best_ask()
    }

    #[inline]
    pub fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    /// Reference price for unrealized PnL and margin: the mid when both
    /// sides exist, else the last trade, else undefined.
    pub fn mark_price(&self) -> Option<Price> {
        match (self.book.best_bid(), self.book.best_ask()) {
            (Some(bid), Some(ask)) => Some(bid.midpoint(ask)),
            _ => self.last_trade_price,
        }
    }

    pub fn next_ids(&self) -> (OrderId, TradeId) {
        (self.next_order_id, self.next_trade_id)
    }

    /// Runs an admitted order: cross the opposite ladder while it crosses,
    /// then rest/discard the residual per order kind and time in force.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        trader_id: &TraderId,
        side: Side,
        kind: OrderKind,
        price: Option<Price>,
        qty: Qty,
        tif: TimeInForce,
        arrival_seq: ArrivalSeq,
        ts_ns: TsNs,
    ) -> Result<SubmitOutcome, MatchError> {
        debug_assert!(qty > 0);
        debug_assert_eq!(kind == OrderKind::Limit, price.is_some());

        let order_id = self.next_order_id;
        self.next_order_id += 1;
        let mut out = SubmitOutcome { order_id, ..Default::default() };

        let book_side = side.opposite();
        let limit = match kind {
            OrderKind::Limit => price,
            OrderKind::Market => None,
        };

        // Fill-or-kill is decided up front, before any book mutation. Own
        // resting orders never fill the taker, so they do not count.
        if tif == TimeInForce::Fok {
            let available = self.book.available_qty(book_side, limit, Some(trader_id));
            if available < qty as u64 {
                out.reject = Some(RejectReason::FillOrKillUnfillable);
                return Ok(out);
            }
        }

        let mut leaves = qty;
        let mut incoming_killed = false;
        while leaves > 0 {
            let loc = match self.policy {
                SelfMatchPolicy::SkipResting => {
                    match self.book.find_matchable(book_side, limit, Some(trader_id)) {
                        Some(loc) => loc,
                        None => break,
                    }
                }
                SelfMatchPolicy::CancelResting | SelfMatchPolicy::CancelIncoming => {
                    let Some(loc) = self.book.find_matchable(book_side, limit, None) else {
                        break;
                    };
                    if self.book.order_at(book_side, loc).trader_id == *trader_id {
                        if self.policy == SelfMatchPolicy::CancelResting {
                            let removed = self.book.remove_at(book_side, loc);
                            out.self_cancels.push((book_side, removed));
                            continue;
                        }
                        incoming_killed = true;
                        break;
                    }
                    loc
                }
            };

            let resting_qty = self.book.order_at(book_side, loc).qty_leaves;
            let fill_qty = leaves.min(resting_qty);
            let maker = self.book.fill_at(book_side, loc, fill_qty);

            let trade_id = self.next_trade_id;
            self.next_trade_id += 1;
            self.last_trade_price = Some(maker.price);
            out.fills.push(Fill {
                trade_id,
                price: maker.price,
                qty: fill_qty,
                taker_side: side,
                taker_order_id: order_id,
                taker_trader_id: trader_id.clone(),
                maker_order_id: maker.order_id,
                maker_trader_id: maker.trader_id,
            });
            leaves -= fill_qty;
        }

        if leaves > 0 && !incoming_killed && kind == OrderKind::Limit && tif == TimeInForce::Gtc {
            self.book.insert(
                side,
                RestingOrder {
                    order_id,
                    trader_id: trader_id.clone(),
                    price: price.expect("limit order has a price"),
                    qty_leaves: leaves,
                    arrival_seq,
                    ts_ns,
                },
            );
            out.rested_qty = leaves;
        }

        if kind == OrderKind::Market && out.fills.is_empty() {
            out.reject = Some(RejectReason::NoLiquidity);
        }

        self.assert_uncrossed()?;
        Ok(out)
    }

    /// Cancels a resting order. Unknown ids and orders owned by another
    /// trader are indistinguishable to the caller.
    pub fn cancel(
        &mut self,
        order_id: OrderId,
        trader_id: &TraderId,
    ) -> Result<(Side, RestingOrder), RejectReason> {
        let owned = self.book.owner_of(order_id).is_some_and(|owner| owner == trader_id);
        if !owned {
            return Err(RejectReason::UnknownOrder);
        }
        Ok(self.book.cancel(order_id).expect("owned order cancels"))
    }

    /// Cancels every resting order for `trader` in one pass.
    pub fn cancel_all(&mut self, trader: &str) -> Vec<(Side, RestingOrder)> {
        self.book.cancel_all(trader)
    }

    fn assert_uncrossed(&self) -> Result<(), MatchError> {
        if let (Some(bid), Some(ask)) = (self.book.best_bid(), self.book.best_ask()) {
            if bid >= ask {
                // The skip policy can leave one trader crossing only their
                // own orders; any cross between two traders is fatal.
                let tolerated = self.policy == SelfMatchPolicy::SkipResting
                    && self.book.crossed_by_single_owner();
                if !tolerated {
                    return Err(MatchError::CrossedBook { bid, ask });
                }
            }
        }
        Ok(())
    }
}
