// engine/gavel/src/book.rs

use crate::{ArrivalSeq, BookLevel, OrderId, Price, Qty, Side, TraderId, TsNs};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};

/// A resting limit order. Mutated only by the matching path (reducing
/// `qty_leaves`); removed when it fills, cancels, or its level empties.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub trader_id: TraderId,
    pub price: Price,
    pub qty_leaves: Qty,
    pub arrival_seq: ArrivalSeq,
    pub ts_ns: TsNs,
}

/// FIFO queue plus running total for one price. `total_qty` equals the sum
/// of `qty_leaves` over the queue at every quiescent point.
#[derive(Debug, Default)]
struct Level {
    fifo: VecDeque<RestingOrder>,
    total_qty: u64,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    trader: TraderId,
    side: Side,
    price: Price,
}

/// Location of a matchable resting order: its price level and queue slot.
/// Positions are only valid until the next book mutation; the matching loop
/// re-resolves after every fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchLoc {
    pub price: Price,
    pub pos: usize,
}

/// Outcome of consuming quantity from a located resting order.
#[derive(Debug, Clone)]
pub struct MakerFill {
    pub order_id: OrderId,
    pub trader_id: TraderId,
    pub price: Price,
    pub removed: bool,
}

/// Two price-indexed ladders of FIFO queues. Best-price access is
/// O(log P); cancels go through a per-order index and cost one queue scan.
#[derive(Debug, Default)]
pub struct Book {
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
    index: FxHashMap<OrderId, IndexEntry>,
    // Sum of qty_leaves over resting orders, per trader and side.
    open_qty: FxHashMap<TraderId, [u64; 2]>,
}

#[inline]
fn side_slot(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

impl Book {
    pub fn new() -> Self {
        Book::default()
    }

    fn ladder(&self, side: Side) -> &BTreeMap<Price, Level> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn ladder_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Level> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    #[inline]
    pub fn best(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.best_bid(),
            Side::Sell => self.best_ask(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn resting_count(&self) -> usize {
        self.index.len()
    }

    pub fn open_qty(&self, trader: &str, side: Side) -> u64 {
        self.open_qty.get(trader).map(|q| q[side_slot(side)]).unwrap_or(0)
    }

    /// Appends to the tail of the FIFO at `order.price`, creating the level
    /// if absent.
    pub fn insert(&mut self, side: Side, order: RestingOrder) {
        debug_assert!(order.qty_leaves > 0, "resting order must have open quantity");
        self.index.insert(
            order.order_id,
            IndexEntry { trader: order.trader_id.clone(), side, price: order.price },
        );
        self.open_qty.entry(order.trader_id.clone()).or_default()[side_slot(side)] +=
            order.qty_leaves as u64;
        let level = self.ladder_mut(side).entry(order.price).or_default();
        level.total_qty += order.qty_leaves as u64;
        level.fifo.push_back(order);
    }

    /// Trader that owns a resting order, if it is still on the book.
    pub fn owner_of(&self, order_id: OrderId) -> Option<&TraderId> {
        self.index.get(&order_id).map(|e| &e.trader)
    }

    /// Removes a resting order by id. Returns its side and final state.
    pub fn cancel(&mut self, order_id: OrderId) -> Option<(Side, RestingOrder)> {
        let entry = self.index.remove(&order_id)?;
        let ladder = self.ladder_mut(entry.side);
        let level = ladder.get_mut(&entry.price).expect("indexed level missing");
        let pos = level
            .fifo
            .iter()
            .position(|o| o.order_id == order_id)
            .expect("indexed order missing from level");
        let order = level.fifo.remove(pos).expect("position just located");
        level.total_qty -= order.qty_leaves as u64;
        if level.fifo.is_empty() {
            ladder.remove(&entry.price);
        }
        self.sub_open_qty(&order.trader_id, entry.side, order.qty_leaves);
        Some((entry.side, order))
    }

    /// Removes every resting order owned by `trader` in one pass.
    /// Bids come out best-first, then asks best-first, so emitted cancel
    /// events are deterministic.
    pub fn cancel_all(&mut self, trader: &str) -> Vec<(Side, RestingOrder)> {
        let mut ids: Vec<(OrderId, Side, Price)> = Vec::new();
        for (price, level) in self.bids.iter().rev() {
            for o in &level.fifo {
                if o.trader_id == trader {
                    ids.push((o.order_id, Side::Buy, *price));
                }
            }
        }
        for (price, level) in self.asks.iter() {
            for o in &level.fifo {
                if o.trader_id == trader {
                    ids.push((o.order_id, Side::Sell, *price));
                }
            }
        }
        ids.into_iter()
            .map(|(id, _, _)| self.cancel(id).expect("collected order still present"))
            .collect()
    }

    /// First resting order on `book_side` that a taker bounded by `limit`
    /// could trade with, skipping orders owned by `skip`. Price priority
    /// first, FIFO within a level; skipped orders keep their place.
    pub fn find_matchable(
        &self,
        book_side: Side,
        limit: Option<Price>,
        skip: Option<&str>,
    ) -> Option<MatchLoc> {
        let hit = |level: (&Price, &Level)| -> Option<MatchLoc> {
            let (price, lvl) = level;
            lvl.fifo
                .iter()
                .position(|o| skip.map_or(true, |t| o.trader_id != t))
                .map(|pos| MatchLoc { price: *price, pos })
        };
        match (book_side, limit) {
            (Side::Sell, Some(cap)) => self.asks.range(..=cap).find_map(hit),
            (Side::Sell, None) => self.asks.iter().find_map(hit),
            (Side::Buy, Some(floor)) => self.bids.range(floor..).rev().find_map(hit),
            (Side::Buy, None) => self.bids.iter().rev().find_map(hit),
        }
    }

    pub fn order_at(&self, book_side: Side, loc: MatchLoc) -> &RestingOrder {
        &self.ladder(book_side)[&loc.price].fifo[loc.pos]
    }

    /// Reduces the located order by `qty`, unlinking it (and its level)
    /// when it reaches zero.
    pub fn fill_at(&mut self, book_side: Side, loc: MatchLoc, qty: Qty) -> MakerFill {
        let ladder = self.ladder_mut(book_side);
        let level = ladder.get_mut(&loc.price).expect("fill at missing level");
        let order = &mut level.fifo[loc.pos];
        debug_assert!(qty > 0 && qty <= order.qty_leaves, "fill exceeds open quantity");
        order.qty_leaves -= qty;
        level.total_qty -= qty as u64;
        let order_id = order.order_id;
        let trader_id = order.trader_id.clone();
        let removed = order.qty_leaves == 0;
        if removed {
            level.fifo.remove(loc.pos);
            if level.fifo.is_empty() {
                ladder.remove(&loc.price);
            }
            self.index.remove(&order_id);
        }
        self.sub_open_qty(&trader_id, book_side, qty);
        MakerFill { order_id, trader_id, price: loc.price, removed }
    }

    /// Removes the located order outright (self-match cancel policies).
    pub fn remove_at(&mut self, book_side: Side, loc: MatchLoc) -> RestingOrder {
        let ladder = self.ladder_mut(book_side);
        let level = ladder.get_mut(&loc.price).expect("remove at missing level");
        let order = level.fifo.remove(loc.pos).expect("remove at missing slot");
        level.total_qty -= order.qty_leaves as u64;
        if level.fifo.is_empty() {
            ladder.remove(&loc.price);
        }
        self.index.remove(&order.order_id);
        self.sub_open_qty(&order.trader_id, book_side, order.qty_leaves);
        order
    }

    /// Total quantity a taker bounded by `limit` could take from
    /// `book_side`, excluding orders owned by `skip`. Used by the
    /// fill-or-kill admission check.
    pub fn available_qty(&self, book_side: Side, limit: Option<Price>, skip: Option<&str>) -> u64 {
        let count = |lvl: &Level| -> u64 {
            match skip {
                None => lvl.total_qty,
                Some(t) => lvl
                    .fifo
                    .iter()
                    .filter(|o| o.trader_id != t)
                    .map(|o| o.qty_leaves as u64)
                    .sum(),
            }
        };
        match (book_side, limit) {
            (Side::Sell, Some(cap)) => self.asks.range(..=cap).map(|(_, l)| count(l)).sum(),
            (Side::Sell, None) => self.asks.values().map(count).sum(),
            (Side::Buy, Some(floor)) => self.bids.range(floor..).map(|(_, l)| count(l)).sum(),
            (Side::Buy, None) => self.bids.values().map(count).sum(),
        }
    }

    /// Top-`depth` levels, best first.
    pub fn depth(&self, side: Side, depth: usize) -> Vec<BookLevel> {
        match side {
            Side::Buy => {
                self.bids.iter().rev().take(depth).map(|(p, l)| BookLevel(*p, l.total_qty)).collect()
            }
            Side::Sell => {
                self.asks.iter().take(depth).map(|(p, l)| BookLevel(*p, l.total_qty)).collect()
            }
        }
    }

    /// True when the book is crossed but every order in the crossing price
    /// range, on both sides, belongs to one trader. The skip self-match
    /// policy legitimately produces this state; any cross between two
    /// traders is an engine fault.
    pub fn crossed_by_single_owner(&self) -> bool {
        let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) else {
            return false;
        };
        if bid < ask {
            return false;
        }
        let mut owner: Option<&TraderId> = None;
        let orders = self
            .bids
            .range(ask..)
            .flat_map(|(_, l)| l.fifo.iter())
            .chain(self.asks.range(..=bid).flat_map(|(_, l)| l.fifo.iter()));
        for o in orders {
            match owner {
                None => owner = Some(&o.trader_id),
                Some(t) if *t == o.trader_id => {}
                Some(_) => return false,
            }
        }
        true
    }

    /// Full structural check: totals, FIFO sequencing, index and per-trader
    /// open-quantity consistency. Test and debug use only.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = 0usize;
        let mut open: FxHashMap<TraderId, [u64; 2]> = FxHashMap::default();
        for (side, ladder) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            for (price, level) in ladder {
                if level.fifo.is_empty() {
                    return Err(format!("empty level at {price}"));
                }
                let mut sum = 0u64;
                let mut last_seq = None;
                for o in &level.fifo {
                    if o.qty_leaves == 0 {
                        return Err(format!("zero-quantity order {} at {price}", o.order_id));
                    }
                    if o.price != *price {
                        return Err(format!("order {} price mismatch at {price}", o.order_id));
                    }
                    if let Some(prev) = last_seq {
                        if o.arrival_seq <= prev {
                            return Err(format!("FIFO order violated at {price}"));
                        }
                    }
                    last_seq = Some(o.arrival_seq);
                    sum += o.qty_leaves as u64;
                    open.entry(o.trader_id.clone()).or_default()[side_slot(side)] +=
                        o.qty_leaves as u64;
                    match self.index.get(&o.order_id) {
                        Some(e) if e.side == side && e.price == *price => {}
                        _ => return Err(format!("order {} missing from index", o.order_id)),
                    }
                    seen += 1;
                }
                if sum != level.total_qty {
                    return Err(format!(
                        "level {price} total {got} != sum {sum}",
                        got = level.total_qty
                    ));
                }
            }
        }
        if seen != self.index.len() {
            return Err(format!("index size {} != resting orders {seen}", self.index.len()));
        }
        for (trader, want) in &open {
            if self.open_qty.get(trader).copied().unwrap_or_default() != *want {
                return Err(format!("open quantity mismatch for {trader}"));
            }
        }
        for (trader, have) in &self.open_qty {
            if *have != [0, 0] && !open.contains_key(trader) {
                return Err(format!("stale open quantity for {trader}"));
            }
        }
        Ok(())
    }

    fn sub_open_qty(&mut self, trader: &str, side: Side, qty: Qty) {
        let q = self.open_qty.get_mut(trader).expect("open quantity tracked");
        q[side_slot(side)] -= qty as u64;
        if *q == [0, 0] {
            self.open_qty.remove(trader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resting(id: OrderId, trader: &str, price: i64, qty: Qty, seq: u64) -> RestingOrder {
        RestingOrder {
            order_id: id,
            trader_id: trader.into(),
            price: Price::from_units(price),
            qty_leaves: qty,
            arrival_seq: seq,
            ts_ns: seq,
        }
    }

    #[test]
    fn insert_updates_best_and_totals() {
        let mut book = Book::new();
        book.insert(Side::Buy, resting(1, "A", 115, 10, 1));
        book.insert(Side::Buy, resting(2, "B", 120, 4, 2));
        book.insert(Side::Sell, resting(3, "C", 130, 3, 3));

        assert_eq!(book.best_bid(), Some(Price::from_units(120)));
        assert_eq!(book.best_ask(), Some(Price::from_units(130)));
        assert_eq!(book.depth(Side::Buy, 10).len(), 2);
        assert_eq!(book.depth(Side::Buy, 10)[0], BookLevel(Price::from_units(120), 4));
        assert_eq!(book.open_qty("A", Side::Buy), 10);
        book.validate().unwrap();
    }

    #[test]
    fn cancel_removes_order_and_empty_level() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, "A", 110, 5, 1));
        book.insert(Side::Sell, resting(2, "B", 110, 7, 2));

        let (side, order) = book.cancel(1).unwrap();
        assert_eq!(side, Side::Sell);
        assert_eq!(order.qty_leaves, 5);
        assert_eq!(book.depth(Side::Sell, 10)[0], BookLevel(Price::from_units(110), 7));

        let (_, order) = book.cancel(2).unwrap();
        assert_eq!(order.order_id, 2);
        assert!(book.is_empty());
        assert!(book.cancel(2).is_none(), "second cancel finds nothing");
        book.validate().unwrap();
    }

    #[test]
    fn cancel_all_sweeps_both_sides_best_first() {
        let mut book = Book::new();
        book.insert(Side::Buy, resting(1, "T", 99, 1, 1));
        book.insert(Side::Buy, resting(2, "T", 100, 2, 2));
        book.insert(Side::Sell, resting(3, "T", 105, 3, 3));
        book.insert(Side::Buy, resting(4, "X", 98, 9, 4));

        let removed = book.cancel_all("T");
        let ids: Vec<OrderId> = removed.iter().map(|(_, o)| o.order_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(book.resting_count(), 1);
        assert_eq!(book.open_qty("T", Side::Buy), 0);
        book.validate().unwrap();
    }

    #[test]
    fn find_matchable_honors_limit_and_fifo() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, "A", 101, 5, 1));
        book.insert(Side::Sell, resting(2, "B", 100, 5, 2));
        book.insert(Side::Sell, resting(3, "C", 100, 5, 3));

        // Taker buying with a 100 cap reaches only the 100 level, FIFO head first.
        let loc = book.find_matchable(Side::Sell, Some(Price::from_units(100)), None).unwrap();
        assert_eq!(loc.price, Price::from_units(100));
        assert_eq!(book.order_at(Side::Sell, loc).order_id, 2);

        // A cap below the whole ladder finds nothing.
        assert!(book.find_matchable(Side::Sell, Some(Price::from_units(99)), None).is_none());
    }

    #[test]
    fn find_matchable_skips_own_orders_in_place() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, "A", 100, 5, 1));
        book.insert(Side::Sell, resting(2, "B", 100, 5, 2));

        let loc = book.find_matchable(Side::Sell, None, Some("A")).unwrap();
        assert_eq!(book.order_at(Side::Sell, loc).order_id, 2);
        // The skipped order is untouched and still first in the queue.
        let head = book.find_matchable(Side::Sell, None, None).unwrap();
        assert_eq!(book.order_at(Side::Sell, head).order_id, 1);
    }

    #[test]
    fn fill_at_partial_then_full() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, "A", 100, 5, 1));

        let loc = book.find_matchable(Side::Sell, None, None).unwrap();
        let fill = book.fill_at(Side::Sell, loc, 3);
        assert!(!fill.removed);
        assert_eq!(book.depth(Side::Sell, 10)[0], BookLevel(Price::from_units(100), 2));
        assert_eq!(book.open_qty("A", Side::Sell), 2);

        let loc = book.find_matchable(Side::Sell, None, None).unwrap();
        let fill = book.fill_at(Side::Sell, loc, 2);
        assert!(fill.removed);
        assert!(book.is_empty());
        book.validate().unwrap();
    }

    #[test]
    fn available_qty_excludes_skipped_trader() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, "A", 100, 5, 1));
        book.insert(Side::Sell, resting(2, "B", 101, 7, 2));
        book.insert(Side::Sell, resting(3, "A", 102, 9, 3));

        assert_eq!(book.available_qty(Side::Sell, None, None), 21);
        assert_eq!(book.available_qty(Side::Sell, None, Some("A")), 7);
        assert_eq!(book.available_qty(Side::Sell, Some(Price::from_units(101)), Some("A")), 7);
        assert_eq!(book.available_qty(Side::Sell, Some(Price::from_units(100)), Some("A")), 0);
    }

    #[test]
    fn crossed_detection_distinguishes_owners() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, "A", 100, 5, 1));
        book.insert(Side::Buy, resting(2, "A", 100, 5, 2));
        assert!(book.crossed_by_single_owner());

        book.insert(Side::Buy, resting(3, "B", 100, 5, 3));
        assert!(!book.crossed_by_single_owner());
    }
}
