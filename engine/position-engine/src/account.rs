// engine/position-engine/src/account.rs

use gavel::{Notional, Price, Qty, Side, TraderId};
use rustc_hash::FxHashMap;

/// Arithmetic on the accounting path never wraps; any overflow is fatal to
/// the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountingFault {
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("accounting invariant violated: {0}")]
    Invariant(String),
}

/// A trader's ledger. `cash` starts at the configured capital and moves by
/// exact execution notional on every fill; realized PnL is therefore
/// already inside `cash` and tracked separately only for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct TraderAccount {
    pub trader_id: TraderId,
    pub position: i64,
    pub cash: Notional,
    pub avg_entry_price: Price,
    pub realized_pnl: Notional,
}

impl TraderAccount {
    fn new(trader_id: TraderId, starting_capital: Notional) -> Self {
        Self {
            trader_id,
            position: 0,
            cash: starting_capital,
            avg_entry_price: Price::ZERO,
            realized_pnl: Notional::ZERO,
        }
    }
}

/// Read-only view used by risk checks and position events.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub trader_id: TraderId,
    pub position: i64,
    pub cash: Notional,
    pub avg_entry_price: Price,
    pub realized_pnl: Notional,
    pub unrealized_pnl: Notional,
    pub total_equity: Notional,
    pub mark_price: Option<Price>,
}

pub struct PositionEngine {
    accounts: FxHashMap<TraderId, TraderAccount>,
    starting_capital: Notional,
}

impl PositionEngine {
    pub fn new(starting_capital: Notional) -> Self {
        Self { accounts: FxHashMap::default(), starting_capital }
    }

    fn ensure(&mut self, trader: &TraderId) -> &mut TraderAccount {
        let capital = self.starting_capital;
        self.accounts
            .entry(trader.clone())
            .or_insert_with(|| TraderAccount::new(trader.clone(), capital))
    }

    pub fn account(&self, trader: &str) -> Option<&TraderAccount> {
        self.accounts.get(trader)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &TraderAccount> {
        self.accounts.values()
    }

    /// Applies both legs of a trade. The buyer leg goes first; the order is
    /// fixed so replays are identical.
    pub fn apply_trade(
        &mut self,
        price: Price,
        qty: Qty,
        buyer: &TraderId,
        seller: &TraderId,
    ) -> Result<(), AccountingFault> {
        tracing::trace!(%price, qty, %buyer, %seller, "applying trade legs");
        self.apply_fill(buyer, Side::Buy, price, qty)?;
        self.apply_fill(seller, Side::Sell, price, qty)
    }

    /// One leg of a fill: cash moves by the exact notional, the position
    /// moves by the signed quantity, and the entry price follows the
    /// flat / increase / reduce / flip case split.
    pub fn apply_fill(
        &mut self,
        trader: &TraderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Result<(), AccountingFault> {
        let acct = self.ensure(trader);
        let delta: i64 = match side {
            Side::Buy => qty as i64,
            Side::Sell => -(qty as i64),
        };
        let old_pos = acct.position;
        let new_pos =
            old_pos.checked_add(delta).ok_or(AccountingFault::Overflow("position"))?;

        let notional = price.notional(qty);
        acct.cash = match side {
            Side::Buy => acct.cash.checked_sub(notional),
            Side::Sell => acct.cash.checked_add(notional),
        }
        .ok_or(AccountingFault::Overflow("cash"))?;

        if old_pos == 0 {
            acct.position = new_pos;
            acct.avg_entry_price = if new_pos != 0 { price } else { Price::ZERO };
            return Ok(());
        }

        if (old_pos > 0) == (delta > 0) {
            // Same direction: quantity-weighted average entry.
            acct.avg_entry_price = Price::weighted_avg(
                acct.avg_entry_price,
                old_pos.unsigned_abs(),
                price,
                qty as u64,
            );
            acct.position = new_pos;
            return Ok(());
        }

        // Reducing, closing, or flipping through zero. PnL realizes on the
        // closed quantity against the old entry.
        let closed = old_pos.unsigned_abs().min(qty as u64);
        let per_unit = if old_pos > 0 {
            price.raw() as i128 - acct.avg_entry_price.raw() as i128
        } else {
            acct.avg_entry_price.raw() as i128 - price.raw() as i128
        };
        let realized = per_unit
            .checked_mul(closed as i128)
            .map(Notional::from_raw)
            .ok_or(AccountingFault::Overflow("realized pnl"))?;
        acct.realized_pnl = acct
            .realized_pnl
            .checked_add(realized)
            .ok_or(AccountingFault::Overflow("realized pnl"))?;

        acct.position = new_pos;
        if new_pos == 0 {
            acct.avg_entry_price = Price::ZERO;
        } else if (old_pos > 0) != (new_pos > 0) {
            // Flipped: the residual opened at this fill's price.
            acct.avg_entry_price = price;
        }
        Ok(())
    }

    pub fn unrealized_pnl(&self, trader: &str, mark: Option<Price>) -> Notional {
        let Some(acct) = self.accounts.get(trader) else {
            return Notional::ZERO;
        };
        Self::unrealized_of(acct, mark)
    }

    fn unrealized_of(acct: &TraderAccount, mark: Option<Price>) -> Notional {
        match mark {
            Some(mark) if acct.position != 0 => {
                let per_unit = mark.raw() as i128 - acct.avg_entry_price.raw() as i128;
                Notional::from_raw(per_unit * acct.position as i128)
            }
            // No mark defined, or flat: unrealized is zero by definition.
            _ => Notional::ZERO,
        }
    }

    /// Equity is cash plus unrealized PnL. Realized PnL is already part of
    /// cash and is not added again.
    pub fn equity(&self, trader: &str, mark: Option<Price>) -> Result<Notional, AccountingFault> {
        Ok(self.snapshot(trader, mark)?.total_equity)
    }

    /// Snapshot for risk checks and position events. Creates nothing: an
    /// untouched trader reads as a fresh account.
    pub fn snapshot(
        &self,
        trader: &str,
        mark: Option<Price>,
    ) -> Result<PositionSnapshot, AccountingFault> {
        let fresh;
        let acct = match self.accounts.get(trader) {
            Some(a) => a,
            None => {
                fresh = TraderAccount::new(trader.to_string(), self.starting_capital);
                &fresh
            }
        };
        let unrealized = Self::unrealized_of(acct, mark);
        let total_equity = acct
            .cash
            .checked_add(unrealized)
            .ok_or(AccountingFault::Overflow("equity"))?;
        Ok(PositionSnapshot {
            trader_id: acct.trader_id.clone(),
            position: acct.position,
            cash: acct.cash,
            avg_entry_price: acct.avg_entry_price,
            realized_pnl: acct.realized_pnl,
            unrealized_pnl: unrealized,
            total_equity,
            mark_price: mark,
        })
    }

    /// Flattens every open position at `mark`, in trader-id order. Used for
    /// deterministic session teardown. Returns the traders touched.
    pub fn flatten_all(&mut self, mark: Price) -> Result<Vec<TraderId>, AccountingFault> {
        let mut traders: Vec<TraderId> = self
            .accounts
            .values()
            .filter(|a| a.position != 0)
            .map(|a| a.trader_id.clone())
            .collect();
        traders.sort();
        for trader in &traders {
            loop {
                let position = self.accounts[trader].position;
                if position == 0 {
                    break;
                }
                let side = if position > 0 { Side::Sell } else { Side::Buy };
                let chunk = position.unsigned_abs().min(Qty::MAX as u64) as Qty;
                self.apply_fill(trader, side, mark, chunk)?;
            }
        }
        Ok(traders)
    }

    /// Cash is zero-sum across fills, so the total over all accounts must
    /// equal the capital handed out. Test and fault-check use.
    pub fn total_cash(&self) -> Result<Notional, AccountingFault> {
        self.accounts.values().try_fold(Notional::ZERO, |acc, a| {
            acc.checked_add(a.cash).ok_or(AccountingFault::Overflow("total cash"))
        })
    }

    pub fn issued_capital(&self) -> Result<Notional, AccountingFault> {
        let mut total = Notional::ZERO;
        for _ in &self.accounts {
            total = total
                .checked_add(self.starting_capital)
                .ok_or(AccountingFault::Overflow("issued capital"))?;
        }
        Ok(total)
    }

    /// Structural invariants: entry price is zero exactly when flat.
    pub fn validate(&self) -> Result<(), AccountingFault> {
        for acct in self.accounts.values() {
            let flat = acct.position == 0;
            let zero_entry = acct.avg_entry_price == Price::ZERO;
            if flat != zero_entry {
                return Err(AccountingFault::Invariant(format!(
                    "{}: position {} with entry {}",
                    acct.trader_id, acct.position, acct.avg_entry_price
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(u: i64) -> Price {
        Price::from_units(u)
    }

    fn engine() -> PositionEngine {
        PositionEngine::new(Notional::from_units(10_000))
    }

    #[test]
    fn first_fill_opens_at_fill_price() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Buy, units(100), 2).unwrap();

        let acct = eng.account("T").unwrap();
        assert_eq!(acct.position, 2);
        assert_eq!(acct.avg_entry_price, units(100));
        assert_eq!(acct.cash, Notional::from_units(10_000 - 200));
        assert_eq!(acct.realized_pnl, Notional::ZERO);
    }

    #[test]
    fn increase_averages_entry() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Buy, units(100), 1).unwrap();
        eng.apply_fill(&t, Side::Buy, units(102), 1).unwrap();

        let acct = eng.account("T").unwrap();
        assert_eq!(acct.position, 2);
        assert_eq!(acct.avg_entry_price, units(101));
    }

    #[test]
    fn reduce_realizes_against_entry() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Buy, units(100), 2).unwrap();
        eng.apply_fill(&t, Side::Sell, units(110), 1).unwrap();

        let acct = eng.account("T").unwrap();
        assert_eq!(acct.position, 1);
        assert_eq!(acct.avg_entry_price, units(100), "entry unchanged on reduce");
        assert_eq!(acct.realized_pnl, Notional::from_units(10));
    }

    #[test]
    fn close_and_flip_through_zero() {
        // Buys 2 @ 100, sells 3 @ 110: closes 2 for +20, opens 1 short @ 110.
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Buy, units(100), 2).unwrap();
        eng.apply_fill(&t, Side::Sell, units(110), 3).unwrap();

        let acct = eng.account("T").unwrap();
        assert_eq!(acct.position, -1);
        assert_eq!(acct.avg_entry_price, units(110));
        assert_eq!(acct.realized_pnl, Notional::from_units(20));
    }

    #[test]
    fn full_close_zeroes_entry() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Sell, units(100), 5).unwrap();
        eng.apply_fill(&t, Side::Buy, units(90), 5).unwrap();

        let acct = eng.account("T").unwrap();
        assert_eq!(acct.position, 0);
        assert_eq!(acct.avg_entry_price, Price::ZERO);
        assert_eq!(acct.realized_pnl, Notional::from_units(50), "short covered 10 below entry");
        eng.validate().unwrap();
    }

    #[test]
    fn short_side_accounting_mirrors_long() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Sell, units(100), 10).unwrap();

        let acct = eng.account("T").unwrap();
        assert_eq!(acct.position, -10);
        assert_eq!(acct.avg_entry_price, units(100));
        assert_eq!(acct.cash, Notional::from_units(11_000), "sale proceeds credited");

        // Mark moves against the short.
        let snap = eng.snapshot("T", Some(units(120))).unwrap();
        assert_eq!(snap.unrealized_pnl, Notional::from_units(-200));
        assert_eq!(snap.total_equity, Notional::from_units(10_800));
    }

    #[test]
    fn both_legs_conserve_cash() {
        let mut eng = engine();
        let a = "A".to_string();
        let b = "B".to_string();
        eng.apply_trade(units(100), 5, &a, &b).unwrap();
        eng.apply_trade(units(105), 3, &b, &a).unwrap();

        assert_eq!(eng.total_cash().unwrap(), Notional::from_units(20_000));
    }

    #[test]
    fn equity_excludes_double_counted_realized() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Buy, units(100), 1).unwrap();
        eng.apply_fill(&t, Side::Sell, units(110), 1).unwrap();

        // Cash already holds the +10; equity must not add realized again.
        let snap = eng.snapshot("T", Some(units(110))).unwrap();
        assert_eq!(snap.cash, Notional::from_units(10_010));
        assert_eq!(snap.realized_pnl, Notional::from_units(10));
        assert_eq!(snap.total_equity, Notional::from_units(10_010));
    }

    #[test]
    fn snapshot_of_untouched_trader_is_fresh() {
        let eng = engine();
        let snap = eng.snapshot("GHOST", None).unwrap();
        assert_eq!(snap.position, 0);
        assert_eq!(snap.cash, Notional::from_units(10_000));
        assert_eq!(snap.total_equity, Notional::from_units(10_000));
        assert!(eng.account("GHOST").is_none(), "snapshot must not create accounts");
    }

    #[test]
    fn undefined_mark_reads_as_zero_unrealized() {
        let mut eng = engine();
        let t = "T".to_string();
        eng.apply_fill(&t, Side::Buy, units(100), 5).unwrap();
        let snap = eng.snapshot("T", None).unwrap();
        assert_eq!(snap.unrealized_pnl, Notional::ZERO);
        assert_eq!(snap.total_equity, snap.cash);
    }

    #[test]
    fn flatten_all_closes_every_position() {
        let mut eng = engine();
        let a = "A".to_string();
        let b = "B".to_string();
        eng.apply_trade(units(100), 5, &a, &b).unwrap();

        let touched = eng.flatten_all(units(110)).unwrap();
        assert_eq!(touched, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(eng.account("A").unwrap().position, 0);
        assert_eq!(eng.account("B").unwrap().position, 0);
        assert_eq!(eng.account("A").unwrap().realized_pnl, Notional::from_units(50));
        assert_eq!(eng.account("B").unwrap().realized_pnl, Notional::from_units(-50));
        eng.validate().unwrap();
    }
}
