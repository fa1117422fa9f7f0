// engine/exchange-core/src/liquidation.rs
//
// Post-trade maintenance scan and forced close. A breached trader has its
// resting orders swept, then a synthetic market order for the full
// position routes through the normal matching path; only the margin check
// is waived. Attempts are bounded per command, and a breach that survives
// that many consecutive scans freezes the account.

use crate::{EngineFault, ExchangeCore};
use gavel::{
    EventBody, LiquidationReason, OrderKind, Qty, SequencedCommand, Side, TimeInForce, TraderId,
};
use position_engine::AccountingFault;
use risk_engine::{maintenance_breached, maintenance_margin_required, MarginMode, OrderCheck};
use std::collections::{BTreeSet, VecDeque};
use tracing::warn;

fn close_order_for(position: i64) -> (Side, Qty) {
    let side = if position > 0 { Side::Sell } else { Side::Buy };
    (side, position.unsigned_abs().min(Qty::MAX as u64) as Qty)
}

impl ExchangeCore {
    /// Runs after any command that produced fills. Every open position is
    /// checked, not just the participants: the mark may have moved against
    /// a trader who was not in the trade. Counterparties of liquidation
    /// fills join the work list, so cascades resolve within one pass
    /// instead of recursing.
    pub(crate) fn maintenance_scan(&mut self, cmd: &SequencedCommand) -> Result<(), EngineFault> {
        if self.cfg.risk.margin_mode != MarginMode::InitialAndMaintenance {
            return Ok(());
        }
        let max_attempts = self.cfg.risk.liquidation_max_attempts;
        let mut open: Vec<TraderId> = self
            .positions
            .accounts()
            .filter(|a| a.position != 0)
            .map(|a| a.trader_id.clone())
            .collect();
        open.sort();
        let mut queue: VecDeque<TraderId> = open.into_iter().collect();
        let mut scanned: BTreeSet<TraderId> = BTreeSet::new();

        while let Some(trader) = queue.pop_front() {
            if !scanned.insert(trader.clone()) || self.frozen.contains(&trader) {
                continue;
            }
            if !self.is_breached(&trader)? {
                self.breach_streaks.remove(&trader);
                continue;
            }

            let counterparties = self.liquidate(cmd, &trader, max_attempts)?;
            for other in counterparties {
                if !scanned.contains(&other) {
                    queue.push_back(other);
                }
            }

            if self.is_breached(&trader)? {
                let streak = self.breach_streaks.entry(trader.clone()).or_insert(0);
                *streak += 1;
                if *streak >= max_attempts {
                    let snap = self.positions.snapshot(&trader, self.matching.mark_price())?;
                    let (side, qty) = close_order_for(snap.position);
                    self.emit(
                        cmd.ts_ns,
                        EventBody::Liquidation {
                            trader_id: trader.clone(),
                            reason: LiquidationReason::LiquidityExhausted,
                            qty,
                            side,
                        },
                    )?;
                    self.frozen.insert(trader.clone());
                    self.breach_streaks.remove(&trader);
                    warn!(trader = %trader, "liquidation liquidity exhausted; account frozen");
                }
            } else {
                self.breach_streaks.remove(&trader);
            }
        }
        Ok(())
    }

    fn is_breached(&self, trader: &TraderId) -> Result<bool, EngineFault> {
        let Some(mark) = self.matching.mark_price() else {
            return Ok(false);
        };
        let snap = self.positions.snapshot(trader, Some(mark))?;
        let requirement = maintenance_margin_required(
            snap.position,
            mark,
            self.cfg.risk.maintenance_margin_rate,
        )
        .ok_or(AccountingFault::Overflow("maintenance margin"))?;
        Ok(maintenance_breached(snap.position, snap.total_equity, requirement))
    }

    /// Runs up to `max_attempts` forced closes for one breached trader.
    /// Returns the counterparties whose positions changed.
    fn liquidate(
        &mut self,
        cmd: &SequencedCommand,
        trader: &TraderId,
        max_attempts: u32,
    ) -> Result<BTreeSet<TraderId>, EngineFault> {
        let mut counterparties = BTreeSet::new();

        // Sweep the trader's own resting orders first: they cannot be
        // allowed to absorb the forced close.
        let removed = self.matching.cancel_all(trader);
        for (_, order) in &removed {
            self.emit(
                cmd.ts_ns,
                EventBody::OrderCancelled { order_id: order.order_id, trader_id: trader.clone() },
            )?;
        }
        if !removed.is_empty() {
            let body = self.book_update_body();
            self.emit(cmd.ts_ns, body)?;
        }

        let mut attempts = 0;
        while attempts < max_attempts && self.is_breached(trader)? {
            attempts += 1;
            let mark = self.matching.mark_price();
            let snapshot = self.positions.snapshot(trader, mark)?;
            if snapshot.position == 0 {
                break;
            }
            let (side, qty) = close_order_for(snapshot.position);
            let check = OrderCheck {
                trader_id: trader,
                side,
                kind: OrderKind::Market,
                price: None,
                qty,
                is_liquidation: true,
            };
            if let Err(rejection) = self.gate.pre_trade(
                &check,
                &snapshot,
                self.matching.last_trade_price(),
                mark,
                self.halted,
                false,
                cmd.ts_ns,
            ) {
                warn!(trader = %trader, reason = ?rejection.reason, "forced close rejected");
                continue;
            }

            let outcome = self.matching.submit(
                trader,
                side,
                OrderKind::Market,
                None,
                qty,
                TimeInForce::Ioc,
                cmd.arrival_seq,
                cmd.ts_ns,
            )?;
            if outcome.fills.is_empty() {
                // No liquidity on the other side right now; the position
                // stays open and the next post-trade scan retries.
                break;
            }

            let closed: u32 = outcome.fills.iter().map(|f| f.qty).sum();
            let touched = self.settle_outcome(cmd.ts_ns, &outcome)?;
            self.emit(
                cmd.ts_ns,
                EventBody::Liquidation {
                    trader_id: trader.clone(),
                    reason: LiquidationReason::MaintenanceMarginBreach,
                    qty: closed,
                    side,
                },
            )?;
            for other in touched {
                if other != *trader {
                    counterparties.insert(other);
                }
            }
        }
        Ok(counterparties)
    }
}
