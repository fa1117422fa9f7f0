// engine/exchange-core/src/engine.rs
//
// The single mutator. One command is processed to completion before the
// next is pulled: admission, matching, accounting, the maintenance scan,
// and event sequencing all happen here, on one thread, with the journal
// frame on disk before any state changes.

use crate::{ConfigError, EngineConfig, EngineFault, EventSequencer};
use gavel::{
    BookLevel, CommandMsg, EventBody, MatchEngine, OrderId, OrderKind, Price, Qty,
    SequencedCommand, SequencedEvent, Side, SubmitOutcome, TimeInForce, TraderId,
};
use journal::{read_records, JournalWriter, Record};
use position_engine::PositionEngine;
use risk_engine::{OrderCheck, RiskGate};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{error, info};

/// Events produced by one command, plus the fault that ended the session
/// if one occurred. The events are valid either way: everything emitted
/// before the fault, then the final engine_fault record.
#[derive(Debug)]
pub struct Processed {
    pub events: Vec<SequencedEvent>,
    pub fault: Option<EngineFault>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineFault),
}

/// Full engine state for equality checks: the book, the accounts, the id
/// allocators, and the halt/frozen flags. Two digests compare equal iff
/// the engines would behave identically from here on.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDigest {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub accounts: Vec<position_engine::TraderAccount>,
    pub next_order_id: OrderId,
    pub next_trade_id: u64,
    pub next_event_seq: u64,
    pub last_trade_price: Option<Price>,
    pub halted: bool,
    pub frozen: Vec<TraderId>,
}

pub struct ExchangeCore {
    pub(crate) cfg: EngineConfig,
    pub(crate) matching: MatchEngine,
    pub(crate) positions: PositionEngine,
    pub(crate) gate: RiskGate,
    pub(crate) sequencer: EventSequencer,
    pub(crate) halted: bool,
    pub(crate) frozen: BTreeSet<TraderId>,
    pub(crate) breach_streaks: BTreeMap<TraderId, u32>,
    pub(crate) journal: Option<JournalWriter>,
    pub(crate) pending: Vec<SequencedEvent>,
}

impl ExchangeCore {
    pub fn new(cfg: EngineConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let matching = MatchEngine::new(cfg.self_match_policy);
        let positions = PositionEngine::new(cfg.risk.starting_capital);
        let gate = RiskGate::new(cfg.risk.clone());
        Ok(Self {
            cfg,
            matching,
            positions,
            gate,
            sequencer: EventSequencer::new(),
            halted: false,
            frozen: BTreeSet::new(),
            breach_streaks: BTreeMap::new(),
            journal: None,
            pending: Vec::new(),
        })
    }

    /// Boots from a journal: replays every recorded inbound command
    /// through a fresh engine (journaling disabled, regenerated events
    /// discarded), then resumes appending at the tail. Determinism makes
    /// the replayed state identical to the pre-shutdown state.
    pub fn recover(cfg: EngineConfig, path: &Path) -> Result<(Self, usize), RecoveryError> {
        let scan = read_records(path).map_err(EngineFault::from)?;
        let mut core = Self::new(cfg)?;
        let mut replayed = 0usize;
        for record in scan.records {
            if let Record::Inbound(cmd) = record {
                let processed = core.process(&cmd);
                if let Some(fault) = processed.fault {
                    return Err(fault.into());
                }
                replayed += 1;
            }
        }
        let writer = JournalWriter::open(path, scan.next_seq, scan.valid_len as u64)
            .map_err(EngineFault::from)?;
        core.journal = Some(writer);
        info!(replayed, "recovery replay complete");
        Ok((core, replayed))
    }

    pub fn attach_journal(&mut self, writer: JournalWriter) {
        self.journal = Some(writer);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn matching(&self) -> &MatchEngine {
        &self.matching
    }

    pub fn positions(&self) -> &PositionEngine {
        &self.positions
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_frozen(&self, trader: &str) -> bool {
        self.frozen.contains(trader)
    }

    /// Clean shutdown: rotate the journal aside. The next boot starts a
    /// fresh session.
    pub fn shutdown(mut self) -> Result<(), EngineFault> {
        if let Some(writer) = self.journal.take() {
            writer.rotate()?;
        }
        Ok(())
    }

    /// Processes one command to completion. This is the only entry point
    /// that mutates engine state.
    pub fn process(&mut self, cmd: &SequencedCommand) -> Processed {
        debug_assert!(self.pending.is_empty());
        let result = self.run(cmd).and_then(|()| self.flush_journal());
        match result {
            Ok(()) => Processed { events: std::mem::take(&mut self.pending), fault: None },
            Err(fault) => {
                error!(%fault, "engine fault; halting");
                self.halted = true;
                let body = EventBody::EngineFault {
                    invariant: fault.invariant().to_string(),
                    details: fault.to_string(),
                };
                let event = self.sequencer.stamp(cmd.ts_ns, body);
                if let Some(writer) = self.journal.as_mut() {
                    // The journal stays truthful up to the last flushed
                    // event; nothing more we can do if these fail too.
                    let _ = writer.append_outbound(&event);
                    let _ = writer.flush();
                }
                self.pending.push(event);
                Processed { events: std::mem::take(&mut self.pending), fault: Some(fault) }
            }
        }
    }

    fn run(&mut self, cmd: &SequencedCommand) -> Result<(), EngineFault> {
        if let Some(writer) = self.journal.as_mut() {
            writer.append_inbound(cmd)?;
        }
        match cmd.msg.clone() {
            CommandMsg::SubmitOrder { trader_id, side, kind, qty, price, tif, client_order_id } => {
                self.handle_submit(cmd, &trader_id, side, kind, price, qty, tif, client_order_id)
            }
            CommandMsg::CancelOrder { trader_id, order_id } => {
                self.handle_cancel(cmd, &trader_id, order_id)
            }
            CommandMsg::CancelAll { trader_id } => self.handle_cancel_all(cmd, &trader_id),
            CommandMsg::AdminHalt { token } => self.handle_admin(cmd, &token, true),
            CommandMsg::AdminResume { token } => self.handle_admin(cmd, &token, false),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_submit(
        &mut self,
        cmd: &SequencedCommand,
        trader: &TraderId,
        side: Side,
        kind: OrderKind,
        price: Option<Price>,
        qty: Qty,
        tif: TimeInForce,
        client_order_id: Option<String>,
    ) -> Result<(), EngineFault> {
        let mark = self.matching.mark_price();
        let snapshot = self.positions.snapshot(trader, mark)?;
        let check = OrderCheck { trader_id: trader, side, kind, price, qty, is_liquidation: false };
        if let Err(rejection) = self.gate.pre_trade(
            &check,
            &snapshot,
            self.matching.last_trade_price(),
            mark,
            self.halted,
            self.frozen.contains(trader),
            cmd.ts_ns,
        ) {
            return self.emit(
                cmd.ts_ns,
                EventBody::OrderRejected {
                    reason: rejection.reason,
                    details: rejection.details,
                    trader_id: Some(trader.clone()),
                    client_order_id,
                },
            );
        }

        let outcome =
            self.matching.submit(trader, side, kind, price, qty, tif, cmd.arrival_seq, cmd.ts_ns)?;

        match outcome.reject {
            Some(reason) => self.emit(
                cmd.ts_ns,
                EventBody::OrderRejected {
                    reason,
                    details: Default::default(),
                    trader_id: Some(trader.clone()),
                    client_order_id,
                },
            )?,
            None => self.emit(
                cmd.ts_ns,
                EventBody::OrderAccepted {
                    order_id: outcome.order_id,
                    trader_id: trader.clone(),
                    client_order_id,
                },
            )?,
        }

        let touched = self.settle_outcome(cmd.ts_ns, &outcome)?;
        if !touched.is_empty() {
            self.maintenance_scan(cmd)?;
        }
        Ok(())
    }

    /// Applies fills to the accounts and emits the cancel/trade/book/
    /// position event block shared by normal submits and liquidations.
    /// Returns the traders whose positions changed.
    pub(crate) fn settle_outcome(
        &mut self,
        ts_ns: u64,
        outcome: &SubmitOutcome,
    ) -> Result<BTreeSet<TraderId>, EngineFault> {
        for (_, order) in &outcome.self_cancels {
            self.emit(
                ts_ns,
                EventBody::OrderCancelled {
                    order_id: order.order_id,
                    trader_id: order.trader_id.clone(),
                },
            )?;
        }

        let mut touched = BTreeSet::new();
        for fill in &outcome.fills {
            let (buyer, buy_order_id) = fill.buyer();
            let (seller, sell_order_id) = fill.seller();
            let buyer = buyer.clone();
            let seller = seller.clone();
            self.positions.apply_trade(fill.price, fill.qty, &buyer, &seller)?;
            touched.insert(buyer.clone());
            touched.insert(seller.clone());
            self.emit(
                ts_ns,
                EventBody::Trade {
                    trade_id: fill.trade_id,
                    price: fill.price,
                    qty: fill.qty,
                    buy_trader_id: buyer,
                    sell_trader_id: seller,
                    buy_order_id,
                    sell_order_id,
                },
            )?;
        }

        if outcome.book_changed() {
            let body = self.book_update_body();
            self.emit(ts_ns, body)?;
        }
        self.emit_position_updates(ts_ns, &touched)?;
        Ok(touched)
    }

    fn handle_cancel(
        &mut self,
        cmd: &SequencedCommand,
        trader: &TraderId,
        order_id: OrderId,
    ) -> Result<(), EngineFault> {
        match self.matching.cancel(order_id, trader) {
            Ok((_, order)) => {
                self.emit(
                    cmd.ts_ns,
                    EventBody::OrderCancelled { order_id: order.order_id, trader_id: trader.clone() },
                )?;
                let body = self.book_update_body();
                self.emit(cmd.ts_ns, body)
            }
            Err(reason) => self.emit(
                cmd.ts_ns,
                EventBody::CancelRejected { reason, order_id, trader_id: trader.clone() },
            ),
        }
    }

    fn handle_cancel_all(
        &mut self,
        cmd: &SequencedCommand,
        trader: &TraderId,
    ) -> Result<(), EngineFault> {
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
        Ok(())
    }

    fn handle_admin(
        &mut self,
        cmd: &SequencedCommand,
        token: &str,
        halt: bool,
    ) -> Result<(), EngineFault> {
        if token != self.cfg.admin_token {
            return self.emit(
                cmd.ts_ns,
                EventBody::OrderRejected {
                    reason: gavel::RejectReason::InvalidMessage,
                    details: gavel::RejectDetails::message("admin token rejected"),
                    trader_id: None,
                    client_order_id: None,
                },
            );
        }
        if halt {
            self.halted = true;
            info!("kill switch set: exchange halted");
        } else {
            self.halted = false;
            self.frozen.clear();
            self.breach_streaks.clear();
            info!("kill switch cleared: exchange running");
        }
        Ok(())
    }

    pub(crate) fn book_update_body(&self) -> EventBody {
        let depth = self.cfg.book_depth_in_updates;
        let book = self.matching.book();
        EventBody::BookUpdate {
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            bids: book.depth(Side::Buy, depth),
            asks: book.depth(Side::Sell, depth),
        }
    }

    pub(crate) fn emit_position_updates(
        &mut self,
        ts_ns: u64,
        traders: &BTreeSet<TraderId>,
    ) -> Result<(), EngineFault> {
        let mark = self.matching.mark_price();
        for trader in traders {
            let snap = self.positions.snapshot(trader, mark)?;
            self.emit(
                ts_ns,
                EventBody::PositionUpdate {
                    trader_id: snap.trader_id,
                    position: snap.position,
                    cash: snap.cash,
                    avg_entry_price: snap.avg_entry_price,
                    realized_pnl: snap.realized_pnl,
                    unrealized_pnl: snap.unrealized_pnl,
                    total_equity: snap.total_equity,
                    mark_price: snap.mark_price,
                },
            )?;
        }
        Ok(())
    }

    /// Stamps, journals, and buffers one event. The journal write precedes
    /// hand-off: subscribers never see an event the log does not hold.
    pub(crate) fn emit(&mut self, ts_ns: u64, body: EventBody) -> Result<(), EngineFault> {
        let event = self.sequencer.stamp(ts_ns, body);
        if let Some(writer) = self.journal.as_mut() {
            writer.append_outbound(&event)?;
        }
        self.pending.push(event);
        Ok(())
    }

    fn flush_journal(&mut self) -> Result<(), EngineFault> {
        if let Some(writer) = self.journal.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn state_digest(&self) -> StateDigest {
        let book = self.matching.book();
        let mut accounts: Vec<_> = self.positions.accounts().cloned().collect();
        accounts.sort_by(|a, b| a.trader_id.cmp(&b.trader_id));
        let (next_order_id, next_trade_id) = self.matching.next_ids();
        StateDigest {
            bids: book.depth(Side::Buy, usize::MAX),
            asks: book.depth(Side::Sell, usize::MAX),
            accounts,
            next_order_id,
            next_trade_id,
            next_event_seq: self.sequencer.next_seq(),
            last_trade_price: self.matching.last_trade_price(),
            halted: self.halted,
            frozen: self.frozen.iter().cloned().collect(),
        }
    }
}
