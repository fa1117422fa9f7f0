// Property tests: random order streams against the engine invariants.

use exchange_core::{EngineConfig, ExchangeCore};
use gavel::{CommandMsg, Notional, OrderKind, Price, SequencedCommand, Side, TimeInForce, SCALE};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use risk_engine::MarginMode;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
enum Op {
    Limit { trader: usize, side: Side, price_units: i64, qty: u32, tif: TimeInForce },
    Market { trader: usize, side: Side, qty: u32 },
    Cancel { trader: usize, order_id: u64 },
    CancelAll { trader: usize },
}

const TRADERS: [&str; 4] = ["ALPHA", "BRAVO", "CHARLIE", "DELTA"];

fn op_strategy() -> impl Strategy<Value = Op> {
    let side = prop_oneof![Just(Side::Buy), Just(Side::Sell)];
    let tif = prop_oneof![
        4 => Just(TimeInForce::Gtc),
        1 => Just(TimeInForce::Ioc),
        1 => Just(TimeInForce::Fok),
    ];
    prop_oneof![
        6 => (0..TRADERS.len(), side.clone(), 80i64..=120, 1u32..=20, tif)
            .prop_map(|(trader, side, price_units, qty, tif)| Op::Limit {
                trader,
                side,
                price_units,
                qty,
                tif
            }),
        2 => (0..TRADERS.len(), side, 1u32..=10)
            .prop_map(|(trader, side, qty)| Op::Market { trader, side, qty }),
        2 => (0..TRADERS.len(), 1u64..=60)
            .prop_map(|(trader, order_id)| Op::Cancel { trader, order_id }),
        1 => (0..TRADERS.len()).prop_map(|trader| Op::CancelAll { trader }),
    ]
}

fn config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.risk.margin_mode = MarginMode::Disabled;
    cfg.risk.price_collar_pct = 2 * SCALE;
    cfg
}

fn command(op: &Op) -> CommandMsg {
    match op {
        Op::Limit { trader, side, price_units, qty, tif } => CommandMsg::SubmitOrder {
            trader_id: TRADERS[*trader].to_string(),
            side: *side,
            kind: OrderKind::Limit,
            qty: *qty,
            price: Some(Price::from_units(*price_units)),
            tif: *tif,
            client_order_id: None,
        },
        Op::Market { trader, side, qty } => CommandMsg::SubmitOrder {
            trader_id: TRADERS[*trader].to_string(),
            side: *side,
            kind: OrderKind::Market,
            qty: *qty,
            price: None,
            tif: TimeInForce::Ioc,
            client_order_id: None,
        },
        Op::Cancel { trader, order_id } => CommandMsg::CancelOrder {
            trader_id: TRADERS[*trader].to_string(),
            order_id: *order_id,
        },
        Op::CancelAll { trader } => {
            CommandMsg::CancelAll { trader_id: TRADERS[*trader].to_string() }
        }
    }
}

fn drive(core: &mut ExchangeCore, ops: &[Op]) -> Vec<u64> {
    let mut seqs = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        let cmd = SequencedCommand {
            arrival_seq: i as u64 + 1,
            ts_ns: (i as u64 + 1) * 1_000_000,
            msg: command(op),
        };
        let processed = core.process(&cmd);
        assert!(processed.fault.is_none(), "engine fault under random stream: {:?}", processed.fault);
        seqs.extend(processed.events.iter().map(|e| e.seq));
    }
    seqs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_for_all_streams(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let mut core = ExchangeCore::new(config()).unwrap();
        let seqs = drive(&mut core, &ops);

        // Sequence numbers are dense from 1.
        for (i, seq) in seqs.iter().enumerate() {
            prop_assert_eq!(*seq, i as u64 + 1);
        }

        // Book structure, FIFO order, totals, open-quantity tracking.
        core.matching().book().validate().map_err(|e| TestCaseError::fail(e))?;
        // Entry price is zero exactly when flat.
        core.positions().validate().map_err(|e| TestCaseError::fail(e.to_string()))?;

        // Cash is a closed system: every fill moves it between accounts.
        let engaged = core.positions().accounts().count() as i64;
        prop_assert_eq!(
            core.positions().total_cash().unwrap(),
            Notional::from_units(10_000 * engaged)
        );
    }

    #[test]
    fn replay_from_journal_is_bit_identical(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        static CASE: AtomicU64 = AtomicU64::new(0);
        let case = CASE.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "property_replay_{}_{case}.journal",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let digest_before = {
            let mut core = ExchangeCore::new(config()).unwrap();
            core.attach_journal(journal::JournalWriter::open(&path, 0, 0).unwrap());
            drive(&mut core, &ops);
            core.state_digest()
        };

        let (recovered, _) = ExchangeCore::recover(config(), &path).unwrap();
        let digest_after = recovered.state_digest();
        std::fs::remove_file(&path).ok();
        prop_assert_eq!(digest_after, digest_before);
    }
}
