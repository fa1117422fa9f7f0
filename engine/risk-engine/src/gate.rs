// engine/risk-engine/src/gate.rs
//
// Pre-trade admission. Checks run in a fixed order and the first failure
// wins; nothing here mutates engine state except the admitted order's
// rate-limit token.

use crate::{initial_margin_required, MarginMode, RiskConfig, TokenBucket};
use gavel::{Notional, OrderKind, Price, Qty, RejectDetails, RejectReason, Side, TraderId};
use position_engine::PositionSnapshot;
use rustc_hash::FxHashMap;
use tracing::debug;

/// The order fields the gate looks at.
#[derive(Debug, Clone)]
pub struct OrderCheck<'a> {
    pub trader_id: &'a TraderId,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Option<Price>,
    pub qty: Qty,
    /// Synthetic close generated by the liquidator: margin is not
    /// re-checked, every other check still applies.
    pub is_liquidation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub details: RejectDetails,
}

impl Rejection {
    fn bare(reason: RejectReason) -> Self {
        Rejection { reason, details: RejectDetails::default() }
    }

    fn message(reason: RejectReason, text: &str) -> Self {
        Rejection { reason, details: RejectDetails::message(text) }
    }
}

pub struct RiskGate {
    cfg: RiskConfig,
    buckets: FxHashMap<TraderId, TokenBucket>,
}

impl RiskGate {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg, buckets: FxHashMap::default() }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    /// Admission check. `last_trade` anchors the price collar, `mark`
    /// anchors margin for market orders; both are read-only views of
    /// engine state captured before any mutation.
    #[allow(clippy::too_many_arguments)]
    pub fn pre_trade(
        &mut self,
        order: &OrderCheck<'_>,
        snapshot: &PositionSnapshot,
        last_trade: Option<Price>,
        mark: Option<Price>,
        halted: bool,
        frozen: bool,
        ts_ns: u64,
    ) -> Result<(), Rejection> {
        let result = self.run_checks(order, snapshot, last_trade, mark, halted, frozen, ts_ns);
        if let Err(rejection) = &result {
            debug!(
                trader = %order.trader_id,
                reason = ?rejection.reason,
                "order rejected pre-trade"
            );
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_checks(
        &mut self,
        order: &OrderCheck<'_>,
        snapshot: &PositionSnapshot,
        last_trade: Option<Price>,
        mark: Option<Price>,
        halted: bool,
        frozen: bool,
        ts_ns: u64,
    ) -> Result<(), Rejection> {
        if halted {
            return Err(Rejection::bare(RejectReason::ExchangeHalted));
        }
        if frozen {
            return Err(Rejection::bare(RejectReason::AccountFrozen));
        }

        self.check_fields(order)?;

        if let (OrderKind::Limit, Some(price), Some(reference)) =
            (order.kind, order.price, last_trade)
        {
            self.check_collar(price, reference)?;
        }

        if order.qty > self.cfg.max_order_qty {
            return Err(Rejection {
                reason: RejectReason::OrderSizeCap,
                details: RejectDetails {
                    limit: Some(self.cfg.max_order_qty as u64),
                    ..Default::default()
                },
            });
        }

        if let (OrderKind::Limit, Some(price)) = (order.kind, order.price) {
            if price.notional(order.qty).raw().abs() > self.cfg.max_order_notional {
                return Err(Rejection::bare(RejectReason::NotionalCap));
            }
        }

        let rate = self.cfg.rate_limit_tokens_per_sec;
        let burst = self.cfg.rate_limit_burst;
        let bucket = self
            .buckets
            .entry(order.trader_id.clone())
            .or_insert_with(|| TokenBucket::new(rate, burst, ts_ns));
        if !bucket.try_acquire(ts_ns) {
            return Err(Rejection::bare(RejectReason::RateLimited));
        }

        if self.cfg.margin_mode != MarginMode::Disabled && !order.is_liquidation {
            self.check_initial_margin(order, snapshot, mark)?;
        }

        Ok(())
    }

    fn check_fields(&self, order: &OrderCheck<'_>) -> Result<(), Rejection> {
        if order.qty == 0 {
            return Err(Rejection::message(RejectReason::InvalidMessage, "qty must be > 0"));
        }
        match (order.kind, order.price) {
            (OrderKind::Limit, None) => {
                return Err(Rejection::message(
                    RejectReason::InvalidMessage,
                    "limit orders require a price",
                ));
            }
            (OrderKind::Market, Some(_)) => {
                return Err(Rejection::message(
                    RejectReason::InvalidMessage,
                    "market orders must not carry a price",
                ));
            }
            (OrderKind::Limit, Some(price)) => {
                if !price.is_positive() || price.raw() % self.cfg.tick_size != 0 {
                    return Err(Rejection::message(
                        RejectReason::InvalidMessage,
                        "price must be a positive multiple of the tick",
                    ));
                }
            }
            (OrderKind::Market, None) => {}
        }
        Ok(())
    }

    fn check_collar(&self, price: Price, reference: Price) -> Result<(), Rejection> {
        let Some(diff) = price.abs_diff(reference) else {
            return Err(Rejection::message(RejectReason::InvalidMessage, "price out of range"));
        };
        let allowed = Notional::from_raw(reference.raw() as i128)
            .abs()
            .apply_rate(self.cfg.price_collar_pct);
        let within = allowed.is_some_and(|band| Notional::from_raw(diff.raw() as i128) <= band);
        if !within {
            return Err(Rejection {
                reason: RejectReason::InvalidPriceReference,
                details: RejectDetails { reference_price: Some(reference), ..Default::default() },
            });
        }
        Ok(())
    }

    fn check_initial_margin(
        &self,
        order: &OrderCheck<'_>,
        snapshot: &PositionSnapshot,
        mark: Option<Price>,
    ) -> Result<(), Rejection> {
        let delta = match order.side {
            Side::Buy => order.qty as i64,
            Side::Sell => -(order.qty as i64),
        };
        let projected = snapshot.position.saturating_add(delta);

        // Worst case fill values at the limit price; market orders are
        // valued at the mark and cannot be margined without one.
        let reference = match order.kind {
            OrderKind::Limit => order.price.expect("validated above"),
            OrderKind::Market => match mark {
                Some(mark) => mark,
                None => {
                    return Err(Rejection::message(
                        RejectReason::InvalidPriceReference,
                        "no reference price for market order margin",
                    ));
                }
            },
        };

        let required = initial_margin_required(projected, reference, self.cfg.initial_margin_rate)
            .ok_or_else(|| {
                Rejection::message(RejectReason::InvalidMessage, "margin computation overflow")
            })?;
        if snapshot.total_equity < required {
            return Err(Rejection {
                reason: RejectReason::InitialMarginInsufficient,
                details: RejectDetails {
                    equity: Some(snapshot.total_equity),
                    required_margin: Some(required),
                    ..Default::default()
                },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel::SCALE;
    use position_engine::PositionEngine;

    fn gate(cfg: RiskConfig) -> RiskGate {
        cfg.validate().unwrap();
        RiskGate::new(cfg)
    }

    fn snapshot(engine: &PositionEngine, trader: &str, mark: Option<Price>) -> PositionSnapshot {
        engine.snapshot(trader, mark).unwrap()
    }

    fn limit_order<'a>(trader: &'a TraderId, price: i64, qty: Qty) -> OrderCheck<'a> {
        OrderCheck {
            trader_id: trader,
            side: Side::Buy,
            kind: OrderKind::Limit,
            price: Some(Price::from_units(price)),
            qty,
            is_liquidation: false,
        }
    }

    #[test]
    fn halted_rejects_before_anything_else() {
        let mut gate = gate(RiskConfig::default());
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        // Even a malformed order reports the halt first.
        let order = OrderCheck { qty: 0, ..limit_order(&t, 100, 1) };
        let err = gate
            .pre_trade(&order, &snapshot(&positions, "A", None), None, None, true, false, 0)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::ExchangeHalted);
    }

    #[test]
    fn frozen_account_rejects() {
        let mut gate = gate(RiskConfig::default());
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let err = gate
            .pre_trade(
                &limit_order(&t, 100, 1),
                &snapshot(&positions, "A", None),
                None,
                None,
                false,
                true,
                0,
            )
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::AccountFrozen);
    }

    #[test]
    fn field_validation_catches_shape_errors() {
        let mut gate = gate(RiskConfig { margin_mode: MarginMode::Disabled, ..Default::default() });
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);

        let order = OrderCheck { qty: 0, ..limit_order(&t, 100, 1) };
        assert_eq!(
            gate.pre_trade(&order, &snap, None, None, false, false, 0).unwrap_err().reason,
            RejectReason::InvalidMessage
        );

        let order = OrderCheck { price: None, ..limit_order(&t, 100, 1) };
        assert_eq!(
            gate.pre_trade(&order, &snap, None, None, false, false, 0).unwrap_err().reason,
            RejectReason::InvalidMessage
        );

        let order = OrderCheck { kind: OrderKind::Market, ..limit_order(&t, 100, 1) };
        assert_eq!(
            gate.pre_trade(&order, &snap, None, None, false, false, 0).unwrap_err().reason,
            RejectReason::InvalidMessage
        );
    }

    #[test]
    fn tick_alignment_enforced() {
        let cfg = RiskConfig {
            tick_size: SCALE / 100, // one cent
            margin_mode: MarginMode::Disabled,
            ..Default::default()
        };
        let mut gate = gate(cfg);
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);

        let order = OrderCheck {
            price: Some(Price::from_raw(10_000_000_001)),
            ..limit_order(&t, 100, 1)
        };
        assert_eq!(
            gate.pre_trade(&order, &snap, None, None, false, false, 0).unwrap_err().reason,
            RejectReason::InvalidMessage
        );
        let order =
            OrderCheck { price: Some("100.01".parse().unwrap()), ..limit_order(&t, 100, 1) };
        gate.pre_trade(&order, &snap, None, None, false, false, 0).unwrap();
    }

    #[test]
    fn collar_binds_only_with_a_reference() {
        let mut gate = gate(RiskConfig { margin_mode: MarginMode::Disabled, ..Default::default() });
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);

        // No last trade: any price is fine.
        gate.pre_trade(&limit_order(&t, 500, 1), &snap, None, None, false, false, 0).unwrap();

        // Reference at 100 with the default 5% collar: 105 passes, 106 fails.
        let reference = Some(Price::from_units(100));
        gate.pre_trade(&limit_order(&t, 105, 1), &snap, reference, None, false, false, 0).unwrap();
        let err = gate
            .pre_trade(&limit_order(&t, 106, 1), &snap, reference, None, false, false, 0)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidPriceReference);
        assert_eq!(err.details.reference_price, Some(Price::from_units(100)));
    }

    #[test]
    fn size_and_notional_caps() {
        let cfg = RiskConfig {
            max_order_qty: 100,
            max_order_notional: Notional::from_units(5_000).raw(),
            margin_mode: MarginMode::Disabled,
            ..Default::default()
        };
        let mut gate = gate(cfg);
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);

        let err = gate
            .pre_trade(&limit_order(&t, 10, 101), &snap, None, None, false, false, 0)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::OrderSizeCap);
        assert_eq!(err.details.limit, Some(100));

        // 100 x 51 = 5100 notional over the 5000 cap.
        let err = gate
            .pre_trade(&limit_order(&t, 100, 51), &snap, None, None, false, false, 0)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::NotionalCap);
        gate.pre_trade(&limit_order(&t, 100, 50), &snap, None, None, false, false, 0).unwrap();
    }

    #[test]
    fn rate_limit_consumes_one_token_per_admitted_order() {
        let cfg = RiskConfig {
            rate_limit_tokens_per_sec: 1,
            rate_limit_burst: 2,
            margin_mode: MarginMode::Disabled,
            ..Default::default()
        };
        let mut gate = gate(cfg);
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);

        gate.pre_trade(&limit_order(&t, 100, 1), &snap, None, None, false, false, 0).unwrap();
        gate.pre_trade(&limit_order(&t, 100, 1), &snap, None, None, false, false, 0).unwrap();
        let err = gate
            .pre_trade(&limit_order(&t, 100, 1), &snap, None, None, false, false, 0)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::RateLimited);

        // A second later one token is back.
        gate.pre_trade(&limit_order(&t, 100, 1), &snap, None, None, false, false, 1_000_000_000)
            .unwrap();
    }

    #[test]
    fn initial_margin_gates_projected_exposure() {
        let mut gate = gate(RiskConfig::default());
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);

        // 50 @ 100: margin 1000 against 10000 equity.
        gate.pre_trade(&limit_order(&t, 100, 50), &snap, None, None, false, false, 0).unwrap();

        // 600 @ 100: margin 12000 exceeds equity.
        let err = gate
            .pre_trade(&limit_order(&t, 100, 600), &snap, None, None, false, false, 0)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::InitialMarginInsufficient);
        assert_eq!(err.details.equity, Some(Notional::from_units(10_000)));
        assert_eq!(err.details.required_margin, Some(Notional::from_units(12_000)));
    }

    #[test]
    fn market_order_margin_needs_a_mark() {
        let mut gate = gate(RiskConfig::default());
        let positions = PositionEngine::new(Notional::from_units(10_000));
        let t = "A".to_string();
        let snap = snapshot(&positions, "A", None);
        let order = OrderCheck {
            kind: OrderKind::Market,
            price: None,
            ..limit_order(&t, 100, 10)
        };

        let err = gate.pre_trade(&order, &snap, None, None, false, false, 0).unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidPriceReference);

        gate.pre_trade(&order, &snap, None, Some(Price::from_units(100)), false, false, 0)
            .unwrap();
    }

    #[test]
    fn liquidation_bypasses_margin_only() {
        let mut gate = gate(RiskConfig::default());
        let mut positions = PositionEngine::new(Notional::from_units(1_000));
        let t = "A".to_string();
        // Long 100 @ 100 against 1000 capital leaves equity deep negative,
        // so even a position-closing order fails the margin check.
        positions.apply_fill(&t, Side::Buy, Price::from_units(100), 100).unwrap();
        let mark = Some(Price::from_units(100));
        let snap = snapshot(&positions, "A", mark);
        assert!(snap.total_equity < Notional::ZERO);

        let close = OrderCheck {
            side: Side::Sell,
            kind: OrderKind::Market,
            price: None,
            qty: 100,
            trader_id: &t,
            is_liquidation: false,
        };
        let err = gate.pre_trade(&close, &snap, None, mark, false, false, 0).unwrap_err();
        assert_eq!(err.reason, RejectReason::InitialMarginInsufficient);

        let forced = OrderCheck { is_liquidation: true, ..close };
        gate.pre_trade(&forced, &snap, None, mark, false, false, 0).unwrap();

        // The size cap still applies even to liquidations.
        let oversized = OrderCheck { qty: 20_000, is_liquidation: true, ..close };
        let err = gate.pre_trade(&oversized, &snap, None, mark, false, false, 0).unwrap_err();
        assert_eq!(err.reason, RejectReason::OrderSizeCap);
    }
}
