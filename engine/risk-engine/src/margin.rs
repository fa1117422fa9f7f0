// Margin requirements. Requirement = |position| x reference price x rate,
// computed in i128 fixed point with truncating rate application.

use gavel::{Notional, Price};

/// Initial margin required to hold `projected_position` valued at `reference`.
pub fn initial_margin_required(
    projected_position: i64,
    reference: Price,
    rate: i64,
) -> Option<Notional> {
    requirement(projected_position, reference, rate)
}

/// Maintenance margin required for the current net position at `mark`.
pub fn maintenance_margin_required(position: i64, mark: Price, rate: i64) -> Option<Notional> {
    requirement(position, mark, rate)
}

/// A flat position never breaches; otherwise equity must stay at or above
/// the maintenance requirement.
pub fn maintenance_breached(position: i64, equity: Notional, requirement: Notional) -> bool {
    position != 0 && equity < requirement
}

fn requirement(position: i64, reference: Price, rate: i64) -> Option<Notional> {
    let exposure = reference.raw() as i128 * position as i128;
    Notional::from_raw(exposure).abs().apply_rate(rate)
}
