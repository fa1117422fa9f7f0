// engine/gavel/src/fixed.rs

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Scale factor for all prices and monetary amounts: 10^8.
///
/// `$100.05` is stored as `10_005_000_000`. Addition and subtraction are
/// exact; division truncates toward zero and happens only in weighted
/// averages and midpoints.
pub const SCALE: i64 = 100_000_000;

/// Number of fractional digits carried by the fixed-point representation.
pub const DECIMALS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFixedError {
    #[error("empty or malformed decimal literal")]
    Malformed,
    #[error("more than {DECIMALS} fractional digits")]
    TooPrecise,
    #[error("value out of range")]
    OutOfRange,
}

/// Fixed-point price: `i64` scaled by [`SCALE`].
///
/// 8 bytes, `Copy`, totally ordered. All matching and accounting math on
/// prices is integer math; floats appear only when formatting for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(i64);

impl Price {
    pub const ZERO: Price = Price(0);

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Price(raw)
    }

    /// Whole units, no fractional part. `Price::from_units(100)` is $100.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Price(units * SCALE)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Exact notional: price x quantity, widened to `i128`.
    ///
    /// The product of any `i64` price and `u32` quantity fits an `i128`,
    /// so this can never overflow.
    #[inline]
    pub fn notional(self, qty: u32) -> Notional {
        Notional(self.0 as i128 * qty as i128)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Price) -> Option<Price> {
        self.0.checked_sub(rhs.0).map(Price)
    }

    #[inline]
    pub fn abs_diff(self, rhs: Price) -> Option<Price> {
        self.0.checked_sub(rhs.0).and_then(i64::checked_abs).map(Price)
    }

    /// Midpoint of two prices, truncated toward zero.
    #[inline]
    pub fn midpoint(self, other: Price) -> Price {
        Price(((self.0 as i128 + other.0 as i128) / 2) as i64)
    }

    /// Quantity-weighted average of an existing entry price and a new fill.
    /// Division truncates toward zero; never routes through a float.
    pub fn weighted_avg(old_avg: Price, old_qty: u64, fill: Price, fill_qty: u64) -> Price {
        let total = old_qty as i128 + fill_qty as i128;
        if total == 0 {
            return Price::ZERO;
        }
        let sum = old_avg.0 as i128 * old_qty as i128 + fill.0 as i128 * fill_qty as i128;
        Price((sum / total) as i64)
    }

    /// Lossy float view for display and logs only.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn from_f64(value: f64) -> Self {
        Price((value * SCALE as f64).round() as i64)
    }
}

impl FromStr for Price {
    type Err = ParseFixedError;

    /// Parses a decimal literal like `"100.05"` or `"-3"`. This is the only
    /// path from external text into the fixed-point domain.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseFixedError::Malformed);
        }
        let (int_str, frac_str) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        let negative = int_str.starts_with('-');
        let int_part: i64 = if int_str == "-" {
            0
        } else {
            int_str.parse().map_err(|_| ParseFixedError::Malformed)?
        };
        if frac_str.len() > DECIMALS as usize {
            return Err(ParseFixedError::TooPrecise);
        }
        let frac_part: i64 = if frac_str.is_empty() {
            0
        } else {
            if !frac_str.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseFixedError::Malformed);
            }
            let digits: i64 = frac_str.parse().map_err(|_| ParseFixedError::Malformed)?;
            digits * 10i64.pow(DECIMALS - frac_str.len() as u32)
        };
        let magnitude = int_part
            .checked_abs()
            .and_then(|i| i.checked_mul(SCALE))
            .and_then(|i| i.checked_add(frac_part))
            .ok_or(ParseFixedError::OutOfRange)?;
        Ok(Price(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let mag = self.0.unsigned_abs();
        let int_part = mag / SCALE as u64;
        let mut frac = mag % SCALE as u64;
        if frac == 0 {
            return write!(f, "{sign}{int_part}");
        }
        let mut digits = DECIMALS;
        while frac % 10 == 0 {
            frac /= 10;
            digits -= 1;
        }
        write!(f, "{sign}{int_part}.{frac:0width$}", width = digits as usize)
    }
}

// Prices cross the wire as exact decimal strings so the journal round-trips
// bit-for-bit. Numbers are accepted on input for client convenience.
impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Int(i64),
            Float(f64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Int(i) => {
                i.checked_mul(SCALE).map(Price).ok_or_else(|| serde::de::Error::custom("price out of range"))
            }
            Repr::Float(v) => Ok(Price::from_f64(v)),
        }
    }
}

/// Fixed-point monetary amount: `i128` at the same 10^8 scale.
///
/// Cash, PnL, margin, and equity live here. A single notional is a price
/// times a quantity and always fits; running sums use checked arithmetic so
/// overflow surfaces as an engine fault instead of a silent wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Notional(i128);

impl Notional {
    pub const ZERO: Notional = Notional(0);

    #[inline]
    pub const fn from_raw(raw: i128) -> Self {
        Notional(raw)
    }

    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Notional(units as i128 * SCALE as i128)
    }

    #[inline]
    pub const fn raw(self) -> i128 {
        self.0
    }

    #[inline]
    pub fn abs(self) -> Notional {
        Notional(self.0.abs())
    }

    #[inline]
    pub fn checked_add(self, rhs: Notional) -> Option<Notional> {
        self.0.checked_add(rhs.0).map(Notional)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Notional) -> Option<Notional> {
        self.0.checked_sub(rhs.0).map(Notional)
    }

    /// Applies a 10^8-scaled fraction, truncating toward zero.
    /// `Notional::from_units(1000).apply_rate(5_000_000)` is 50 units.
    #[inline]
    pub fn apply_rate(self, rate: i64) -> Option<Notional> {
        self.0.checked_mul(rate as i128).map(|x| Notional(x / SCALE as i128))
    }
}

impl fmt::Display for Notional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let mag = self.0.unsigned_abs();
        let int_part = mag / SCALE as u128;
        let mut frac = mag % SCALE as u128;
        if frac == 0 {
            return write!(f, "{sign}{int_part}");
        }
        let mut digits = DECIMALS;
        while frac % 10 == 0 {
            frac /= 10;
            digits -= 1;
        }
        write!(f, "{sign}{int_part}.{frac:0width$}", width = digits as usize)
    }
}

impl FromStr for Notional {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Reuse the Price parser; every wire-visible amount fits an i64.
        Price::from_str(s).map(|p| Notional(p.raw() as i128))
    }
}

impl Serialize for Notional {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Notional {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Same accepted shapes as Price; amounts crossing the boundary as
        // text or units always fit an i64.
        Price::deserialize(deserializer).map(|p| Notional(p.raw() as i128))
    }
}
