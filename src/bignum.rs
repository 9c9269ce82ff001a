//! Arbitrary-precision amount handling.
//!
//! Balances, stream amounts, durations, and reserves are conceptually
//! unbounded integers (spec §9: "the wire format must not cap at 64 bits").
//! We carry them as `BigInt` everywhere in the kernel and only render to
//! (or parse from) decimal strings at the `Store` boundary, matching the
//! `balance TEXT` / `total_supply TEXT` columns of spec §6.

use crate::error::EngineError;
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{Signed, Zero};
use std::str::FromStr;

pub type Amount = BigInt;

pub fn to_decimal_string(v: &Amount) -> String {
    v.to_string()
}

pub fn from_decimal_string(s: &str) -> Result<Amount, EngineError> {
    BigInt::from_str(s).map_err(|e| EngineError::DecodeError(format!("bad integer {s:?}: {e}")))
}

/// Floor division, matching Python's `//` used throughout the source
/// kernel. All callers in this crate divide non-negative quantities, where
/// floor and truncating division coincide, but we use the explicit floor
/// variant so the intent survives if that ever changes.
pub fn floor_div(numerator: &Amount, denominator: &Amount) -> Amount {
    numerator.div_floor(denominator)
}

/// Integer square root, floored. Used by `AMM::add_liquidity` to mint the
/// initial LP supply as `floor(sqrt(a * b))`.
pub fn isqrt(v: &Amount) -> Amount {
    if v.is_negative() {
        return Amount::zero();
    }
    let (_, magnitude) = v.clone().into_parts();
    let root: BigUint = magnitude.sqrt();
    BigInt::from_biguint(Sign::Plus, root)
}
