//! LP token wrapper around a two-token pool (component C4, spec §4.4).

use crate::address::{self, Address};
use crate::bignum::Amount;
use crate::error::EngineError;
use crate::streamable_token;
use rusqlite::Connection;

/// A pair *is* a [`crate::streamable_token`] token (its LP token), plus the
/// two underlying tokens it holds reserves of, sorted lexicographically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pair {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
}

impl Pair {
    /// Derive the deterministic pair for an unordered token pair, sorting
    /// them first so the address is a pure function of `{a, b}` (spec §3,
    /// invariant 4).
    pub fn for_tokens(a: Address, b: Address) -> Self {
        let (token0, token1) = address::sort_tokens(a, b);
        Pair {
            address: address::pair_address(token0, token1),
            token0,
            token1,
        }
    }

    pub fn get_tokens(&self) -> (Address, Address) {
        (self.token0, self.token1)
    }

    /// `(balance_of(pair, token0, at), balance_of(pair, token1, at))`.
    pub fn get_reserves(&self, conn: &Connection, at: i64) -> Result<(Amount, Amount), EngineError> {
        let r0 = streamable_token::effective_balance(conn, &self.token0, &self.address, at)?;
        let r1 = streamable_token::effective_balance(conn, &self.token1, &self.address, at)?;
        Ok((r0, r1))
    }
}
