//! Engine-wide tunables.
//!
//! A host may run several independent engines (one per test, one per
//! simulation), so `Config` is an ordinary value threaded explicitly into
//! every operation that needs it rather than a singleton looked up from
//! the store.

/// AMM swap fee, expressed in thousandths (spec §4.5 `USER_FEES`). The
/// source kernel ships with this at zero; non-zero values are supported by
/// [`crate::amm::get_amount_out`] but no caller in this crate sets one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub user_fee_bps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config { user_fee_bps: 0 }
    }
}

/// LP tokens permanently locked to the zero address on the first
/// `add_liquidity` call for a pair (spec §4.5 `MIN_LIQ`).
pub const MINIMUM_LIQUIDITY: i64 = 100_000;
