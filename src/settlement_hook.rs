//! Streaming-AMM settlement hook (component C6, spec §4.6 — "the hard
//! part"). Walks every pending cross-stream swap paying into `wallet` on a
//! pair involving `token`, integrates the constant-product curve piecewise
//! between the pair's watermark and `to_ts`, and rewrites the dependent
//! from-pair streams' `(amount, duration)` so later balance queries see the
//! realised payout.
//!
//! Broken out of [`crate::streamable_token`] per spec §9 to sidestep the
//! cyclic reference: the hook reads reserves through
//! [`crate::streamable_token::effective_balance`], which never itself
//! invokes the hook, rather than through `settle`.

use crate::address::Address;
use crate::amm::get_amount_out;
use crate::bignum::{floor_div, Amount};
use crate::config::Config;
use crate::error::EngineError;
use crate::store::{self, SwapStreams};
use crate::streamable_token::effective_balance;
use num_traits::Zero;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

struct StreamUpdate {
    amount: Amount,
    duration: i64,
}

/// Advance every pair reachable from non-accrued swap streams paying
/// `wallet` in `token` up to `to_ts`.
pub fn run(conn: &Connection, token: &Address, wallet: &Address, to_ts: i64) -> Result<(), EngineError> {
    let config = Config::default();
    for updatable in store::updatable_pairs(conn, wallet, token, to_ts)? {
        if to_ts <= updatable.last_processed_ts {
            continue;
        }
        advance_pair(
            conn,
            &config,
            &updatable.pair_address,
            updatable.token0,
            updatable.token1,
            updatable.last_processed_ts,
            to_ts,
        )?;
    }
    Ok(())
}

fn advance_pair(
    conn: &Connection,
    config: &Config,
    pair_address: &Address,
    token0: Address,
    token1: Address,
    last_processed_ts: i64,
    to_ts: i64,
) -> Result<(), EngineError> {
    let mut r0 = effective_balance(conn, &token0, pair_address, last_processed_ts)?;
    let mut r1 = effective_balance(conn, &token1, pair_address, last_processed_ts)?;

    let swaps = store::swaps_for_pair(conn, pair_address, to_ts)?;

    let mut updates: BTreeMap<i64, StreamUpdate> = BTreeMap::new();
    for s in &swaps {
        updates.insert(
            s.from_pair_stream_id,
            StreamUpdate {
                amount: s.from_pair_amount.clone(),
                duration: s.from_pair_duration,
            },
        );
    }

    let mut breakpoints: BTreeSet<i64> = BTreeSet::new();
    breakpoints.insert(to_ts);
    for s in &swaps {
        let to_pair_end = s.to_pair_start_ts + s.to_pair_duration;
        let from_pair_end = s.from_pair_start_ts + s.from_pair_duration;
        let candidate = std::cmp::min(std::cmp::min(to_pair_end, from_pair_end), to_ts);
        if candidate > last_processed_ts {
            breakpoints.insert(candidate);
        }
    }

    let mut prev = last_processed_ts;
    for t in breakpoints {
        if t <= prev {
            continue;
        }
        step(config, &swaps, &mut updates, &token0, prev, t, &mut r0, &mut r1)?;
        prev = t;
    }

    let batch: Vec<(i64, i64, Amount)> = updates
        .into_iter()
        .map(|(id, u)| (id, u.duration, u.amount))
        .collect();
    store::update_stream_amount_duration_batch(conn, &batch)?;
    store::set_last_processed_ts(conn, pair_address, to_ts)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn step(
    config: &Config,
    swaps: &[SwapStreams],
    updates: &mut BTreeMap<i64, StreamUpdate>,
    token0: &Address,
    prev: i64,
    t: i64,
    r0: &mut Amount,
    r1: &mut Amount,
) -> Result<(), EngineError> {
    let width = Amount::from(t - prev);

    struct Active<'a> {
        swap: &'a SwapStreams,
        to_pair_is_token0: bool,
        increment_in: Amount,
    }

    let mut active = Vec::new();
    let mut token0_in = Amount::zero();
    let mut token1_in = Amount::zero();

    for s in swaps {
        let to_pair_end = s.to_pair_start_ts + s.to_pair_duration;
        if s.to_pair_start_ts > prev || to_pair_end <= prev {
            continue;
        }
        let rate = if s.to_pair_duration > 0 {
            floor_div(&s.to_pair_amount, &Amount::from(s.to_pair_duration))
        } else {
            Amount::zero()
        };
        let increment_in = &rate * &width;
        let to_pair_is_token0 = s.from_pair_token != *token0;
        if to_pair_is_token0 {
            token0_in = &token0_in + &increment_in;
        } else {
            token1_in = &token1_in + &increment_in;
        }
        active.push(Active {
            swap: s,
            to_pair_is_token0,
            increment_in,
        });
    }

    let out1 = if token0_in > Amount::zero() {
        get_amount_out(&token0_in, r0, r1, config.user_fee_bps)?
    } else {
        Amount::zero()
    };
    let out0 = if token1_in > Amount::zero() {
        get_amount_out(&token1_in, r1, r0, config.user_fee_bps)?
    } else {
        Amount::zero()
    };

    let k_before = &*r0 * &*r1;
    let r0_after = &*r0 + &token0_in - &out0;
    let r1_after = &*r1 + &token1_in - &out1;
    if &r0_after * &r1_after < k_before {
        return Err(EngineError::InvariantViolation(
            "settlement increment would decrease the pair's k-invariant".into(),
        ));
    }

    for a in &active {
        let (opposite_out, total_in) = if a.to_pair_is_token0 {
            (&out1, &token0_in)
        } else {
            (&out0, &token1_in)
        };
        let payout = if total_in.is_zero() {
            Amount::zero()
        } else {
            floor_div(&(&a.increment_in * opposite_out), total_in)
        };
        let entry = updates.get_mut(&a.swap.from_pair_stream_id).expect(
            "every swap returned by swaps_for_pair seeded an update entry",
        );
        entry.amount = &entry.amount + &payout;
        entry.duration += t - prev;
    }

    *r0 = r0_after;
    *r1 = r1_after;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bootstrap_schema;
    use crate::streamable_token;
    use crate::{amm, pair::Pair};

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from_bytes(bytes)
    }

    #[test]
    fn streamed_swap_converges_to_spot_quote() {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap_schema(&conn).unwrap();
        let config = Config::default();
        let t1 = addr(1);
        let t2 = addr(2);
        let lp = addr(10);
        let trader = addr(11);

        streamable_token::mint(&conn, &t1, &Amount::from(10_i64.pow(18)), &lp).unwrap();
        streamable_token::mint(&conn, &t2, &Amount::from(10_i64.pow(18)), &lp).unwrap();
        amm::add_liquidity(
            &conn,
            t1,
            t2,
            &Amount::from(10_i64.pow(18)),
            &Amount::from(10_i64.pow(18)),
            &Amount::zero(),
            &Amount::zero(),
            &lp,
            &lp,
            0,
        )
        .unwrap();

        let spot_amount_in = Amount::from(30_i64) * Amount::from(10_i64.pow(18));
        let spot_out = get_amount_out(
            &spot_amount_in,
            &Amount::from(10_i64.pow(18)),
            &Amount::from(10_i64.pow(18)),
            config.user_fee_bps,
        )
        .unwrap();

        streamable_token::mint(&conn, &t1, &spot_amount_in, &trader).unwrap();
        amm::swap_exact_tokens_for_tokens(
            &conn,
            &config,
            &spot_amount_in,
            &Amount::zero(),
            &[t1, t2],
            100,
            10_000,
            &trader,
            &trader,
            100,
        )
        .unwrap();

        let _pair = Pair::for_tokens(t1, t2);
        run(&conn, &t2, &trader, 10_100).unwrap();

        let trader_out = effective_balance(&conn, &t2, &trader, 10_100).unwrap();
        let error = (&trader_out - &spot_out).abs();
        assert!(error <= Amount::from(10_000), "error {error} too large");
    }
}
