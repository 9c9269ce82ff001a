//! Constant-product AMM façade over [`crate::pair::Pair`] and
//! [`crate::streamable_token`] (component C5, spec §4.5).

use crate::address::Address;
use crate::bignum::{floor_div, isqrt, Amount};
use crate::config::{Config, MINIMUM_LIQUIDITY};
use crate::error::EngineError;
use crate::pair::Pair;
use crate::store;
use crate::streamable_token;
use num_traits::Zero;
use rusqlite::Connection;

/// `floor(amount_a * reserve_b / reserve_a)`, the optimal counterpart
/// amount for a deposit at the pool's current price.
pub fn quote(amount_a: &Amount, reserve_a: &Amount, reserve_b: &Amount) -> Amount {
    floor_div(&(amount_a * reserve_b), reserve_a)
}

/// Constant-product spot output for `amount_in` against `(reserve_in,
/// reserve_out)`, with a fee expressed in thousandths (spec §4.5
/// `USER_FEES`, default 0).
pub fn get_amount_out(
    amount_in: &Amount,
    reserve_in: &Amount,
    reserve_out: &Amount,
    fee_bps: u32,
) -> Result<Amount, EngineError> {
    if *amount_in <= Amount::zero() {
        return Err(EngineError::InvalidArgument("amount_in must be positive".into()));
    }
    if *reserve_in <= Amount::zero() || *reserve_out <= Amount::zero() {
        return Err(EngineError::InvalidArgument("reserves must be positive".into()));
    }
    let amount_in_with_fee = amount_in * Amount::from(1000 - fee_bps);
    let numerator = &amount_in_with_fee * reserve_out;
    let denominator = reserve_in * Amount::from(1000) + &amount_in_with_fee;
    Ok(floor_div(&numerator, &denominator))
}

#[allow(clippy::too_many_arguments)]
pub fn add_liquidity(
    conn: &Connection,
    token_a: Address,
    token_b: Address,
    amount_a_desired: &Amount,
    amount_b_desired: &Amount,
    amount_a_min: &Amount,
    amount_b_min: &Amount,
    to: &Address,
    sender: &Address,
    now: i64,
) -> Result<Amount, EngineError> {
    let pair = Pair::for_tokens(token_a, token_b);
    store::upsert_pair(conn, &pair.address, &pair.token0, &pair.token1)?;
    let (reserve0, reserve1) = pair.get_reserves(conn, now)?;
    let (reserve_a, reserve_b) = if token_a == pair.token0 {
        (reserve0.clone(), reserve1.clone())
    } else {
        (reserve1.clone(), reserve0.clone())
    };

    let (amount_a, amount_b) = if reserve_a.is_zero() && reserve_b.is_zero() {
        (amount_a_desired.clone(), amount_b_desired.clone())
    } else {
        let b_optimal = quote(amount_a_desired, &reserve_a, &reserve_b);
        if b_optimal <= *amount_b_desired {
            if b_optimal < *amount_b_min {
                return Err(EngineError::InvalidArgument("insufficient b amount".into()));
            }
            (amount_a_desired.clone(), b_optimal)
        } else {
            let a_optimal = quote(amount_b_desired, &reserve_b, &reserve_a);
            if a_optimal > *amount_a_desired || a_optimal < *amount_a_min {
                return Err(EngineError::InvalidArgument("insufficient a amount".into()));
            }
            (a_optimal, amount_b_desired.clone())
        }
    };

    streamable_token::transfer(conn, &token_a, &pair.address, &amount_a, 0, 0, sender, now, None)?;
    streamable_token::transfer(conn, &token_b, &pair.address, &amount_b, 0, 0, sender, now, None)?;

    let total_supply = store::get_total_supply(conn, &pair.address)?;
    let liquidity = if total_supply.is_zero() {
        let minted = isqrt(&(&amount_a * &amount_b));
        let min_liquidity = Amount::from(MINIMUM_LIQUIDITY);
        streamable_token::mint(conn, &pair.address, &min_liquidity, &Address::ZERO)?;
        minted - min_liquidity
    } else {
        std::cmp::min(
            floor_div(&(&amount_a * &total_supply), &reserve_a),
            floor_div(&(&amount_b * &total_supply), &reserve_b),
        )
    };

    if liquidity <= Amount::zero() {
        return Err(EngineError::InvariantViolation("minted liquidity must be positive".into()));
    }
    streamable_token::mint(conn, &pair.address, &liquidity, to)?;
    Ok(liquidity)
}

#[allow(clippy::too_many_arguments)]
pub fn remove_liquidity(
    conn: &Connection,
    token_a: Address,
    token_b: Address,
    liquidity: &Amount,
    amount_a_min: &Amount,
    amount_b_min: &Amount,
    to: &Address,
    sender: &Address,
    now: i64,
) -> Result<(Amount, Amount), EngineError> {
    let pair = Pair::for_tokens(token_a, token_b);

    streamable_token::transfer(conn, &pair.address, &pair.address, liquidity, 0, 0, sender, now, None)?;

    let total_supply = store::get_total_supply(conn, &pair.address)?;
    let (reserve0, reserve1) = pair.get_reserves(conn, now)?;
    let amount0 = floor_div(&(liquidity * &reserve0), &total_supply);
    let amount1 = floor_div(&(liquidity * &reserve1), &total_supply);

    // Burning is modelled as the pair forwarding the LP it just received to
    // the zero address, matching the permanent MIN_LIQ lock of add_liquidity
    // rather than reducing total_supply.
    streamable_token::transfer(conn, &pair.address, &Address::ZERO, liquidity, 0, 0, &pair.address, now, None)?;

    streamable_token::transfer(conn, &pair.token0, to, &amount0, 0, 0, &pair.address, now, None)?;
    streamable_token::transfer(conn, &pair.token1, to, &amount1, 0, 0, &pair.address, now, None)?;

    let (amount_a, amount_b) = if token_a == pair.token0 {
        (amount0, amount1)
    } else {
        (amount1, amount0)
    };
    if amount_a < *amount_a_min || amount_b < *amount_b_min {
        return Err(EngineError::InvalidArgument("removed amounts below requested minimums".into()));
    }
    Ok((amount_a, amount_b))
}

#[allow(clippy::too_many_arguments)]
pub fn swap_exact_tokens_for_tokens(
    conn: &Connection,
    config: &Config,
    amount_in: &Amount,
    amount_out_min: &Amount,
    path: &[Address],
    start: i64,
    duration: i64,
    to: &Address,
    sender: &Address,
    now: i64,
) -> Result<Amount, EngineError> {
    if path.len() != 2 {
        return Err(EngineError::InvalidArgument("path must name exactly two tokens".into()));
    }
    if *amount_in <= Amount::zero() {
        return Err(EngineError::InvalidArgument("amount_in must be positive".into()));
    }
    if duration < 0 {
        return Err(EngineError::InvalidArgument("duration must be non-negative".into()));
    }
    let start = if start == 0 { now } else { start };
    if start < now {
        return Err(EngineError::InvalidArgument("start must not precede now".into()));
    }

    let token_in = path[0];
    let token_out = path[1];
    let pair = Pair::for_tokens(token_in, token_out);
    store::upsert_pair(conn, &pair.address, &pair.token0, &pair.token1)?;
    let swap_id = store::create_swap(conn, &pair.address)?;

    if duration == 0 {
        let (reserve0, reserve1) = pair.get_reserves(conn, start)?;
        let (reserve_in, reserve_out) = if token_in == pair.token0 {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };
        let amount_out = get_amount_out(amount_in, &reserve_in, &reserve_out, config.user_fee_bps)?;
        if amount_out < *amount_out_min {
            return Err(EngineError::InvalidArgument("amount_out below requested minimum".into()));
        }
        let k_before = &reserve_in * &reserve_out;
        let k_after = (&reserve_in + amount_in) * (&reserve_out - &amount_out);
        if k_after < k_before {
            return Err(EngineError::InvariantViolation("swap would decrease k".into()));
        }

        streamable_token::transfer(conn, &token_in, &pair.address, amount_in, 0, start, sender, now, Some(swap_id))?;
        streamable_token::transfer(conn, &token_out, to, &amount_out, 0, start, &pair.address, now, Some(swap_id))?;
        Ok(amount_out)
    } else {
        streamable_token::transfer(conn, &token_in, &pair.address, amount_in, duration, start, sender, now, Some(swap_id))?;
        streamable_token::transfer(conn, &token_out, to, &Amount::zero(), 0, start, &pair.address, now, Some(swap_id))?;
        Ok(Amount::zero())
    }
}
