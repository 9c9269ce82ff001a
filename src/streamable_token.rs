//! Per-token balance kernel (component C3, spec §4.3).
//!
//! Every function here takes `token` and an explicit `Connection`/savepoint
//! handle rather than owning one, matching the free-function style of
//! [`crate::store`]. `settle` is called explicitly as the first step of
//! every mutating operation (spec §9: "model settle-before-mutation as a
//! mandatory first step... do not rely on hidden interception").

use crate::address::Address;
use crate::bignum::Amount;
use crate::error::EngineError;
use crate::settlement_hook;
use crate::store;
use crate::stream::Stream;
use num_traits::Zero;
use rusqlite::Connection;

/// Increase `to`'s stored balance and `token`'s total supply by `amount`.
#[tracing::instrument(skip(conn), fields(token = %token, to = %to, amount = %amount))]
pub fn mint(conn: &Connection, token: &Address, amount: &Amount, to: &Address) -> Result<(), EngineError> {
    if *amount <= Amount::zero() {
        return Err(EngineError::InvalidArgument("mint amount must be positive".into()));
    }
    store::upsert_token(conn, token, &Amount::zero())?;
    let balance = store::get_balance(conn, to, token)?;
    store::set_balance(conn, to, token, &(balance + amount))?;
    let supply = store::get_total_supply(conn, token)?;
    store::set_total_supply(conn, token, &(supply + amount))?;
    tracing::debug!("minted");
    Ok(())
}

/// Settle `sender`, then decrease its stored balance and `token`'s total
/// supply by `amount`, requiring `effective_balance(sender, now) >= amount`.
#[tracing::instrument(skip(conn), fields(token = %token, sender = %sender, amount = %amount, now))]
pub fn burn(
    conn: &Connection,
    token: &Address,
    amount: &Amount,
    sender: &Address,
    now: i64,
) -> Result<(), EngineError> {
    settle(conn, token, sender, now)?;
    let available = effective_balance(conn, token, sender, now)?;
    if available < *amount {
        return Err(EngineError::InsufficientBalance {
            context: format!("burn {amount} for {sender}: only {available} available"),
        });
    }
    let stored = store::get_balance(conn, sender, token)?;
    store::set_balance(conn, sender, token, &(stored - amount))?;
    let supply = store::get_total_supply(conn, token)?;
    store::set_total_supply(conn, token, &(supply - amount))?;
    Ok(())
}

/// Symmetric balance at `at`: stored balance plus every non-accrued
/// stream's signed contribution at `at` (spec §4.3 `balance_of` with
/// `count_received=true, recipient_until=at`). Does not settle; callers
/// that need a post-hook view go through [`future_balance_of`] or call
/// [`settle`] first.
pub fn effective_balance(
    conn: &Connection,
    token: &Address,
    account: &Address,
    at: i64,
) -> Result<Amount, EngineError> {
    let stored = store::get_balance(conn, account, token)?;
    let deltas = store::wallet_non_accrued_streamed_amts(conn, account, token, at)?;
    Ok(deltas.into_iter().fold(stored, |acc, delta| acc + delta))
}

/// A sender's projected balance at `up_to` counting only its own committed
/// outflows, never crediting incoming streams (spec §4.3 `balance_of` with
/// `count_received=false`). `incoming_horizon` is carried for the two-horizon
/// contract spec §9 calls out explicitly, even though excluding incoming
/// streams entirely makes it moot for the one caller ([`transfer`]) that
/// exists today.
pub fn sender_available_balance(
    conn: &Connection,
    token: &Address,
    account: &Address,
    up_to: i64,
    incoming_horizon: i64,
) -> Result<Amount, EngineError> {
    let _ = incoming_horizon;
    let stored = store::get_balance(conn, account, token)?;
    let deltas = store::wallet_outgoing_streamed_amts(conn, account, token, up_to)?;
    Ok(deltas.into_iter().fold(stored, |acc, delta| acc + delta))
}

/// Read-only simulation (spec §4.3, §5): inside a savepoint, run the
/// settlement hook up to `future` (defaulting to `max_end_ts_for_wallet`),
/// read the resulting effective balance, then roll the savepoint back.
pub fn future_balance_of(
    conn: &mut Connection,
    token: &Address,
    account: &Address,
    future: Option<i64>,
) -> Result<Amount, EngineError> {
    let target = match future {
        Some(t) => t,
        None => store::max_end_ts_for_wallet(conn, account)?,
    };
    let sp = conn.savepoint()?;
    settlement_hook::run(&sp, token, account, target)?;
    effective_balance(&sp, token, account, target)
    // `sp` drops here uncommitted and rolls back (spec §5: never leak).
}

/// Settle `sender`, normalise arguments, require the sender's projected
/// balance covers the new commitment, then record the stream (spec §4.3).
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip(conn), fields(token = %token, sender = %sender, to = %to, amount = %amount, duration, now))]
pub fn transfer(
    conn: &Connection,
    token: &Address,
    to: &Address,
    amount: &Amount,
    duration: i64,
    start_ts: i64,
    sender: &Address,
    now: i64,
    swap_id: Option<i64>,
) -> Result<i64, EngineError> {
    settle(conn, token, sender, now)?;

    let start_ts = if start_ts == 0 { now } else { start_ts };
    if start_ts < now {
        return Err(EngineError::InvalidArgument("start_ts must not precede now".into()));
    }
    if duration < 0 {
        return Err(EngineError::InvalidArgument("duration must be non-negative".into()));
    }
    if sender == to {
        return Err(EngineError::InvalidArgument("sender and receiver must differ".into()));
    }
    if *amount < Amount::zero() {
        return Err(EngineError::InvalidArgument("amount must be non-negative".into()));
    }

    store::upsert_account(conn, to)?;
    let max_end = store::max_end_ts_for_wallet(conn, sender)?;
    let max_ts = std::cmp::max(start_ts + duration, max_end);
    let available = sender_available_balance(conn, token, sender, max_ts, now)?;
    if available < *amount {
        return Err(EngineError::InsufficientBalance {
            context: format!("transfer {amount} from {sender}: only {available} projected at {max_ts}"),
        });
    }

    let stream = Stream {
        id: 0,
        from: *sender,
        to: *to,
        token: *token,
        start_ts,
        duration,
        amount: amount.clone(),
        accrued: false,
        swap_id,
    };
    store::add_stream(conn, &stream)
}

/// Settle `sender`, then either delete (if not yet started) or truncate
/// in place (spec §4.3 `cancel_stream`) the stream identified by `id`.
#[tracing::instrument(skip(conn), fields(token = %token, sender = %sender, stream_id, now))]
pub fn cancel_stream(
    conn: &Connection,
    token: &Address,
    stream_id: i64,
    sender: &Address,
    now: i64,
) -> Result<(), EngineError> {
    settle(conn, token, sender, now)?;

    let s = store::get_stream(conn, stream_id)?.ok_or_else(|| EngineError::NotFound {
        what: "stream",
        id: stream_id.to_string(),
    })?;
    if s.from != *sender {
        return Err(EngineError::Unauthorized {});
    }
    if s.start_ts + s.duration < now {
        return Err(EngineError::AlreadyCompleted {});
    }

    if s.start_ts > now {
        store::delete_stream(conn, stream_id)?;
    } else {
        let new_duration = now - s.start_ts;
        let new_amount = s.streamed(now);
        store::update_stream_amount_duration(conn, stream_id, new_duration, &new_amount)?;
    }
    Ok(())
}

/// "Process streams" (spec §4.3 `settle`): run the settlement hook for
/// `(token, account, now)`, then fold every stream touching `account` that
/// has fully elapsed by `now` into stored balances and mark it accrued.
pub fn settle(conn: &Connection, token: &Address, account: &Address, now: i64) -> Result<(), EngineError> {
    settlement_hook::run(conn, token, account, now)?;

    for s in store::wallet_ended_streams(conn, account, token, now)? {
        let amount = s.streamed(s.start_ts + s.duration);
        let from_balance = store::get_balance(conn, &s.from, token)?;
        let to_balance = store::get_balance(conn, &s.to, token)?;
        store::set_balance(conn, &s.from, token, &(from_balance - &amount))?;
        store::set_balance(conn, &s.to, token, &(to_balance + &amount))?;
        store::update_stream_accrued(conn, s.id, true)?;
    }
    Ok(())
}
