//! Maps a decoded action to a kernel call inside one transactional scope
//! (component C7, spec §4.7).
//!
//! The host owns JSON/hex payload parsing and ABI decoding (spec §1); by
//! the time an [`Action`] reaches this module every address and amount is
//! already a typed, validated value. Matching a method name against the
//! recognised kernel calls — and rejecting anything else with
//! [`EngineError::UnknownMethod`] — is this crate's responsibility.

use crate::address::Address;
use crate::amm;
use crate::bignum::Amount;
use crate::config::Config;
use crate::error::EngineError;
use crate::store::Store;
use crate::streamable_token;
use num_bigint::Sign;
use rusqlite::Connection;

#[derive(Clone, Debug)]
pub struct DepositAction {
    pub token: Address,
    pub from: Address,
    pub amount: Amount,
}

#[derive(Clone, Debug)]
pub enum Action {
    Stream {
        token: Address,
        to: Address,
        amount: Amount,
        duration: i64,
        start: i64,
    },
    Withdraw {
        token: Address,
        amount: Amount,
    },
    CancelStream {
        token: Address,
        stream_id: i64,
    },
    AddLiquidity {
        token_a: Address,
        token_b: Address,
        amount_a_desired: Amount,
        amount_b_desired: Amount,
        amount_a_min: Amount,
        amount_b_min: Amount,
        to: Address,
    },
    RemoveLiquidity {
        token_a: Address,
        token_b: Address,
        liquidity: Amount,
        amount_a_min: Amount,
        amount_b_min: Amount,
        to: Address,
    },
    Swap {
        amount_in: Amount,
        amount_out_min: Amount,
        path: [Address; 2],
        start: i64,
        duration: i64,
        to: Address,
    },
    Deposit(DepositAction),
    /// A method name the host could not map to any of the above (spec
    /// §4.7: "Unknown methods fail the action").
    Unknown(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    StreamCreated { stream_id: i64 },
    Withdrawn { voucher: Vec<u8> },
    StreamCancelled,
    LiquidityAdded { liquidity: Amount },
    LiquidityRemoved { amount_a: Amount, amount_b: Amount },
    Swapped { amount_out: Amount },
    Deposited,
}

/// Run `action` inside a single commit/rollback transaction (spec §5).
/// `sender` is the action's `msg_sender` for every variant except
/// [`Action::Deposit`], where the depositor is carried on the action
/// itself (decoded from the portal payload, spec §12).
#[tracing::instrument(skip(store, config, action), fields(now))]
pub fn dispatch(
    store: &mut Store,
    config: &Config,
    action: Action,
    sender: Address,
    now: i64,
) -> Result<ActionOutcome, EngineError> {
    store.run_action(move |conn| apply(conn, config, action, sender, now))
}

fn apply(
    conn: &Connection,
    config: &Config,
    action: Action,
    sender: Address,
    now: i64,
) -> Result<ActionOutcome, EngineError> {
    match action {
        Action::Stream { token, to, amount, duration, start } => {
            let stream_id =
                streamable_token::transfer(conn, &token, &to, &amount, duration, start, &sender, now, None)?;
            Ok(ActionOutcome::StreamCreated { stream_id })
        }
        Action::Withdraw { token, amount } => {
            streamable_token::burn(conn, &token, &amount, &sender, now)?;
            let voucher = encode_transfer_voucher(&sender, &amount)?;
            Ok(ActionOutcome::Withdrawn { voucher })
        }
        Action::CancelStream { token, stream_id } => {
            streamable_token::cancel_stream(conn, &token, stream_id, &sender, now)?;
            Ok(ActionOutcome::StreamCancelled)
        }
        Action::AddLiquidity {
            token_a,
            token_b,
            amount_a_desired,
            amount_b_desired,
            amount_a_min,
            amount_b_min,
            to,
        } => {
            let liquidity = amm::add_liquidity(
                conn,
                token_a,
                token_b,
                &amount_a_desired,
                &amount_b_desired,
                &amount_a_min,
                &amount_b_min,
                &to,
                &sender,
                now,
            )?;
            Ok(ActionOutcome::LiquidityAdded { liquidity })
        }
        Action::RemoveLiquidity {
            token_a,
            token_b,
            liquidity,
            amount_a_min,
            amount_b_min,
            to,
        } => {
            let (amount_a, amount_b) = amm::remove_liquidity(
                conn,
                token_a,
                token_b,
                &liquidity,
                &amount_a_min,
                &amount_b_min,
                &to,
                &sender,
                now,
            )?;
            Ok(ActionOutcome::LiquidityRemoved { amount_a, amount_b })
        }
        Action::Swap { amount_in, amount_out_min, path, start, duration, to } => {
            let amount_out = amm::swap_exact_tokens_for_tokens(
                conn,
                config,
                &amount_in,
                &amount_out_min,
                &path,
                start,
                duration,
                &to,
                &sender,
                now,
            )?;
            Ok(ActionOutcome::Swapped { amount_out })
        }
        Action::Deposit(deposit) => {
            streamable_token::mint(conn, &deposit.token, &deposit.amount, &deposit.from)?;
            Ok(ActionOutcome::Deposited)
        }
        Action::Unknown(method) => Err(EngineError::UnknownMethod(method)),
    }
}

fn encode_address_padded(addr: &Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..32].copy_from_slice(addr.as_bytes());
    out
}

fn encode_uint256(amount: &Amount) -> Result<[u8; 32], EngineError> {
    let (sign, bytes) = amount.to_bytes_be();
    if sign == Sign::Minus {
        return Err(EngineError::InvalidArgument("voucher amount must be non-negative".into()));
    }
    if bytes.len() > 32 {
        return Err(EngineError::InvalidArgument("amount does not fit in a uint256".into()));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// `0xa9059cbb || abi_encode(address, uint256)`, the ERC-20 `transfer`
/// selector plus its packed arguments (spec §6 voucher payload).
fn encode_transfer_voucher(to: &Address, amount: &Amount) -> Result<Vec<u8>, EngineError> {
    let mut payload = Vec::with_capacity(4 + 32 + 32);
    payload.extend_from_slice(&[0xa9, 0x05, 0x9c, 0xbb]);
    payload.extend_from_slice(&encode_address_padded(to));
    payload.extend_from_slice(&encode_uint256(amount)?);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from_bytes(bytes)
    }

    #[test]
    fn deposit_then_withdraw_round_trips_and_emits_voucher() {
        let mut store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let token = addr(1);
        let account = addr(10);

        let outcome = dispatch(
            &mut store,
            &config,
            Action::Deposit(DepositAction { token, from: account, amount: Amount::from(100) }),
            account,
            0,
        )
        .unwrap();
        assert_eq!(outcome, ActionOutcome::Deposited);

        let outcome = dispatch(
            &mut store,
            &config,
            Action::Withdraw { token, amount: Amount::from(40) },
            account,
            0,
        )
        .unwrap();
        match outcome {
            ActionOutcome::Withdrawn { voucher } => {
                assert_eq!(&voucher[0..4], &[0xa9, 0x05, 0x9c, 0xbb]);
                assert_eq!(voucher.len(), 4 + 32 + 32);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let balance = streamable_token::effective_balance(&store.conn, &token, &account, 0).unwrap();
        assert_eq!(balance, Amount::from(60));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let err = dispatch(&mut store, &config, Action::Unknown("frobnicate".into()), addr(1), 0);
        assert!(matches!(err, Err(EngineError::UnknownMethod(_))));
    }
}
