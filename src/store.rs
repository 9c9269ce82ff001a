//! Durable, transactional key/value+relational view of the world state
//! (component C1, spec §4.1 and §6).
//!
//! Mirrors `dapp/db.py` of the source kernel: every function below takes
//! an explicit connection handle rather than hiding one behind a
//! singleton, so callers control exactly which transaction or savepoint
//! scope a query runs in. [`Store::run_action`] gives the top-level
//! commit/rollback-per-action discipline of spec §5; [`future_balance_of`]
//! in [`crate::streamable_token`] is the only caller that opens a nested
//! savepoint for a read-only simulation.

use crate::address::Address;
use crate::bignum::{from_decimal_string, to_decimal_string, Amount};
use crate::error::EngineError;
use crate::stream::Stream;
use num_traits::Zero;
use rusqlite::{params, Connection, OptionalExtension};

pub struct Store {
    pub conn: Connection,
}

impl Store {
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        bootstrap_schema(&conn)?;
        Ok(Store { conn })
    }

    /// Run `f` inside a single commit/rollback transaction (spec §5: "a
    /// single action is a single Store transaction"). Any `Err` returned
    /// by `f` rolls the transaction back (rusqlite rolls back on `Drop`
    /// unless `commit` is called) and is propagated to the caller. Every
    /// query and mutation in this crate goes through `&Connection`
    /// (`rusqlite::Transaction` derefs to one), so `f` never needs `&mut`.
    pub fn run_action<F, T>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let tx = self.conn.transaction()?;
        let result = f(&tx);
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }
}

pub fn bootstrap_schema(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS account (
            address TEXT PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS token (
            address TEXT PRIMARY KEY,
            total_supply TEXT NOT NULL DEFAULT '0'
        );
        CREATE TABLE IF NOT EXISTS pair (
            address TEXT PRIMARY KEY,
            token_0_address TEXT NOT NULL,
            token_1_address TEXT NOT NULL,
            last_processed_ts INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS balance (
            account_address TEXT NOT NULL,
            token_address TEXT NOT NULL,
            amount TEXT NOT NULL DEFAULT '0',
            PRIMARY KEY (account_address, token_address)
        );
        CREATE TABLE IF NOT EXISTS swap (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pair_address TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS stream (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            start_ts INTEGER NOT NULL,
            duration INTEGER NOT NULL,
            amount TEXT NOT NULL,
            token_address TEXT NOT NULL,
            accrued INTEGER NOT NULL DEFAULT 0,
            swap_id INTEGER
        );
        ",
    )?;
    Ok(())
}

pub fn upsert_account(conn: &Connection, address: &Address) -> Result<(), EngineError> {
    conn.execute(
        "INSERT OR IGNORE INTO account (address) VALUES (?1)",
        params![address.to_checksum_string()],
    )?;
    Ok(())
}

pub fn upsert_token(
    conn: &Connection,
    address: &Address,
    default_supply: &Amount,
) -> Result<(), EngineError> {
    upsert_account(conn, address)?;
    conn.execute(
        "INSERT OR IGNORE INTO token (address, total_supply) VALUES (?1, ?2)",
        params![
            address.to_checksum_string(),
            to_decimal_string(default_supply)
        ],
    )?;
    Ok(())
}

pub fn upsert_pair(
    conn: &Connection,
    address: &Address,
    token0: &Address,
    token1: &Address,
) -> Result<(), EngineError> {
    conn.execute(
        "INSERT OR IGNORE INTO pair (address, token_0_address, token_1_address, last_processed_ts)
         VALUES (?1, ?2, ?3, 0)",
        params![
            address.to_checksum_string(),
            token0.to_checksum_string(),
            token1.to_checksum_string()
        ],
    )?;
    Ok(())
}

pub fn get_balance(
    conn: &Connection,
    account: &Address,
    token: &Address,
) -> Result<Amount, EngineError> {
    let row: Option<String> = conn
        .query_row(
            "SELECT amount FROM balance WHERE account_address = ?1 AND token_address = ?2",
            params![account.to_checksum_string(), token.to_checksum_string()],
            |row| row.get(0),
        )
        .optional()?;
    match row {
        Some(s) => from_decimal_string(&s),
        None => Ok(Amount::zero()),
    }
}

pub fn set_balance(
    conn: &Connection,
    account: &Address,
    token: &Address,
    amount: &Amount,
) -> Result<(), EngineError> {
    upsert_account(conn, account)?;
    conn.execute(
        "INSERT INTO balance (account_address, token_address, amount) VALUES (?1, ?2, ?3)
         ON CONFLICT(account_address, token_address) DO UPDATE SET amount = excluded.amount",
        params![
            account.to_checksum_string(),
            token.to_checksum_string(),
            to_decimal_string(amount)
        ],
    )?;
    Ok(())
}

pub fn get_total_supply(conn: &Connection, token: &Address) -> Result<Amount, EngineError> {
    let row: Option<String> = conn
        .query_row(
            "SELECT total_supply FROM token WHERE address = ?1",
            params![token.to_checksum_string()],
            |row| row.get(0),
        )
        .optional()?;
    match row {
        Some(s) => from_decimal_string(&s),
        None => Ok(Amount::zero()),
    }
}

pub fn set_total_supply(
    conn: &Connection,
    token: &Address,
    total_supply: &Amount,
) -> Result<(), EngineError> {
    upsert_token(conn, token, &Amount::zero())?;
    conn.execute(
        "UPDATE token SET total_supply = ?2 WHERE address = ?1",
        params![token.to_checksum_string(), to_decimal_string(total_supply)],
    )?;
    Ok(())
}

fn stream_from_row(row: &rusqlite::Row) -> rusqlite::Result<Stream> {
    let from: String = row.get("from_address")?;
    let to: String = row.get("to_address")?;
    let token: String = row.get("token_address")?;
    let amount: String = row.get("amount")?;
    Ok(Stream {
        id: row.get("id")?,
        from: Address::parse(&from).expect("address stored by this crate is always valid"),
        to: Address::parse(&to).expect("address stored by this crate is always valid"),
        token: Address::parse(&token).expect("address stored by this crate is always valid"),
        start_ts: row.get("start_ts")?,
        duration: row.get("duration")?,
        amount: from_decimal_string(&amount).expect("amount stored by this crate is always valid"),
        accrued: row.get::<_, i64>("accrued")? != 0,
        swap_id: row.get("swap_id")?,
    })
}

pub fn add_stream(conn: &Connection, s: &Stream) -> Result<i64, EngineError> {
    upsert_account(conn, &s.from)?;
    upsert_account(conn, &s.to)?;
    conn.execute(
        "INSERT INTO stream (from_address, to_address, start_ts, duration, amount, token_address, accrued, swap_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            s.from.to_checksum_string(),
            s.to.to_checksum_string(),
            s.start_ts,
            s.duration,
            to_decimal_string(&s.amount),
            s.token.to_checksum_string(),
            s.accrued as i64,
            s.swap_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_stream(conn: &Connection, id: i64) -> Result<Option<Stream>, EngineError> {
    conn.query_row("SELECT * FROM stream WHERE id = ?1", params![id], stream_from_row)
        .optional()
        .map_err(EngineError::from)
}

pub fn delete_stream(conn: &Connection, id: i64) -> Result<(), EngineError> {
    conn.execute("DELETE FROM stream WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn update_stream_accrued(conn: &Connection, id: i64, accrued: bool) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE stream SET accrued = ?2 WHERE id = ?1",
        params![id, accrued as i64],
    )?;
    Ok(())
}

pub fn update_stream_amount_duration(
    conn: &Connection,
    id: i64,
    duration: i64,
    amount: &Amount,
) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE stream SET duration = ?2, amount = ?3 WHERE id = ?1",
        params![id, duration, to_decimal_string(amount)],
    )?;
    Ok(())
}

pub fn update_stream_amount_duration_batch(
    conn: &Connection,
    updates: &[(i64, i64, Amount)],
) -> Result<(), EngineError> {
    for (id, duration, amount) in updates {
        update_stream_amount_duration(conn, *id, *duration, amount)?;
    }
    Ok(())
}

/// Non-accrued streams touching `account`, of `token`, whose
/// `start_ts + duration <= now` (spec §4.1 `wallet_endend_streams`).
pub fn wallet_ended_streams(
    conn: &Connection,
    account: &Address,
    token: &Address,
    now: i64,
) -> Result<Vec<Stream>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM stream
         WHERE (from_address = ?1 OR to_address = ?1) AND token_address = ?2
         AND start_ts + duration <= ?3 AND accrued = 0",
    )?;
    let rows = stmt
        .query_map(params![account.to_checksum_string(), token.to_checksum_string(), now], stream_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Signed streamed amount at `until` for each non-accrued stream touching
/// `account` of `token` that has started by `until` (spec §4.1
/// `wallet_non_accrued_streamed_amts`): positive when `account` is the
/// recipient, negative when `account` is the sender.
pub fn wallet_non_accrued_streamed_amts(
    conn: &Connection,
    account: &Address,
    token: &Address,
    until: i64,
) -> Result<Vec<Amount>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM stream
         WHERE (from_address = ?1 OR to_address = ?1) AND token_address = ?2
         AND accrued = 0 AND start_ts <= ?3",
    )?;
    let rows = stmt
        .query_map(params![account.to_checksum_string(), token.to_checksum_string(), until], stream_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for s in rows {
        let streamed = s.streamed(until);
        out.push(if s.to == *account { streamed } else { -streamed });
    }
    Ok(out)
}

/// Signed streamed amount at `until` for each non-accrued stream where
/// `account` is the *sender*, ignoring incoming streams entirely. Used by
/// [`crate::streamable_token::sender_available_balance`] to project a
/// sender's future committed outflows without trusting any pending
/// incoming stream.
pub fn wallet_outgoing_streamed_amts(
    conn: &Connection,
    account: &Address,
    token: &Address,
    until: i64,
) -> Result<Vec<Amount>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM stream
         WHERE from_address = ?1 AND token_address = ?2
         AND accrued = 0 AND start_ts <= ?3",
    )?;
    let rows = stmt
        .query_map(params![account.to_checksum_string(), token.to_checksum_string(), until], stream_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|s| -s.streamed(until)).collect())
}

/// `max(start_ts + duration)` across all streams touching `account`, 0 if
/// there are none (spec §4.1 `max_end_ts_for_wallet`).
pub fn max_end_ts_for_wallet(conn: &Connection, account: &Address) -> Result<i64, EngineError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(start_ts + duration) FROM stream WHERE from_address = ?1 OR to_address = ?1",
        params![account.to_checksum_string()],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}

pub struct UpdatablePair {
    pub pair_address: Address,
    pub token0: Address,
    pub token1: Address,
    pub last_processed_ts: i64,
}

/// Distinct pairs reachable from non-accrued swap streams paying `account`
/// in `token`, with their watermark (spec §4.1 `updatable_pairs`).
pub fn updatable_pairs(
    conn: &Connection,
    account: &Address,
    token: &Address,
    until: i64,
) -> Result<Vec<UpdatablePair>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT p.address, p.token_0_address, p.token_1_address, p.last_processed_ts
         FROM stream st
         JOIN swap s ON st.swap_id = s.id
         JOIN pair p ON s.pair_address = p.address
         WHERE st.to_address = ?1 AND st.accrued = 0
         AND (p.token_0_address = ?2 OR p.token_1_address = ?2)
         AND st.start_ts <= ?3",
    )?;
    let rows = stmt
        .query_map(params![account.to_checksum_string(), token.to_checksum_string(), until], |row| {
            let pair_address: String = row.get(0)?;
            let token0: String = row.get(1)?;
            let token1: String = row.get(2)?;
            let last_processed_ts: i64 = row.get(3)?;
            Ok((pair_address, token0, token1, last_processed_ts))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(pair_address, token0, token1, last_processed_ts)| {
            Ok(UpdatablePair {
                pair_address: Address::parse(&pair_address)?,
                token0: Address::parse(&token0)?,
                token1: Address::parse(&token1)?,
                last_processed_ts,
            })
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct SwapStreams {
    pub to_pair_stream_id: i64,
    pub to_pair_amount: Amount,
    pub to_pair_duration: i64,
    pub to_pair_start_ts: i64,
    pub from_pair_stream_id: i64,
    pub from_pair_amount: Amount,
    pub from_pair_start_ts: i64,
    pub from_pair_duration: i64,
    pub from_pair_token: Address,
}

/// For each swap on `pair`, the pair of child streams restricted to those
/// that have started by `until` (spec §4.1 `swaps_for_pair`).
pub fn swaps_for_pair(
    conn: &Connection,
    pair: &Address,
    until: i64,
) -> Result<Vec<SwapStreams>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT
            st_to.id, st_to.amount, st_to.duration, st_to.start_ts,
            st_from.id, st_from.amount, st_from.start_ts, st_from.duration, st_from.token_address
         FROM swap s
         JOIN stream st_to ON st_to.swap_id = s.id AND st_to.to_address = s.pair_address
         JOIN stream st_from ON st_from.swap_id = s.id AND st_from.from_address = s.pair_address
         WHERE s.pair_address = ?1
         AND st_to.start_ts <= ?2 AND st_from.start_ts <= ?2",
    )?;
    let rows = stmt
        .query_map(params![pair.to_checksum_string(), until], |row| {
            let to_pair_amount: String = row.get(1)?;
            let from_pair_amount: String = row.get(5)?;
            let from_pair_token: String = row.get(8)?;
            Ok((
                row.get::<_, i64>(0)?,
                to_pair_amount,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                from_pair_amount,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                from_pair_token,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(
                to_pair_stream_id,
                to_pair_amount,
                to_pair_duration,
                to_pair_start_ts,
                from_pair_stream_id,
                from_pair_amount,
                from_pair_start_ts,
                from_pair_duration,
                from_pair_token,
            )| {
                Ok(SwapStreams {
                    to_pair_stream_id,
                    to_pair_amount: from_decimal_string(&to_pair_amount)?,
                    to_pair_duration,
                    to_pair_start_ts,
                    from_pair_stream_id,
                    from_pair_amount: from_decimal_string(&from_pair_amount)?,
                    from_pair_start_ts,
                    from_pair_duration,
                    from_pair_token: Address::parse(&from_pair_token)?,
                })
            },
        )
        .collect()
}

pub fn set_last_processed_ts(conn: &Connection, pair: &Address, ts: i64) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE pair SET last_processed_ts = ?2 WHERE address = ?1",
        params![pair.to_checksum_string(), ts],
    )?;
    Ok(())
}

pub fn get_pair(
    conn: &Connection,
    pair: &Address,
) -> Result<Option<(Address, Address, i64)>, EngineError> {
    conn.query_row(
        "SELECT token_0_address, token_1_address, last_processed_ts FROM pair WHERE address = ?1",
        params![pair.to_checksum_string()],
        |row| {
            let t0: String = row.get(0)?;
            let t1: String = row.get(1)?;
            let last_processed_ts: i64 = row.get(2)?;
            Ok((t0, t1, last_processed_ts))
        },
    )
    .optional()?
    .map(|(t0, t1, last_processed_ts)| {
        Ok((Address::parse(&t0)?, Address::parse(&t1)?, last_processed_ts))
    })
    .transpose()
}

pub fn create_swap(conn: &Connection, pair: &Address) -> Result<i64, EngineError> {
    conn.execute(
        "INSERT INTO swap (pair_address) VALUES (?1)",
        params![pair.to_checksum_string()],
    )?;
    Ok(conn.last_insert_rowid())
}
