//! Deterministic streaming-balance kernel and streaming-AMM settlement
//! engine for a rollup-style host.
//!
//! The host (out of scope here — see the module docs on [`dispatcher`])
//! feeds this crate ordered, timestamped actions; each call into
//! [`dispatcher::dispatch`] advances a [`store::Store`] by exactly one
//! transaction. Balances are never flat integers: every account's stored
//! balance is only half the picture, the other half being the set of
//! live, non-accrued [`stream::Stream`]s touching it — see
//! [`streamable_token`] for how the two are reconciled.
//!
//! Module map, leaves first:
//! - [`error`] — the single error type every fallible call returns.
//! - [`bignum`] — arbitrary-precision amounts and their decimal-string wire form.
//! - [`address`] — checksum-normalized addresses and deterministic pair addressing.
//! - [`config`] — engine-wide tunables threaded by value.
//! - [`store`] — the durable, transactional relational view of the world.
//! - [`stream`] — pure time-linear transfer math.
//! - [`streamable_token`] — the per-token balance kernel.
//! - [`pair`] — the two-token LP token wrapper.
//! - [`amm`] — the constant-product AMM façade.
//! - [`settlement_hook`] — piecewise integration of streamed AMM swaps.
//! - [`dispatcher`] — the action-to-kernel-call boundary.

pub mod address;
pub mod amm;
pub mod bignum;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pair;
pub mod settlement_hook;
pub mod store;
pub mod stream;
pub mod streamable_token;

pub use address::Address;
pub use bignum::Amount;
pub use config::Config;
pub use dispatcher::{dispatch, Action, ActionOutcome, DepositAction};
pub use error::EngineError;
pub use pair::Pair;
pub use store::Store;
pub use stream::Stream;
