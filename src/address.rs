//! Typed, checksum-normalized addresses.
//!
//! The source kernel re-validates and re-normalizes every address argument
//! on every call via a `with_checksum_address` decorator (see
//! `dapp/util.py`). Per spec §9 we centralize that behind a typed value
//! constructed once, at the action-boundary decode step; every kernel
//! function below consumes `&Address` and never touches raw strings again.

use crate::error::EngineError;
use sha2::{Digest, Sha256};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse a `0x`-prefixed 40 hex-digit address, accepting any case, and
    /// normalize it to canonical EIP-55 checksum form. Mirrors
    /// `eth_utils.to_checksum_address`: syntactic validity is all that is
    /// required, the checksum of the *input* is never enforced.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
        if hex_part.len() != 40 {
            return Err(EngineError::InvalidAddress(raw.to_string()));
        }
        let mut bytes = [0u8; 20];
        for i in 0..20 {
            bytes[i] = u8::from_str_radix(&hex_part[i * 2..i * 2 + 2], 16)
                .map_err(|_| EngineError::InvalidAddress(raw.to_string()))?;
        }
        Ok(Address(bytes))
    }

    /// Canonical EIP-55 checksummed string, e.g.
    /// `0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed`.
    pub fn to_checksum_string(&self) -> String {
        let lower = hex_lower(&self.0);
        let mut hasher = Keccak::v256();
        hasher.update(lower.as_bytes());
        let mut digest = [0u8; 32];
        hasher.finalize(&mut digest);

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            if c.is_ascii_digit() {
                out.push(c);
                continue;
            }
            let nibble = if i % 2 == 0 {
                digest[i / 2] >> 4
            } else {
                digest[i / 2] & 0x0f
            };
            if nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_string())
    }
}

fn hex_lower(bytes: &[u8; 20]) -> String {
    let mut s = String::with_capacity(40);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Sort two token addresses so `token0 < token1` lexicographically by
/// checksum string, matching `dapp/util.py: sort_tokens`.
pub fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    if a.to_checksum_string() < b.to_checksum_string() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Deterministic pair address: `SHA-256(checksum(token0) || checksum(token1))`,
/// last 20 bytes, re-encoded as a checksum address (spec §3). Pure function
/// of the *unordered* pair: callers must pass tokens already sorted by
/// [`sort_tokens`] to satisfy invariant 4 (pair determinism).
pub fn pair_address(token0: Address, token1: Address) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(token0.to_checksum_string().as_bytes());
    hasher.update(token1.to_checksum_string().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..32]);
    Address(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_malformed_addresses() {
        assert!(Address::parse("0xnotanaddress").is_err());
        assert!(Address::parse("0x1234").is_err());
    }

    #[test]
    fn parse_accepts_any_case_and_normalizes() {
        let lower = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let upper = Address::parse("0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.to_checksum_string(), upper.to_checksum_string());
    }

    #[test]
    fn pair_address_is_symmetric_and_deterministic() {
        let a = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        let b = Address::parse("0x2222222222222222222222222222222222222222").unwrap();
        let (t0, t1) = sort_tokens(a, b);
        let (u0, u1) = sort_tokens(b, a);
        assert_eq!((t0, t1), (u0, u1));
        assert_eq!(pair_address(t0, t1), pair_address(u0, u1));
    }

    #[test]
    fn pair_address_differs_for_different_pairs() {
        let a = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        let b = Address::parse("0x2222222222222222222222222222222222222222").unwrap();
        let c = Address::parse("0x3333333333333333333333333333333333333333").unwrap();
        assert_ne!(pair_address(a, b), pair_address(a, c));
    }
}
