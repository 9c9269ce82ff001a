//! Pure stream math (component C2, spec §4.2).
//!
//! A [`Stream`] is an ordered record of a time-linear transfer. Everything
//! here is pure: no storage access, no side effects. The kernel
//! ([`crate::streamable_token`]) owns reading and writing these through
//! [`crate::store::Store`].

use crate::address::Address;
use crate::bignum::{floor_div, Amount};
use num_traits::Zero;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stream {
    pub id: i64,
    pub from: Address,
    pub to: Address,
    pub token: Address,
    pub start_ts: i64,
    pub duration: i64,
    pub amount: Amount,
    pub accrued: bool,
    pub swap_id: Option<i64>,
}

impl Stream {
    pub fn has_started(&self, t: i64) -> bool {
        t >= self.start_ts
    }

    pub fn has_ended(&self, t: i64) -> bool {
        t >= self.start_ts + self.duration
    }

    /// Amount conveyed from `from` to `to` by time `t`. Floored, toward
    /// zero on the positive side (spec §4.2): zero before the stream
    /// starts, the full amount once it has run to completion (including
    /// the `duration == 0` instant-transfer case), and a linear
    /// interpolation in between.
    pub fn streamed(&self, t: i64) -> Amount {
        if !self.has_started(t) {
            return Amount::zero();
        }
        if self.duration == 0 || self.has_ended(t) {
            return self.amount.clone();
        }
        let elapsed = Amount::from(t - self.start_ts);
        let duration = Amount::from(self.duration);
        floor_div(&(&self.amount * elapsed), &duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(start: i64, duration: i64, amount: i64) -> Stream {
        Stream {
            id: 1,
            from: Address::ZERO,
            to: Address::ZERO,
            token: Address::ZERO,
            start_ts: start,
            duration,
            amount: Amount::from(amount),
            accrued: false,
            swap_id: None,
        }
    }

    #[test]
    fn linear_midpoint() {
        let s = stream(0, 1000, 100);
        assert_eq!(s.streamed(500), Amount::from(50));
        assert_eq!(s.streamed(0), Amount::from(0));
        assert_eq!(s.streamed(1000), Amount::from(100));
        assert_eq!(s.streamed(2000), Amount::from(100));
    }

    #[test]
    fn before_start_is_zero() {
        let s = stream(100, 1000, 100);
        assert_eq!(s.streamed(0), Amount::from(0));
        assert!(!s.has_started(0));
    }

    #[test]
    fn zero_duration_is_instant_once_started() {
        let s = stream(100, 0, 100);
        assert_eq!(s.streamed(99), Amount::from(0));
        assert_eq!(s.streamed(100), Amount::from(100));
        assert!(s.has_ended(100));
    }

    #[test]
    fn floors_toward_zero() {
        // 100 * 1 / 3 = 33.33 -> 33
        let s = stream(0, 3, 100);
        assert_eq!(s.streamed(1), Amount::from(33));
    }
}
