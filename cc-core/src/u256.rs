//! 256-bit unsigned stake arithmetic.
//!
//! A thin newtype over four little-endian `u64` limbs, with just the
//! comparison, saturating-arithmetic and percentage helpers the staking
//! and slashing accounting need. Stakes never need division, multiplication
//! by another `U256`, or hex formatting beyond what `hex` already gives the
//! rest of the crate, so a full bignum crate would be more machinery than
//! this core uses.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::{Add, Sub, SubAssign};

/// 256-bit unsigned integer, stored as four `u64` limbs, least-significant
/// first (`0[0]` is bits 0..64, `0[3]` is bits 192..256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct U256(pub [u64; 4]);

impl U256 {
    pub const MAX: U256 = U256([u64::MAX; 4]);

    pub fn zero() -> Self {
        U256([0; 4])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&limb| limb == 0)
    }

    /// Little-endian bytes, matching the spec's wire encoding of a 256-bit
    /// stake.
    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&limb.to_le_bytes());
        }
        out
    }

    pub fn checked_add(self, other: U256) -> Option<U256> {
        let mut out = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let sum = self.0[i] as u128 + other.0[i] as u128 + carry;
            out[i] = sum as u64;
            carry = sum >> 64;
        }
        if carry != 0 {
            None
        } else {
            Some(U256(out))
        }
    }

    pub fn checked_sub(self, other: U256) -> Option<U256> {
        if self < other {
            return None;
        }
        let mut out = [0u64; 4];
        let mut borrow = 0i128;
        for i in 0..4 {
            let diff = self.0[i] as i128 - other.0[i] as i128 - borrow;
            if diff < 0 {
                out[i] = (diff + (1i128 << 64)) as u64;
                borrow = 1;
            } else {
                out[i] = diff as u64;
                borrow = 0;
            }
        }
        Some(U256(out))
    }

    pub fn saturating_sub(self, other: U256) -> U256 {
        self.checked_sub(other).unwrap_or(U256::zero())
    }

    /// `floor(self * percent / 100)`. `percent` is small (0..=100 in every
    /// caller) so a 128-bit widening multiply per limb is exact and never
    /// needs the full 256x256 product.
    pub fn mul_small(self, factor: u64) -> U256 {
        let mut out = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let product = self.0[i] as u128 * factor as u128 + carry;
            out[i] = product as u64;
            carry = product >> 64;
        }
        U256(out)
    }

    /// `floor(self / divisor)` for a small, non-zero divisor.
    pub fn div_small(self, divisor: u64) -> U256 {
        assert!(divisor != 0, "division by zero");
        let mut out = [0u64; 4];
        let mut remainder = 0u128;
        for i in (0..4).rev() {
            let dividend = (remainder << 64) | self.0[i] as u128;
            out[i] = (dividend / divisor as u128) as u64;
            remainder = dividend % divisor as u128;
        }
        U256(out)
    }

    pub fn min(self, other: U256) -> U256 {
        if self <= other {
            self
        } else {
            other
        }
    }
}

impl From<u64> for U256 {
    fn from(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl Add for U256 {
    type Output = U256;
    fn add(self, rhs: U256) -> U256 {
        saturating_add(self, rhs)
    }
}

impl Sub for U256 {
    type Output = U256;
    fn sub(self, rhs: U256) -> U256 {
        self.checked_sub(rhs).expect("U256 subtraction underflow")
    }
}

impl SubAssign for U256 {
    fn sub_assign(&mut self, rhs: U256) {
        *self = *self - rhs;
    }
}

impl Default for U256 {
    fn default() -> Self {
        U256::zero()
    }
}

/// `amount` clamped to not overflow on addition.
pub fn saturating_add(a: U256, b: U256) -> U256 {
    a.checked_add(b).unwrap_or(U256::MAX)
}

/// `floor(amount * percent / 100)`.
pub fn percent_of(amount: U256, percent: u32) -> U256 {
    amount.mul_small(percent as u64).div_small(100)
}

/// The first non-zero 64-bit limb of `value`, scanning from the most
/// significant limb down, floored at 1 when `value` is zero. Used to
/// collapse a 256-bit stake into a 64-bit leader-selection weight.
pub fn collapse_to_u64(value: U256) -> u64 {
    for limb in value.0.iter().rev() {
        if *limb != 0 {
            return *limb;
        }
    }
    1
}
