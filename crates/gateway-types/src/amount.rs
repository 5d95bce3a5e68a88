use num_bigint::BigUint;
use num_traits::Zero;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An arbitrary-precision amount in the smallest unit of some token (lamports,
/// wei-style atomic units, etc). Values routinely exceed 64 bits for
/// high-decimal SPL/ERC-20 style tokens, so this wraps a [`BigUint`] rather
/// than a native integer.
///
/// Serializes as a decimal string at every boundary (JSON bodies, 402 headers,
/// TOML config) per the canonical-form requirement in the attestation and
/// payment-intent wire formats.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct BigAmount(BigUint);

impl BigAmount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(&self, other: &BigAmount) -> Option<BigAmount> {
        if self.0 < other.0 {
            None
        } else {
            Some(BigAmount(&self.0 - &other.0))
        }
    }

    pub fn saturating_sub(&self, other: &BigAmount) -> BigAmount {
        self.checked_sub(other).unwrap_or_else(BigAmount::zero)
    }

    pub fn checked_add(&self, other: &BigAmount) -> BigAmount {
        BigAmount(&self.0 + &other.0)
    }

    /// Fraction of `self` over `total`, as an `f64` in `[0.0, 1.0]`. Returns
    /// `0.0` when `total` is zero to avoid a division-by-zero panic.
    pub fn fraction_of(&self, total: &BigAmount) -> f64 {
        if total.is_zero() {
            return 0.0;
        }
        // u128 is plenty for the fraction computations the pricing/budget
        // paths need; full BigUint precision only matters at the ledger
        // boundary where amounts are summed and compared exactly.
        let self_approx = self.0.to_string().parse::<f64>().unwrap_or(f64::MAX);
        let total_approx = total.0.to_string().parse::<f64>().unwrap_or(f64::MAX);
        (self_approx / total_approx).clamp(0.0, 1.0)
    }
}

impl From<u64> for BigAmount {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl fmt::Display for BigAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BigAmount {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(BigUint::from_str(s)?))
    }
}

impl Serialize for BigAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for BigAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BigUint::from_str(&s)
            .map(BigAmount)
            .map_err(|e| de::Error::custom(format!("invalid decimal amount '{}': {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_string_round_trip() {
        let amount = BigAmount::from_str("123456789012345678901234567890").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"123456789012345678901234567890\"");
        let back: BigAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn checked_sub_prevents_negative() {
        let a = BigAmount::from(100u64);
        let b = BigAmount::from(150u64);
        assert!(a.checked_sub(&b).is_none());
        assert_eq!(a.saturating_sub(&b), BigAmount::zero());
    }

    #[test]
    fn fraction_of_total() {
        let remaining = BigAmount::from(200u64);
        let total = BigAmount::from(1000u64);
        assert!((remaining.fraction_of(&total) - 0.2).abs() < 1e-9);
        assert_eq!(BigAmount::zero().fraction_of(&BigAmount::zero()), 0.0);
    }
}
