use crate::crypto::Hash;
use crate::error::{ChainError, Result};
use crate::types::Transaction;
use crate::UNITS_PER_COIN;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleRoot(Hash);

impl MerkleRoot {
    /// Binary hash tree over the block's transaction ids. Leaves are tx ids;
    /// an odd node at any level is paired with itself.
    pub fn calculate(transactions: &[Transaction]) -> MerkleRoot {
        let mut layer: Vec<Hash> = transactions.iter().map(|tx| tx.id()).collect();
        if layer.is_empty() {
            return MerkleRoot(Hash::zero());
        }

        while layer.len() > 1 {
            let mut new_layer = Vec::with_capacity(layer.len().div_ceil(2));
            for pair in layer.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut concat = [0u8; 64];
                concat[..32].copy_from_slice(&left.to_bytes());
                concat[32..].copy_from_slice(&right.to_bytes());
                new_layer.push(Hash::double_sha256(&concat));
            }
            layer = new_layer;
        }

        MerkleRoot(layer[0])
    }

    pub fn as_hash(&self) -> Hash {
        self.0
    }
}

impl fmt::Display for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A coin amount: fixed-point with 8 fractional digits, stored as base
/// units. On the wire it is always the decimal string `"D.DDDDDDDD"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u64) -> Self {
        Amount(units)
    }

    pub fn from_coins(coins: u64) -> Self {
        Amount(coins * UNITS_PER_COIN)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Sum with overflow detection; `None` means `amount_overflow`.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }

    /// Parse `"25"`, `"25.1"` or `"25.10000000"` (at most 8 fractional
    /// digits, no sign).
    pub fn parse(s: &str) -> Result<Amount> {
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(ChainError::InvalidAmount("empty amount".into()));
        }
        if frac.len() > 8 {
            return Err(ChainError::InvalidAmount(format!(
                "more than 8 fractional digits: {s}"
            )));
        }
        let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !valid(whole) || !valid(frac) {
            return Err(ChainError::InvalidAmount(format!("not a decimal: {s}")));
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| ChainError::InvalidAmount(format!("whole part overflows: {s}")))?
        };
        let mut frac_units: u64 = if frac.is_empty() {
            0
        } else {
            frac.parse()
                .map_err(|_| ChainError::InvalidAmount(format!("fractional part overflows: {s}")))?
        };
        frac_units *= 10u64.pow(8 - frac.len() as u32);
        whole
            .checked_mul(UNITS_PER_COIN)
            .and_then(|u| u.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| ChainError::AmountOverflow(format!("amount too large: {s}")))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / UNITS_PER_COIN, self.0 % UNITS_PER_COIN)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests;
