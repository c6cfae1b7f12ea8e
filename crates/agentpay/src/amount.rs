//! Fixed-point monetary amounts.
//!
//! An [`Amount`] counts the settlement asset's minimum unit (for USDC,
//! 10^-6). Parsing and formatting take the asset's decimal count explicitly;
//! arithmetic never leaves the integer domain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{ASSET_DECIMALS, BPS_DENOMINATOR};
use crate::error::PayError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn minor_units(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// `floor(self * bps / 10_000)`, computed in u128 so it cannot overflow.
    pub fn share_bps(self, bps: u64) -> Amount {
        let scaled = u128::from(self.0) * u128::from(bps) / u128::from(BPS_DENOMINATOR);
        // bps <= 10_000 keeps the result <= self.0
        Amount(u64::try_from(scaled).unwrap_or(u64::MAX))
    }

    /// Parse a human-readable price such as `"0.01"`, `"$0.001"` or `"1"`.
    ///
    /// Fractional digits beyond `decimals` are truncated, never rounded up.
    pub fn parse(price: &str, decimals: u32) -> Result<Amount, PayError> {
        let trimmed = price.trim();
        let cleaned = trimmed.strip_prefix('$').unwrap_or(trimmed);

        if cleaned.is_empty() {
            return Err(PayError::InvalidAmount(format!(
                "invalid price '{price}': no numeric content"
            )));
        }
        if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(PayError::InvalidAmount(format!(
                "invalid price '{price}': unexpected characters"
            )));
        }

        let overflow = || PayError::InvalidAmount(format!("invalid price '{price}': overflow"));
        let multiplier = 10u64.checked_pow(decimals).ok_or_else(overflow)?;

        let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned, ""));
        if integer_part.is_empty() && fractional_part.is_empty() {
            return Err(PayError::InvalidAmount(format!(
                "invalid price '{price}': no numeric content"
            )));
        }
        if fractional_part.contains('.') {
            return Err(PayError::InvalidAmount(format!(
                "invalid price '{price}': more than one decimal point"
            )));
        }

        let integer: u64 = if integer_part.is_empty() {
            0
        } else {
            integer_part
                .parse()
                .map_err(|e| PayError::InvalidAmount(format!("invalid price '{price}': {e}")))?
        };

        let decimals = decimals as usize;
        let frac_str = &fractional_part[..fractional_part.len().min(decimals)];
        let fractional: u64 = if frac_str.is_empty() {
            0
        } else {
            frac_str
                .parse()
                .map_err(|e| PayError::InvalidAmount(format!("invalid price '{price}': {e}")))?
        };
        // "0.5" with 6 decimals is 500000, not 5
        let scale = 10u64
            .checked_pow((decimals - frac_str.len()) as u32)
            .ok_or_else(overflow)?;

        let units = integer
            .checked_mul(multiplier)
            .and_then(|i| fractional.checked_mul(scale).and_then(|f| i.checked_add(f)))
            .ok_or_else(overflow)?;

        Ok(Amount(units))
    }

    /// Format as a decimal string with trailing zeros trimmed (`10000` at 6
    /// decimals is `"0.01"`).
    pub fn to_decimal_string(self, decimals: u32) -> String {
        if decimals == 0 || self.0 == 0 {
            return self.0.to_string();
        }
        let Some(multiplier) = 10u128.checked_pow(decimals) else {
            // Any u64 is below one whole unit at this scale.
            let frac = format!("{:0width$}", self.0, width = decimals as usize);
            return format!("0.{}", frac.trim_end_matches('0'));
        };
        let units = u128::from(self.0);
        let integer = units / multiplier;
        let fractional = units % multiplier;
        if fractional == 0 {
            return integer.to_string();
        }
        let frac = format!("{fractional:0width$}", width = decimals as usize);
        format!("{integer}.{}", frac.trim_end_matches('0'))
    }
}

impl fmt::Display for Amount {
    /// Displays with the default asset's decimals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string(ASSET_DECIMALS))
    }
}

impl FromStr for Amount {
    type Err = PayError;

    /// Parses a decimal price with the default asset's decimals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s, ASSET_DECIMALS)
    }
}

// JSON carries minor units as an integer string, same as on-chain values.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>()
            .map(Amount)
            .map_err(|e| serde::de::Error::custom(format!("invalid minor-unit amount '{raw}': {e}")))
    }
}
