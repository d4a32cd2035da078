//! Money amounts as exact decimals.
//!
//! Amounts are stored with whatever scale they were created with, rendered to
//! two decimals on the wire, and compared in integer minor units when a value
//! arrives from outside (gateway notifications, query responses).

use core::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Non-negative money amount in major units (e.g. `10.00`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl ValueObject for Amount {}

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        Ok(Self(value))
    }

    /// Parse a textual amount such as `"10.00"`.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid amount '{s}': {e}")))?;
        Self::new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Unit price × quantity. Saturates instead of overflowing.
    pub fn times(&self, quantity: u32) -> Amount {
        Amount(
            self.0
                .checked_mul(Decimal::from(quantity))
                .unwrap_or(Decimal::MAX),
        )
    }

    /// Integer minor units (cents), rounded half away from zero.
    pub fn to_minor_units(&self) -> Option<i64> {
        decimal_to_minor_units(self.0)
    }

    /// Two-decimal rendering used on the gateway wire (`"10.00"`).
    pub fn to_two_decimals(&self) -> String {
        let mut rounded = self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(2);
        rounded.to_string()
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_two_decimals())
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Convert a textual amount to integer minor units.
///
/// Returns `None` for anything that does not parse as a decimal; callers treat
/// that the same as a mismatch.
pub fn minor_units(s: &str) -> Option<i64> {
    let value = Decimal::from_str(s.trim()).ok()?;
    decimal_to_minor_units(value)
}

fn decimal_to_minor_units(value: Decimal) -> Option<i64> {
    value
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
