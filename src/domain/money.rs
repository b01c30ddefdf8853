use crate::error::EscrowError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Escrow fee rate applied to the item price.
const FEE_RATE: Decimal = dec!(0.025);
/// Minimum escrow fee charged regardless of price.
const FEE_FLOOR: Decimal = dec!(5000);
/// Maximum escrow fee charged regardless of price.
const FEE_CEILING: Decimal = dec!(100000);

/// A positive monetary amount.
///
/// Wrapper around `rust_decimal::Decimal` so prices, fees, and totals cannot
/// be constructed as zero or negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EscrowError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EscrowError::InvalidAmount)
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EscrowError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Computes the escrow fee for a given price: 2.5% of the price, clamped to
/// the [5000, 100000] range. Computed once at transaction creation and never
/// recomputed.
pub fn escrow_fee(price: Amount) -> Amount {
    let fee = (price.0 * FEE_RATE).clamp(FEE_FLOOR, FEE_CEILING);
    // The floor keeps the fee strictly positive for any valid price.
    Amount(fee.normalize())
}
