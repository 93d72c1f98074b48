// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, sides, prices, steps, fee pips. each is a newtype so the compiler catches type mixups.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

// fractional digits carried by every ledger amount
pub const AMOUNT_DP: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl AccountId {
    // virtual market maker's own custody account. LP capital, curve collateral and fees live here.
    pub const POOL: AccountId = AccountId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

// Long = buy side of the book / long exposure on the curve. Short = sell side / short exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy {
            Side::Long
        } else {
            Side::Short
        }
    }

    pub fn is_buy(&self) -> bool {
        *self == Side::Long
    }

    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

// 1.1: price in quote units per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: discrete time step (block number). supplied by the caller, never read from a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Step(pub u64);

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// 1.3: fee in pips. 1_000_000 pips = 100%, 3000 pips = 0.30%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pips(pub u32);

impl Pips {
    pub const DENOMINATOR: u32 = 1_000_000;

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(Self::DENOMINATOR)
    }
}

impl fmt::Display for Pips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}pips", self.0)
    }
}

// 1.4: amounts must be non-negative and fit the ledger's fixed-point precision.
pub fn ensure_amount(amount: Decimal) -> Result<(), EngineError> {
    if amount.is_zero() {
        return Err(EngineError::ZeroAmount);
    }
    if amount.is_sign_negative() {
        return Err(EngineError::InvalidInput(format!("negative amount {amount}")));
    }
    if amount.scale() > AMOUNT_DP {
        return Err(EngineError::InvalidInput(format!(
            "amount {amount} exceeds {AMOUNT_DP} fractional digits"
        )));
    }
    Ok(())
}

// products and quotients are truncated back to ledger precision
pub fn to_ledger(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_DP, rust_decimal::RoundingStrategy::ToZero)
}

pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    a.checked_mul(b)
        .map(to_ledger)
        .ok_or_else(|| EngineError::InvalidInput(format!("{a} * {b} overflows")))
}

pub fn checked_div(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    if b.is_zero() {
        return Err(EngineError::InvalidInput(format!("{a} / 0")));
    }
    a.checked_div(b)
        .map(to_ledger)
        .ok_or_else(|| EngineError::InvalidInput(format!("{a} / {b} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_conversions() {
        assert_eq!(Side::from_is_buy(true), Side::Long);
        assert_eq!(Side::from_is_buy(false), Side::Short);
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.sign(), dec!(-1));
    }

    #[test]
    fn pips_conversion() {
        assert_eq!(Pips(3000).as_fraction(), dec!(0.003)); // 0.30%
        assert_eq!(Pips(20000).as_fraction(), dec!(0.02)); // 2%
    }

    #[test]
    fn amount_validation() {
        assert!(matches!(ensure_amount(Decimal::ZERO), Err(EngineError::ZeroAmount)));
        assert!(matches!(ensure_amount(dec!(-1)), Err(EngineError::InvalidInput(_))));
        assert!(ensure_amount(dec!(0.000000000000000001)).is_ok());
        assert!(matches!(
            ensure_amount(dec!(0.0000000000000000001)),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn ledger_truncation() {
        let third = checked_div(dec!(1), dec!(3)).unwrap();
        assert_eq!(third.scale(), AMOUNT_DP);
        assert!(checked_div(dec!(1), Decimal::ZERO).is_err());
    }
}
