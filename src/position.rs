// 4.0: curve position tracking. one record per trader, long and short legs
// kept apart, each with the quote paid to open it (cost basis).
// 4.1 payout math sits at the bottom.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{checked_div, checked_mul, Side};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePosition {
    pub long_size: Decimal,
    pub long_cost: Decimal,
    pub short_size: Decimal,
    pub short_cost: Decimal,
}

impl CurvePosition {
    pub fn is_empty(&self) -> bool {
        self.long_size.is_zero() && self.short_size.is_zero()
    }

    pub fn size(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long_size,
            Side::Short => self.short_size,
        }
    }

    pub fn cost(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long_cost,
            Side::Short => self.short_cost,
        }
    }

    /// Average entry price of one leg, None when the leg is flat.
    pub fn entry_price(&self, side: Side) -> Option<Decimal> {
        let size = self.size(side);
        if size.is_zero() {
            return None;
        }
        checked_div(self.cost(side), size).ok()
    }

    pub fn increase(&mut self, side: Side, size: Decimal, cost: Decimal) {
        match side {
            Side::Long => {
                self.long_size += size;
                self.long_cost += cost;
            }
            Side::Short => {
                self.short_size += size;
                self.short_cost += cost;
            }
        }
    }

    /// Take `size` off one leg and return the cost basis it carried.
    /// Closing the whole leg returns the whole cost so no dust is left.
    pub fn reduce(&mut self, side: Side, size: Decimal) -> Result<Decimal, EngineError> {
        let (open, cost) = match side {
            Side::Long => (&mut self.long_size, &mut self.long_cost),
            Side::Short => (&mut self.short_size, &mut self.short_cost),
        };
        if size > *open {
            return Err(EngineError::InvalidInput(format!(
                "cannot close {size} {side:?}, position holds {open}"
            )));
        }

        let share = if size == *open {
            *cost
        } else {
            checked_div(checked_mul(*cost, size)?, *open)?
        };
        *open -= size;
        *cost -= share;
        Ok(share)
    }
}

// 4.1: quote returned to the trader for closing `size` at `exit_price`.
// longs get the exit notional. shorts get their collateral back plus the
// price drop, i.e. 2*cost - exit notional, never below zero.
pub fn close_payout(side: Side, size: Decimal, cost_share: Decimal, exit_price: Decimal) -> Result<Decimal, EngineError> {
    let exit_notional = checked_mul(size, exit_price)?;
    let payout = match side {
        Side::Long => exit_notional,
        Side::Short => cost_share * Decimal::TWO - exit_notional,
    };
    Ok(payout.max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn legs_are_independent() {
        let mut pos = CurvePosition::default();
        pos.increase(Side::Long, dec!(10), dec!(100));
        pos.increase(Side::Short, dec!(4), dec!(36));

        assert_eq!(pos.size(Side::Long), dec!(10));
        assert_eq!(pos.entry_price(Side::Long), Some(dec!(10)));
        assert_eq!(pos.entry_price(Side::Short), Some(dec!(9)));
        assert!(!pos.is_empty());
    }

    #[test]
    fn reduce_is_proportional() {
        let mut pos = CurvePosition::default();
        pos.increase(Side::Long, dec!(10), dec!(100));

        assert_eq!(pos.reduce(Side::Long, dec!(4)).unwrap(), dec!(40));
        assert_eq!(pos.long_cost, dec!(60));
        assert_eq!(pos.reduce(Side::Long, dec!(6)).unwrap(), dec!(60));
        assert!(pos.is_empty());
    }

    #[test]
    fn full_close_returns_all_cost() {
        let mut pos = CurvePosition::default();
        pos.increase(Side::Short, dec!(3), dec!(10));
        // 10/3 doesn't divide evenly, the last close sweeps the remainder
        let first = pos.reduce(Side::Short, dec!(1)).unwrap();
        let rest = pos.reduce(Side::Short, dec!(2)).unwrap();
        assert_eq!(first + rest, dec!(10));
        assert_eq!(pos.short_cost, Decimal::ZERO);
    }

    #[test]
    fn over_close_rejected() {
        let mut pos = CurvePosition::default();
        pos.increase(Side::Long, dec!(1), dec!(1));
        assert!(matches!(pos.reduce(Side::Long, dec!(2)), Err(EngineError::InvalidInput(_))));
        assert_eq!(pos.long_size, dec!(1));
    }

    #[test]
    fn payouts() {
        // long: exit notional
        assert_eq!(close_payout(Side::Long, dec!(10), dec!(100), dec!(11)).unwrap(), dec!(110));
        // short entered at 10, exits at 9: 200 - 90
        assert_eq!(close_payout(Side::Short, dec!(10), dec!(100), dec!(9)).unwrap(), dec!(110));
        // short wiped out past 2x entry
        assert_eq!(close_payout(Side::Short, dec!(10), dec!(100), dec!(25)).unwrap(), Decimal::ZERO);
    }
}
