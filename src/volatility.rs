// 3.0 volatility.rs: open interest drives effective volatility.
// longs push it up harder than shorts pull it down. the result is always
// clamped into [0, max]; a clamp is reported, never hidden.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;
use crate::types::{checked_div, checked_mul, Side};

// coefficients are integers in units of 1e-12 per unit of open interest
pub const COEFFICIENT_SCALE: Decimal = dec!(0.000000000001);
pub const DEFAULT_LONG_COEFFICIENT: i64 = 3569; // +3.569e-9
pub const DEFAULT_SHORT_COEFFICIENT: i64 = -1678; // -1.678e-9

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityParams {
    pub base_volatility: Decimal,
    pub max_volatility: Decimal,
    pub long_coefficient: i64,
    pub short_coefficient: i64,
}

impl Default for VolatilityParams {
    fn default() -> Self {
        Self {
            base_volatility: dec!(0.5),
            max_volatility: dec!(2.0),
            long_coefficient: DEFAULT_LONG_COEFFICIENT,
            short_coefficient: DEFAULT_SHORT_COEFFICIENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatilityState {
    pub base_volatility: Decimal,
    pub effective_volatility: Decimal,
    pub max_volatility: Decimal,
    pub long_oi: Decimal,
    pub short_oi: Decimal,
    pub long_coefficient: i64,
    pub short_coefficient: i64,
}

/// Outcome of an open interest update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolatilityUpdate {
    pub effective_volatility: Decimal,
    /// The raw formula fell outside [0, max] and was clamped.
    pub clamped: bool,
}

impl VolatilityState {
    pub fn new(params: &VolatilityParams) -> Self {
        Self {
            base_volatility: params.base_volatility,
            effective_volatility: params.base_volatility.min(params.max_volatility),
            max_volatility: params.max_volatility,
            long_oi: Decimal::ZERO,
            short_oi: Decimal::ZERO,
            long_coefficient: params.long_coefficient,
            short_coefficient: params.short_coefficient,
        }
    }

    pub fn total_oi(&self) -> Decimal {
        self.long_oi + self.short_oi
    }

    pub fn long_coefficient(&self) -> Decimal {
        Decimal::from(self.long_coefficient) * COEFFICIENT_SCALE
    }

    pub fn short_coefficient(&self) -> Decimal {
        Decimal::from(self.short_coefficient) * COEFFICIENT_SCALE
    }

    /// Adjust one side's open interest by a signed delta and recompute.
    /// Open interest never goes negative: an oversized decrease is rejected.
    pub fn update_open_interest(&mut self, side: Side, delta: Decimal) -> Result<VolatilityUpdate, EngineError> {
        let current = match side {
            Side::Long => self.long_oi,
            Side::Short => self.short_oi,
        };
        let next = current + delta;
        if next < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "{side:?} open interest {current} cannot decrease by {}",
                -delta
            )));
        }

        let (long_oi, short_oi) = match side {
            Side::Long => (next, self.short_oi),
            Side::Short => (self.long_oi, next),
        };
        let (effective, clamped) = self.effective_for(long_oi, short_oi)?;

        self.long_oi = long_oi;
        self.short_oi = short_oi;
        self.effective_volatility = effective;

        if clamped {
            warn!(
                long_oi = %long_oi,
                short_oi = %short_oi,
                effective = %effective,
                "effective volatility clamped"
            );
        }

        Ok(VolatilityUpdate {
            effective_volatility: effective,
            clamped,
        })
    }

    /// Effective volatility for hypothetical open interest, without mutating.
    pub fn effective_for(&self, long_oi: Decimal, short_oi: Decimal) -> Result<(Decimal, bool), EngineError> {
        let raw = self.base_volatility
            + checked_mul(long_oi, self.long_coefficient())?
            + checked_mul(short_oi, self.short_coefficient())?;
        let clamped = raw.max(Decimal::ZERO).min(self.max_volatility);
        Ok((clamped, clamped != raw))
    }

    /// Depth seen by the pricing curve: thins out as volatility rises.
    pub fn effective_depth(&self, base_depth: Decimal) -> Result<Decimal, EngineError> {
        depth_for(base_depth, self.base_volatility, self.effective_volatility)
    }

    pub fn set_coefficients(&mut self, long_coefficient: i64, short_coefficient: i64) -> Result<(), EngineError> {
        self.long_coefficient = long_coefficient;
        self.short_coefficient = short_coefficient;
        let (effective, _) = self.effective_for(self.long_oi, self.short_oi)?;
        self.effective_volatility = effective;
        Ok(())
    }
}

// baseDepth * baseVol / effVol. zero effective volatility leaves depth at base.
pub fn depth_for(base_depth: Decimal, base_volatility: Decimal, effective_volatility: Decimal) -> Result<Decimal, EngineError> {
    if effective_volatility.is_zero() {
        return Ok(base_depth);
    }
    checked_div(checked_mul(base_depth, base_volatility)?, effective_volatility)
}
