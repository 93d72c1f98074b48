// 5.0 fees.rs: dynamic fee schedule for the curve leg.
// fee = clamp(base * vol * imbalance * utilization, base, max), in pips.
// balanced books always pay the floor, badly skewed books always pay the ceiling.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{checked_div, checked_mul, Pips, Step};

pub const MIN_BASE_FEE: u32 = 100;
pub const MAX_BASE_FEE: u32 = 5_000;
pub const MIN_MAX_FEE: u32 = 5_000;
pub const MAX_MAX_FEE: u32 = 20_000;

// imbalance below this pays the base fee, above the ceiling pays the max fee
pub const IMBALANCE_FLOOR: Decimal = dec!(0.05);
pub const IMBALANCE_CEILING: Decimal = dec!(0.20);
pub const MAX_IMBALANCE_MULTIPLIER: Decimal = dec!(3);

pub const UTILIZATION_KNEE: Decimal = dec!(0.5);
pub const UTILIZATION_SLOPE: Decimal = dec!(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeParams {
    pub base_fee: Pips,
    pub max_fee: Pips,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            base_fee: Pips(3_000), // 0.30%
            max_fee: Pips(10_000), // 1.00%
        }
    }
}

impl FeeParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        validate_fee_bounds(self.base_fee, self.max_fee)
    }
}

pub fn validate_fee_bounds(base_fee: Pips, max_fee: Pips) -> Result<(), EngineError> {
    if !(MIN_BASE_FEE..=MAX_BASE_FEE).contains(&base_fee.0) {
        return Err(EngineError::InvalidInput(format!(
            "base fee {base_fee} outside [{MIN_BASE_FEE}, {MAX_BASE_FEE}]"
        )));
    }
    if !(MIN_MAX_FEE..=MAX_MAX_FEE).contains(&max_fee.0) {
        return Err(EngineError::InvalidInput(format!(
            "max fee {max_fee} outside [{MIN_MAX_FEE}, {MAX_MAX_FEE}]"
        )));
    }
    if base_fee > max_fee {
        return Err(EngineError::InvalidInput(format!(
            "base fee {base_fee} above max fee {max_fee}"
        )));
    }
    Ok(())
}

/// Market conditions the fee responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeInputs {
    pub base_volatility: Decimal,
    pub effective_volatility: Decimal,
    pub long_oi: Decimal,
    pub short_oi: Decimal,
    pub utilization: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    pub current_fee: Pips,
    pub base_fee: Pips,
    pub max_fee: Pips,
    pub last_update_block: Option<Step>,
    pub is_paused: bool,
}

impl FeeState {
    pub fn new(params: &FeeParams) -> Self {
        Self {
            current_fee: params.base_fee,
            base_fee: params.base_fee,
            max_fee: params.max_fee,
            last_update_block: None,
            is_paused: false,
        }
    }

    /// At most one recomputation per step, none while paused.
    pub fn should_update_fee(&self, step: Step) -> bool {
        !self.is_paused && self.last_update_block.map_or(true, |last| step > last)
    }

    /// Recompute if allowed this step. Returns the new fee when it was
    /// recomputed.
    pub fn update(&mut self, step: Step, inputs: &FeeInputs) -> Result<Option<Pips>, EngineError> {
        if !self.should_update_fee(step) {
            return Ok(None);
        }
        let fee = calculate_dynamic_fee(self.base_fee, self.max_fee, inputs)?;
        self.current_fee = fee;
        self.last_update_block = Some(step);
        Ok(Some(fee))
    }

    /// Bounds changed: pull the current fee back inside them.
    pub fn set_bounds(&mut self, base_fee: Pips, max_fee: Pips) -> Result<(), EngineError> {
        validate_fee_bounds(base_fee, max_fee)?;
        self.base_fee = base_fee;
        self.max_fee = max_fee;
        self.current_fee = self.current_fee.max(base_fee).min(max_fee);
        Ok(())
    }
}

/// |L - S| / (L + S), zero with no open interest.
pub fn oi_imbalance(long_oi: Decimal, short_oi: Decimal) -> Result<Decimal, EngineError> {
    let total = long_oi + short_oi;
    if total.is_zero() {
        return Ok(Decimal::ZERO);
    }
    checked_div((long_oi - short_oi).abs(), total)
}

pub fn volatility_multiplier(base_volatility: Decimal, effective_volatility: Decimal) -> Result<Decimal, EngineError> {
    if base_volatility.is_zero() {
        return Ok(Decimal::ONE);
    }
    checked_div(effective_volatility, base_volatility)
}

// 1 inside the floor, linear through the band, saturating at the ceiling
pub fn imbalance_multiplier(imbalance: Decimal) -> Decimal {
    if imbalance < IMBALANCE_FLOOR {
        return Decimal::ONE;
    }
    if imbalance > IMBALANCE_CEILING {
        return MAX_IMBALANCE_MULTIPLIER;
    }
    let progress = (imbalance - IMBALANCE_FLOOR) / (IMBALANCE_CEILING - IMBALANCE_FLOOR);
    Decimal::ONE + progress * (MAX_IMBALANCE_MULTIPLIER - Decimal::ONE)
}

pub fn utilization_multiplier(utilization: Decimal) -> Decimal {
    if utilization <= UTILIZATION_KNEE {
        return Decimal::ONE;
    }
    Decimal::ONE + (utilization.min(Decimal::ONE) - UTILIZATION_KNEE) * UTILIZATION_SLOPE
}

/// The fee schedule. Pure.
pub fn calculate_dynamic_fee(base_fee: Pips, max_fee: Pips, inputs: &FeeInputs) -> Result<Pips, EngineError> {
    let imbalance = oi_imbalance(inputs.long_oi, inputs.short_oi)?;
    if imbalance < IMBALANCE_FLOOR {
        return Ok(base_fee);
    }
    if imbalance > IMBALANCE_CEILING {
        return Ok(max_fee);
    }

    let multiplier = checked_mul(
        checked_mul(
            volatility_multiplier(inputs.base_volatility, inputs.effective_volatility)?,
            imbalance_multiplier(imbalance),
        )?,
        utilization_multiplier(inputs.utilization),
    )?;
    let raw = checked_mul(Decimal::from(base_fee.0), multiplier)?;

    let clamped = raw
        .max(Decimal::from(base_fee.0))
        .min(Decimal::from(max_fee.0))
        .floor();
    let pips = clamped
        .to_u32()
        .ok_or_else(|| EngineError::InvalidInput(format!("fee {clamped} out of range")))?;
    Ok(Pips(pips))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(long_oi: Decimal, short_oi: Decimal, eff_vol: Decimal, utilization: Decimal) -> FeeInputs {
        FeeInputs {
            base_volatility: dec!(0.5),
            effective_volatility: eff_vol,
            long_oi,
            short_oi,
            utilization,
        }
    }

    const BASE: Pips = Pips(3_000);
    const MAX: Pips = Pips(10_000);

    #[test]
    fn balanced_book_pays_base_fee() {
        // 4% imbalance, high vol and utilization ignored
        let fee = calculate_dynamic_fee(BASE, MAX, &inputs(dec!(104), dec!(96), dec!(1.5), dec!(0.99))).unwrap();
        assert_eq!(fee, BASE);
    }

    #[test]
    fn skewed_book_pays_max_fee() {
        // 30% imbalance, calm market still pays the ceiling
        let fee = calculate_dynamic_fee(BASE, MAX, &inputs(dec!(130), dec!(70), dec!(0.1), Decimal::ZERO)).unwrap();
        assert_eq!(fee, MAX);
    }

    #[test]
    fn moderate_band_scales() {
        // 10% imbalance -> multiplier 1 + (0.05/0.15)*2 = 1.666..
        let fee = calculate_dynamic_fee(BASE, MAX, &inputs(dec!(110), dec!(90), dec!(0.5), Decimal::ZERO)).unwrap();
        assert_eq!(fee, Pips(4_999));

        let hotter = calculate_dynamic_fee(BASE, MAX, &inputs(dec!(110), dec!(90), dec!(0.6), Decimal::ZERO)).unwrap();
        assert!(hotter > fee);
    }

    #[test]
    fn utilization_raises_fee_past_half() {
        assert_eq!(utilization_multiplier(dec!(0.5)), Decimal::ONE);
        assert_eq!(utilization_multiplier(dec!(0.75)), dec!(1.5));
        assert_eq!(utilization_multiplier(dec!(1.5)), dec!(2));
    }

    #[test]
    fn imbalance_measure() {
        assert_eq!(oi_imbalance(Decimal::ZERO, Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(oi_imbalance(dec!(60), dec!(40)).unwrap(), dec!(0.2));
        assert_eq!(oi_imbalance(dec!(0), dec!(40)).unwrap(), Decimal::ONE);
    }

    #[test]
    fn once_per_step() {
        let mut state = FeeState::new(&FeeParams::default());
        let skewed = inputs(dec!(100), Decimal::ZERO, dec!(0.5), Decimal::ZERO);

        assert!(state.should_update_fee(Step(5)));
        assert_eq!(state.update(Step(5), &skewed).unwrap(), Some(MAX));
        assert!(!state.should_update_fee(Step(5)));

        let balanced = inputs(dec!(100), dec!(100), dec!(0.5), Decimal::ZERO);
        assert_eq!(state.update(Step(5), &balanced).unwrap(), None);
        assert_eq!(state.current_fee, MAX);

        assert_eq!(state.update(Step(6), &balanced).unwrap(), Some(BASE));
    }

    #[test]
    fn paused_fee_is_frozen() {
        let mut state = FeeState::new(&FeeParams::default());
        state.is_paused = true;
        let skewed = inputs(dec!(100), Decimal::ZERO, dec!(0.5), Decimal::ZERO);
        assert_eq!(state.update(Step(1), &skewed).unwrap(), None);
        assert_eq!(state.current_fee, BASE);
    }

    #[test]
    fn bounds_validation() {
        assert!(validate_fee_bounds(Pips(100), Pips(5_000)).is_ok());
        assert!(validate_fee_bounds(Pips(99), Pips(5_000)).is_err());
        assert!(validate_fee_bounds(Pips(5_001), Pips(10_000)).is_err());
        assert!(validate_fee_bounds(Pips(3_000), Pips(20_001)).is_err());
        assert!(validate_fee_bounds(Pips(5_000), Pips(5_000)).is_ok());
    }

    #[test]
    fn set_bounds_pulls_current_fee_inside() {
        let mut state = FeeState::new(&FeeParams::default());
        state.current_fee = Pips(9_000);
        state.set_bounds(Pips(1_000), Pips(6_000)).unwrap();
        assert_eq!(state.current_fee, Pips(6_000));
    }
}
