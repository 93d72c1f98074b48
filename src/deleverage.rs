// 6.0 deleverage.rs: forced-close pricing.
// anchored to a 10-slot TWAP, widened by a volatility term, and always
// clamped into ±5% of the oracle. clamping is the policy here, never revert.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{checked_div, checked_mul, ensure_amount, to_ledger, Price, Side};

pub const TWAP_WINDOW: usize = 10;
pub const ORACLE_BAND: Decimal = dec!(0.05);
pub const PRIORITY_UTILIZATION: Decimal = dec!(0.9);

/// Fixed window of the last `TWAP_WINDOW` prices. Unfilled slots count as
/// zero, so the average starts low and converges as the window fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapState {
    prices: [Decimal; TWAP_WINDOW],
    cursor: usize,
    sum: Decimal,
    observations: u64,
}

impl Default for TwapState {
    fn default() -> Self {
        Self {
            prices: [Decimal::ZERO; TWAP_WINDOW],
            cursor: 0,
            sum: Decimal::ZERO,
            observations: 0,
        }
    }
}

impl TwapState {
    pub fn new() -> Self {
        Self::default()
    }

    // O(1): swap the oldest slot out of the running sum
    pub fn update_twap(&mut self, price: Price) {
        let slot = &mut self.prices[self.cursor];
        self.sum = self.sum - *slot + price.value();
        *slot = price.value();
        self.cursor = (self.cursor + 1) % TWAP_WINDOW;
        self.observations += 1;
    }

    pub fn twap(&self) -> Decimal {
        to_ledger(self.sum / Decimal::from(TWAP_WINDOW as u64))
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn is_warm(&self) -> bool {
        self.observations >= TWAP_WINDOW as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleverageParams {
    /// Half-width of the band around the oracle price.
    pub oracle_band: Decimal,
    /// Utilization above which de-leveraging is serviced first.
    pub priority_utilization: Decimal,
}

impl Default for DeleverageParams {
    fn default() -> Self {
        Self {
            oracle_band: ORACLE_BAND,
            priority_utilization: PRIORITY_UTILIZATION,
        }
    }
}

/// Market inputs for one de-leveraging quote.
#[derive(Debug, Clone, Copy)]
pub struct DeleverageInputs {
    pub twap: Decimal,
    pub effective_volatility: Decimal,
    pub effective_depth: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleverageQuote {
    /// TWAP-anchored price before the oracle clamp.
    pub raw_price: Decimal,
    pub price: Price,
    pub clamped: bool,
}

/// Price a forced close of `quantity`. `side` is the direction of the
/// closing trade: buys close shorts, sells close longs.
pub fn calculate_deleverage_price(
    side: Side,
    quantity: Decimal,
    oracle_price: Price,
    inputs: &DeleverageInputs,
    params: &DeleverageParams,
) -> Result<DeleverageQuote, EngineError> {
    ensure_amount(quantity)?;

    let reference = if inputs.twap.is_zero() {
        oracle_price.value()
    } else {
        inputs.twap
    };

    let deviation = if inputs.effective_depth.is_zero() {
        Decimal::ZERO
    } else {
        checked_div(checked_mul(inputs.effective_volatility, quantity)?, inputs.effective_depth)?
    };
    let raw_price = match side {
        Side::Long => checked_mul(reference, Decimal::ONE + deviation)?,
        Side::Short => checked_mul(reference, (Decimal::ONE - deviation).max(Decimal::ZERO))?,
    };

    let floor = checked_mul(oracle_price.value(), Decimal::ONE - params.oracle_band)?;
    let ceiling = checked_mul(oracle_price.value(), Decimal::ONE + params.oracle_band)?;
    let bounded = raw_price.max(floor).min(ceiling);

    let price = Price::new(bounded).ok_or(EngineError::PriceOutOfBounds {
        price: bounded,
        min: floor,
        max: ceiling,
    })?;

    Ok(DeleverageQuote {
        raw_price,
        price,
        clamped: bounded != raw_price,
    })
}

pub fn should_prioritize_deleveraging(utilization: Decimal, params: &DeleverageParams) -> bool {
    utilization > params.priority_utilization
}
