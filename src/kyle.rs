//! Kyle pricing curve: the virtual market maker.
//!
//! The curve prices against a virtual base quantity `Q` with `P(Q) = K / Q²`.
//! Longs draw `Q` down, shorts push it up, so impact grows with size in both
//! directions and sharpens as `Q` shrinks. On top of the curve move sits the
//! Kyle term `lambda · signed_flow`, where lambda is volatility over the
//! volatility-thinned depth and is only recomputed after open interest has
//! moved at least 5% since the last recomputation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::types::{checked_div, checked_mul, ensure_amount, to_ledger, Price, Side, Step};
use crate::volatility::VolatilityState;

/// Open interest must move this fraction before lambda is recomputed.
pub const LAMBDA_HYSTERESIS: Decimal = dec!(0.05);

/// Curve construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveParams {
    /// Pool constant K.
    pub k: Decimal,
    /// Initial virtual base quantity Q.
    pub initial_q: Decimal,
    /// Q may never be drawn below this.
    pub min_q: Decimal,
    /// Depth at base volatility.
    pub base_depth: Decimal,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            k: dec!(1_000_000_000_000),
            initial_q: dec!(1_000_000),
            min_q: dec!(100_000),
            base_depth: dec!(1_000_000),
        }
    }
}

impl CurveParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.k <= Decimal::ZERO || self.min_q <= Decimal::ZERO || self.base_depth <= Decimal::ZERO {
            return Err(EngineError::InvalidInput("curve K, min Q and base depth must be positive".to_string()));
        }
        if self.initial_q <= self.min_q {
            return Err(EngineError::InvalidInput(format!(
                "initial Q {} must exceed min Q {}",
                self.initial_q, self.min_q
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KyleState {
    /// Price impact per unit of signed flow.
    pub lambda: Decimal,
    pub cumulative_flow: Decimal,
    pub last_update_block: Step,
    pub base_depth: Decimal,
    pub effective_depth: Decimal,
    /// Total open interest when lambda was last recomputed.
    pub reference_oi: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingCurve {
    pub k: Decimal,
    pub q: Decimal,
    pub min_q: Decimal,
    pub kyle: KyleState,
}

/// Everything one curve execution did, for settlement and the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveTrade {
    pub side: Side,
    pub size: Decimal,
    /// true for closes and de-leveraging, false for opens
    pub closing: bool,
    pub pre_price: Decimal,
    pub post_price: Decimal,
    pub impact: Decimal,
    pub execution_price: Price,
    pub q_after: Decimal,
    pub lambda: Decimal,
    pub lambda_recomputed: bool,
    pub effective_volatility: Decimal,
    pub volatility_clamped: bool,
}

#[derive(Debug, Clone, Copy)]
enum Leg {
    Open(Side),
    Close(Side),
}

/// Kyle impact: exactly `lambda · flow`, truncated toward zero so the sign
/// is symmetric.
pub fn kyle_impact(lambda: Decimal, signed_flow: Decimal) -> Result<Decimal, EngineError> {
    checked_mul(lambda, signed_flow)
}

/// `K / Q²`
pub fn curve_price(k: Decimal, q: Decimal) -> Result<Decimal, EngineError> {
    checked_div(k, checked_mul(q, q)?)
}

/// Lambda from volatility and depth: thin depth means steep impact.
pub fn lambda_for(effective_volatility: Decimal, effective_depth: Decimal) -> Result<Decimal, EngineError> {
    checked_div(effective_volatility, effective_depth)
}

/// Whether open interest has drifted far enough from the reference to
/// justify recomputing lambda.
pub fn lambda_needs_update(reference_oi: Decimal, current_oi: Decimal) -> bool {
    if reference_oi.is_zero() {
        return !current_oi.is_zero();
    }
    (current_oi - reference_oi).abs() / reference_oi >= LAMBDA_HYSTERESIS
}

impl PricingCurve {
    pub fn new(params: &CurveParams, vol: &VolatilityState, step: Step) -> Result<Self, EngineError> {
        params.validate()?;
        let effective_depth = vol.effective_depth(params.base_depth)?;
        let lambda = lambda_for(vol.effective_volatility, effective_depth)?;

        Ok(Self {
            k: params.k,
            q: params.initial_q,
            min_q: params.min_q,
            kyle: KyleState {
                lambda,
                cumulative_flow: Decimal::ZERO,
                last_update_block: step,
                base_depth: params.base_depth,
                effective_depth,
                reference_oi: vol.total_oi(),
            },
        })
    }

    pub fn spot_price(&self) -> Result<Decimal, EngineError> {
        curve_price(self.k, self.q)
    }

    /// Open a position of `size` on `side` and commit the new curve and
    /// volatility state.
    pub fn execute_trade(
        &mut self,
        vol: &mut VolatilityState,
        side: Side,
        size: Decimal,
        step: Step,
    ) -> Result<CurveTrade, EngineError> {
        let (curve, next_vol, trade) = self.transition(vol, Leg::Open(side), size, step)?;
        *self = curve;
        *vol = next_vol;
        debug!(side = ?side, size = %size, price = %trade.execution_price, impact = %trade.impact, "curve trade");
        Ok(trade)
    }

    /// Same computation as `execute_trade`, nothing is mutated.
    pub fn simulate_trade(
        &self,
        vol: &VolatilityState,
        side: Side,
        size: Decimal,
        step: Step,
    ) -> Result<CurveTrade, EngineError> {
        self.transition(vol, Leg::Open(side), size, step).map(|(_, _, trade)| trade)
    }

    /// Reverse `size` of previously opened `side` exposure.
    pub fn close_position(
        &mut self,
        vol: &mut VolatilityState,
        side: Side,
        size: Decimal,
        step: Step,
    ) -> Result<CurveTrade, EngineError> {
        let (curve, next_vol, trade) = self.transition(vol, Leg::Close(side), size, step)?;
        *self = curve;
        *vol = next_vol;
        debug!(side = ?side, size = %size, price = %trade.execution_price, "curve close");
        Ok(trade)
    }

    pub fn simulate_close(
        &self,
        vol: &VolatilityState,
        side: Side,
        size: Decimal,
        step: Step,
    ) -> Result<CurveTrade, EngineError> {
        self.transition(vol, Leg::Close(side), size, step).map(|(_, _, trade)| trade)
    }

    fn transition(
        &self,
        vol: &VolatilityState,
        leg: Leg,
        size: Decimal,
        step: Step,
    ) -> Result<(PricingCurve, VolatilityState, CurveTrade), EngineError> {
        ensure_amount(size)?;
        let mut curve = self.clone();
        let mut vol = vol.clone();

        // longs draw Q down, shorts push it up; closes reverse the move
        let (side, closing, draws_q, oi_delta) = match leg {
            Leg::Open(side) => (side, false, side == Side::Long, size),
            Leg::Close(side) => (side, true, side == Side::Short, -size),
        };

        if closing {
            let open = match side {
                Side::Long => vol.long_oi,
                Side::Short => vol.short_oi,
            };
            if size > open {
                return Err(EngineError::InvalidInput(format!(
                    "cannot close {size} {side:?}, only {open} open"
                )));
            }
        }

        let q_after = if draws_q { curve.q - size } else { curve.q + size };
        if q_after < curve.min_q {
            return Err(EngineError::InvalidInput(format!(
                "trade of {size} drives Q to {q_after}, below floor {}",
                curve.min_q
            )));
        }

        let pre_price = curve_price(curve.k, curve.q)?;
        let post_price = curve_price(curve.k, q_after)?;

        let update = vol.update_open_interest(side, oi_delta)?;

        let total_oi = vol.total_oi();
        let lambda_recomputed = lambda_needs_update(curve.kyle.reference_oi, total_oi);
        if lambda_recomputed {
            let depth = vol.effective_depth(curve.kyle.base_depth)?;
            curve.kyle.effective_depth = depth;
            curve.kyle.lambda = lambda_for(vol.effective_volatility, depth)?;
            curve.kyle.reference_oi = total_oi;
            curve.kyle.last_update_block = step;
        }

        // opening a long or closing a short is buy flow
        let flow_sign = match leg {
            Leg::Open(s) => s.sign(),
            Leg::Close(s) => s.opposite().sign(),
        };
        let signed_flow = flow_sign * size;
        let impact = kyle_impact(curve.kyle.lambda, signed_flow)?;
        curve.kyle.cumulative_flow += signed_flow;

        let midpoint = to_ledger((pre_price + post_price) / Decimal::TWO);
        let raw_execution = midpoint + impact;
        let execution_price = Price::new(raw_execution).ok_or(EngineError::PriceOutOfBounds {
            price: raw_execution,
            min: Decimal::ZERO,
            max: Decimal::MAX,
        })?;

        curve.q = q_after;

        if lambda_recomputed {
            info!(
                lambda = %curve.kyle.lambda,
                effective_depth = %curve.kyle.effective_depth,
                total_oi = %total_oi,
                step = step.0,
                "kyle lambda recomputed"
            );
        }

        let trade = CurveTrade {
            side,
            size,
            closing,
            pre_price,
            post_price,
            impact,
            execution_price,
            q_after,
            lambda: curve.kyle.lambda,
            lambda_recomputed,
            effective_volatility: update.effective_volatility,
            volatility_clamped: update.clamped,
        };
        Ok((curve, vol, trade))
    }
}
