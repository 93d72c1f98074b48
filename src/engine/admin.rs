//! Admin setters. Access control lives with the host; the engine validates
//! parameters before touching state and records who changed what.

use rust_decimal::Decimal;
use tracing::info;

use super::core::{Engine, Tx};
use crate::config::validate_coefficients;
use crate::error::EngineError;
use crate::events::{AdminAction, AuditRecord, CurveInitializedEvent, EventPayload};
use crate::kyle::{CurveParams, PricingCurve};
use crate::types::{ensure_amount, AccountId, Pips, Step};

fn audit(tx: &mut Tx<'_>, actor: AccountId, action: AdminAction, params: String) {
    info!(actor = actor.0, action = ?action, params = %params, step = tx.step.0, "admin action");
    let step = tx.step;
    tx.emit(EventPayload::Admin(AuditRecord {
        actor,
        action,
        params,
        step,
    }));
}

impl Engine {
    /// Create the pricing curve. `k` and `initial_q` override the configured
    /// curve parameters when given.
    pub fn initialize_curve(
        &mut self,
        actor: AccountId,
        k: Option<Decimal>,
        initial_q: Option<Decimal>,
        step: Step,
    ) -> Result<(), EngineError> {
        if self.state.curve.is_some() {
            return Err(EngineError::InvalidInput("pricing curve already initialized".to_string()));
        }
        let defaults = &self.config.curve;
        let params = CurveParams {
            k: k.unwrap_or(defaults.k),
            initial_q: initial_q.unwrap_or(defaults.initial_q),
            ..defaults.clone()
        };

        self.transact(step, |tx| {
            let curve = PricingCurve::new(&params, &tx.state.volatility, tx.step)?;
            tx.emit(EventPayload::CurveInitialized(CurveInitializedEvent {
                k: curve.k,
                q: curve.q,
                lambda: curve.kyle.lambda,
            }));
            tx.state.curve = Some(curve);
            audit(tx, actor, AdminAction::InitializeCurve, format!("k={} q={}", params.k, params.initial_q));
            Ok(())
        })
    }

    /// Base fee in [100, 5000] pips and not above the max fee.
    pub fn set_base_fee(&mut self, actor: AccountId, base_fee: Pips, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            let max_fee = tx.state.fees.max_fee;
            tx.state.fees.set_bounds(base_fee, max_fee)?;
            audit(tx, actor, AdminAction::SetBaseFee, format!("base_fee={base_fee}"));
            Ok(())
        })
    }

    /// Max fee in [5000, 20000] pips and not below the base fee.
    pub fn set_max_fee(&mut self, actor: AccountId, max_fee: Pips, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            let base_fee = tx.state.fees.base_fee;
            tx.state.fees.set_bounds(base_fee, max_fee)?;
            audit(tx, actor, AdminAction::SetMaxFee, format!("max_fee={max_fee}"));
            Ok(())
        })
    }

    /// Coefficients in units of 1e-12: long in [0, 10000], short in [-10000, 0].
    pub fn set_volatility_coefficients(
        &mut self,
        actor: AccountId,
        long_coefficient: i64,
        short_coefficient: i64,
        step: Step,
    ) -> Result<(), EngineError> {
        validate_coefficients(long_coefficient, short_coefficient)?;
        self.transact(step, |tx| {
            tx.state.volatility.set_coefficients(long_coefficient, short_coefficient)?;
            audit(
                tx,
                actor,
                AdminAction::SetVolatilityCoefficients,
                format!("long={long_coefficient} short={short_coefficient}"),
            );
            Ok(())
        })
    }

    pub fn set_max_position_size(&mut self, actor: AccountId, size: Decimal, step: Step) -> Result<(), EngineError> {
        ensure_amount(size)?;
        let floor = self.config.admin.min_max_position_size;
        if size < floor {
            return Err(EngineError::InvalidInput(format!(
                "max position size {size} below floor {floor}"
            )));
        }
        self.transact(step, |tx| {
            tx.state.max_position_size = size;
            audit(tx, actor, AdminAction::SetMaxPositionSize, format!("max_position_size={size}"));
            Ok(())
        })
    }

    /// Freeze or resume dynamic fee recomputation. Trading is unaffected.
    pub fn set_fee_updates_paused(&mut self, actor: AccountId, paused: bool, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            tx.state.fees.is_paused = paused;
            audit(tx, actor, AdminAction::SetFeeUpdatesPaused, format!("paused={paused}"));
            Ok(())
        })
    }

    pub fn pause(&mut self, actor: AccountId, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            tx.state.paused = true;
            audit(tx, actor, AdminAction::Pause, String::new());
            Ok(())
        })
    }

    pub fn unpause(&mut self, actor: AccountId, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            tx.state.paused = false;
            audit(tx, actor, AdminAction::Unpause, String::new());
            Ok(())
        })
    }
}
