//! Hybrid routing: drain the book, then let the curve absorb the rest.
//!
//! A routed buy first sweeps resting asks at their own prices (and never
//! past the caller's limit). Whatever the book could not fill opens a
//! position on the pricing curve, paying notional plus the dynamic fee into
//! the pool. Closing a curve position reverses the curve move and pays out
//! of the pool.

use rust_decimal::Decimal;
use tracing::debug;

use super::core::{Engine, MarketState, Tx};
use super::orders::{fill_event, settle_fill};
use super::results::{CloseReport, CurveFill, RouteQuote, RouteReport};
use crate::deleverage::should_prioritize_deleveraging;
use crate::error::EngineError;
use crate::events::{CurveTradeEvent, EventPayload, FeeUpdatedEvent, OiUpdatedEvent, PositionClosedEvent};
use crate::fees::calculate_dynamic_fee;
use crate::kyle::CurveTrade;
use crate::position::close_payout;
use crate::types::{checked_div, checked_mul, ensure_amount, AccountId, Pips, Price, Side, Step};

impl Engine {
    /// Route a market trade of `size` for `trader`. Book first, curve for the
    /// remainder. With a `limit`, book fills stop at the limit and a curve
    /// execution beyond it fails the whole trade with `PriceOutOfBounds`.
    pub fn execute_trade(
        &mut self,
        trader: AccountId,
        side: Side,
        size: Decimal,
        limit: Option<Decimal>,
        step: Step,
    ) -> Result<RouteReport, EngineError> {
        if self.state.paused {
            return Err(EngineError::TradingPaused);
        }
        ensure_amount(size)?;
        let limit = limit
            .map(|p| self.config.market.validate_order(p, size))
            .transpose()?;

        self.transact(step, |tx| {
            let (base, quote) = (tx.base_asset(), tx.quote_asset());
            let (fills, remaining) = {
                let MarketState { ledger, book, .. } = &mut *tx.state;
                book.sweep(trader, side, size, limit, |s| settle_fill(ledger, base, quote, s))?
            };

            let mut notional = Decimal::ZERO;
            for fill in &fills {
                notional += checked_mul(fill.price.value(), fill.quantity)?;
                tx.state.twap.update_twap(fill.price);
                tx.emit(fill_event(fill));
            }

            let curve = if remaining.is_zero() {
                None
            } else {
                let leg = open_on_curve(tx, trader, side, remaining, limit)?;
                notional += leg.notional;
                Some(leg)
            };

            let amm_volume = curve.as_ref().map_or(Decimal::ZERO, |c| c.trade.size);
            let utilization = tx.state.utilization(quote)?;
            let report = RouteReport {
                side,
                orderbook_volume: size - remaining,
                amm_volume,
                fills,
                curve,
                average_price: Price::new(checked_div(notional, size)?),
                deleveraging_priority: should_prioritize_deleveraging(utilization, &tx.config.deleverage),
            };

            debug!(
                trader = trader.0,
                side = ?side,
                orderbook_volume = %report.orderbook_volume,
                amm_volume = %report.amm_volume,
                "trade routed"
            );
            Ok(report)
        })
    }

    /// What `execute_trade` would do at the next step, without doing it.
    pub fn simulate_trade(&self, side: Side, size: Decimal, limit: Option<Decimal>) -> Result<RouteQuote, EngineError> {
        let next = Step(self.state.last_step.0.saturating_add(1));
        self.simulate_trade_at(side, size, limit, next)
    }

    /// What `execute_trade` would do at `step`. The fee is the one that step
    /// would charge: refreshed if the step allows a refresh, held otherwise.
    pub fn simulate_trade_at(
        &self,
        side: Side,
        size: Decimal,
        limit: Option<Decimal>,
        step: Step,
    ) -> Result<RouteQuote, EngineError> {
        self.check_step(step)?;
        ensure_amount(size)?;
        let limit = limit
            .map(|p| self.config.market.validate_order(p, size))
            .transpose()?;

        let mut remaining = size;
        let mut orderbook_notional = Decimal::ZERO;
        for order in self.state.book.orders_by_priority(side.opposite()) {
            if remaining.is_zero() || !crosses(side, order.price, limit) {
                break;
            }
            let take = remaining.min(order.quantity);
            orderbook_notional += checked_mul(order.price.value(), take)?;
            remaining -= take;
        }

        let fee_rate = self.fee_rate_at(step)?;
        let (curve, estimated_fee) = if remaining.is_zero() {
            (None, Decimal::ZERO)
        } else {
            let trade = self
                .state
                .curve()?
                .simulate_trade(&self.state.volatility, side, remaining, step)?;
            check_limit(side, trade.execution_price, limit)?;
            let fee = checked_mul(
                checked_mul(trade.execution_price.value(), remaining)?,
                fee_rate.as_fraction(),
            )?;
            (Some(trade), fee)
        };

        let curve_notional = match &curve {
            Some(trade) => checked_mul(trade.execution_price.value(), trade.size)?,
            None => Decimal::ZERO,
        };
        Ok(RouteQuote {
            side,
            orderbook_volume: size - remaining,
            amm_volume: remaining,
            orderbook_notional,
            curve,
            fee_rate,
            estimated_fee,
            average_price: Price::new(checked_div(orderbook_notional + curve_notional, size)?),
        })
    }

    // the rate a curve leg at `step` would pay; mirrors `refresh_fee`
    fn fee_rate_at(&self, step: Step) -> Result<Pips, EngineError> {
        let fees = &self.state.fees;
        if !fees.should_update_fee(step) {
            return Ok(fees.current_fee);
        }
        let inputs = self.state.fee_inputs(self.config.market.quote_asset)?;
        calculate_dynamic_fee(fees.base_fee, fees.max_fee, &inputs)
    }

    /// Close `size` of the trader's `side` curve exposure at the curve price.
    pub fn close_position(
        &mut self,
        trader: AccountId,
        side: Side,
        size: Decimal,
        step: Step,
    ) -> Result<CloseReport, EngineError> {
        if self.state.paused {
            return Err(EngineError::TradingPaused);
        }
        self.transact(step, |tx| {
            let report = close_on_curve(tx, trader, side, size, None)?;
            tx.emit(EventPayload::PositionClosed(PositionClosedEvent {
                trader,
                side,
                size,
                exit_price: report.exit_price,
                payout: report.payout,
                fee: report.fee,
            }));
            Ok(report)
        })
    }
}

fn crosses(taker_side: Side, maker_price: Price, limit: Option<Price>) -> bool {
    limit.map_or(true, |p| match taker_side {
        Side::Long => p >= maker_price,
        Side::Short => p <= maker_price,
    })
}

fn check_limit(side: Side, execution: Price, limit: Option<Price>) -> Result<(), EngineError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    match side {
        Side::Long if execution > limit => Err(EngineError::PriceOutOfBounds {
            price: execution.value(),
            min: Decimal::ZERO,
            max: limit.value(),
        }),
        Side::Short if execution < limit => Err(EngineError::PriceOutOfBounds {
            price: execution.value(),
            min: limit.value(),
            max: Decimal::MAX,
        }),
        _ => Ok(()),
    }
}

// recompute the fee at most once per step, from pre-trade conditions
fn refresh_fee(tx: &mut Tx<'_>) -> Result<(), EngineError> {
    if !tx.state.fees.should_update_fee(tx.step) {
        return Ok(());
    }
    let inputs = tx.state.fee_inputs(tx.quote_asset())?;
    let old_fee = tx.state.fees.current_fee;
    if let Some(new_fee) = tx.state.fees.update(tx.step, &inputs)? {
        if new_fee != old_fee {
            tx.emit(EventPayload::FeeUpdated(FeeUpdatedEvent { old_fee, new_fee }));
        }
    }
    Ok(())
}

fn oi_event(tx: &mut Tx<'_>, trade: &CurveTrade) {
    tx.emit(EventPayload::OiUpdated(OiUpdatedEvent {
        long_oi: tx.state.volatility.long_oi,
        short_oi: tx.state.volatility.short_oi,
        effective_volatility: trade.effective_volatility,
        volatility_clamped: trade.volatility_clamped,
    }));
}

/// Open `size` of `side` exposure on the curve for `trader`, charging
/// notional plus fee into the pool.
pub(super) fn open_on_curve(
    tx: &mut Tx<'_>,
    trader: AccountId,
    side: Side,
    size: Decimal,
    limit: Option<Price>,
) -> Result<CurveFill, EngineError> {
    let quote = tx.quote_asset();
    let step = tx.step;

    let mut position = tx.state.position(trader);
    let held = position.size(side);
    if held + size > tx.state.max_position_size {
        return Err(EngineError::InvalidInput(format!(
            "position {} + {size} exceeds max position size {}",
            held, tx.state.max_position_size
        )));
    }

    refresh_fee(tx)?;
    let fee_rate = tx.state.fees.current_fee;

    let trade = {
        let MarketState { curve, volatility, .. } = &mut *tx.state;
        let curve = curve.as_mut().ok_or(EngineError::NotInitialized("pricing curve"))?;
        curve.execute_trade(volatility, side, size, step)?
    };
    check_limit(side, trade.execution_price, limit)?;

    let notional = checked_mul(trade.execution_price.value(), size)?;
    let fee = checked_mul(notional, fee_rate.as_fraction())?;
    let charge = notional + fee;
    tx.state.ledger.lock(trader, quote, charge)?;
    tx.state.ledger.transfer_locked(trader, AccountId::POOL, quote, charge)?;

    position.increase(side, size, notional);
    tx.state.store_position(trader, position);
    tx.state.twap.update_twap(trade.execution_price);

    tx.emit(EventPayload::CurveTrade(CurveTradeEvent {
        trader,
        side,
        size,
        execution_price: trade.execution_price,
        impact: trade.impact,
        fee,
        lambda: trade.lambda,
        lambda_recomputed: trade.lambda_recomputed,
    }));
    oi_event(tx, &trade);

    Ok(CurveFill {
        trade,
        notional,
        fee,
        fee_rate,
    })
}

/// Reverse `size` of `side` exposure on the curve and pay the trader out of
/// the pool. `exit_override` prices the payout (de-leveraging); otherwise
/// the curve's own execution price is used.
pub(super) fn close_on_curve(
    tx: &mut Tx<'_>,
    trader: AccountId,
    side: Side,
    size: Decimal,
    exit_override: Option<Price>,
) -> Result<CloseReport, EngineError> {
    ensure_amount(size)?;
    let quote = tx.quote_asset();
    let step = tx.step;

    let mut position = tx.state.position(trader);
    let cost_share = position.reduce(side, size)?;

    refresh_fee(tx)?;
    let fee_rate = tx.state.fees.current_fee;

    let trade = {
        let MarketState { curve, volatility, .. } = &mut *tx.state;
        let curve = curve.as_mut().ok_or(EngineError::NotInitialized("pricing curve"))?;
        curve.close_position(volatility, side, size, step)?
    };
    let exit_price = exit_override.unwrap_or(trade.execution_price);

    let gross = close_payout(side, size, cost_share, exit_price.value())?;
    let fee = checked_mul(checked_mul(size, exit_price.value())?, fee_rate.as_fraction())?.min(gross);
    let payout = gross - fee;
    if !payout.is_zero() {
        tx.state.ledger.lock(AccountId::POOL, quote, payout)?;
        tx.state.ledger.transfer_locked(AccountId::POOL, trader, quote, payout)?;
    }

    tx.state.store_position(trader, position);
    tx.state.twap.update_twap(exit_price);
    oi_event(tx, &trade);

    Ok(CloseReport {
        side,
        size,
        exit_price,
        cost_share,
        payout,
        fee,
        trade,
    })
}
