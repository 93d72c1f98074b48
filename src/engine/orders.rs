//! Order management and book matching.

use rust_decimal::Decimal;
use tracing::debug;

use super::core::{Engine, MarketState};
use crate::custody::CustodyLedger;
use crate::error::EngineError;
use crate::events::{EventPayload, FillEvent, OrderCanceledEvent, OrderPlacedEvent};
use crate::order::{Fill, Order, Settlement};
use crate::types::{checked_mul, AccountId, AssetId, OrderId, Side, Step};

impl Engine {
    /// Rest a limit order on the book, locking quote for bids and base for
    /// asks. Matching is a separate call.
    pub fn place_order(
        &mut self,
        trader: AccountId,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        step: Step,
    ) -> Result<OrderId, EngineError> {
        if self.state.paused {
            return Err(EngineError::TradingPaused);
        }
        let price = self.config.market.validate_order(price, quantity)?;

        self.transact(step, |tx| {
            let order_id = OrderId(tx.state.next_order_id);
            tx.state.next_order_id += 1;

            let (asset, reserved) = match side {
                Side::Long => (tx.quote_asset(), checked_mul(price.value(), quantity)?),
                Side::Short => (tx.base_asset(), quantity),
            };
            tx.state.ledger.lock(trader, asset, reserved)?;
            tx.state
                .book
                .insert(Order::new(order_id, trader, side, price, quantity, tx.step, reserved));

            tx.emit(EventPayload::OrderPlaced(OrderPlacedEvent {
                order_id,
                trader,
                side,
                price,
                quantity,
            }));
            Ok(order_id)
        })
    }

    /// Cancel a resting order. Only its owner may cancel; the remaining
    /// reservation is unlocked. Allowed while trading is paused.
    pub fn cancel_order(&mut self, caller: AccountId, order_id: OrderId, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            let owner = tx
                .state
                .book
                .get(order_id)
                .map(|o| o.trader)
                .ok_or(EngineError::OrderNotFound(order_id))?;
            if owner != caller {
                return Err(EngineError::UnauthorizedCancellation { order_id, owner, caller });
            }

            let order = tx
                .state
                .book
                .remove(order_id)
                .ok_or(EngineError::OrderNotFound(order_id))?;
            let asset = if order.is_bid() { tx.quote_asset() } else { tx.base_asset() };
            if !order.reserved.is_zero() {
                tx.state.ledger.unlock(order.trader, asset, order.reserved)?;
            }

            tx.emit(EventPayload::OrderCanceled(OrderCanceledEvent {
                order_id,
                trader: order.trader,
                remaining: order.quantity,
                released: order.reserved,
            }));
            Ok(())
        })
    }

    /// Match the book against itself until it is no longer crossed. One
    /// atomic call: either every fill settles or none does.
    pub fn match_orders(&mut self, step: Step) -> Result<Vec<Fill>, EngineError> {
        self.transact(step, |tx| {
            let (base, quote) = (tx.base_asset(), tx.quote_asset());
            let fills = {
                let MarketState { ledger, book, .. } = &mut *tx.state;
                book.match_resting(|s| settle_fill(ledger, base, quote, s))?
            };

            for fill in &fills {
                tx.state.twap.update_twap(fill.price);
                tx.emit(fill_event(fill));
            }
            Ok(fills)
        })
    }
}

/// Move balances for one fill.
///
/// Quote: a resting bid pays `price * qty` out of its reservation and gets
/// the rest of the released amount back (price improvement); an incoming
/// buyer pays from available. Base: a resting ask hands over its released
/// reservation; an incoming seller pays from available.
pub(super) fn settle_fill(
    ledger: &mut CustodyLedger,
    base: AssetId,
    quote: AssetId,
    settlement: &Settlement,
) -> Result<(), EngineError> {
    let fill = &settlement.fill;
    let buyer = fill.buyer();
    let seller = fill.seller();
    let cost = checked_mul(fill.price.value(), fill.quantity)?;

    match settlement.bid_release {
        Some(release) => {
            let paid = cost.min(release);
            if !paid.is_zero() {
                ledger.transfer_locked(buyer, seller, quote, paid)?;
            }
            let refund = release - paid;
            if !refund.is_zero() {
                ledger.unlock(buyer, quote, refund)?;
            }
        }
        None => {
            if !cost.is_zero() {
                ledger.lock(buyer, quote, cost)?;
                ledger.transfer_locked(buyer, seller, quote, cost)?;
            }
        }
    }

    match settlement.ask_release {
        Some(release) => {
            if !release.is_zero() {
                ledger.transfer_locked(seller, buyer, base, release)?;
            }
        }
        None => {
            ledger.lock(seller, base, fill.quantity)?;
            ledger.transfer_locked(seller, buyer, base, fill.quantity)?;
        }
    }

    debug!(
        maker_order = fill.maker_order_id.0,
        buyer = buyer.0,
        seller = seller.0,
        price = %fill.price,
        quantity = %fill.quantity,
        "fill settled"
    );
    Ok(())
}

pub(super) fn fill_event(fill: &Fill) -> EventPayload {
    EventPayload::Fill(FillEvent {
        maker_order_id: fill.maker_order_id,
        taker_order_id: fill.taker_order_id,
        buyer: fill.buyer(),
        seller: fill.seller(),
        taker_side: fill.taker_side,
        price: fill.price,
        quantity: fill.quantity,
    })
}
