//! Order types and order book implementation.
//!
//! Price-time priority book. Orders live in one map keyed by id; the two
//! queues are ordered key sets so the best order on either side is always
//! `first()`. Matching never touches balances directly: every fill is handed
//! to a settlement callback and only applied to the book once it succeeds.

use crate::error::EngineError;
use crate::journal::UndoLog;
use crate::types::{checked_mul, AccountId, OrderId, Price, Side, Step};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A resting limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub trader: AccountId,
    pub side: Side,
    pub price: Price,
    /// Unfilled quantity. The only field matching mutates.
    pub quantity: Decimal,
    /// Step the order was placed at.
    pub timestamp: Step,
    /// Collateral still locked for this order: quote for bids, base for asks.
    pub reserved: Decimal,
}

impl Order {
    pub fn new(
        id: OrderId,
        trader: AccountId,
        side: Side,
        price: Price,
        quantity: Decimal,
        timestamp: Step,
        reserved: Decimal,
    ) -> Self {
        Self {
            id,
            trader,
            side,
            price,
            quantity,
            timestamp,
            reserved,
        }
    }

    pub fn is_bid(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_filled(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Collateral released by filling `fill_qty`. A final fill releases
    /// whatever is left so rounding dust never stays locked.
    fn release_for(&self, fill_qty: Decimal) -> Result<Decimal, EngineError> {
        if fill_qty >= self.quantity {
            return Ok(self.reserved);
        }
        let share = match self.side {
            Side::Long => checked_mul(self.price.value(), fill_qty)?,
            Side::Short => fill_qty,
        };
        Ok(share.min(self.reserved))
    }
}

/// Queue position. Bids sort price descending, asks price ascending; both
/// then by timestamp and order id ascending so earlier orders come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub side: Side,
    pub price: Price,
    pub timestamp: Step,
    pub order_id: OrderId,
}

impl OrderKey {
    fn of(order: &Order) -> Self {
        Self {
            side: order.side,
            price: order.price,
            timestamp: order.timestamp,
            order_id: order.id,
        }
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_price = match self.side {
            Side::Long => other.price.cmp(&self.price),
            Side::Short => self.price.cmp(&other.price),
        };
        by_price
            .then(self.timestamp.cmp(&other.timestamp))
            .then(self.order_id.cmp(&other.order_id))
    }
}

/// A single price level in the order book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub total_quantity: Decimal,
    pub order_count: usize,
}

/// An execution between a resting maker order and a taker (a resting order
/// placed later, or an incoming sweep).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub maker_order_id: OrderId,
    pub maker: AccountId,
    /// None when the taker is an incoming sweep rather than a resting order.
    pub taker_order_id: Option<OrderId>,
    pub taker: AccountId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Decimal,
}

impl Fill {
    pub fn buyer(&self) -> AccountId {
        match self.taker_side {
            Side::Long => self.taker,
            Side::Short => self.maker,
        }
    }

    pub fn seller(&self) -> AccountId {
        match self.taker_side {
            Side::Long => self.maker,
            Side::Short => self.taker,
        }
    }
}

/// What the settlement callback needs to move balances for one fill.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub fill: Fill,
    /// Quote released from a resting bid's reservation.
    pub bid_release: Option<Decimal>,
    /// Base released from a resting ask's reservation.
    pub ask_release: Option<Decimal>,
}

/// Central Limit Order Book (CLOB)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    bids: BTreeSet<OrderKey>,
    asks: BTreeSet<OrderKey>,
    #[serde(skip)]
    undo: UndoLog<OrderId, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, side: Side) -> &BTreeSet<OrderKey> {
        match side {
            Side::Long => &self.bids,
            Side::Short => &self.asks,
        }
    }

    fn queue_mut(&mut self, side: Side) -> &mut BTreeSet<OrderKey> {
        match side {
            Side::Long => &mut self.bids,
            Side::Short => &mut self.asks,
        }
    }

    /// Get the best bid price (highest buy order)
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|k| k.price)
    }

    /// Get the best ask price (lowest sell order)
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|k| k.price)
    }

    pub fn best_order(&self, side: Side) -> Option<&Order> {
        self.queue(side).first().and_then(|k| self.orders.get(&k.order_id))
    }

    /// Get the mid price (average of best bid and ask)
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Price::new((bid.value() + ask.value()) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get the spread between best bid and ask
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.value() - bid.value()),
            _ => None,
        }
    }

    /// Insert an order into its queue
    pub fn insert(&mut self, order: Order) {
        self.record(order.id);
        self.attach(order);
    }

    /// Remove an order from the book by ID
    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        self.record(order_id);
        self.detach(order_id)
    }

    pub(crate) fn begin(&mut self) {
        self.undo.begin();
    }

    pub(crate) fn commit(&mut self) {
        self.undo.commit();
    }

    /// Put back every order touched since `begin`, queues included.
    pub(crate) fn rollback(&mut self) {
        for (order_id, prior) in self.undo.take() {
            self.detach(order_id);
            if let Some(order) = prior {
                self.attach(order);
            }
        }
    }

    fn record(&mut self, order_id: OrderId) {
        let orders = &self.orders;
        self.undo.record_with(&order_id, || orders.get(&order_id).cloned());
    }

    fn attach(&mut self, order: Order) {
        let key = OrderKey::of(&order);
        self.queue_mut(order.side).insert(key);
        self.orders.insert(order.id, order);
    }

    fn detach(&mut self, order_id: OrderId) -> Option<Order> {
        let order = self.orders.remove(&order_id)?;
        let key = OrderKey::of(&order);
        self.queue_mut(order.side).remove(&key);
        Some(order)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// Orders on one side in priority order.
    pub fn orders_by_priority(&self, side: Side) -> impl Iterator<Item = &Order> + '_ {
        self.queue(side)
            .iter()
            .filter_map(move |k| self.orders.get(&k.order_id))
    }

    /// Get depth at each price level, best first
    pub fn levels(&self, side: Side, max_levels: usize) -> Vec<PriceLevel> {
        let mut levels: Vec<PriceLevel> = Vec::new();

        for order in self.orders_by_priority(side) {
            if levels.last().map(|l| l.price) != Some(order.price) {
                if levels.len() >= max_levels {
                    break;
                }
                levels.push(PriceLevel {
                    price: order.price,
                    total_quantity: Decimal::ZERO,
                    order_count: 0,
                });
            }
            if let Some(level) = levels.last_mut() {
                level.total_quantity += order.quantity;
                level.order_count += 1;
            }
        }

        levels
    }

    /// Check if the book is crossed (best bid >= best ask)
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Reduce an order by `quantity` and its reservation by `release`,
    /// removing it once fully filled.
    fn apply_fill(&mut self, order_id: OrderId, quantity: Decimal, release: Decimal) {
        self.record(order_id);
        let filled = match self.orders.get_mut(&order_id) {
            Some(order) => {
                order.quantity -= quantity;
                order.reserved -= release;
                order.is_filled()
            }
            None => false,
        };
        if filled {
            if let Some(order) = self.remove(order_id) {
                debug_assert!(order.reserved.is_zero(), "filled order kept a reservation");
            }
        }
    }

    /// Match resting orders against each other while the book is crossed.
    /// The earlier-inserted order of each pair is the maker and sets the
    /// price. Stops at the first settlement error; fills already applied stay
    /// applied, so callers run this inside a journaled transaction.
    pub fn match_resting<F>(&mut self, mut settle: F) -> Result<Vec<Fill>, EngineError>
    where
        F: FnMut(&Settlement) -> Result<(), EngineError>,
    {
        let mut fills = Vec::new();

        while self.is_crossed() {
            let (Some(bid), Some(ask)) = (self.best_order(Side::Long), self.best_order(Side::Short)) else {
                break;
            };

            let (maker, taker) = if bid.id < ask.id { (bid, ask) } else { (ask, bid) };
            let quantity = bid.quantity.min(ask.quantity);

            let settlement = Settlement {
                fill: Fill {
                    maker_order_id: maker.id,
                    maker: maker.trader,
                    taker_order_id: Some(taker.id),
                    taker: taker.trader,
                    taker_side: taker.side,
                    price: maker.price,
                    quantity,
                },
                bid_release: Some(bid.release_for(quantity)?),
                ask_release: Some(ask.release_for(quantity)?),
            };
            let (bid_id, ask_id) = (bid.id, ask.id);

            settle(&settlement)?;

            self.apply_fill(bid_id, quantity, settlement.bid_release.unwrap_or_default());
            self.apply_fill(ask_id, quantity, settlement.ask_release.unwrap_or_default());
            fills.push(settlement.fill);
        }

        Ok(fills)
    }

    /// Sweep the opposite queue with an incoming order of `quantity`, at maker
    /// prices, never past `limit` when one is given. Returns the fills and
    /// the unmatched remainder.
    pub fn sweep<F>(
        &mut self,
        taker: AccountId,
        taker_side: Side,
        quantity: Decimal,
        limit: Option<Price>,
        mut settle: F,
    ) -> Result<(Vec<Fill>, Decimal), EngineError>
    where
        F: FnMut(&Settlement) -> Result<(), EngineError>,
    {
        let mut fills = Vec::new();
        let mut remaining = quantity;
        let resting_side = taker_side.opposite();

        while !remaining.is_zero() {
            let Some(maker) = self.best_order(resting_side) else {
                break; // no liquidity
            };

            let crosses = limit.map_or(true, |p| match taker_side {
                Side::Long => p >= maker.price,
                Side::Short => p <= maker.price,
            });
            if !crosses {
                break;
            }

            let fill_qty = remaining.min(maker.quantity);
            let release = maker.release_for(fill_qty)?;
            let (bid_release, ask_release) = match resting_side {
                Side::Long => (Some(release), None),
                Side::Short => (None, Some(release)),
            };
            let settlement = Settlement {
                fill: Fill {
                    maker_order_id: maker.id,
                    maker: maker.trader,
                    taker_order_id: None,
                    taker,
                    taker_side,
                    price: maker.price,
                    quantity: fill_qty,
                },
                bid_release,
                ask_release,
            };
            let maker_id = maker.id;

            settle(&settlement)?;

            self.apply_fill(maker_id, fill_qty, release);
            remaining -= fill_qty;
            fills.push(settlement.fill);
        }

        Ok((fills, remaining))
    }
}
