// 8.0: every successful state change produces an event. used for audit trails
// and notifying external systems. the EventPayload enum lists all event types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, AssetId, OrderId, Pips, Price, Side, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub step: Step,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, step: Step, payload: EventPayload) -> Self {
        Self { id, step, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // Book events
    OrderPlaced(OrderPlacedEvent),
    OrderCanceled(OrderCanceledEvent),
    Fill(FillEvent),

    // Custody events
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    WithdrawalRejected(WithdrawalRejectedEvent),
    LiquidityProvided(LiquidityProvidedEvent),

    // Curve events
    CurveTrade(CurveTradeEvent),
    PositionClosed(PositionClosedEvent),
    Deleveraged(DeleveragedEvent),

    // Market data events
    OiUpdated(OiUpdatedEvent),
    FeeUpdated(FeeUpdatedEvent),
    CurveInitialized(CurveInitializedEvent),

    // Admin
    Admin(AuditRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub order_id: OrderId,
    pub trader: AccountId,
    pub side: Side,
    pub price: Price,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub order_id: OrderId,
    pub trader: AccountId,
    pub remaining: Decimal,
    pub released: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub maker_order_id: OrderId,
    pub taker_order_id: Option<OrderId>,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub account: AccountId,
    pub asset: AssetId,
    pub amount: Decimal,
    pub new_available: Decimal,
    /// Pulled through the token vault rather than credited directly.
    pub via_vault: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub account: AccountId,
    pub asset: AssetId,
    pub amount: Decimal,
    pub new_available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRejectedEvent {
    pub account: AccountId,
    pub asset: AssetId,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvidedEvent {
    pub provider: AccountId,
    pub amount: Decimal,
    pub pool_available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveTradeEvent {
    pub trader: AccountId,
    pub side: Side,
    pub size: Decimal,
    pub execution_price: Price,
    pub impact: Decimal,
    pub fee: Decimal,
    pub lambda: Decimal,
    pub lambda_recomputed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub trader: AccountId,
    pub side: Side,
    pub size: Decimal,
    pub exit_price: Price,
    pub payout: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleveragedEvent {
    pub trader: AccountId,
    pub side: Side,
    pub size: Decimal,
    pub oracle_price: Price,
    pub twap: Decimal,
    pub price: Price,
    /// The raw TWAP-anchored price fell outside the oracle band.
    pub clamped: bool,
    pub payout: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OiUpdatedEvent {
    pub long_oi: Decimal,
    pub short_oi: Decimal,
    pub effective_volatility: Decimal,
    pub volatility_clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeUpdatedEvent {
    pub old_fee: Pips,
    pub new_fee: Pips,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveInitializedEvent {
    pub k: Decimal,
    pub q: Decimal,
    pub lambda: Decimal,
}

/// Admin action record: who did what, with which parameters, at which step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: AccountId,
    pub action: AdminAction,
    pub params: String,
    pub step: Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminAction {
    InitializeCurve,
    SetBaseFee,
    SetMaxFee,
    SetVolatilityCoefficients,
    SetMaxPositionSize,
    SetFeeUpdatesPaused,
    Pause,
    Unpause,
}
