// 0.1: one error taxonomy for the whole engine. every operation either succeeds or
// returns one of these with no state change.

use rust_decimal::Decimal;

use crate::types::{AccountId, AssetId, OrderId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient balance for {account:?} in {asset:?}: available {available}, requested {requested}")]
    InsufficientBalance {
        account: AccountId,
        asset: AssetId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Order {0:?} not found")]
    OrderNotFound(OrderId),

    #[error("Order {order_id:?} belongs to {owner:?}, cancel requested by {caller:?}")]
    UnauthorizedCancellation {
        order_id: OrderId,
        owner: AccountId,
        caller: AccountId,
    },

    #[error("Amount must be non-zero")]
    ZeroAmount,

    #[error("Oracle price for {asset:?} is stale (updated at step {updated_at})")]
    StaleOracle { asset: AssetId, updated_at: u64 },

    #[error("Price {price} outside bounds [{min}, {max}]")]
    PriceOutOfBounds { price: Decimal, min: Decimal, max: Decimal },

    #[error("Collaborator not set: {0}")]
    EngineNotSet(&'static str),

    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Re-entrant call detected")]
    ReentrancyGuard,

    #[error("Trading is paused")]
    TradingPaused,

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}
