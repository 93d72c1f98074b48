// 7.0 liquidity.rs: the pool behind the curve.
// LP capital sits in the pool account on the custody ledger. this module
// only records who put how much in and derives utilization.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::types::{checked_div, AccountId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPool {
    contributions: BTreeMap<AccountId, Decimal>,
    total_contributed: Decimal,
}

impl LiquidityPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_contribution(&mut self, provider: AccountId, amount: Decimal) {
        *self.contributions.entry(provider).or_default() += amount;
        self.total_contributed += amount;
    }

    pub fn contribution(&self, provider: AccountId) -> Decimal {
        self.contributions.get(&provider).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total_contributed(&self) -> Decimal {
        self.total_contributed
    }

    pub fn provider_count(&self) -> usize {
        self.contributions.len()
    }
}

/// Open interest notional over pool capital, capped at 1. An empty pool
/// carrying any exposure is fully utilized.
pub fn utilization(oi_notional: Decimal, pool_available: Decimal) -> Result<Decimal, EngineError> {
    if oi_notional <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    if pool_available <= Decimal::ZERO {
        return Ok(Decimal::ONE);
    }
    Ok(checked_div(oi_notional, pool_available)?.min(Decimal::ONE))
}
