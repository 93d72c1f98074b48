// Oracle integration
//
// The engine never ingests prices itself. Whatever supplies reference prices
// (a chain oracle, an aggregator service) implements `OracleFeed`; the engine
// only asks for the latest quote and refuses to act on stale data.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::types::{AssetId, Price, Step};

/// Latest reference price for one asset, as reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleQuote {
    pub price: Price,
    pub updated_at: Step,
    /// The feed's own staleness verdict.
    pub is_stale: bool,
}

impl OracleQuote {
    pub fn new(price: Price, updated_at: Step) -> Self {
        Self {
            price,
            updated_at,
            is_stale: false,
        }
    }

    /// The price, or `StaleOracle` when the feed flagged it.
    pub fn fresh_price(&self, asset: AssetId) -> Result<Price, EngineError> {
        if self.is_stale {
            return Err(EngineError::StaleOracle {
                asset,
                updated_at: self.updated_at.0,
            });
        }
        Ok(self.price)
    }
}

/// Trait for reference price sources.
pub trait OracleFeed {
    fn get_price(&self, asset: AssetId) -> Result<OracleQuote, EngineError>;
}

/// Mock feed for testing
#[derive(Debug, Default, Clone)]
pub struct MockOracle {
    quotes: HashMap<AssetId, OracleQuote>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, asset: AssetId, price: Decimal, step: Step) -> Self {
        self.set_price(asset, price, step);
        self
    }

    pub fn set_price(&mut self, asset: AssetId, price: Decimal, step: Step) {
        if let Some(price) = Price::new(price) {
            self.quotes.insert(asset, OracleQuote::new(price, step));
        }
    }

    pub fn set_stale(&mut self, asset: AssetId, stale: bool) {
        if let Some(quote) = self.quotes.get_mut(&asset) {
            quote.is_stale = stale;
        }
    }
}

impl OracleFeed for MockOracle {
    fn get_price(&self, asset: AssetId) -> Result<OracleQuote, EngineError> {
        self.quotes
            .get(&asset)
            .copied()
            .ok_or_else(|| EngineError::InvalidInput(format!("no oracle price for {asset:?}")))
    }
}
