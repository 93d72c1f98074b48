// 9.0 config.rs: all settings in one place. market bounds, curve, volatility,
// fees, de-leveraging and admin limits.
// 9.1 Environment presets at the bottom.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::deleverage::DeleverageParams;
use crate::error::EngineError;
use crate::fees::FeeParams;
use crate::kyle::CurveParams;
use crate::types::{AssetId, Price, AMOUNT_DP};
use crate::volatility::{VolatilityParams, DEFAULT_LONG_COEFFICIENT, DEFAULT_SHORT_COEFFICIENT};

// limit-order prices and quantities above this are rejected
pub const MAX_ORDER_VALUE: Decimal = dec!(1_000_000_000_000);

// admin coefficient ranges, in units of 1e-12
pub const MAX_LONG_COEFFICIENT: i64 = 10_000;
pub const MIN_SHORT_COEFFICIENT: i64 = -10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketParams {
    // Human readable market name
    pub name: String,
    // Asset traded on the book (what sells hand over)
    pub base_asset: AssetId,
    // Settlement asset (what buys pay, and what the pool holds)
    pub quote_asset: AssetId,
    pub max_price: Decimal,
    pub max_quantity: Decimal,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            name: "SYN-USD".to_string(),
            base_asset: AssetId(1),
            quote_asset: AssetId(2),
            max_price: MAX_ORDER_VALUE,
            max_quantity: MAX_ORDER_VALUE,
        }
    }
}

impl MarketParams {
    /// Reject anything non-positive, above the bounds, or finer than the
    /// ledger can hold.
    pub fn validate_order(&self, price: Decimal, quantity: Decimal) -> Result<Price, EngineError> {
        check_bounded("price", price, self.max_price)?;
        check_bounded("quantity", quantity, self.max_quantity)?;
        Price::new(price).ok_or_else(|| EngineError::InvalidInput(format!("price {price} must be positive")))
    }
}

fn check_bounded(what: &str, value: Decimal, max: Decimal) -> Result<(), EngineError> {
    if value <= Decimal::ZERO || value > max {
        return Err(EngineError::InvalidInput(format!("{what} {value} outside (0, {max}]")));
    }
    if value.scale() > AMOUNT_DP {
        return Err(EngineError::InvalidInput(format!(
            "{what} {value} exceeds {AMOUNT_DP} fractional digits"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminParams {
    // Largest size one trader may hold per side on the curve
    pub max_position_size: Decimal,
    // Admin may never set the max position size below this
    pub min_max_position_size: Decimal,
}

impl Default for AdminParams {
    fn default() -> Self {
        Self {
            max_position_size: dec!(100_000),
            min_max_position_size: dec!(1),
        }
    }
}

/** 9.0: complete engine configuration */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub market: MarketParams,
    pub curve: CurveParams,
    pub volatility: VolatilityParams,
    pub fees: FeeParams,
    pub deleverage: DeleverageParams,
    pub admin: AdminParams,
    // Maximum number of events to retain in memory
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            market: MarketParams::default(),
            curve: CurveParams::default(),
            volatility: VolatilityParams::default(),
            fees: FeeParams::default(),
            deleverage: DeleverageParams::default(),
            admin: AdminParams::default(),
            max_events: 100_000,
        }
    }
}

impl EngineConfig {
    // Testnet: cheap fees, tight position limit
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.market.name = "SYN-USD Testnet".to_string();
        config.fees = FeeParams {
            base_fee: crate::types::Pips(100),
            max_fee: crate::types::Pips(5_000),
        };
        config.admin.max_position_size = dec!(10_000);
        config
    }

    // Mainnet: deeper curve, wider fee range, narrower de-leveraging band
    pub fn mainnet_conservative() -> Self {
        let mut config = Self::default();
        config.curve.base_depth = dec!(5_000_000);
        config.fees.max_fee = crate::types::Pips(20_000);
        config.volatility.max_volatility = dec!(1.5);
        config.deleverage.oracle_band = dec!(0.03);
        config.admin.min_max_position_size = dec!(100);
        config
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // market checks
        if self.market.base_asset == self.market.quote_asset {
            return Err(ConfigError::InvalidMarket {
                reason: "base and quote asset must differ".to_string(),
            });
        }
        if self.market.max_price <= Decimal::ZERO || self.market.max_price > MAX_ORDER_VALUE {
            return Err(ConfigError::InvalidMarket {
                reason: format!("max price must be in (0, {MAX_ORDER_VALUE}]"),
            });
        }
        if self.market.max_quantity <= Decimal::ZERO || self.market.max_quantity > MAX_ORDER_VALUE {
            return Err(ConfigError::InvalidMarket {
                reason: format!("max quantity must be in (0, {MAX_ORDER_VALUE}]"),
            });
        }

        self.curve.validate().map_err(|e| ConfigError::InvalidCurve { reason: e.to_string() })?;

        // volatility checks
        let vol = &self.volatility;
        if vol.base_volatility <= Decimal::ZERO || vol.max_volatility < vol.base_volatility {
            return Err(ConfigError::InvalidVolatility {
                reason: "need 0 < base volatility <= max volatility".to_string(),
            });
        }
        validate_coefficients(vol.long_coefficient, vol.short_coefficient)
            .map_err(|e| ConfigError::InvalidVolatility { reason: e.to_string() })?;

        self.fees.validate().map_err(|e| ConfigError::InvalidFees { reason: e.to_string() })?;

        // de-leveraging checks
        let band = self.deleverage.oracle_band;
        if band <= Decimal::ZERO || band >= Decimal::ONE {
            return Err(ConfigError::InvalidDeleverage {
                reason: "oracle band must be in (0, 1)".to_string(),
            });
        }
        let threshold = self.deleverage.priority_utilization;
        if threshold <= Decimal::ZERO || threshold > Decimal::ONE {
            return Err(ConfigError::InvalidDeleverage {
                reason: "priority utilization must be in (0, 1]".to_string(),
            });
        }

        // admin checks
        if self.admin.min_max_position_size <= Decimal::ZERO
            || self.admin.max_position_size < self.admin.min_max_position_size
        {
            return Err(ConfigError::InvalidAdmin {
                reason: "need 0 < position size floor <= max position size".to_string(),
            });
        }

        if self.max_events == 0 {
            return Err(ConfigError::InvalidMarket {
                reason: "max_events must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Coefficient ranges accepted from admins and configuration.
pub fn validate_coefficients(long_coefficient: i64, short_coefficient: i64) -> Result<(), EngineError> {
    if !(0..=MAX_LONG_COEFFICIENT).contains(&long_coefficient) {
        return Err(EngineError::InvalidInput(format!(
            "long coefficient {long_coefficient} outside [0, {MAX_LONG_COEFFICIENT}]"
        )));
    }
    if !(MIN_SHORT_COEFFICIENT..=0).contains(&short_coefficient) {
        return Err(EngineError::InvalidInput(format!(
            "short coefficient {short_coefficient} outside [{MIN_SHORT_COEFFICIENT}, 0]"
        )));
    }
    Ok(())
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid market: {reason}")]
    InvalidMarket { reason: String },
    #[error("invalid curve: {reason}")]
    InvalidCurve { reason: String },
    #[error("invalid volatility: {reason}")]
    InvalidVolatility { reason: String },
    #[error("invalid fees: {reason}")]
    InvalidFees { reason: String },
    #[error("invalid de-leveraging: {reason}")]
    InvalidDeleverage { reason: String },
    #[error("invalid admin limits: {reason}")]
    InvalidAdmin { reason: String },
    #[error("parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> EngineConfig {
        match self {
            Environment::Development => EngineConfig::default(),
            Environment::Testnet => EngineConfig::testnet(),
            Environment::Mainnet => EngineConfig::mainnet_conservative(),
        }
    }
}
