// 10.0.2: result types for engine operations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::deleverage::DeleverageQuote;
use crate::kyle::CurveTrade;
use crate::order::Fill;
use crate::types::{Pips, Price, Side};

/// The curve leg of a routed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveFill {
    pub trade: CurveTrade,
    /// size * execution price
    pub notional: Decimal,
    pub fee: Decimal,
    pub fee_rate: Pips,
}

/// How one trade was split between book and curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteReport {
    pub side: Side,
    pub orderbook_volume: Decimal,
    pub amm_volume: Decimal,
    pub fills: Vec<Fill>,
    pub curve: Option<CurveFill>,
    /// Volume-weighted across both legs, fees excluded.
    pub average_price: Option<Price>,
    /// Utilization is past the de-leveraging priority threshold.
    pub deleveraging_priority: bool,
}

/// Dry run of `execute_trade`: same split, nothing mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteQuote {
    pub side: Side,
    pub orderbook_volume: Decimal,
    pub amm_volume: Decimal,
    pub orderbook_notional: Decimal,
    pub curve: Option<CurveTrade>,
    /// Rate the curve leg would pay at the quoted step.
    pub fee_rate: Pips,
    pub estimated_fee: Decimal,
    pub average_price: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReport {
    pub side: Side,
    pub size: Decimal,
    pub exit_price: Price,
    /// Cost basis released from the position.
    pub cost_share: Decimal,
    /// Quote paid from the pool to the trader, after fees.
    pub payout: Decimal,
    pub fee: Decimal,
    pub trade: CurveTrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleverageReport {
    pub oracle_price: Price,
    pub twap: Decimal,
    pub quote: DeleverageQuote,
    pub close: CloseReport,
}
