// hybrid-core: hybrid order book + virtual market maker pricing engine.
// custody-first architecture: no balance moves outside the ledger.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   0.x  error.rs: EngineError, the one error type
//   1.x  types.rs: primitives: AccountId, Side, Price, Step, Pips
//   2.x  custody.rs: available/locked ledger, token vault seam
//   2.1x order.rs: price-time priority book and matching
//   2.2  journal.rs: first-touch undo log for transactions
//   3.x  volatility.rs: open interest driven volatility
//   4.x  position.rs: curve positions and payouts
//   4.5  kyle.rs: K/Q^2 curve with the Kyle lambda term
//   5.x  fees.rs: dynamic fee schedule
//   6.x  deleverage.rs: TWAP and oracle-bounded forced close pricing
//   7.x  liquidity.rs: pool contributions, utilization
//   8.x  events.rs: state transition events for audit
//   9.x  config.rs: engine params, env presets
//   10.x engine/: orders, routing, de-leveraging, admin, shared access
//   11.x oracle.rs: reference price seam (mocked)

// core pricing and matching modules
pub mod custody;
pub mod deleverage;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod journal;
pub mod kyle;
pub mod order;
pub mod position;
pub mod types;
pub mod volatility;

// integration modules
pub mod config;
pub mod liquidity;
pub mod oracle;

// re exports for convenience
pub use custody::{CustodyLedger, MockVault, TokenVault, UserBalance};
pub use deleverage::{calculate_deleverage_price, should_prioritize_deleveraging, DeleverageInputs, DeleverageParams, DeleverageQuote, TwapState};
pub use engine::*;
pub use error::EngineError;
pub use events::*;
pub use fees::{calculate_dynamic_fee, FeeInputs, FeeParams, FeeState};
pub use kyle::{kyle_impact, CurveParams, CurveTrade, KyleState, PricingCurve};
pub use order::*;
pub use position::*;
pub use types::*;
pub use volatility::{VolatilityParams, VolatilityState, VolatilityUpdate};
pub use config::{ConfigError, EngineConfig, Environment};
pub use liquidity::LiquidityPool;
pub use oracle::{MockOracle, OracleFeed, OracleQuote};
