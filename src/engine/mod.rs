// 10.0: core engine. owns the market state and runs every mutating operation
// as a journaled transaction. deterministic, time is the caller's step.

mod admin;
mod core;
mod deleveraging;
mod orders;
mod results;
mod shared;
mod trading;

pub use core::{Engine, MarketState};
pub use results::{CloseReport, CurveFill, DeleverageReport, RouteQuote, RouteReport};
pub use shared::{MarketSnapshot, SharedEngine};
