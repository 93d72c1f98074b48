//! Forced de-leveraging of curve positions at oracle-bounded prices.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::core::Engine;
use super::results::{CloseReport, DeleverageReport};
use super::trading::close_on_curve;
use crate::deleverage::{calculate_deleverage_price, should_prioritize_deleveraging, DeleverageInputs, DeleverageQuote};
use crate::error::EngineError;
use crate::events::{DeleveragedEvent, EventPayload};
use crate::types::{AccountId, Price, Side, Step};

impl Engine {
    /// Oracle price for the base asset. Fails closed: no oracle wired is
    /// `EngineNotSet`, a stale quote is `StaleOracle`.
    pub fn oracle_price(&self) -> Result<Price, EngineError> {
        let oracle = self.oracle.as_deref().ok_or(EngineError::EngineNotSet("oracle"))?;
        let asset = self.config.market.base_asset;
        oracle.get_price(asset)?.fresh_price(asset)
    }

    /// De-leveraging price for closing `size` of `position_side` exposure
    /// right now. Closing a long sells, closing a short buys.
    pub fn deleverage_quote(&self, position_side: Side, size: Decimal) -> Result<DeleverageQuote, EngineError> {
        let oracle_price = self.oracle_price()?;
        self.quote_against(position_side, size, oracle_price)
    }

    fn quote_against(&self, position_side: Side, size: Decimal, oracle_price: Price) -> Result<DeleverageQuote, EngineError> {
        let inputs = DeleverageInputs {
            twap: self.state.twap.twap(),
            effective_volatility: self.state.volatility.effective_volatility,
            effective_depth: self.state.effective_depth()?,
        };
        calculate_deleverage_price(
            position_side.opposite(),
            size,
            oracle_price,
            &inputs,
            &self.config.deleverage,
        )
    }

    pub fn should_prioritize_deleveraging(&self) -> Result<bool, EngineError> {
        Ok(should_prioritize_deleveraging(self.utilization()?, &self.config.deleverage))
    }

    /// Close `size` of `trader`'s `position_side` curve exposure. The curve
    /// state moves as for a normal close, the payout is priced at the
    /// TWAP-anchored, oracle-clamped de-leveraging price.
    pub fn deleverage(
        &mut self,
        trader: AccountId,
        position_side: Side,
        size: Decimal,
        step: Step,
    ) -> Result<DeleverageReport, EngineError> {
        if self.state.paused {
            return Err(EngineError::TradingPaused);
        }
        let oracle_price = self.oracle_price()?;
        let twap = self.state.twap.twap();
        let quote = self.quote_against(position_side, size, oracle_price)?;

        if quote.clamped {
            warn!(
                raw = %quote.raw_price,
                clamped = %quote.price,
                oracle = %oracle_price,
                "de-leveraging price clamped to oracle band"
            );
        }

        let close: CloseReport = self.transact(step, |tx| {
            let close = close_on_curve(tx, trader, position_side, size, Some(quote.price))?;
            tx.emit(EventPayload::Deleveraged(DeleveragedEvent {
                trader,
                side: position_side,
                size,
                oracle_price,
                twap,
                price: quote.price,
                clamped: quote.clamped,
                payout: close.payout,
            }));
            Ok(close)
        })?;

        info!(
            trader = trader.0,
            side = ?position_side,
            size = %size,
            price = %quote.price,
            payout = %close.payout,
            "position de-leveraged"
        );

        Ok(DeleverageReport {
            oracle_price,
            twap,
            quote,
            close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::oracle::MockOracle;
    use rust_decimal_macros::dec;

    const ADMIN: AccountId = AccountId(100);
    const LP: AccountId = AccountId(50);
    const TRADER: AccountId = AccountId(2);

    fn engine_with(oracle: Option<MockOracle>) -> Engine {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let quote = engine.config().market.quote_asset;
        if let Some(oracle) = oracle {
            engine.set_oracle(oracle);
        }
        engine.initialize_curve(ADMIN, None, None, Step(0)).unwrap();
        engine.deposit(LP, quote, dec!(1_000_000), Step(0)).unwrap();
        engine.provide_liquidity(LP, dec!(1_000_000), Step(0)).unwrap();
        engine.deposit(TRADER, quote, dec!(100_000), Step(0)).unwrap();
        engine
    }

    fn oracle_at(price: Decimal) -> MockOracle {
        let base = EngineConfig::default().market.base_asset;
        MockOracle::new().with_price(base, price, Step(0))
    }

    #[test]
    fn requires_oracle() {
        let mut engine = engine_with(None);
        engine.execute_trade(TRADER, Side::Long, dec!(100), None, Step(1)).unwrap();
        assert_eq!(
            engine.deleverage(TRADER, Side::Long, dec!(100), Step(2)),
            Err(EngineError::EngineNotSet("oracle"))
        );
    }

    #[test]
    fn stale_oracle_fails_closed() {
        let mut oracle = oracle_at(dec!(1));
        oracle.set_stale(EngineConfig::default().market.base_asset, true);
        let mut engine = engine_with(Some(oracle));
        engine.execute_trade(TRADER, Side::Long, dec!(100), None, Step(1)).unwrap();

        assert!(matches!(
            engine.deleverage(TRADER, Side::Long, dec!(100), Step(2)),
            Err(EngineError::StaleOracle { .. })
        ));
        assert_eq!(engine.position(TRADER).long_size, dec!(100));
    }

    #[test]
    fn price_stays_inside_oracle_band() {
        // oracle far above the curve's trade prices: the TWAP-anchored price clamps up
        let mut engine = engine_with(Some(oracle_at(dec!(2))));
        engine.execute_trade(TRADER, Side::Long, dec!(100), None, Step(1)).unwrap();

        let report = engine.deleverage(TRADER, Side::Long, dec!(100), Step(2)).unwrap();
        assert!(report.quote.clamped);
        assert_eq!(report.quote.price.value(), dec!(1.9));
        assert_eq!(report.close.exit_price.value(), dec!(1.9));
        assert!(engine.position(TRADER).is_empty());
        assert_eq!(engine.open_interest(), (Decimal::ZERO, Decimal::ZERO));
    }

    #[test]
    fn short_close_buys_within_band() {
        let mut engine = engine_with(Some(oracle_at(dec!(1))));
        engine.execute_trade(TRADER, Side::Short, dec!(500), None, Step(1)).unwrap();

        let quote = engine.deleverage_quote(Side::Short, dec!(500)).unwrap();
        assert!(quote.price.value() >= dec!(0.95));
        assert!(quote.price.value() <= dec!(1.05));

        let report = engine.deleverage(TRADER, Side::Short, dec!(500), Step(2)).unwrap();
        assert_eq!(report.quote, quote);
        let last = engine.recent_events(1);
        assert!(matches!(last[0].payload, EventPayload::Deleveraged(_)));
    }

    #[test]
    fn priority_follows_utilization() {
        let engine = engine_with(Some(oracle_at(dec!(1))));
        assert!(!engine.should_prioritize_deleveraging().unwrap());
    }
}
