//! Hybrid engine simulation.
//!
//! Walks the engine through book matching, hybrid routing, the volatility
//! and fee response to skewed open interest, forced de-leveraging and
//! shared access. Set RUST_LOG=debug to see every fill and event.

use hybrid_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const ADMIN: AccountId = AccountId(100);
const LP: AccountId = AccountId(50);
const ALICE: AccountId = AccountId(1);
const BOB: AccountId = AccountId(2);

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Hybrid Pricing Engine Simulation");
    println!("Order Book First, Kyle Curve for the Rest\n");

    scenario_1_book_matching()?;
    scenario_2_hybrid_routing()?;
    scenario_3_volatility_and_fees()?;
    scenario_4_deleveraging()?;
    scenario_5_shared_engine()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

/// Engine with a curve and a funded pool.
fn funded_engine(config: EngineConfig) -> Result<Engine, EngineError> {
    let mut engine = Engine::new(config)?;
    let (base, quote) = (engine.config().market.base_asset, engine.config().market.quote_asset);

    engine.initialize_curve(ADMIN, None, None, Step(0))?;
    engine.deposit(LP, quote, dec!(1_000_000), Step(0))?;
    engine.provide_liquidity(LP, dec!(1_000_000), Step(0))?;
    for trader in [ALICE, BOB] {
        engine.deposit(trader, base, dec!(10_000), Step(0))?;
        engine.deposit(trader, quote, dec!(100_000), Step(0))?;
    }
    Ok(engine)
}

/// Two resting orders cross and settle at the maker's price.
fn scenario_1_book_matching() -> Result<(), EngineError> {
    println!("Scenario 1: Book Matching\n");

    let mut engine = funded_engine(EngineConfig::default())?;
    let quote = engine.config().market.quote_asset;

    let alice_before = engine.balance(ALICE, quote);
    let sell = engine.place_order(ALICE, Side::Short, dec!(1.0), dec!(100), Step(1))?;
    engine.place_order(BOB, Side::Long, dec!(1.0), dec!(60), Step(2))?;
    println!("  Alice SELL 100 @ 1.0, Bob BUY 60 @ 1.0");

    let bob_locked = engine.balance(BOB, quote).locked;
    let fills = engine.match_orders(Step(3))?;
    for fill in &fills {
        println!("  Fill: {} @ {} (maker order {})", fill.quantity, fill.price, fill.maker_order_id.0);
    }

    let resting = engine.order(sell).map(|o| o.quantity).unwrap_or(Decimal::ZERO);
    println!("  Alice's order resting with {resting}");
    println!("  Bob locked quote change: -{}", bob_locked - engine.balance(BOB, quote).locked);
    println!(
        "  Alice available quote change: +{}\n",
        engine.balance(ALICE, quote).available - alice_before.available
    );
    Ok(())
}

/// A buy larger than the book: the book drains first, the curve takes the rest.
fn scenario_2_hybrid_routing() -> Result<(), EngineError> {
    println!("Scenario 2: Hybrid Routing\n");

    let mut engine = funded_engine(EngineConfig::default())?;
    engine.place_order(ALICE, Side::Short, dec!(0.99), dec!(200), Step(1))?;
    engine.place_order(ALICE, Side::Short, dec!(1.00), dec!(300), Step(1))?;

    let preview = engine.simulate_trade(Side::Long, dec!(2_000), None)?;
    println!(
        "  Preview BUY 2000: book {}, curve {}, est. fee {} at {}",
        preview.orderbook_volume, preview.amm_volume, preview.estimated_fee, preview.fee_rate
    );

    let report = engine.execute_trade(BOB, Side::Long, dec!(2_000), None, Step(2))?;
    println!("  Book volume: {}", report.orderbook_volume);
    println!("  Curve volume: {}", report.amm_volume);
    if let Some(leg) = &report.curve {
        println!(
            "  Curve price {} (impact {}), fee {} at {}",
            leg.trade.execution_price, leg.trade.impact, leg.fee, leg.fee_rate
        );
    }
    if let Some(avg) = report.average_price {
        println!("  Average price: {avg}");
    }

    let close = engine.close_position(BOB, Side::Long, report.amm_volume, Step(3))?;
    println!("  Bob closes {} at {}, payout {}\n", close.size, close.exit_price, close.payout);
    Ok(())
}

/// Skewed open interest pushes volatility, lambda and the fee up.
fn scenario_3_volatility_and_fees() -> Result<(), EngineError> {
    println!("Scenario 3: Volatility and Fee Response\n");

    let mut engine = funded_engine(EngineConfig::default())?;
    println!(
        "  Start: vol {}, fee {}, spot {}",
        engine.effective_volatility(),
        engine.current_fee(),
        engine.spot_price()?
    );

    for step in 1..=5u64 {
        let report = engine.execute_trade(ALICE, Side::Long, dec!(5_000), None, Step(step))?;
        if let Some(leg) = report.curve {
            println!(
                "  Step {step}: price {}, lambda {}{}, vol {}, fee {}",
                leg.trade.execution_price,
                leg.trade.lambda,
                if leg.trade.lambda_recomputed { " (recomputed)" } else { "" },
                leg.trade.effective_volatility,
                leg.fee_rate
            );
        }
    }

    let (long_oi, short_oi) = engine.open_interest();
    println!("  OI long {long_oi} / short {short_oi}, utilization {}\n", engine.utilization()?);
    Ok(())
}

/// Forced close priced off the TWAP and clamped into the oracle band.
fn scenario_4_deleveraging() -> Result<(), EngineError> {
    println!("Scenario 4: De-leveraging\n");

    let mut engine = funded_engine(EngineConfig::default())?;
    let base = engine.config().market.base_asset;
    engine.set_oracle(MockOracle::new().with_price(base, dec!(1.0), Step(0)));

    for step in 1..=10u64 {
        engine.execute_trade(BOB, Side::Short, dec!(100), None, Step(step))?;
    }
    println!("  Bob short 1000 on the curve, TWAP {}", engine.twap());

    let report = engine.deleverage(BOB, Side::Short, dec!(1_000), Step(11))?;
    println!(
        "  De-leveraged at {} (raw {}, clamped {}), payout {}",
        report.quote.price, report.quote.raw_price, report.quote.clamped, report.close.payout
    );
    println!("  Prioritize de-leveraging: {}\n", engine.should_prioritize_deleveraging()?);
    Ok(())
}

/// Writers go through the lock, readers load published snapshots.
fn scenario_5_shared_engine() -> Result<(), EngineError> {
    println!("Scenario 5: Shared Engine\n");

    let shared = SharedEngine::new(funded_engine(EngineConfig::testnet())?);
    shared.write(|e| e.place_order(ALICE, Side::Short, dec!(1.02), dec!(50), Step(1)))?;
    shared.write(|e| e.place_order(BOB, Side::Long, dec!(0.98), dec!(50), Step(1)))?;

    let snapshot = shared.snapshot();
    println!(
        "  Snapshot at {}: bid {:?}, ask {:?}, spot {:?}, fee {}",
        snapshot.step,
        snapshot.best_bid.map(|p| p.value()),
        snapshot.best_ask.map(|p| p.value()),
        snapshot.spot_price,
        snapshot.current_fee
    );

    let nested = shared.write(|_| shared.write(|e| e.pause(ADMIN, Step(2))));
    println!("  Nested write rejected: {}", nested.is_err());
    Ok(())
}
