//! Solvency and conservation tests.
//!
//! Custody must never create or destroy tokens: every asset's recorded
//! total equals the sum of all balances, and moves only on deposits and
//! withdrawals, whatever sequence of trading operations runs in between.

use hybrid_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const ADMIN: AccountId = AccountId(100);
const LP: AccountId = AccountId(50);
const TRADERS: [AccountId; 3] = [AccountId(1), AccountId(2), AccountId(3)];

#[derive(Debug, Clone)]
enum Op {
    Deposit { trader: usize, base: bool, amount: i64 },
    Withdraw { trader: usize, base: bool, amount: i64 },
    Place { trader: usize, buy: bool, ticks: i64, qty: i64 },
    Cancel { trader: usize, order: u64 },
    Match,
    Trade { trader: usize, buy: bool, size: i64 },
    Close { trader: usize, long: bool, size: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, any::<bool>(), 1..5_000i64).prop_map(|(trader, base, amount)| Op::Deposit { trader, base, amount }),
        (0..3usize, any::<bool>(), 1..5_000i64).prop_map(|(trader, base, amount)| Op::Withdraw { trader, base, amount }),
        (0..3usize, any::<bool>(), 90..110i64, 1..500i64)
            .prop_map(|(trader, buy, ticks, qty)| Op::Place { trader, buy, ticks, qty }),
        (0..3usize, 1..30u64).prop_map(|(trader, order)| Op::Cancel { trader, order }),
        Just(Op::Match),
        (0..3usize, any::<bool>(), 1..2_000i64).prop_map(|(trader, buy, size)| Op::Trade { trader, buy, size }),
        (0..3usize, any::<bool>(), 1..2_000i64).prop_map(|(trader, long, size)| Op::Close { trader, long, size }),
    ]
}

fn setup() -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let (base, quote) = (engine.config().market.base_asset, engine.config().market.quote_asset);
    engine.initialize_curve(ADMIN, None, None, Step(0)).unwrap();
    engine.deposit(LP, quote, dec!(1_000_000), Step(0)).unwrap();
    engine.provide_liquidity(LP, dec!(1_000_000), Step(0)).unwrap();
    for trader in TRADERS {
        engine.deposit(trader, base, dec!(10_000), Step(0)).unwrap();
        engine.deposit(trader, quote, dec!(10_000), Step(0)).unwrap();
    }
    engine
}

/// Apply one operation. Returns the signed change in custodied supply of
/// (base, quote) the operation is allowed to cause.
fn apply(engine: &mut Engine, op: &Op, step: Step) -> (Decimal, Decimal) {
    let (base, quote) = (engine.config().market.base_asset, engine.config().market.quote_asset);
    let pick = |is_base: bool| if is_base { base } else { quote };
    let signed = |is_base: bool, amount: Decimal| {
        if is_base {
            (amount, Decimal::ZERO)
        } else {
            (Decimal::ZERO, amount)
        }
    };

    match *op {
        Op::Deposit { trader, base: is_base, amount } => {
            let amount = Decimal::from(amount);
            match engine.deposit(TRADERS[trader], pick(is_base), amount, step) {
                Ok(()) => signed(is_base, amount),
                Err(_) => (Decimal::ZERO, Decimal::ZERO),
            }
        }
        Op::Withdraw { trader, base: is_base, amount } => {
            let amount = Decimal::from(amount);
            match engine.withdraw(TRADERS[trader], pick(is_base), amount, step) {
                Ok(()) => signed(is_base, -amount),
                Err(_) => (Decimal::ZERO, Decimal::ZERO),
            }
        }
        Op::Place { trader, buy, ticks, qty } => {
            let _ = engine.place_order(
                TRADERS[trader],
                Side::from_is_buy(buy),
                Decimal::new(ticks, 2),
                Decimal::from(qty),
                step,
            );
            (Decimal::ZERO, Decimal::ZERO)
        }
        Op::Cancel { trader, order } => {
            let _ = engine.cancel_order(TRADERS[trader], OrderId(order), step);
            (Decimal::ZERO, Decimal::ZERO)
        }
        Op::Match => {
            let _ = engine.match_orders(step);
            (Decimal::ZERO, Decimal::ZERO)
        }
        Op::Trade { trader, buy, size } => {
            let _ = engine.execute_trade(TRADERS[trader], Side::from_is_buy(buy), Decimal::from(size), None, step);
            (Decimal::ZERO, Decimal::ZERO)
        }
        Op::Close { trader, long, size } => {
            let _ = engine.close_position(TRADERS[trader], Side::from_is_buy(long), Decimal::from(size), step);
            (Decimal::ZERO, Decimal::ZERO)
        }
    }
}

fn assert_balances_sane(engine: &Engine) -> Result<(), TestCaseError> {
    let ledger = engine.ledger();
    for asset in [engine.config().market.base_asset, engine.config().market.quote_asset] {
        prop_assert_eq!(ledger.sum_balances(asset), ledger.total_custodied(asset));
        for account in TRADERS.iter().copied().chain([LP, AccountId::POOL]) {
            let balance = ledger.balance(account, asset);
            prop_assert!(balance.available >= Decimal::ZERO, "{:?} available negative", account);
            prop_assert!(balance.locked >= Decimal::ZERO, "{:?} locked negative", account);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Total custody only moves with deposits and withdrawals.
    #[test]
    fn custody_conserved_across_operations(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let mut engine = setup();
        let (base, quote) = (engine.config().market.base_asset, engine.config().market.quote_asset);
        let mut expected_base = engine.ledger().total_custodied(base);
        let mut expected_quote = engine.ledger().total_custodied(quote);

        for (i, op) in ops.iter().enumerate() {
            let (d_base, d_quote) = apply(&mut engine, op, Step(i as u64 + 1));
            expected_base += d_base;
            expected_quote += d_quote;

            prop_assert_eq!(engine.ledger().total_custodied(base), expected_base);
            prop_assert_eq!(engine.ledger().total_custodied(quote), expected_quote);
            assert_balances_sane(&engine)?;
        }
    }

    /// Locked quote on the book always covers every resting bid's reservation.
    #[test]
    fn resting_orders_fully_reserved(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut engine = setup();
        let (base, quote) = (engine.config().market.base_asset, engine.config().market.quote_asset);

        for (i, op) in ops.iter().enumerate() {
            apply(&mut engine, op, Step(i as u64 + 1));
        }

        for trader in TRADERS {
            let mut bid_reserved = Decimal::ZERO;
            let mut ask_reserved = Decimal::ZERO;
            for side in [Side::Long, Side::Short] {
                for order in engine.state().book.orders_by_priority(side).filter(|o| o.trader == trader) {
                    match side {
                        Side::Long => bid_reserved += order.reserved,
                        Side::Short => ask_reserved += order.reserved,
                    }
                }
            }
            prop_assert_eq!(engine.balance(trader, quote).locked, bid_reserved);
            prop_assert_eq!(engine.balance(trader, base).locked, ask_reserved);
        }
    }

    /// A curve round trip moves quote between trader and pool and nowhere else.
    #[test]
    fn curve_round_trip_conserves_quote(size in 1i64..5_000i64, long in any::<bool>()) {
        let mut engine = setup();
        let quote = engine.config().market.quote_asset;
        let trader = TRADERS[0];
        let side = Side::from_is_buy(long);
        let before = engine.balance(trader, quote).total() + engine.balance(AccountId::POOL, quote).total();

        let size = Decimal::from(size);
        engine.execute_trade(trader, side, size, None, Step(1)).unwrap();
        engine.close_position(trader, side, size, Step(2)).unwrap();

        let after = engine.balance(trader, quote).total() + engine.balance(AccountId::POOL, quote).total();
        prop_assert_eq!(before, after);
        prop_assert!(engine.position(trader).is_empty());
        prop_assert_eq!(engine.open_interest(), (Decimal::ZERO, Decimal::ZERO));
    }
}

mod custody_tests {
    use super::*;

    #[test]
    fn failed_trade_leaves_no_trace() {
        let mut engine = setup();
        let quote = engine.config().market.quote_asset;
        let trader = TRADERS[0];
        let before = engine.state().clone();
        let events = engine.events().len();

        // 10_000 quote cannot pay for 50_000 base near 1.0
        let err = engine.execute_trade(trader, Side::Long, dec!(50_000), None, Step(1)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        assert_eq!(engine.balance(trader, quote), before.ledger.balance(trader, quote));
        assert_eq!(engine.open_interest(), (Decimal::ZERO, Decimal::ZERO));
        assert_eq!(engine.state().curve.as_ref().unwrap().q, before.curve.as_ref().unwrap().q);
        assert_eq!(engine.events().len(), events);
    }

    #[test]
    fn pool_cannot_pay_more_than_it_holds() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let quote = engine.config().market.quote_asset;
        let trader = TRADERS[0];
        engine.initialize_curve(ADMIN, None, None, Step(0)).unwrap();
        engine.deposit(trader, quote, dec!(100_000), Step(0)).unwrap();

        // no LP: the pool holds only what the short paid in
        engine.execute_trade(trader, Side::Short, dec!(1_000), None, Step(1)).unwrap();
        let pool = engine.pool_available();
        let report = engine.close_position(trader, Side::Short, dec!(1_000), Step(2)).unwrap();
        assert!(report.payout <= pool);
        assert_eq!(engine.ledger().sum_balances(quote), engine.ledger().total_custodied(quote));
    }

    #[test]
    fn withdrawal_rejection_is_audited() {
        let mut engine = setup();
        let quote = engine.config().market.quote_asset;
        let trader = TRADERS[1];

        let err = engine.withdraw(trader, quote, dec!(10_001), Step(1)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert_eq!(engine.balance(trader, quote).available, dec!(10_000));
        match &engine.recent_events(1)[0].payload {
            EventPayload::WithdrawalRejected(e) => {
                assert_eq!(e.account, trader);
                assert_eq!(e.amount, dec!(10_001));
            }
            other => panic!("expected rejection record, got {other:?}"),
        }
    }

    #[test]
    fn vault_deposit_credits_only_what_arrived() {
        let mut engine = setup();
        let base = engine.config().market.base_asset;
        let trader = TRADERS[2];

        let mut vault = MockVault::new();
        vault.inflate_next_pull(dec!(5));
        engine.set_vault(vault);
        let before = engine.balance(trader, base).available;

        assert!(engine.deposit_from_vault(trader, base, dec!(100), Step(1)).is_err());
        assert_eq!(engine.balance(trader, base).available, before);

        // the rejected pull was handed back in full
        assert_eq!(engine.vault().unwrap().custodied(base), Decimal::ZERO);

        engine.deposit_from_vault(trader, base, dec!(100), Step(2)).unwrap();
        assert_eq!(engine.balance(trader, base).available, before + dec!(100));
        assert_eq!(engine.ledger().sum_balances(base), engine.ledger().total_custodied(base));
    }

    #[test]
    fn vault_tracks_vault_backed_custody() {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let quote = engine.config().market.quote_asset;
        engine.set_vault(MockVault::new());

        for (i, trader) in TRADERS.iter().enumerate() {
            engine.deposit_from_vault(*trader, quote, dec!(1_000), Step(i as u64)).unwrap();
        }
        engine.withdraw_to_vault(TRADERS[0], quote, dec!(400), Step(5)).unwrap();
        engine.withdraw_to_vault(TRADERS[1], quote, dec!(1_000), Step(5)).unwrap();
        assert!(engine.withdraw_to_vault(TRADERS[2], quote, dec!(1_001), Step(6)).is_err());

        let vault_balance = engine.vault().unwrap().custodied(quote);
        assert_eq!(vault_balance, engine.ledger().total_custodied(quote));
        assert_eq!(vault_balance, dec!(1_600));
    }
}

mod snapshot_tests {
    use super::*;

    #[test]
    fn state_survives_json_round_trip() {
        let mut engine = setup();
        let quote = engine.config().market.quote_asset;
        engine.place_order(TRADERS[0], Side::Short, dec!(1.01), dec!(100), Step(1)).unwrap();
        engine.place_order(TRADERS[1], Side::Long, dec!(0.99), dec!(100), Step(1)).unwrap();
        engine.execute_trade(TRADERS[2], Side::Long, dec!(300), None, Step(2)).unwrap();

        let json = serde_json::to_string(engine.state()).unwrap();
        let state: MarketState = serde_json::from_str(&json).unwrap();
        let mut restored = Engine::from_state(engine.config().clone(), state).unwrap();

        assert_eq!(restored.best_bid(), engine.best_bid());
        assert_eq!(restored.best_ask(), engine.best_ask());
        assert_eq!(restored.spot_price().unwrap(), engine.spot_price().unwrap());
        assert_eq!(restored.twap(), engine.twap());
        assert_eq!(restored.position(TRADERS[2]), engine.position(TRADERS[2]));
        assert_eq!(restored.last_step(), Step(2));

        // both copies keep evolving identically
        let a = engine.execute_trade(TRADERS[1], Side::Long, dec!(500), None, Step(3)).unwrap();
        let b = restored.execute_trade(TRADERS[1], Side::Long, dec!(500), None, Step(3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(restored.balance(TRADERS[1], quote), engine.balance(TRADERS[1], quote));

        // the step guard survives too
        assert!(restored.deposit(TRADERS[0], quote, dec!(1), Step(2)).is_err());

        // event ids carry on where the original left off
        assert_eq!(restored.recent_events(1)[0].id, engine.recent_events(1)[0].id);
    }
}
