// 10.0 engine/core.rs: main engine. owns the market state, the event log and
// the external collaborators (oracle, token vault).
// 10.1 every mutating call runs through `transact`: mutate in place with the
// large collections journaled, roll back on Err.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::custody::{CustodyLedger, TokenVault, UserBalance};
use crate::deleverage::TwapState;
use crate::error::EngineError;
use crate::events::{
    DepositEvent, Event, EventId, EventPayload, LiquidityProvidedEvent, WithdrawalEvent, WithdrawalRejectedEvent,
};
use crate::fees::{FeeInputs, FeeState};
use crate::journal::UndoLog;
use crate::kyle::PricingCurve;
use crate::liquidity::{utilization, LiquidityPool};
use crate::oracle::OracleFeed;
use crate::order::{Order, OrderBook, PriceLevel};
use crate::position::CurvePosition;
use crate::types::{checked_mul, ensure_amount, AccountId, AssetId, OrderId, Pips, Price, Side, Step};
use crate::volatility::VolatilityState;

/// Everything that persists between calls. Serializable so a host can
/// snapshot and restore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub ledger: CustodyLedger,
    pub book: OrderBook,
    /// None until `initialize_curve`.
    pub curve: Option<PricingCurve>,
    pub volatility: VolatilityState,
    pub fees: FeeState,
    pub twap: TwapState,
    pub positions: BTreeMap<AccountId, CurvePosition>,
    pub pool: LiquidityPool,
    pub max_position_size: Decimal,
    pub next_order_id: u64,
    pub last_step: Step,
    pub paused: bool,
    /// Id the next emitted event gets, so a restored engine keeps counting.
    #[serde(default = "first_event_id")]
    pub next_event_id: u64,
    #[serde(skip)]
    position_undo: UndoLog<AccountId, CurvePosition>,
}

fn first_event_id() -> u64 {
    1
}

/// Copy of the small parts of the state taken when a transaction starts. The
/// ledger, the book and the positions journal themselves.
#[derive(Debug)]
pub(super) struct Checkpoint {
    curve: Option<PricingCurve>,
    volatility: VolatilityState,
    fees: FeeState,
    twap: TwapState,
    pool: LiquidityPool,
    max_position_size: Decimal,
    next_order_id: u64,
    last_step: Step,
    paused: bool,
}

impl MarketState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ledger: CustodyLedger::new(),
            book: OrderBook::new(),
            curve: None,
            volatility: VolatilityState::new(&config.volatility),
            fees: FeeState::new(&config.fees),
            twap: TwapState::new(),
            positions: BTreeMap::new(),
            pool: LiquidityPool::new(),
            max_position_size: config.admin.max_position_size,
            next_order_id: 1,
            last_step: Step::default(),
            paused: false,
            next_event_id: first_event_id(),
            position_undo: UndoLog::default(),
        }
    }

    pub(super) fn begin(&mut self) -> Checkpoint {
        self.ledger.begin();
        self.book.begin();
        self.position_undo.begin();
        Checkpoint {
            curve: self.curve.clone(),
            volatility: self.volatility.clone(),
            fees: self.fees.clone(),
            twap: self.twap.clone(),
            pool: self.pool.clone(),
            max_position_size: self.max_position_size,
            next_order_id: self.next_order_id,
            last_step: self.last_step,
            paused: self.paused,
        }
    }

    pub(super) fn commit(&mut self) {
        self.ledger.commit();
        self.book.commit();
        self.position_undo.commit();
    }

    pub(super) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.ledger.rollback();
        self.book.rollback();
        for (trader, prior) in self.position_undo.take() {
            match prior {
                Some(position) => {
                    self.positions.insert(trader, position);
                }
                None => {
                    self.positions.remove(&trader);
                }
            }
        }
        self.curve = checkpoint.curve;
        self.volatility = checkpoint.volatility;
        self.fees = checkpoint.fees;
        self.twap = checkpoint.twap;
        self.pool = checkpoint.pool;
        self.max_position_size = checkpoint.max_position_size;
        self.next_order_id = checkpoint.next_order_id;
        self.last_step = checkpoint.last_step;
        self.paused = checkpoint.paused;
    }

    pub fn curve(&self) -> Result<&PricingCurve, EngineError> {
        self.curve.as_ref().ok_or(EngineError::NotInitialized("pricing curve"))
    }

    pub fn spot_price(&self) -> Result<Decimal, EngineError> {
        self.curve()?.spot_price()
    }

    pub fn effective_depth(&self) -> Result<Decimal, EngineError> {
        self.volatility.effective_depth(self.curve()?.kyle.base_depth)
    }

    pub fn position(&self, trader: AccountId) -> CurvePosition {
        self.positions.get(&trader).copied().unwrap_or_default()
    }

    pub(crate) fn store_position(&mut self, trader: AccountId, position: CurvePosition) {
        let positions = &self.positions;
        self.position_undo.record_with(&trader, || positions.get(&trader).copied());
        if position.is_empty() {
            self.positions.remove(&trader);
        } else {
            self.positions.insert(trader, position);
        }
    }

    /// Open interest notional at spot over the pool's free quote, capped at 1.
    pub fn utilization(&self, quote: AssetId) -> Result<Decimal, EngineError> {
        let total_oi = self.volatility.total_oi();
        if total_oi.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let notional = checked_mul(total_oi, self.spot_price()?)?;
        utilization(notional, self.ledger.available(AccountId::POOL, quote))
    }

    pub fn fee_inputs(&self, quote: AssetId) -> Result<FeeInputs, EngineError> {
        Ok(FeeInputs {
            base_volatility: self.volatility.base_volatility,
            effective_volatility: self.volatility.effective_volatility,
            long_oi: self.volatility.long_oi,
            short_oi: self.volatility.short_oi,
            utilization: self.utilization(quote)?,
        })
    }
}

/// An open transaction: the live state plus the events it will emit if it
/// commits.
pub(super) struct Tx<'a> {
    pub state: &'a mut MarketState,
    pub config: &'a EngineConfig,
    pub step: Step,
    events: &'a mut Vec<EventPayload>,
}

impl Tx<'_> {
    pub fn emit(&mut self, payload: EventPayload) {
        self.events.push(payload);
    }

    pub fn base_asset(&self) -> AssetId {
        self.config.market.base_asset
    }

    pub fn quote_asset(&self) -> AssetId {
        self.config.market.quote_asset
    }
}

/** 10.0: main engine struct. all state lives here */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) state: MarketState,
    pub(super) events: Vec<Event>,
    pub(super) oracle: Option<Box<dyn OracleFeed + Send>>,
    pub(super) vault: Option<Box<dyn TokenVault + Send>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("events", &self.events.len())
            .field("oracle", &self.oracle.is_some())
            .field("vault", &self.vault.is_some())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let state = MarketState::new(&config);
        Self::from_state(config, state)
    }

    /// Resume from a persisted state snapshot. Event ids continue from the
    /// snapshot's counter; the event log itself starts empty.
    pub fn from_state(config: EngineConfig, state: MarketState) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            state,
            events: Vec::new(),
            oracle: None,
            vault: None,
        })
    }

    pub fn with_oracle(mut self, oracle: impl OracleFeed + Send + 'static) -> Self {
        self.set_oracle(oracle);
        self
    }

    pub fn set_oracle(&mut self, oracle: impl OracleFeed + Send + 'static) {
        self.oracle = Some(Box::new(oracle));
    }

    pub fn set_vault(&mut self, vault: impl TokenVault + Send + 'static) {
        self.vault = Some(Box::new(vault));
    }

    pub fn vault(&self) -> Option<&(dyn TokenVault + Send + 'static)> {
        self.vault.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn last_step(&self) -> Step {
        self.state.last_step
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn balance(&self, account: AccountId, asset: AssetId) -> UserBalance {
        self.state.ledger.balance(account, asset)
    }

    pub fn ledger(&self) -> &CustodyLedger {
        &self.state.ledger
    }

    pub fn order(&self, order_id: OrderId) -> Option<&Order> {
        self.state.book.get(order_id)
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.state.book.best_bid()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.state.book.best_ask()
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.state.book.spread()
    }

    pub fn mid_price(&self) -> Option<Price> {
        self.state.book.mid_price()
    }

    pub fn depth(&self, side: Side, max_levels: usize) -> Vec<PriceLevel> {
        self.state.book.levels(side, max_levels)
    }

    pub fn spot_price(&self) -> Result<Decimal, EngineError> {
        self.state.spot_price()
    }

    pub fn current_fee(&self) -> Pips {
        self.state.fees.current_fee
    }

    pub fn twap(&self) -> Decimal {
        self.state.twap.twap()
    }

    pub fn effective_volatility(&self) -> Decimal {
        self.state.volatility.effective_volatility
    }

    /// (long, short)
    pub fn open_interest(&self) -> (Decimal, Decimal) {
        (self.state.volatility.long_oi, self.state.volatility.short_oi)
    }

    pub fn utilization(&self) -> Result<Decimal, EngineError> {
        self.state.utilization(self.config.market.quote_asset)
    }

    pub fn position(&self, trader: AccountId) -> CurvePosition {
        self.state.position(trader)
    }

    pub fn pool(&self) -> &LiquidityPool {
        &self.state.pool
    }

    pub fn pool_available(&self) -> Decimal {
        self.state.ledger.available(AccountId::POOL, self.config.market.quote_asset)
    }

    pub fn deposit(&mut self, account: AccountId, asset: AssetId, amount: Decimal, step: Step) -> Result<(), EngineError> {
        self.transact(step, |tx| {
            tx.state.ledger.deposit(account, asset, amount)?;
            let new_available = tx.state.ledger.available(account, asset);
            tx.emit(EventPayload::Deposit(DepositEvent {
                account,
                asset,
                amount,
                new_available,
                via_vault: false,
            }));
            Ok(())
        })
    }

    // a rejected withdrawal still leaves an audit record
    pub fn withdraw(&mut self, account: AccountId, asset: AssetId, amount: Decimal, step: Step) -> Result<(), EngineError> {
        let result = self.transact(step, |tx| {
            tx.state.ledger.withdraw(account, asset, amount)?;
            let new_available = tx.state.ledger.available(account, asset);
            tx.emit(EventPayload::Withdrawal(WithdrawalEvent {
                account,
                asset,
                amount,
                new_available,
            }));
            Ok(())
        });

        if let Err(e) = &result {
            warn!(account = account.0, asset = asset.0, amount = %amount, error = %e, "withdrawal rejected");
            self.emit_event(
                step.max(self.state.last_step),
                EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                    account,
                    asset,
                    amount,
                    reason: e.to_string(),
                }),
            );
        }
        result
    }

    /// Deposit pulled through the wired token vault and verified against the
    /// vault's balance delta.
    pub fn deposit_from_vault(
        &mut self,
        account: AccountId,
        asset: AssetId,
        amount: Decimal,
        step: Step,
    ) -> Result<(), EngineError> {
        self.check_step(step)?;
        let vault = self.vault.as_deref_mut().ok_or(EngineError::EngineNotSet("token vault"))?;

        self.state.ledger.deposit_from_vault(vault, account, asset, amount)?;
        let new_available = self.state.ledger.available(account, asset);

        self.state.last_step = step;
        self.emit_event(
            step,
            EventPayload::Deposit(DepositEvent {
                account,
                asset,
                amount,
                new_available,
                via_vault: true,
            }),
        );
        Ok(())
    }

    /// Withdrawal paid out through the wired token vault. The ledger debit
    /// stands only if the vault accepts the payout.
    pub fn withdraw_to_vault(
        &mut self,
        account: AccountId,
        asset: AssetId,
        amount: Decimal,
        step: Step,
    ) -> Result<(), EngineError> {
        let result = self.check_step(step).and_then(|()| {
            let vault = self.vault.as_deref_mut().ok_or(EngineError::EngineNotSet("token vault"))?;
            self.state.ledger.withdraw_to_vault(vault, account, asset, amount)
        });

        match &result {
            Ok(()) => {
                self.state.last_step = step;
                let new_available = self.state.ledger.available(account, asset);
                self.emit_event(
                    step,
                    EventPayload::Withdrawal(WithdrawalEvent {
                        account,
                        asset,
                        amount,
                        new_available,
                    }),
                );
            }
            Err(e) => {
                warn!(account = account.0, asset = asset.0, amount = %amount, error = %e, "vault withdrawal rejected");
                self.emit_event(
                    step.max(self.state.last_step),
                    EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                        account,
                        asset,
                        amount,
                        reason: e.to_string(),
                    }),
                );
            }
        }
        result
    }

    /// Move quote from a provider's available balance into the pool account.
    pub fn provide_liquidity(&mut self, provider: AccountId, amount: Decimal, step: Step) -> Result<(), EngineError> {
        if self.state.paused {
            return Err(EngineError::TradingPaused);
        }
        self.transact(step, |tx| {
            ensure_amount(amount)?;
            let quote = tx.quote_asset();
            tx.state.ledger.lock(provider, quote, amount)?;
            tx.state.ledger.transfer_locked(provider, AccountId::POOL, quote, amount)?;
            tx.state.pool.record_contribution(provider, amount);

            let pool_available = tx.state.ledger.available(AccountId::POOL, quote);
            tx.emit(EventPayload::LiquidityProvided(LiquidityProvidedEvent {
                provider,
                amount,
                pool_available,
            }));
            Ok(())
        })
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn check_step(&self, step: Step) -> Result<(), EngineError> {
        if step < self.state.last_step {
            return Err(EngineError::InvalidInput(format!(
                "step {step} is behind the last processed step {}",
                self.state.last_step
            )));
        }
        Ok(())
    }

    /// Run `f` against the live state. On Ok its events are emitted; on Err
    /// every write it made is rolled back and nothing is emitted.
    pub(super) fn transact<T, F>(&mut self, step: Step, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, EngineError>,
    {
        self.check_step(step)?;

        let checkpoint = self.state.begin();
        let mut pending = Vec::new();
        let result = f(&mut Tx {
            state: &mut self.state,
            config: &self.config,
            step,
            events: &mut pending,
        });

        match result {
            Ok(out) => {
                self.state.commit();
                self.state.last_step = step;
                for payload in pending {
                    self.emit_event(step, payload);
                }
                Ok(out)
            }
            Err(e) => {
                self.state.rollback(checkpoint);
                Err(e)
            }
        }
    }

    pub(super) fn emit_event(&mut self, step: Step, payload: EventPayload) {
        let event = Event::new(EventId(self.state.next_event_id), step, payload);
        self.state.next_event_id += 1;

        debug!(id = event.id.0, step = step.0, payload = ?event.payload, "event");

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
