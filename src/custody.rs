// 2.0 custody.rs: per-user, per-asset available/locked accounting.
// no other component touches balances. every mutation checks first, then writes,
// so a failed call leaves the ledger exactly as it was. inside an engine
// transaction each touched entry is journaled so the whole call can be undone.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;
use crate::journal::UndoLog;
use crate::types::{ensure_amount, AccountId, AssetId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    // spendable
    pub available: Decimal,
    // committed to open orders
    pub locked: Decimal,
}

impl UserBalance {
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

/// Per-asset balance book. `totals[asset]` always equals the sum of
/// `available + locked` over every user holding that asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustodyLedger {
    // BTreeMap keeps snapshots deterministic
    balances: BTreeMap<AccountId, BTreeMap<AssetId, UserBalance>>,
    totals: BTreeMap<AssetId, Decimal>,
    #[serde(skip)]
    balance_undo: UndoLog<(AccountId, AssetId), UserBalance>,
    #[serde(skip)]
    total_undo: UndoLog<AssetId, Decimal>,
}

impl CustodyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, user: AccountId, asset: AssetId) -> UserBalance {
        self.balances
            .get(&user)
            .and_then(|assets| assets.get(&asset))
            .copied()
            .unwrap_or_default()
    }

    pub fn available(&self, user: AccountId, asset: AssetId) -> Decimal {
        self.balance(user, asset).available
    }

    pub fn locked(&self, user: AccountId, asset: AssetId) -> Decimal {
        self.balance(user, asset).locked
    }

    // total custodied amount of an asset across all users
    pub fn total_custodied(&self, asset: AssetId) -> Decimal {
        self.totals.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn deposit(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError> {
        ensure_amount(amount)?;
        self.entry(user, asset).available += amount;
        *self.total_mut(asset) += amount;
        Ok(())
    }

    pub fn withdraw(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError> {
        ensure_amount(amount)?;
        let balance = self.require_available(user, asset, amount)?;
        balance.available -= amount;
        *self.total_mut(asset) -= amount;
        Ok(())
    }

    // available -> locked
    pub fn lock(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError> {
        ensure_amount(amount)?;
        let balance = self.require_available(user, asset, amount)?;
        balance.available -= amount;
        balance.locked += amount;
        Ok(())
    }

    // locked -> available
    pub fn unlock(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError> {
        ensure_amount(amount)?;
        let balance = self.require_locked(user, asset, amount)?;
        balance.locked -= amount;
        balance.available += amount;
        Ok(())
    }

    // from.locked -> to.available. totals are unchanged.
    pub fn transfer_locked(
        &mut self,
        from: AccountId,
        to: AccountId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        ensure_amount(amount)?;
        self.require_locked(from, asset, amount)?.locked -= amount;
        self.entry(to, asset).available += amount;
        Ok(())
    }

    /// Deposit pulled through an external vault. The vault's custodied balance
    /// must grow by exactly `amount` and the depositor's ledger entry must not
    /// move while the pull is in flight; anything else means a transfer hook
    /// tried to inflate the credit. A rejected pull hands back whatever did
    /// arrive before the error is returned.
    pub fn deposit_from_vault(
        &mut self,
        vault: &mut dyn TokenVault,
        user: AccountId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        ensure_amount(amount)?;
        let ledger_before = self.balance(user, asset);
        let vault_before = vault.custodied(asset);

        vault.pull(user, asset, amount)?;

        let delta = vault.custodied(asset) - vault_before;
        let rejection = if delta > amount || self.balance(user, asset) != ledger_before {
            EngineError::ReentrancyGuard
        } else if delta < amount {
            EngineError::InvalidInput(format!("vault received {delta}, expected {amount}"))
        } else {
            return self.deposit(user, asset, amount);
        };

        if delta > Decimal::ZERO {
            vault.push(user, asset, delta)?;
        }
        Err(rejection)
    }

    /// Withdrawal paid out through an external vault. The ledger is debited
    /// first; if the vault refuses the payout the debit is reversed.
    pub fn withdraw_to_vault(
        &mut self,
        vault: &mut dyn TokenVault,
        user: AccountId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.withdraw(user, asset, amount)?;
        if let Err(e) = vault.push(user, asset, amount) {
            self.deposit(user, asset, amount)?;
            return Err(e);
        }
        Ok(())
    }

    // sum over users, recomputed from scratch. used by invariant checks.
    pub fn sum_balances(&self, asset: AssetId) -> Decimal {
        self.balances
            .values()
            .filter_map(|assets| assets.get(&asset))
            .map(UserBalance::total)
            .sum()
    }

    pub fn assets(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.totals.keys().copied()
    }

    pub(crate) fn begin(&mut self) {
        self.balance_undo.begin();
        self.total_undo.begin();
    }

    pub(crate) fn commit(&mut self) {
        self.balance_undo.commit();
        self.total_undo.commit();
    }

    // restore every entry touched since `begin`
    pub(crate) fn rollback(&mut self) {
        for ((user, asset), prior) in self.balance_undo.take() {
            match prior {
                Some(balance) => {
                    self.balances.entry(user).or_default().insert(asset, balance);
                }
                None => {
                    if let Some(assets) = self.balances.get_mut(&user) {
                        assets.remove(&asset);
                        if assets.is_empty() {
                            self.balances.remove(&user);
                        }
                    }
                }
            }
        }
        for (asset, prior) in self.total_undo.take() {
            match prior {
                Some(total) => {
                    self.totals.insert(asset, total);
                }
                None => {
                    self.totals.remove(&asset);
                }
            }
        }
    }

    fn entry(&mut self, user: AccountId, asset: AssetId) -> &mut UserBalance {
        let balances = &self.balances;
        self.balance_undo.record_with(&(user, asset), || {
            balances.get(&user).and_then(|assets| assets.get(&asset)).copied()
        });
        self.balances.entry(user).or_default().entry(asset).or_default()
    }

    fn total_mut(&mut self, asset: AssetId) -> &mut Decimal {
        let totals = &self.totals;
        self.total_undo.record_with(&asset, || totals.get(&asset).copied());
        self.totals.entry(asset).or_default()
    }

    fn require_available(
        &mut self,
        user: AccountId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<&mut UserBalance, EngineError> {
        let available = self.available(user, asset);
        if amount > available {
            return Err(EngineError::InsufficientBalance {
                account: user,
                asset,
                available,
                requested: amount,
            });
        }
        Ok(self.entry(user, asset))
    }

    fn require_locked(
        &mut self,
        user: AccountId,
        asset: AssetId,
        amount: Decimal,
    ) -> Result<&mut UserBalance, EngineError> {
        let locked = self.locked(user, asset);
        if amount > locked {
            return Err(EngineError::InsufficientBalance {
                account: user,
                asset,
                available: locked,
                requested: amount,
            });
        }
        Ok(self.entry(user, asset))
    }
}

// Token custody outside the engine (a chain contract, a bank rail).
// Implement this for whatever actually holds the deposited funds.
pub trait TokenVault {
    // what the vault currently holds for the engine
    fn custodied(&self, asset: AssetId) -> Decimal;

    // move `amount` from the user into the vault
    fn pull(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError>;

    // move `amount` out of the vault to the user
    fn push(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError>;
}

// Mock vault for testing. `inflate_next_pull` simulates a transfer hook that
// credits more than requested.
#[derive(Debug, Default)]
pub struct MockVault {
    holdings: HashMap<AssetId, Decimal>,
    inflate_next_pull: Option<Decimal>,
    short_next_pull: Option<Decimal>,
}

impl MockVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inflate_next_pull(&mut self, extra: Decimal) {
        self.inflate_next_pull = Some(extra);
    }

    pub fn short_next_pull(&mut self, missing: Decimal) {
        self.short_next_pull = Some(missing);
    }
}

impl TokenVault for MockVault {
    fn custodied(&self, asset: AssetId) -> Decimal {
        self.holdings.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    fn pull(&mut self, _user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError> {
        let extra = self.inflate_next_pull.take().unwrap_or(Decimal::ZERO);
        let missing = self.short_next_pull.take().unwrap_or(Decimal::ZERO);
        *self.holdings.entry(asset).or_default() += amount + extra - missing;
        Ok(())
    }

    fn push(&mut self, user: AccountId, asset: AssetId, amount: Decimal) -> Result<(), EngineError> {
        let held = self.custodied(asset);
        if amount > held {
            return Err(EngineError::InsufficientBalance {
                account: user,
                asset,
                available: held,
                requested: amount,
            });
        }
        *self.holdings.entry(asset).or_default() -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const USD: AssetId = AssetId(1);
    const ALICE: AccountId = AccountId(1);
    const BOB: AccountId = AccountId(2);

    fn assert_conserved(ledger: &CustodyLedger) {
        assert_eq!(ledger.sum_balances(USD), ledger.total_custodied(USD));
    }

    #[test]
    fn deposit_and_withdraw() {
        let mut ledger = CustodyLedger::new();
        ledger.deposit(ALICE, USD, dec!(1000)).unwrap();
        assert_eq!(ledger.available(ALICE, USD), dec!(1000));

        ledger.withdraw(ALICE, USD, dec!(400)).unwrap();
        assert_eq!(ledger.available(ALICE, USD), dec!(600));
        assert_eq!(ledger.total_custodied(USD), dec!(600));
        assert_conserved(&ledger);
    }

    #[test]
    fn zero_deposit_rejected() {
        let mut ledger = CustodyLedger::new();
        let result = ledger.deposit(ALICE, USD, Decimal::ZERO);
        assert!(matches!(result, Err(EngineError::ZeroAmount)));
    }

    #[test]
    fn withdraw_more_than_available() {
        let mut ledger = CustodyLedger::new();
        ledger.deposit(ALICE, USD, dec!(100)).unwrap();
        ledger.lock(ALICE, USD, dec!(80)).unwrap();

        // locked funds are not withdrawable
        let result = ledger.withdraw(ALICE, USD, dec!(50));
        assert!(matches!(result, Err(EngineError::InsufficientBalance { .. })));
        assert_eq!(ledger.balance(ALICE, USD), UserBalance { available: dec!(20), locked: dec!(80) });
    }

    #[test]
    fn lock_unlock_cycle() {
        let mut ledger = CustodyLedger::new();
        ledger.deposit(ALICE, USD, dec!(100)).unwrap();
        ledger.lock(ALICE, USD, dec!(60)).unwrap();
        assert_eq!(ledger.locked(ALICE, USD), dec!(60));

        assert!(matches!(
            ledger.lock(ALICE, USD, dec!(41)),
            Err(EngineError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            ledger.unlock(ALICE, USD, dec!(61)),
            Err(EngineError::InsufficientBalance { .. })
        ));

        ledger.unlock(ALICE, USD, dec!(60)).unwrap();
        assert_eq!(ledger.balance(ALICE, USD).total(), dec!(100));
        assert_conserved(&ledger);
    }

    #[test]
    fn transfer_locked_moves_to_counterparty_available() {
        let mut ledger = CustodyLedger::new();
        ledger.deposit(ALICE, USD, dec!(100)).unwrap();
        ledger.lock(ALICE, USD, dec!(100)).unwrap();

        ledger.transfer_locked(ALICE, BOB, USD, dec!(60)).unwrap();
        assert_eq!(ledger.locked(ALICE, USD), dec!(40));
        assert_eq!(ledger.available(BOB, USD), dec!(60));
        assert_eq!(ledger.total_custodied(USD), dec!(100));

        let result = ledger.transfer_locked(ALICE, BOB, USD, dec!(41));
        assert!(matches!(result, Err(EngineError::InsufficientBalance { .. })));
        assert_conserved(&ledger);
    }

    #[test]
    fn vault_deposit_credits_exact_delta() {
        let mut ledger = CustodyLedger::new();
        let mut vault = MockVault::new();

        ledger.deposit_from_vault(&mut vault, ALICE, USD, dec!(500)).unwrap();
        assert_eq!(ledger.available(ALICE, USD), dec!(500));
        assert_eq!(vault.custodied(USD), dec!(500));
    }

    #[test]
    fn vault_deposit_rejects_inflated_transfer() {
        let mut ledger = CustodyLedger::new();
        let mut vault = MockVault::new();
        vault.inflate_next_pull(dec!(1000));

        let result = ledger.deposit_from_vault(&mut vault, ALICE, USD, dec!(500));
        assert!(matches!(result, Err(EngineError::ReentrancyGuard)));
        assert_eq!(ledger.available(ALICE, USD), Decimal::ZERO);
        assert_eq!(ledger.total_custodied(USD), Decimal::ZERO);
        // the whole 1500 that landed goes back to the depositor
        assert_eq!(vault.custodied(USD), Decimal::ZERO);
    }

    #[test]
    fn vault_deposit_rejects_short_transfer() {
        let mut ledger = CustodyLedger::new();
        let mut vault = MockVault::new();
        vault.short_next_pull(dec!(1));

        let result = ledger.deposit_from_vault(&mut vault, ALICE, USD, dec!(500));
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert_eq!(ledger.available(ALICE, USD), Decimal::ZERO);
        assert_eq!(vault.custodied(USD), Decimal::ZERO);
    }

    #[test]
    fn vault_withdraw_pays_out_and_tracks_ledger() {
        let mut ledger = CustodyLedger::new();
        let mut vault = MockVault::new();
        ledger.deposit_from_vault(&mut vault, ALICE, USD, dec!(500)).unwrap();

        ledger.withdraw_to_vault(&mut vault, ALICE, USD, dec!(200)).unwrap();
        assert_eq!(ledger.available(ALICE, USD), dec!(300));
        assert_eq!(vault.custodied(USD), ledger.total_custodied(USD));

        let result = ledger.withdraw_to_vault(&mut vault, ALICE, USD, dec!(301));
        assert!(matches!(result, Err(EngineError::InsufficientBalance { .. })));
        assert_eq!(vault.custodied(USD), dec!(300));
    }

    #[test]
    fn vault_withdraw_reverses_debit_when_payout_fails() {
        let mut ledger = CustodyLedger::new();
        let mut vault = MockVault::new();
        // credited on the ledger but never pulled into the vault
        ledger.deposit(ALICE, USD, dec!(100)).unwrap();

        let result = ledger.withdraw_to_vault(&mut vault, ALICE, USD, dec!(40));
        assert!(matches!(result, Err(EngineError::InsufficientBalance { .. })));
        assert_eq!(ledger.available(ALICE, USD), dec!(100));
        assert_eq!(ledger.total_custodied(USD), dec!(100));
        assert_conserved(&ledger);
    }

    #[test]
    fn rollback_restores_touched_entries() {
        let mut ledger = CustodyLedger::new();
        ledger.deposit(ALICE, USD, dec!(100)).unwrap();

        ledger.begin();
        ledger.lock(ALICE, USD, dec!(60)).unwrap();
        ledger.transfer_locked(ALICE, BOB, USD, dec!(60)).unwrap();
        ledger.deposit(BOB, AssetId(2), dec!(5)).unwrap();
        ledger.rollback();

        assert_eq!(ledger.balance(ALICE, USD), UserBalance { available: dec!(100), locked: Decimal::ZERO });
        assert_eq!(ledger.balance(BOB, USD), UserBalance::default());
        assert_eq!(ledger.total_custodied(AssetId(2)), Decimal::ZERO);
        assert_eq!(ledger.assets().count(), 1);
        assert_conserved(&ledger);

        // committed work survives and later rollbacks don't reach it
        ledger.begin();
        ledger.withdraw(ALICE, USD, dec!(30)).unwrap();
        ledger.commit();
        ledger.rollback();
        assert_eq!(ledger.available(ALICE, USD), dec!(70));
    }

    #[test]
    fn mock_vault_push() {
        let mut vault = MockVault::new();
        vault.pull(ALICE, USD, dec!(10)).unwrap();
        vault.push(ALICE, USD, dec!(4)).unwrap();
        assert_eq!(vault.custodied(USD), dec!(6));
        assert!(vault.push(ALICE, USD, dec!(7)).is_err());
    }
}
