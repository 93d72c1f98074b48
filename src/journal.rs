// 2.2 journal.rs: first-touch undo log for the large keyed collections.
// a transaction records the prior value of each key the first time it writes
// it; rollback puts those values back, commit just forgets them.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct UndoLog<K, V> {
    active: bool,
    // None means the key did not exist before the transaction
    saved: BTreeMap<K, Option<V>>,
}

impl<K, V> Default for UndoLog<K, V> {
    fn default() -> Self {
        Self {
            active: false,
            saved: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V> UndoLog<K, V> {
    pub fn begin(&mut self) {
        self.active = true;
        self.saved.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remember `prior()` for `key` unless it was already saved in this
    /// transaction. No-op outside a transaction.
    pub fn record_with(&mut self, key: &K, prior: impl FnOnce() -> Option<V>) {
        if self.active && !self.saved.contains_key(key) {
            self.saved.insert(key.clone(), prior());
        }
    }

    pub fn commit(&mut self) {
        self.active = false;
        self.saved.clear();
    }

    /// End the transaction and hand back the saved prior values.
    pub fn take(&mut self) -> BTreeMap<K, Option<V>> {
        self.active = false;
        std::mem::take(&mut self.saved)
    }
}
