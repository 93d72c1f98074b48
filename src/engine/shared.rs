//! Engine shared between threads.
//!
//! Writers are serialized behind one re-entrant lock. A writer that calls
//! back into the engine on the same thread (say, from a vault or oracle
//! callback) would get the lock again, so the inner `RefCell` borrow is what
//! catches it and turns it into `ReentrancyGuard`. Readers that only need
//! headline numbers never take the lock: they load the last published
//! `MarketSnapshot`.

use arc_swap::ArcSwap;
use parking_lot::ReentrantMutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::Arc;

use super::core::Engine;
use crate::error::EngineError;
use crate::types::{Pips, Price, Step};

/// Read-only view published after every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub step: Step,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spot_price: Option<Decimal>,
    pub current_fee: Pips,
    pub twap: Decimal,
    pub effective_volatility: Decimal,
    pub long_oi: Decimal,
    pub short_oi: Decimal,
    pub paused: bool,
}

impl Engine {
    pub fn snapshot(&self) -> MarketSnapshot {
        let (long_oi, short_oi) = self.open_interest();
        MarketSnapshot {
            step: self.last_step(),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spot_price: self.spot_price().ok(),
            current_fee: self.current_fee(),
            twap: self.twap(),
            effective_volatility: self.effective_volatility(),
            long_oi,
            short_oi,
            paused: self.is_paused(),
        }
    }
}

pub struct SharedEngine {
    inner: ReentrantMutex<RefCell<Engine>>,
    snapshot: ArcSwap<MarketSnapshot>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        let snapshot = ArcSwap::from_pointee(engine.snapshot());
        Self {
            inner: ReentrantMutex::new(RefCell::new(engine)),
            snapshot,
        }
    }

    /// Run one mutating operation. The snapshot is republished only when it
    /// succeeds.
    pub fn write<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Engine) -> Result<T, EngineError>,
    {
        let guard = self.inner.lock();
        let mut engine = guard.try_borrow_mut().map_err(|_| EngineError::ReentrancyGuard)?;
        let out = f(&mut engine)?;
        self.snapshot.store(Arc::new(engine.snapshot()));
        Ok(out)
    }

    /// Consistent read under the writer lock.
    pub fn read<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Engine) -> T,
    {
        let guard = self.inner.lock();
        let engine = guard.try_borrow().map_err(|_| EngineError::ReentrancyGuard)?;
        Ok(f(&engine))
    }

    /// Lock-free view of the last committed state.
    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        self.snapshot.load_full()
    }

    pub fn into_inner(self) -> Engine {
        self.inner.into_inner().into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{AccountId, Side};
    use rust_decimal_macros::dec;
    use std::thread;

    const ADMIN: AccountId = AccountId(100);
    const MAKER: AccountId = AccountId(1);

    fn shared() -> SharedEngine {
        let mut engine = Engine::new(EngineConfig::default()).unwrap();
        let base = engine.config().market.base_asset;
        engine.initialize_curve(ADMIN, None, None, Step(0)).unwrap();
        engine.deposit(MAKER, base, dec!(1000), Step(0)).unwrap();
        SharedEngine::new(engine)
    }

    #[test]
    fn snapshot_follows_commits() {
        let shared = shared();
        assert_eq!(shared.snapshot().best_ask, None);
        assert_eq!(shared.snapshot().spot_price, Some(dec!(1)));

        shared
            .write(|e| e.place_order(MAKER, Side::Short, dec!(1.5), dec!(10), Step(1)))
            .unwrap();
        assert_eq!(shared.snapshot().best_ask.unwrap().value(), dec!(1.5));
        assert_eq!(shared.snapshot().step, Step(1));

        // failed write leaves the published view alone
        let before = shared.snapshot();
        assert!(shared
            .write(|e| e.place_order(MAKER, Side::Short, dec!(1.5), dec!(10_000), Step(2)))
            .is_err());
        assert_eq!(shared.snapshot(), before);
    }

    #[test]
    fn reentrant_write_rejected() {
        let shared = shared();
        let result = shared.write(|_| shared.write(|e| e.pause(ADMIN, Step(1))));
        assert_eq!(result, Err(EngineError::ReentrancyGuard));
        assert!(!shared.read(|e| e.is_paused()).unwrap());
    }

    #[test]
    fn readers_on_other_threads() {
        let shared = Arc::new(shared());
        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 1..=20u64 {
                    shared
                        .write(|e| e.place_order(MAKER, Side::Short, dec!(2), dec!(1), Step(i)))
                        .unwrap();
                }
            })
        };
        let reader = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut last = Step(0);
                for _ in 0..50 {
                    let step = shared.snapshot().step;
                    assert!(step >= last);
                    last = step;
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(shared.read(|e| e.state().book.order_count()).unwrap(), 20);
        assert_eq!(shared.snapshot().step, Step(20));
    }
}
