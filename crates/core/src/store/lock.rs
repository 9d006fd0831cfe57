//! Pair-level exclusive locks.
//!
//! A repost locks every pair in its scope before reading its window and
//! holds the locks until its writes are done. Sets are acquired all at once:
//! a waiter either gets every requested pair or none of them.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::error::StoreError;
use crate::stock::StockPair;

/// Table of currently held pairs.
#[derive(Debug, Default)]
pub struct PairLockTable {
    held: Mutex<HashSet<StockPair>>,
    released: Condvar,
}

impl PairLockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every pair, waiting up to `timeout` for all of them to be free.
    pub fn acquire(
        self: &Arc<Self>,
        pairs: &BTreeSet<StockPair>,
        timeout: Duration,
    ) -> Result<PairLockGuard, StoreError> {
        self.wait_and_take(pairs, timeout)?;
        Ok(PairLockGuard {
            table: Arc::clone(self),
            pairs: pairs.clone(),
        })
    }

    /// Returns true if the pair is held.
    pub fn is_held(&self, pair: &StockPair) -> Result<bool, StoreError> {
        let held = self.held.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(held.contains(pair))
    }

    fn wait_and_take(&self, pairs: &BTreeSet<StockPair>, timeout: Duration) -> Result<(), StoreError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;
        while pairs.iter().any(|pair| held.contains(pair)) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout { pairs: pairs.len() });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            held = guard;
        }
        held.extend(pairs.iter().cloned());
        debug!(pairs = pairs.len(), "Pair locks acquired");
        Ok(())
    }

    fn release(&self, pairs: &BTreeSet<StockPair>) {
        if pairs.is_empty() {
            return;
        }
        if let Ok(mut held) = self.held.lock() {
            for pair in pairs {
                held.remove(pair);
            }
        }
        self.released.notify_all();
    }
}

/// Locks held until dropped.
#[derive(Debug)]
pub struct PairLockGuard {
    table: Arc<PairLockTable>,
    pairs: BTreeSet<StockPair>,
}

impl PairLockGuard {
    /// Returns the locked pairs.
    #[must_use]
    pub const fn pairs(&self) -> &BTreeSet<StockPair> {
        &self.pairs
    }

    /// Returns true if every given pair is locked by this guard.
    #[must_use]
    pub fn covers(&self, pairs: &BTreeSet<StockPair>) -> bool {
        pairs.is_subset(&self.pairs)
    }

    /// Additionally locks the given pairs, keeping the ones already held.
    pub fn extend(&mut self, pairs: &BTreeSet<StockPair>, timeout: Duration) -> Result<(), StoreError> {
        let missing: BTreeSet<StockPair> = pairs.difference(&self.pairs).cloned().collect();
        self.table.wait_and_take(&missing, timeout)?;
        self.pairs.extend(missing);
        Ok(())
    }
}

impl Drop for PairLockGuard {
    fn drop(&mut self) {
        self.table.release(&self.pairs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pairs(locations: &[&str]) -> BTreeSet<StockPair> {
        locations
            .iter()
            .map(|location| StockPair::new("BOLT", *location))
            .collect()
    }

    #[test]
    fn test_overlapping_acquire_times_out() {
        let table = Arc::new(PairLockTable::new());
        let _held = table.acquire(&pairs(&["A", "B"]), Duration::from_millis(10)).unwrap();

        let err = table
            .acquire(&pairs(&["B", "C"]), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { pairs: 2 }));
        assert!(!table.is_held(&StockPair::new("BOLT", "C")).unwrap());
    }

    #[test]
    fn test_disjoint_sets_do_not_block() {
        let table = Arc::new(PairLockTable::new());
        let _a = table.acquire(&pairs(&["A"]), Duration::from_millis(10)).unwrap();
        let b = table.acquire(&pairs(&["B"]), Duration::from_millis(10));
        assert!(b.is_ok());
    }

    #[test]
    fn test_drop_releases_for_waiter() {
        let table = Arc::new(PairLockTable::new());
        let guard = table.acquire(&pairs(&["A"]), Duration::from_millis(10)).unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table
                    .acquire(&pairs(&["A"]), Duration::from_secs(5))
                    .map(|g| g.pairs().len())
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_extend_keeps_existing_pairs() {
        let table = Arc::new(PairLockTable::new());
        let mut guard = table.acquire(&pairs(&["A"]), Duration::from_millis(10)).unwrap();
        guard.extend(&pairs(&["A", "B"]), Duration::from_millis(10)).unwrap();

        assert!(guard.covers(&pairs(&["A", "B"])));
        drop(guard);
        assert!(!table.is_held(&StockPair::new("BOLT", "A")).unwrap());
        assert!(!table.is_held(&StockPair::new("BOLT", "B")).unwrap());
    }
}
