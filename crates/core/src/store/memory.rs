//! In-memory ledger store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::NaiveDate;
use costflow_shared::types::MovementId;
use costflow_shared::CancellationPolicy;
use tracing::debug;

use super::error::StoreError;
use super::lock::{PairLockGuard, PairLockTable};
use super::{CancelledMovements, LedgerStore, StoredVoucher, VoucherStatus};
use crate::gl::{ExpectedLedgerEntry, PersistedLedgerEntry};
use crate::stock::{
    Movement, MovementDraft, MovementStatus, PostingTime, RunningState, StockPair,
    VoucherLineRef, VoucherRef,
};
use crate::voucher::{Voucher, VoucherSource};

#[derive(Debug, Default)]
struct Tables {
    last_sequence: u64,
    movements: HashMap<MovementId, Movement>,
    by_pair: BTreeMap<StockPair, BTreeMap<PostingTime, MovementId>>,
    by_line: HashMap<VoucherLineRef, Vec<MovementId>>,
    dependents: HashMap<VoucherLineRef, BTreeSet<MovementId>>,
    vouchers: BTreeMap<VoucherRef, StoredVoucher>,
    gl: BTreeMap<VoucherRef, Vec<PersistedLedgerEntry>>,
}

impl Tables {
    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    fn insert(&mut self, movement: Movement) {
        self.by_pair
            .entry(movement.pair.clone())
            .or_default()
            .insert(movement.posting, movement.id);
        self.by_line
            .entry(movement.line.clone())
            .or_default()
            .push(movement.id);
        for dependency in &movement.dependencies {
            self.dependents
                .entry(dependency.target.clone())
                .or_default()
                .insert(movement.id);
        }
        self.movements.insert(movement.id, movement);
    }

    fn remove(&mut self, id: MovementId) -> Option<Movement> {
        let movement = self.movements.remove(&id)?;
        if let Some(timeline) = self.by_pair.get_mut(&movement.pair) {
            timeline.remove(&movement.posting);
        }
        if let Some(ids) = self.by_line.get_mut(&movement.line) {
            ids.retain(|other| *other != id);
        }
        for dependency in &movement.dependencies {
            if let Some(ids) = self.dependents.get_mut(&dependency.target) {
                ids.remove(&id);
            }
        }
        Some(movement)
    }

    fn live<'a, I>(&'a self, ids: I) -> impl Iterator<Item = &'a Movement>
    where
        I: IntoIterator<Item = &'a MovementId>,
    {
        ids.into_iter()
            .filter_map(|id| self.movements.get(id))
            .filter(|m| !m.is_cancelled())
    }

    fn last_live_before(&self, pair: &StockPair, before: Option<&PostingTime>) -> RunningState {
        let Some(timeline) = self.by_pair.get(pair) else {
            return RunningState::default();
        };
        let ids: Box<dyn DoubleEndedIterator<Item = &MovementId>> = match before {
            Some(before) => Box::new(timeline.range(..*before).map(|(_, id)| id)),
            None => Box::new(timeline.values()),
        };
        self.live(ids.rev())
            .next()
            .map(RunningState::after)
            .unwrap_or_default()
    }
}

/// Ledger store keeping every table in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    locks: Arc<PairLockTable>,
    tables: RwLock<Tables>,
}

impl InMemoryStockLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live movements of a pair in posting order.
    pub fn history(&self, pair: &StockPair) -> Result<Vec<Movement>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .by_pair
            .get(pair)
            .map(|timeline| tables.live(timeline.values()).cloned().collect())
            .unwrap_or_default())
    }

    /// Returns the number of stored movements, cancelled ones included.
    pub fn movement_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.movements.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl LedgerStore for InMemoryStockLedger {
    fn lock_pairs(
        &self,
        pairs: &BTreeSet<StockPair>,
        timeout: Duration,
    ) -> Result<PairLockGuard, StoreError> {
        self.locks.acquire(pairs, timeout)
    }

    fn append(&self, drafts: Vec<MovementDraft>) -> Result<Vec<Movement>, StoreError> {
        let mut tables = self.write()?;
        let mut appended = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let sequence = tables.next_sequence();
            let movement = Movement::from_draft(draft, MovementId::new(), sequence);
            tables.insert(movement.clone());
            appended.push(movement);
        }
        debug!(count = appended.len(), "Appended movements");
        Ok(appended)
    }

    fn cancel_movements(
        &self,
        voucher: &VoucherRef,
        policy: CancellationPolicy,
    ) -> Result<CancelledMovements, StoreError> {
        let mut tables = self.write()?;
        let mut originals: Vec<Movement> = tables
            .movements
            .values()
            .filter(|m| m.voucher() == voucher && !m.is_cancelled())
            .cloned()
            .collect();
        originals.sort_by(|a, b| a.posting.cmp(&b.posting));

        let mut mirrors = Vec::new();
        for original in &originals {
            if let Some(stored) = tables.movements.get_mut(&original.id) {
                stored.status = MovementStatus::Cancelled;
            }
            if policy == CancellationPolicy::CompensatingEntry {
                let sequence = tables.next_sequence();
                let mirror = original.mirror(MovementId::new(), sequence);
                tables.insert(mirror.clone());
                mirrors.push(mirror);
            }
        }
        Ok(CancelledMovements { originals, mirrors })
    }

    fn discard(&self, ids: &[MovementId]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        for id in ids {
            tables.remove(*id);
        }
        Ok(())
    }

    fn restore(&self, originals: &[Movement]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        for original in originals {
            let stored = tables
                .movements
                .get_mut(&original.id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "movement",
                    id: original.id.to_string(),
                })?;
            *stored = original.clone();
        }
        Ok(())
    }

    fn window(
        &self,
        from: &PostingTime,
        pairs: &BTreeSet<StockPair>,
    ) -> Result<Vec<Movement>, StoreError> {
        let tables = self.read()?;
        let mut movements: Vec<Movement> = pairs
            .iter()
            .filter_map(|pair| tables.by_pair.get(pair))
            .flat_map(|timeline| tables.live(timeline.range(*from..).map(|(_, id)| id)))
            .cloned()
            .collect();
        movements.sort_by(|a, b| a.posting.cmp(&b.posting));
        Ok(movements)
    }

    fn state_before(
        &self,
        pair: &StockPair,
        before: &PostingTime,
    ) -> Result<RunningState, StoreError> {
        Ok(self.read()?.last_live_before(pair, Some(before)))
    }

    fn current_state(&self, pair: &StockPair) -> Result<RunningState, StoreError> {
        Ok(self.read()?.last_live_before(pair, None))
    }

    fn movements_for_lines(
        &self,
        lines: &BTreeSet<VoucherLineRef>,
    ) -> Result<Vec<Movement>, StoreError> {
        let tables = self.read()?;
        Ok(lines
            .iter()
            .filter_map(|line| tables.by_line.get(line))
            .flatten()
            .filter_map(|id| tables.movements.get(id))
            .cloned()
            .collect())
    }

    fn dependents_of(
        &self,
        lines: &BTreeSet<VoucherLineRef>,
        from: &PostingTime,
    ) -> Result<Vec<Movement>, StoreError> {
        let tables = self.read()?;
        let ids: BTreeSet<&MovementId> = lines
            .iter()
            .filter_map(|line| tables.dependents.get(line))
            .flatten()
            .collect();
        Ok(tables
            .live(ids)
            .filter(|m| m.posting >= *from)
            .cloned()
            .collect())
    }

    fn movements_for_voucher(&self, voucher: &VoucherRef) -> Result<Vec<Movement>, StoreError> {
        let tables = self.read()?;
        let mut movements: Vec<Movement> = tables
            .movements
            .values()
            .filter(|m| m.voucher() == voucher)
            .cloned()
            .collect();
        movements.sort_by(|a, b| a.posting.cmp(&b.posting));
        Ok(movements)
    }

    fn apply_updates(&self, updates: &[Movement]) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        for update in updates {
            let stored = tables
                .movements
                .get_mut(&update.id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "movement",
                    id: update.id.to_string(),
                })?;
            *stored = update.clone();
        }
        Ok(())
    }

    fn save_voucher(&self, voucher: &Voucher, status: VoucherStatus) -> Result<(), StoreError> {
        self.write()?.vouchers.insert(
            voucher.voucher_ref(),
            StoredVoucher {
                document: voucher.clone(),
                status,
            },
        );
        Ok(())
    }

    fn remove_voucher(&self, voucher: &VoucherRef) -> Result<(), StoreError> {
        self.write()?.vouchers.remove(voucher);
        Ok(())
    }

    fn voucher(&self, voucher: &VoucherRef) -> Result<Option<StoredVoucher>, StoreError> {
        Ok(self.read()?.vouchers.get(voucher).cloned())
    }

    fn gl_entries(&self, voucher: &VoucherRef) -> Result<Vec<PersistedLedgerEntry>, StoreError> {
        Ok(self.read()?.gl.get(voucher).cloned().unwrap_or_default())
    }

    fn replace_gl_entries(
        &self,
        voucher: &VoucherRef,
        posting_date: NaiveDate,
        entries: &[ExpectedLedgerEntry],
    ) -> Result<usize, StoreError> {
        let rows: Vec<PersistedLedgerEntry> = entries
            .iter()
            .map(|entry| PersistedLedgerEntry::from_expected(voucher, posting_date, entry))
            .collect();
        let inserted = rows.len();
        self.write()?.gl.insert(voucher.clone(), rows);
        Ok(inserted)
    }

    fn delete_gl_entries(&self, voucher: &VoucherRef) -> Result<usize, StoreError> {
        Ok(self
            .write()?
            .gl
            .remove(voucher)
            .map_or(0, |rows| rows.len()))
    }
}
