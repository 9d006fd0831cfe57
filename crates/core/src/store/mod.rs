//! Stock ledger persistence.
//!
//! The [`LedgerStore`] trait is the seam between the synchronous posting
//! service and whatever holds the rows. [`InMemoryStockLedger`] implements it
//! for tests and embedded use; the database crate mirrors the same queries
//! over Postgres.

pub mod error;
pub mod lock;
pub mod memory;

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::NaiveDate;
use costflow_shared::types::MovementId;
use costflow_shared::CancellationPolicy;

use crate::gl::{ExpectedLedgerEntry, PersistedLedgerEntry};
use crate::stock::{
    Movement, MovementDraft, PostingTime, RunningState, StockPair, VoucherLineRef, VoucherRef,
};
use crate::voucher::Voucher;

pub use error::StoreError;
pub use lock::{PairLockGuard, PairLockTable};
pub use memory::InMemoryStockLedger;

/// Document status as far as the stock ledger is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoucherStatus {
    /// Posted; its movements are live.
    Submitted,
    /// Reversed; its movements are cancelled.
    Cancelled,
}

impl VoucherStatus {
    /// Returns the stable storage name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A stored document with its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVoucher {
    /// The document.
    pub document: Voucher,
    /// Its status.
    pub status: VoucherStatus,
}

/// Movements touched by a cancellation, kept for rollback.
#[derive(Debug, Clone, Default)]
pub struct CancelledMovements {
    /// Snapshots taken before the status flip.
    pub originals: Vec<Movement>,
    /// Compensating rows appended under [`CancellationPolicy::CompensatingEntry`].
    pub mirrors: Vec<Movement>,
}

/// Storage operations the posting service needs.
///
/// All reads used by a repost must happen while the caller holds pair locks
/// covering the pairs read.
pub trait LedgerStore: Send + Sync {
    /// Locks the given pairs exclusively.
    fn lock_pairs(
        &self,
        pairs: &BTreeSet<StockPair>,
        timeout: Duration,
    ) -> Result<PairLockGuard, StoreError>;

    /// Appends provisional movements, assigning ids and creation order.
    fn append(&self, drafts: Vec<MovementDraft>) -> Result<Vec<Movement>, StoreError>;

    /// Marks a voucher's live movements cancelled, appending mirrors if the policy asks.
    fn cancel_movements(
        &self,
        voucher: &VoucherRef,
        policy: CancellationPolicy,
    ) -> Result<CancelledMovements, StoreError>;

    /// Removes movements outright. Only used to roll back an append.
    fn discard(&self, ids: &[MovementId]) -> Result<(), StoreError>;

    /// Writes movement snapshots back. Only used to roll back a cancellation.
    fn restore(&self, originals: &[Movement]) -> Result<(), StoreError>;

    /// Returns live movements of the pairs at or after `from`, in posting order.
    fn window(
        &self,
        from: &PostingTime,
        pairs: &BTreeSet<StockPair>,
    ) -> Result<Vec<Movement>, StoreError>;

    /// Returns the running state left by the last live movement before `before`.
    fn state_before(
        &self,
        pair: &StockPair,
        before: &PostingTime,
    ) -> Result<RunningState, StoreError>;

    /// Returns the running state after the pair's last live movement.
    fn current_state(&self, pair: &StockPair) -> Result<RunningState, StoreError>;

    /// Returns every movement created for the given lines.
    fn movements_for_lines(
        &self,
        lines: &BTreeSet<VoucherLineRef>,
    ) -> Result<Vec<Movement>, StoreError>;

    /// Returns live movements at or after `from` that depend on any of the lines.
    fn dependents_of(
        &self,
        lines: &BTreeSet<VoucherLineRef>,
        from: &PostingTime,
    ) -> Result<Vec<Movement>, StoreError>;

    /// Returns every movement of a voucher, cancelled ones included.
    fn movements_for_voucher(&self, voucher: &VoucherRef) -> Result<Vec<Movement>, StoreError>;

    /// Overwrites the computed fields of existing movements.
    fn apply_updates(&self, updates: &[Movement]) -> Result<(), StoreError>;

    /// Stores a document with its status.
    fn save_voucher(&self, voucher: &Voucher, status: VoucherStatus) -> Result<(), StoreError>;

    /// Removes a document. Only used to roll back a submit.
    fn remove_voucher(&self, voucher: &VoucherRef) -> Result<(), StoreError>;

    /// Loads a document.
    fn voucher(&self, voucher: &VoucherRef) -> Result<Option<StoredVoucher>, StoreError>;

    /// Returns the ledger entries of a voucher.
    fn gl_entries(&self, voucher: &VoucherRef) -> Result<Vec<PersistedLedgerEntry>, StoreError>;

    /// Replaces the ledger entries of a voucher, returning the number inserted.
    fn replace_gl_entries(
        &self,
        voucher: &VoucherRef,
        posting_date: NaiveDate,
        entries: &[ExpectedLedgerEntry],
    ) -> Result<usize, StoreError>;

    /// Deletes the ledger entries of a voucher, returning the number deleted.
    fn delete_gl_entries(&self, voucher: &VoucherRef) -> Result<usize, StoreError>;
}
