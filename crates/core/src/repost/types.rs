//! Repost triggers, windows, and outcomes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveTime};
use costflow_shared::types::MovementId;

use crate::stock::{Movement, PostingTime, RunningState, StockPair, VoucherFailure, VoucherRef};

/// Why a repost was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepostReason {
    /// A voucher was submitted.
    Submit,
    /// A voucher was cancelled.
    Cancel,
    /// A voucher was replaced by an amended copy.
    Amend,
    /// An operator asked for a recompute.
    Manual,
}

impl RepostReason {
    /// Returns the stable name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Cancel => "cancel",
            Self::Amend => "amend",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RepostReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to recompute every movement at or after `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepostTrigger {
    /// Start of the window (sequence `0`, so the whole instant is included).
    pub from: PostingTime,
    /// Pairs to recompute. Expanded through dependencies before running.
    pub pairs: BTreeSet<StockPair>,
    /// Voucher whose action caused the repost.
    pub origin: Option<VoucherRef>,
    /// Why the repost runs.
    pub reason: RepostReason,
}

impl RepostTrigger {
    /// Creates a manual trigger from the given instant.
    #[must_use]
    pub fn after(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            from: PostingTime::new(date, time),
            pairs: BTreeSet::new(),
            origin: None,
            reason: RepostReason::Manual,
        }
    }

    /// Restricts the trigger to the given pairs.
    #[must_use]
    pub fn for_pairs(mut self, pairs: impl IntoIterator<Item = StockPair>) -> Self {
        self.pairs.extend(pairs);
        self
    }

    /// Records the voucher action that caused the repost.
    #[must_use]
    pub fn caused_by(mut self, origin: VoucherRef, reason: RepostReason) -> Self {
        self.origin = Some(origin);
        self.reason = reason;
        self
    }
}

/// Everything a repost reads, loaded under lock.
#[derive(Debug, Clone)]
pub struct RepostWindow {
    /// Start of the window.
    pub from: PostingTime,
    /// Non-cancelled movements of the scope at or after `from`, in posting order.
    pub movements: Vec<Movement>,
    /// Running state of each pair just before `from`.
    pub seeds: BTreeMap<StockPair, RunningState>,
    /// Dependency targets outside the window, read but never rewritten.
    pub context: Vec<Movement>,
}

impl RepostWindow {
    /// Creates a window, dropping cancelled movements and sorting the rest.
    #[must_use]
    pub fn new(
        from: PostingTime,
        movements: Vec<Movement>,
        seeds: BTreeMap<StockPair, RunningState>,
        context: Vec<Movement>,
    ) -> Self {
        let mut movements: Vec<Movement> =
            movements.into_iter().filter(|m| !m.is_cancelled()).collect();
        movements.sort_by(|a, b| a.posting.cmp(&b.posting));
        let in_window: BTreeSet<MovementId> = movements.iter().map(|m| m.id).collect();
        let context = context
            .into_iter()
            .filter(|m| !in_window.contains(&m.id))
            .collect();
        Self {
            from,
            movements,
            seeds,
            context,
        }
    }

    /// Returns the pairs the window rewrites.
    #[must_use]
    pub fn pairs(&self) -> BTreeSet<StockPair> {
        self.movements.iter().map(|m| m.pair.clone()).collect()
    }

    /// Returns the number of movements the window recomputes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.movements.len()
    }

    /// Returns true if nothing needs recomputing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }
}

/// Result of a repost run, ready to persist.
#[derive(Debug, Clone, Default)]
pub struct RepostOutcome {
    /// Movements whose computed fields changed.
    pub updates: Vec<Movement>,
    /// Final running state of every recomputed pair.
    pub final_states: BTreeMap<StockPair, RunningState>,
    /// Vouchers owning at least one recomputed movement.
    pub touched_vouchers: BTreeSet<VoucherRef>,
    /// Vouchers owning a movement whose `value_delta` changed.
    pub value_changed_vouchers: BTreeSet<VoucherRef>,
    /// Vouchers that could not be valued; excluded from reconciliation.
    pub failures: Vec<VoucherFailure>,
    /// Number of movements recomputed.
    pub recomputed: usize,
}

impl RepostOutcome {
    /// Folds another outcome into this one.
    pub fn merge(&mut self, other: Self) {
        self.updates.extend(other.updates);
        self.final_states.extend(other.final_states);
        self.touched_vouchers.extend(other.touched_vouchers);
        self.value_changed_vouchers
            .extend(other.value_changed_vouchers);
        self.failures.extend(other.failures);
        self.recomputed += other.recomputed;
    }

    /// Returns true if the voucher failed during this repost.
    #[must_use]
    pub fn failed(&self, voucher: &VoucherRef) -> bool {
        self.failures.iter().any(|f| &f.voucher == voucher)
    }

    /// Returns the vouchers that must be reconciled.
    ///
    /// With `only_if_value_changed` only vouchers whose values moved are
    /// returned; failed vouchers are always excluded.
    #[must_use]
    pub fn vouchers_to_reconcile(&self, only_if_value_changed: bool) -> BTreeSet<VoucherRef> {
        let candidates = if only_if_value_changed {
            &self.value_changed_vouchers
        } else {
            &self.touched_vouchers
        };
        candidates
            .iter()
            .filter(|v| !self.failed(v))
            .cloned()
            .collect()
    }
}
