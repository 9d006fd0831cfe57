//! Posting service: submit, cancel, amend, and repost against a ledger store.
//!
//! Every document action runs the same pipeline under one set of pair locks:
//! write the document's movements, recompute everything after its earliest
//! posting time, commit the changed movements, then reconcile the general
//! ledger of every voucher whose valuation moved. Engine errors undo the
//! movement writes; reconciliation errors are reported per voucher.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use costflow_shared::types::{MovementId, RepostId};
use costflow_shared::AppConfig;
use tracing::{debug, error, info, warn};

use super::change::{require_submitted, Change};
use super::checks;
use super::options::{PostingReport, ServiceOptions};
use crate::gl::{ReconcileAction, ReconcilePlan, ReconcileReport, Reconciler};
use crate::repost::{scope, RepostEngine, RepostOutcome, RepostTrigger, RepostWindow};
use crate::stock::{
    Movement, RunningState, StockError, StockPair, ValuationSettings, VoucherError,
    VoucherFailure, VoucherRef,
};
use crate::store::{CancelledMovements, LedgerStore, PairLockGuard, StoreError, VoucherStatus};
use crate::voucher::{LocationAccounts, Voucher, VoucherSource};

/// Writes made so far, undone if the change is rejected.
#[derive(Default)]
struct Pending {
    appended: Vec<Movement>,
    cancelled: CancelledMovements,
    previous: Vec<Movement>,
    cancel_saved: bool,
    submit_saved: bool,
}

/// Stock ledger posting service.
///
/// Stateless apart from its configuration; all data lives in the store.
#[derive(Debug)]
pub struct StockLedgerService<S> {
    store: Arc<S>,
    settings: ValuationSettings,
    options: ServiceOptions,
    accounts: LocationAccounts,
}

impl<S: LedgerStore> StockLedgerService<S> {
    /// Creates a service over a store.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        settings: ValuationSettings,
        options: ServiceOptions,
        accounts: LocationAccounts,
    ) -> Self {
        Self {
            store,
            settings,
            options,
            accounts,
        }
    }

    /// Creates a service configured from application config.
    #[must_use]
    pub fn from_config(store: Arc<S>, config: &AppConfig, accounts: LocationAccounts) -> Self {
        Self::new(
            store,
            ValuationSettings::from(&config.valuation),
            ServiceOptions::from(&config.repost),
            accounts,
        )
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the valuation policy.
    #[must_use]
    pub const fn settings(&self) -> &ValuationSettings {
        &self.settings
    }

    /// Returns the repost options.
    #[must_use]
    pub const fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Posts a new document.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if the document is already submitted,
    /// if a movement cannot be valued, or if any repost it triggers fails.
    pub fn submit(&self, voucher: Voucher) -> Result<PostingReport, StockError> {
        self.execute(Change::submit(voucher)?)
    }

    /// Reverses a submitted document.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if the document is not submitted or if
    /// removing its movements makes a later movement invalid.
    pub fn cancel(&self, voucher: &VoucherRef) -> Result<PostingReport, StockError> {
        let stored = require_submitted(voucher, self.store.voucher(voucher)?)?;
        let live = self.live_movements(voucher)?;
        self.execute(Change::cancel(stored, &live))
    }

    /// Replaces a submitted document with a new version in one repost.
    ///
    /// The replacement may keep the original's identity or take a new one.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if the original is not submitted or if
    /// the replacement cannot be posted.
    pub fn amend(
        &self,
        voucher: &VoucherRef,
        replacement: Voucher,
    ) -> Result<PostingReport, StockError> {
        let stored = require_submitted(voucher, self.store.voucher(voucher)?)?;
        let live = self.live_movements(voucher)?;
        self.execute(Change::amend(stored, &live, replacement)?)
    }

    /// Recomputes every movement of the trigger's pairs from its posting time.
    ///
    /// A trigger without pairs takes the pairs of its originating voucher.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::EmptyTrigger`] if no pairs can be determined, or
    /// any engine error, in which case nothing is written.
    pub fn repost(&self, trigger: RepostTrigger) -> Result<PostingReport, StockError> {
        let origin_live = match &trigger.origin {
            Some(origin) if trigger.pairs.is_empty() => self.live_movements(origin)?,
            _ => Vec::new(),
        };
        self.execute(Change::repost(trigger, &origin_live)?)
    }

    /// Brings the ledger entries of each voucher in line with its movements.
    ///
    /// A voucher that fails is reported and skipped; the others proceed.
    pub fn reconcile<'v, I>(&self, vouchers: I) -> ReconcileReport
    where
        I: IntoIterator<Item = &'v VoucherRef>,
    {
        let reconciler = Reconciler::new(self.options.comparison_precision);
        let mut report = ReconcileReport::default();
        for voucher in vouchers {
            match self.reconcile_one(&reconciler, voucher) {
                Ok(action) => {
                    debug!(voucher = %voucher, ?action, "Reconciled voucher");
                    report.record(voucher.clone(), action);
                }
                Err(err) => {
                    warn!(
                        voucher = %voucher,
                        code = err.error_code(),
                        error = %err,
                        "Voucher reconciliation failed"
                    );
                    report.fail(VoucherFailure::new(voucher.clone(), err));
                }
            }
        }
        report
    }

    /// Returns the running state after a pair's last live movement.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ledger cannot be read.
    pub fn balance(&self, pair: &StockPair) -> Result<RunningState, StockError> {
        Ok(self.store.current_state(pair)?)
    }

    fn execute(&self, change: Change) -> Result<PostingReport, StockError> {
        let repost_id = RepostId::new();
        info!(
            %repost_id,
            reason = %change.reason,
            from = %change.from,
            pairs = change.pairs.len(),
            "Repost started"
        );

        let mut guard = self
            .store
            .lock_pairs(&change.pairs, self.options.lock_timeout)?;
        let mut pending = Pending::default();
        let outcome = match self.apply_change(&change, &mut guard, &mut pending) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    %repost_id,
                    code = err.error_code(),
                    error = %err,
                    "Repost aborted"
                );
                self.roll_back(&change, &pending);
                return Err(err);
            }
        };

        let reconciliation = self.reconcile(&change.reconcile_targets(&outcome, &self.options));
        drop(guard);

        info!(
            %repost_id,
            recomputed = outcome.recomputed,
            updated = outcome.updates.len(),
            reconciled = reconciliation.actions.len(),
            failures = outcome.failures.len() + reconciliation.failures.len(),
            "Repost finished"
        );
        Ok(PostingReport {
            repost_id,
            repost: outcome,
            reconciliation,
        })
    }

    fn apply_change(
        &self,
        change: &Change,
        guard: &mut PairLockGuard,
        pending: &mut Pending,
    ) -> Result<RepostOutcome, StockError> {
        // 1. Document status is checked again now that the pairs are locked
        let status = |voucher: Option<VoucherRef>| -> Result<Option<VoucherStatus>, StoreError> {
            match voucher {
                Some(voucher) => Ok(self.store.voucher(&voucher)?.map(|s| s.status)),
                None => Ok(None),
            }
        };
        change.check_status(
            status(change.cancelled_ref())?,
            status(change.submitted_ref())?,
        )?;

        // 2. Cancel the replaced document's movements
        if let Some(stored) = &change.cancel {
            pending.cancelled = self
                .store
                .cancel_movements(&stored.document.voucher_ref(), self.options.cancellation_policy)?;
        }

        // 3. Append the new document's movements
        if let Some(submission) = &change.submit {
            pending.appended = self.store.append(submission.drafts.clone())?;
        }

        // 4. Recompute the window
        let window = self.collect_window(change, guard)?;
        let snapshot: HashMap<MovementId, Movement> =
            window.movements.iter().map(|m| (m.id, m.clone())).collect();
        let outcome = RepostEngine::new(&self.settings)
            .warn_above(self.options.large_window_warning)
            .run(window)?;

        // 5. The triggering document must itself be postable
        if let Some(submission) = &change.submit {
            checks::accept_document(
                &submission.document,
                &pending.appended,
                &outcome,
                &self.accounts,
            )?;
        }

        // 6. Commit
        pending.previous = outcome
            .updates
            .iter()
            .filter_map(|m| snapshot.get(&m.id).cloned())
            .collect();
        self.store.apply_updates(&outcome.updates)?;
        if let Some(stored) = &change.cancel {
            self.store
                .save_voucher(&stored.document, VoucherStatus::Cancelled)?;
            pending.cancel_saved = true;
        }
        if let Some(submission) = &change.submit {
            self.store
                .save_voucher(&submission.document, VoucherStatus::Submitted)?;
            pending.submit_saved = true;
        }

        Ok(outcome)
    }

    /// Loads live movements at or after the change's start for its pairs,
    /// widening the pair set until no outside movement depends on the window
    /// or on a line the change cancels.
    fn collect_window(
        &self,
        change: &Change,
        guard: &mut PairLockGuard,
    ) -> Result<RepostWindow, StockError> {
        let timeout = self.options.lock_timeout;
        let from = change.from;
        let mut pairs = change.pairs.clone();
        let movements = loop {
            guard.extend(&pairs, timeout)?;
            let movements = self.store.window(&from, &pairs)?;
            let dependents = self
                .store
                .dependents_of(&change.scope_lines(&movements), &from)?;
            let extra = scope::new_pairs(&pairs, &dependents);
            if extra.is_empty() {
                break movements;
            }
            debug!(added = extra.len(), "Repost scope widened by dependents");
            pairs.extend(extra);
        };

        // Targets before the window are read-only but still locked.
        let targets = scope::dependency_targets(&movements);
        let context_pairs: BTreeSet<StockPair> = self
            .store
            .movements_for_lines(&targets)?
            .into_iter()
            .map(|m| m.pair)
            .collect();
        guard.extend(&context_pairs, timeout)?;
        let context = self.store.movements_for_lines(&targets)?;

        let seeds = pairs
            .iter()
            .map(|pair| Ok((pair.clone(), self.store.state_before(pair, &from)?)))
            .collect::<Result<BTreeMap<_, _>, StoreError>>()?;

        Ok(RepostWindow::new(from, movements, seeds, context))
    }

    fn roll_back(&self, change: &Change, pending: &Pending) {
        let undo = || -> Result<(), StoreError> {
            if pending.submit_saved
                && let Some(submission) = &change.submit
            {
                self.store
                    .remove_voucher(&submission.document.voucher_ref())?;
            }
            if pending.cancel_saved
                && let Some(stored) = &change.cancel
            {
                self.store
                    .save_voucher(&stored.document, VoucherStatus::Submitted)?;
            }
            self.store.restore(&pending.previous)?;
            self.store.restore(&pending.cancelled.originals)?;
            let added: Vec<MovementId> = pending
                .appended
                .iter()
                .chain(&pending.cancelled.mirrors)
                .map(|m| m.id)
                .collect();
            self.store.discard(&added)
        };
        if let Err(err) = undo() {
            error!(error = %err, "Rollback failed, stock ledger needs a manual repost");
        }
    }

    fn reconcile_one(
        &self,
        reconciler: &Reconciler,
        voucher: &VoucherRef,
    ) -> Result<ReconcileAction, VoucherError> {
        let stored = self
            .store
            .voucher(voucher)?
            .ok_or(VoucherError::DocumentMissing)?;
        let expected = match stored.status {
            VoucherStatus::Cancelled => Vec::new(),
            VoucherStatus::Submitted => {
                let movements = self.store.movements_for_voucher(voucher)?;
                stored
                    .document
                    .expected_ledger_entries(&movements, &self.accounts)?
            }
        };
        let persisted = self.store.gl_entries(voucher)?;
        let posting_date = stored.document.header().posting_date;

        let action = match reconciler.plan(&expected, &persisted) {
            ReconcilePlan::Unchanged => ReconcileAction::Unchanged,
            ReconcilePlan::Insert(entries) => ReconcileAction::Inserted {
                inserted: self
                    .store
                    .replace_gl_entries(voucher, posting_date, &entries)?,
            },
            ReconcilePlan::Rewrite(entries) => ReconcileAction::Rewritten {
                deleted: persisted.len(),
                inserted: self
                    .store
                    .replace_gl_entries(voucher, posting_date, &entries)?,
            },
            ReconcilePlan::Delete => ReconcileAction::Deleted {
                deleted: self.store.delete_gl_entries(voucher)?,
            },
        };
        Ok(action)
    }

    fn live_movements(&self, voucher: &VoucherRef) -> Result<Vec<Movement>, StockError> {
        Ok(self
            .store
            .movements_for_voucher(voucher)?
            .into_iter()
            .filter(|m| !m.is_cancelled())
            .collect())
    }
}
