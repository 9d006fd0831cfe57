//! Changes to the stock ledger.
//!
//! A [`Change`] describes what a document action writes and which part of
//! the ledger it recomputes. Building one and checking it against the stored
//! document statuses is pure; the in-memory service and the Postgres
//! repository only differ in how they carry it out.

use std::collections::BTreeSet;

use super::checks;
use super::options::ServiceOptions;
use crate::repost::{scope, RepostOutcome, RepostReason, RepostTrigger};
use crate::stock::{
    Movement, MovementDraft, PostingTime, StockError, StockPair, VoucherLineRef, VoucherRef,
};
use crate::store::{StoredVoucher, VoucherStatus};
use crate::voucher::{Voucher, VoucherSource};

/// A document to post together with the movements it emitted.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The document.
    pub document: Voucher,
    /// Movements it emits, not yet stored.
    pub drafts: Vec<MovementDraft>,
}

/// One change to the stock ledger.
#[derive(Debug, Clone)]
pub struct Change {
    /// Start of the recomputed window.
    pub from: PostingTime,
    /// Pairs the window starts from.
    pub pairs: BTreeSet<StockPair>,
    /// Why the ledger is recomputed.
    pub reason: RepostReason,
    /// Voucher that triggered the change, if any.
    pub origin: Option<VoucherRef>,
    /// Document being withdrawn.
    pub cancel: Option<StoredVoucher>,
    /// Document being posted.
    pub submit: Option<Submission>,
    /// Lines whose movements the change cancels.
    ///
    /// Live movements anywhere that depend on these lines join the window.
    pub released: BTreeSet<VoucherLineRef>,
}

impl Change {
    /// Posts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvalidMovement`] if a line cannot become a movement.
    pub fn submit(voucher: Voucher) -> Result<Self, StockError> {
        let drafts = voucher.stock_movements();
        checks::validate_drafts(&drafts)?;

        let from = checks::earliest(drafts.iter().map(MovementDraft::posting))
            .unwrap_or_else(|| voucher.header().posting());
        let pairs = drafts.iter().map(|d| d.pair.clone()).collect();

        Ok(Self {
            from,
            pairs,
            reason: RepostReason::Submit,
            origin: Some(voucher.voucher_ref()),
            cancel: None,
            submit: Some(Submission {
                document: voucher,
                drafts,
            }),
            released: BTreeSet::new(),
        })
    }

    /// Withdraws a submitted document whose live movements are `live`.
    #[must_use]
    pub fn cancel(stored: StoredVoucher, live: &[Movement]) -> Self {
        let from = checks::earliest(live.iter().map(|m| m.posting))
            .unwrap_or_else(|| stored.document.header().posting());

        Self {
            from,
            pairs: live.iter().map(|m| m.pair.clone()).collect(),
            reason: RepostReason::Cancel,
            origin: Some(stored.document.voucher_ref()),
            cancel: Some(stored),
            submit: None,
            released: scope::lines_of(live),
        }
    }

    /// Replaces a submitted document with a new version.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvalidMovement`] if a replacement line cannot
    /// become a movement.
    pub fn amend(
        stored: StoredVoucher,
        live: &[Movement],
        replacement: Voucher,
    ) -> Result<Self, StockError> {
        let drafts = replacement.stock_movements();
        checks::validate_drafts(&drafts)?;

        let from = checks::earliest(
            live.iter()
                .map(|m| m.posting)
                .chain(drafts.iter().map(MovementDraft::posting))
                .chain([
                    stored.document.header().posting(),
                    replacement.header().posting(),
                ]),
        )
        .unwrap_or_else(|| replacement.header().posting());
        let pairs = live
            .iter()
            .map(|m| m.pair.clone())
            .chain(drafts.iter().map(|d| d.pair.clone()))
            .collect();

        Ok(Self {
            from,
            pairs,
            reason: RepostReason::Amend,
            origin: Some(replacement.voucher_ref()),
            cancel: Some(stored),
            submit: Some(Submission {
                document: replacement,
                drafts,
            }),
            released: scope::lines_of(live),
        })
    }

    /// Recomputes from a trigger.
    ///
    /// A trigger without pairs takes the pairs of `origin_live`, the live
    /// movements of its originating voucher.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::EmptyTrigger`] if no pairs can be determined.
    pub fn repost(trigger: RepostTrigger, origin_live: &[Movement]) -> Result<Self, StockError> {
        let mut pairs = trigger.pairs;
        if pairs.is_empty() && trigger.origin.is_some() {
            pairs = origin_live.iter().map(|m| m.pair.clone()).collect();
        }
        if pairs.is_empty() {
            return Err(StockError::EmptyTrigger);
        }

        Ok(Self {
            from: trigger.from.instant(),
            pairs,
            reason: trigger.reason,
            origin: trigger.origin,
            cancel: None,
            submit: None,
            released: BTreeSet::new(),
        })
    }

    /// The document being withdrawn.
    #[must_use]
    pub fn cancelled_ref(&self) -> Option<VoucherRef> {
        self.cancel.as_ref().map(|s| s.document.voucher_ref())
    }

    /// The document being posted.
    #[must_use]
    pub fn submitted_ref(&self) -> Option<VoucherRef> {
        self.submit.as_ref().map(|s| s.document.voucher_ref())
    }

    /// Checks the change against the current statuses of its documents.
    ///
    /// `cancelled` and `submitted` are the stored statuses of
    /// [`Self::cancelled_ref`] and [`Self::submitted_ref`], read under the
    /// pair locks.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::NotSubmitted`] if the withdrawn document is no
    /// longer submitted, or [`StockError::AlreadySubmitted`] if the posted
    /// document already is and does not replace itself.
    pub fn check_status(
        &self,
        cancelled: Option<VoucherStatus>,
        submitted: Option<VoucherStatus>,
    ) -> Result<(), StockError> {
        let cancelled_ref = self.cancelled_ref();
        if let Some(voucher) = &cancelled_ref
            && cancelled != Some(VoucherStatus::Submitted)
        {
            return Err(StockError::NotSubmitted(voucher.clone()));
        }
        if let Some(voucher) = self.submitted_ref() {
            let replaces_itself = cancelled_ref.as_ref() == Some(&voucher);
            if !replaces_itself && submitted == Some(VoucherStatus::Submitted) {
                return Err(StockError::AlreadySubmitted(voucher));
            }
        }
        Ok(())
    }

    /// Lines whose live dependents pull their pairs into the window.
    #[must_use]
    pub fn scope_lines(&self, window: &[Movement]) -> BTreeSet<VoucherLineRef> {
        let mut lines = scope::lines_of(window);
        lines.extend(self.released.iter().cloned());
        lines
    }

    /// Vouchers whose ledger must be revisited once the change is applied.
    ///
    /// Manual reposts revisit every touched voucher.
    #[must_use]
    pub fn reconcile_targets(
        &self,
        outcome: &RepostOutcome,
        options: &ServiceOptions,
    ) -> BTreeSet<VoucherRef> {
        let only_changed = options.only_if_value_changed && self.reason != RepostReason::Manual;
        let involved = self
            .origin
            .iter()
            .cloned()
            .chain(self.cancelled_ref())
            .chain(self.submitted_ref());
        checks::reconcile_targets(outcome, only_changed, involved)
    }
}

/// Returns the stored document if it is submitted.
///
/// # Errors
///
/// Returns [`StockError::NotSubmitted`] otherwise.
pub fn require_submitted(
    voucher: &VoucherRef,
    stored: Option<StoredVoucher>,
) -> Result<StoredVoucher, StockError> {
    match stored {
        Some(stored) if stored.status == VoucherStatus::Submitted => Ok(stored),
        _ => Err(StockError::NotSubmitted(voucher.clone())),
    }
}
