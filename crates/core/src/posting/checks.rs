//! Rules shared by every posting pipeline, in memory or in Postgres.

use std::collections::{BTreeSet, HashMap};

use costflow_shared::types::MovementId;

use crate::repost::RepostOutcome;
use crate::stock::{Movement, MovementDraft, PostingTime, StockError, VoucherFailure, VoucherRef};
use crate::voucher::{LocationAccounts, Voucher, VoucherSource};

/// Rejects drafts that cannot become movements.
pub fn validate_drafts(drafts: &[MovementDraft]) -> Result<(), StockError> {
    for draft in drafts {
        let reason = if draft.quantity_delta.is_zero() {
            "quantity is zero"
        } else if draft.pair.item.is_empty() {
            "item code is empty"
        } else if draft.pair.location.is_empty() {
            "location code is empty"
        } else {
            continue;
        };
        return Err(StockError::InvalidMovement {
            line: draft.line.clone(),
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Start of the earliest posting instant.
pub fn earliest(postings: impl IntoIterator<Item = PostingTime>) -> Option<PostingTime> {
    postings.into_iter().map(PostingTime::instant).min()
}

/// Checks that a freshly appended document was valued and can post its ledger.
///
/// `appended` holds the document's movements as appended; their recomputed
/// versions are taken from the outcome.
pub fn accept_document(
    document: &Voucher,
    appended: &[Movement],
    outcome: &RepostOutcome,
    accounts: &LocationAccounts,
) -> Result<(), StockError> {
    let voucher = document.voucher_ref();
    if let Some(failure) = outcome.failures.iter().find(|f| f.voucher == voucher) {
        return Err(StockError::VoucherRejected(Box::new(failure.clone())));
    }

    let updated: HashMap<MovementId, &Movement> =
        outcome.updates.iter().map(|m| (m.id, m)).collect();
    let movements: Vec<Movement> = appended
        .iter()
        .map(|m| updated.get(&m.id).map_or_else(|| m.clone(), |&u| u.clone()))
        .collect();
    document
        .expected_ledger_entries(&movements, accounts)
        .map(|_| ())
        .map_err(|err| StockError::VoucherRejected(Box::new(VoucherFailure::new(voucher, err))))
}

/// Vouchers whose ledger must be revisited after a committed change.
///
/// `involved` are the vouchers the action itself touched (origin, cancelled,
/// submitted); they are revisited unless their own valuation failed.
pub fn reconcile_targets<I>(
    outcome: &RepostOutcome,
    only_if_value_changed: bool,
    involved: I,
) -> BTreeSet<VoucherRef>
where
    I: IntoIterator<Item = VoucherRef>,
{
    let mut targets = outcome.vouchers_to_reconcile(only_if_value_changed);
    for voucher in involved {
        if !outcome.failed(&voucher) {
            targets.insert(voucher);
        }
    }
    targets
}
