//! The interface every stock document implements.

use chrono::{NaiveDate, NaiveTime};
use costflow_shared::types::AccountCode;
use serde::{Deserialize, Serialize};

use super::accounts::LocationAccounts;
use crate::gl::ExpectedLedgerEntry;
use crate::stock::{Movement, MovementDraft, PostingTime, VoucherError, VoucherRef};

const DEFAULT_REMARKS: &str = "Accounting entry for stock";

/// Common header fields of a stock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherHeader {
    /// Document number.
    pub id: String,
    /// Posting date.
    pub posting_date: NaiveDate,
    /// Posting time of day.
    pub posting_time: NaiveTime,
    /// Default cost center for ledger entries.
    #[serde(default)]
    pub cost_center: Option<String>,
    /// Free-text remarks copied to ledger entries.
    #[serde(default)]
    pub remarks: Option<String>,
}

impl VoucherHeader {
    /// Creates a header.
    #[must_use]
    pub fn new(id: impl Into<String>, posting_date: NaiveDate, posting_time: NaiveTime) -> Self {
        Self {
            id: id.into(),
            posting_date,
            posting_time,
            cost_center: None,
            remarks: None,
        }
    }

    /// Sets the default cost center.
    #[must_use]
    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    /// Sets remarks.
    #[must_use]
    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    /// Returns the start of the posting instant.
    #[must_use]
    pub const fn posting(&self) -> PostingTime {
        PostingTime::new(self.posting_date, self.posting_time)
    }
}

/// A stock document: emits movements, and derives the ledger entries it
/// should have from its finalized movements.
pub trait VoucherSource {
    /// Returns the document's identity.
    fn voucher_ref(&self) -> VoucherRef;

    /// Returns the document header.
    fn header(&self) -> &VoucherHeader;

    /// Returns the movements the document posts, in creation order.
    ///
    /// Movements a line depends on within the same document come first.
    fn stock_movements(&self) -> Vec<MovementDraft>;

    /// Derives expected ledger entries from the document's finalized movements.
    ///
    /// Fails before producing anything if a location has no stock account.
    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError>;
}

/// Counter side of a movement's stock posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterAccount {
    /// Account receiving the opposite side.
    pub account: AccountCode,
    /// Cost center for both sides.
    pub cost_center: Option<String>,
}

/// Builds the standard stock posting for each movement.
///
/// Every movement with a non-zero `value_delta` posts the delta to its
/// location's stock account and the opposite to its counter account.
pub fn stock_postings<F>(
    header: &VoucherHeader,
    movements: &[Movement],
    accounts: &LocationAccounts,
    mut counter: F,
) -> Result<Vec<ExpectedLedgerEntry>, VoucherError>
where
    F: FnMut(&Movement) -> CounterAccount,
{
    let live: Vec<&Movement> = movements.iter().filter(|m| !m.is_cancelled()).collect();
    accounts.ensure_configured(live.iter().map(|m| &m.pair.location))?;

    let remarks = Some(
        header
            .remarks
            .clone()
            .unwrap_or_else(|| DEFAULT_REMARKS.to_string()),
    );
    let mut entries = Vec::with_capacity(live.len() * 2);
    for movement in live {
        if movement.value_delta.is_zero() {
            continue;
        }
        let stock_account = accounts.stock_account(&movement.pair.location)?;
        let counter = counter(movement);
        entries.push(
            ExpectedLedgerEntry::signed(stock_account.clone(), movement.value_delta)
                .with_cost_center(counter.cost_center.clone())
                .with_remarks(remarks.clone()),
        );
        entries.push(
            ExpectedLedgerEntry::signed(counter.account, -movement.value_delta)
                .with_cost_center(counter.cost_center)
                .with_remarks(remarks.clone()),
        );
    }
    Ok(entries)
}
