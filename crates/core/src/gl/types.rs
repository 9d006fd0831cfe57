//! General ledger entry types.

use chrono::NaiveDate;
use costflow_shared::types::{AccountCode, GlEntryId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::stock::VoucherRef;

/// Aggregation key of ledger entries: `(account, cost_center, party_type, party)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlKey {
    /// Ledger account.
    pub account: AccountCode,
    /// Optional cost center.
    pub cost_center: Option<String>,
    /// Optional party type (e.g. `Supplier`).
    pub party_type: Option<String>,
    /// Optional party.
    pub party: Option<String>,
}

impl std::fmt::Display for GlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.account)?;
        if let Some(cost_center) = &self.cost_center {
            write!(f, " [{cost_center}]")?;
        }
        if let (Some(party_type), Some(party)) = (&self.party_type, &self.party) {
            write!(f, " {party_type}:{party}")?;
        }
        Ok(())
    }
}

/// Common view over expected and persisted entries.
pub trait LedgerLine {
    /// Returns the aggregation key.
    fn key(&self) -> GlKey;
    /// Returns `debit - credit`.
    fn net(&self) -> Decimal;
}

/// A ledger entry a voucher should have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedLedgerEntry {
    /// Ledger account.
    pub account: AccountCode,
    /// Optional cost center.
    pub cost_center: Option<String>,
    /// Optional party type.
    pub party_type: Option<String>,
    /// Optional party.
    pub party: Option<String>,
    /// Debit amount.
    pub debit: Decimal,
    /// Credit amount.
    pub credit: Decimal,
    /// Free-text remarks.
    pub remarks: Option<String>,
}

impl ExpectedLedgerEntry {
    /// Creates a signed entry: positive amounts debit, negative amounts credit.
    #[must_use]
    pub fn signed(account: AccountCode, amount: Decimal) -> Self {
        let (debit, credit) = if amount < Decimal::ZERO {
            (Decimal::ZERO, -amount)
        } else {
            (amount, Decimal::ZERO)
        };
        Self {
            account,
            cost_center: None,
            party_type: None,
            party: None,
            debit,
            credit,
            remarks: None,
        }
    }

    /// Creates a debit entry.
    #[must_use]
    pub fn debit(account: AccountCode, amount: Decimal) -> Self {
        Self::signed(account, amount)
    }

    /// Creates a credit entry.
    #[must_use]
    pub fn credit(account: AccountCode, amount: Decimal) -> Self {
        Self::signed(account, -amount)
    }

    /// Sets the cost center.
    #[must_use]
    pub fn with_cost_center(mut self, cost_center: Option<String>) -> Self {
        self.cost_center = cost_center;
        self
    }

    /// Sets the party.
    #[must_use]
    pub fn with_party(mut self, party_type: impl Into<String>, party: Option<String>) -> Self {
        if party.is_some() {
            self.party_type = Some(party_type.into());
            self.party = party;
        }
        self
    }

    /// Sets remarks.
    #[must_use]
    pub fn with_remarks(mut self, remarks: Option<String>) -> Self {
        self.remarks = remarks;
        self
    }

    /// Creates an entry from a key and a signed net amount.
    #[must_use]
    pub fn from_net(key: GlKey, net: Decimal) -> Self {
        let mut entry = Self::signed(key.account, net);
        entry.cost_center = key.cost_center;
        entry.party_type = key.party_type;
        entry.party = key.party;
        entry
    }
}

impl LedgerLine for ExpectedLedgerEntry {
    fn key(&self) -> GlKey {
        GlKey {
            account: self.account.clone(),
            cost_center: self.cost_center.clone(),
            party_type: self.party_type.clone(),
            party: self.party.clone(),
        }
    }

    fn net(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// A ledger entry stored for a voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedLedgerEntry {
    /// Unique identifier.
    pub id: GlEntryId,
    /// Owning voucher.
    pub voucher: VoucherRef,
    /// Posting date of the voucher.
    pub posting_date: NaiveDate,
    /// Ledger account.
    pub account: AccountCode,
    /// Optional cost center.
    pub cost_center: Option<String>,
    /// Optional party type.
    pub party_type: Option<String>,
    /// Optional party.
    pub party: Option<String>,
    /// Debit amount.
    pub debit: Decimal,
    /// Credit amount.
    pub credit: Decimal,
    /// Free-text remarks.
    pub remarks: Option<String>,
}

impl PersistedLedgerEntry {
    /// Stores an expected entry for a voucher.
    #[must_use]
    pub fn from_expected(
        voucher: &VoucherRef,
        posting_date: NaiveDate,
        entry: &ExpectedLedgerEntry,
    ) -> Self {
        Self {
            id: GlEntryId::new(),
            voucher: voucher.clone(),
            posting_date,
            account: entry.account.clone(),
            cost_center: entry.cost_center.clone(),
            party_type: entry.party_type.clone(),
            party: entry.party.clone(),
            debit: entry.debit,
            credit: entry.credit,
            remarks: entry.remarks.clone(),
        }
    }
}

impl LedgerLine for PersistedLedgerEntry {
    fn key(&self) -> GlKey {
        GlKey {
            account: self.account.clone(),
            cost_center: self.cost_center.clone(),
            party_type: self.party_type.clone(),
            party: self.party.clone(),
        }
    }

    fn net(&self) -> Decimal {
        self.debit - self.credit
    }
}
