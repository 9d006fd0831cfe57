//! Ledger reconciliation.
//!
//! Compares the entries a voucher should have against the entries it has,
//! by net amount per [`GlKey`] at a fixed comparison precision, and decides
//! whether to leave them, insert, rewrite, or delete.

use std::collections::{BTreeMap, BTreeSet};

use costflow_shared::types::precision::round;
use rust_decimal::Decimal;
use serde::Serialize;

use super::types::{ExpectedLedgerEntry, GlKey, LedgerLine, PersistedLedgerEntry};
use crate::stock::{VoucherFailure, VoucherRef};

/// What reconciliation decided for one voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    /// Persisted entries already match.
    Unchanged,
    /// No entries exist yet; insert these.
    Insert(Vec<ExpectedLedgerEntry>),
    /// Entries differ; delete all and insert these.
    Rewrite(Vec<ExpectedLedgerEntry>),
    /// The voucher should have no entries; delete all.
    Delete,
}

/// What reconciliation did for one voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Nothing written.
    Unchanged,
    /// Entries inserted.
    Inserted {
        /// Rows inserted.
        inserted: usize,
    },
    /// Entries replaced.
    Rewritten {
        /// Rows deleted.
        deleted: usize,
        /// Rows inserted.
        inserted: usize,
    },
    /// Entries removed.
    Deleted {
        /// Rows deleted.
        deleted: usize,
    },
}

impl ReconcileAction {
    /// Returns true if the ledger was written.
    #[must_use]
    pub const fn wrote(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Per-voucher results of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Action taken per voucher.
    pub actions: BTreeMap<VoucherRef, ReconcileAction>,
    /// Vouchers that could not be reconciled.
    pub failures: Vec<VoucherFailure>,
}

impl ReconcileReport {
    /// Records the action taken for a voucher.
    pub fn record(&mut self, voucher: VoucherRef, action: ReconcileAction) {
        self.actions.insert(voucher, action);
    }

    /// Records a failed voucher.
    pub fn fail(&mut self, failure: VoucherFailure) {
        self.failures.push(failure);
    }

    /// Returns the vouchers whose ledger was written.
    #[must_use]
    pub fn written(&self) -> BTreeSet<&VoucherRef> {
        self.actions
            .iter()
            .filter(|(_, action)| action.wrote())
            .map(|(voucher, _)| voucher)
            .collect()
    }

    /// Returns the action taken for a voucher.
    #[must_use]
    pub fn action(&self, voucher: &VoucherRef) -> Option<ReconcileAction> {
        self.actions.get(voucher).copied()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.actions.extend(other.actions);
        self.failures.extend(other.failures);
    }
}

/// Plans ledger rewrites from expected and persisted entries.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    precision: u32,
}

impl Reconciler {
    /// Creates a reconciler comparing nets at `precision` decimal places.
    #[must_use]
    pub const fn new(precision: u32) -> Self {
        Self { precision }
    }

    /// Sums `debit - credit` per key, rounded, dropping keys that net to zero.
    #[must_use]
    pub fn net_by_key<'a, T, I>(&self, entries: I) -> BTreeMap<GlKey, Decimal>
    where
        T: LedgerLine + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut nets: BTreeMap<GlKey, Decimal> = BTreeMap::new();
        for entry in entries {
            *nets.entry(entry.key()).or_default() += entry.net();
        }
        nets.into_iter()
            .map(|(key, net)| (key, round(net, self.precision)))
            .filter(|(_, net)| !net.is_zero())
            .collect()
    }

    /// Collapses expected entries to one row per key carrying the signed net.
    #[must_use]
    pub fn normalize(&self, expected: &[ExpectedLedgerEntry]) -> Vec<ExpectedLedgerEntry> {
        let mut nets: BTreeMap<GlKey, (Decimal, Option<String>)> = BTreeMap::new();
        for entry in expected {
            let slot = nets.entry(entry.key()).or_default();
            slot.0 += entry.net();
            if slot.1.is_none() {
                slot.1.clone_from(&entry.remarks);
            }
        }
        nets.into_iter()
            .filter(|(_, (net, _))| !net.is_zero())
            .map(|(key, (net, remarks))| ExpectedLedgerEntry::from_net(key, net).with_remarks(remarks))
            .collect()
    }

    /// Returns true if both sides have the same rounded net per key.
    #[must_use]
    pub fn matches(
        &self,
        expected: &[ExpectedLedgerEntry],
        persisted: &[PersistedLedgerEntry],
    ) -> bool {
        self.net_by_key(expected) == self.net_by_key(persisted)
    }

    /// Decides what to do with a voucher's ledger.
    #[must_use]
    pub fn plan(
        &self,
        expected: &[ExpectedLedgerEntry],
        persisted: &[PersistedLedgerEntry],
    ) -> ReconcilePlan {
        let normalized = self.normalize(expected);
        if normalized.is_empty() {
            return if persisted.is_empty() {
                ReconcilePlan::Unchanged
            } else {
                ReconcilePlan::Delete
            };
        }
        if persisted.is_empty() {
            return ReconcilePlan::Insert(normalized);
        }
        if self.matches(expected, persisted) {
            ReconcilePlan::Unchanged
        } else {
            ReconcilePlan::Rewrite(normalized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::VoucherKind;
    use chrono::NaiveDate;
    use costflow_shared::types::AccountCode;
    use rust_decimal_macros::dec;

    fn voucher() -> VoucherRef {
        VoucherRef::new(VoucherKind::StockReceipt, "REC-1")
    }

    fn persist(entries: &[ExpectedLedgerEntry]) -> Vec<PersistedLedgerEntry> {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        entries
            .iter()
            .map(|e| PersistedLedgerEntry::from_expected(&voucher(), date, e))
            .collect()
    }

    fn stock() -> AccountCode {
        AccountCode::new("1400 Stock In Hand")
    }

    fn srbnb() -> AccountCode {
        AccountCode::new("2100 Stock Received Not Billed")
    }

    #[test]
    fn test_first_reconciliation_inserts_normalized_rows() {
        let reconciler = Reconciler::new(2);
        let expected = vec![
            ExpectedLedgerEntry::debit(stock(), dec!(30)),
            ExpectedLedgerEntry::debit(stock(), dec!(20)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(50)),
        ];

        match reconciler.plan(&expected, &[]) {
            ReconcilePlan::Insert(rows) => {
                assert_eq!(rows.len(), 2);
                let stock_row = rows.iter().find(|r| r.account == stock()).unwrap();
                assert_eq!(stock_row.debit, dec!(50));
                assert_eq!(stock_row.credit, Decimal::ZERO);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_nets_are_unchanged_regardless_of_row_split() {
        let reconciler = Reconciler::new(2);
        let persisted = persist(&[
            ExpectedLedgerEntry::debit(stock(), dec!(50)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(50)),
        ]);
        let expected = vec![
            ExpectedLedgerEntry::debit(stock(), dec!(20.001)),
            ExpectedLedgerEntry::debit(stock(), dec!(29.999)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(50.004)),
        ];

        assert_eq!(reconciler.plan(&expected, &persisted), ReconcilePlan::Unchanged);
    }

    #[test]
    fn test_changed_net_rewrites() {
        let reconciler = Reconciler::new(2);
        let persisted = persist(&[
            ExpectedLedgerEntry::debit(stock(), dec!(50)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(50)),
        ]);
        let expected = vec![
            ExpectedLedgerEntry::debit(stock(), dec!(52)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(52)),
        ];

        assert!(matches!(
            reconciler.plan(&expected, &persisted),
            ReconcilePlan::Rewrite(rows) if rows.len() == 2
        ));
    }

    #[test]
    fn test_party_is_part_of_the_key() {
        let reconciler = Reconciler::new(2);
        let persisted = persist(&[
            ExpectedLedgerEntry::credit(srbnb(), dec!(10)).with_party("Supplier", Some("ACME".into())),
            ExpectedLedgerEntry::debit(stock(), dec!(10)),
        ]);
        let expected = vec![
            ExpectedLedgerEntry::credit(srbnb(), dec!(10)).with_party("Supplier", Some("Globex".into())),
            ExpectedLedgerEntry::debit(stock(), dec!(10)),
        ];

        assert!(matches!(
            reconciler.plan(&expected, &persisted),
            ReconcilePlan::Rewrite(_)
        ));
    }

    #[test]
    fn test_empty_expected_deletes_existing() {
        let reconciler = Reconciler::new(2);
        let persisted = persist(&[
            ExpectedLedgerEntry::debit(stock(), dec!(5)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(5)),
        ]);

        assert_eq!(reconciler.plan(&[], &persisted), ReconcilePlan::Delete);
        assert_eq!(reconciler.plan(&[], &[]), ReconcilePlan::Unchanged);
    }

    #[test]
    fn test_offsetting_expected_entries_count_as_empty() {
        let reconciler = Reconciler::new(2);
        let expected = vec![
            ExpectedLedgerEntry::debit(stock(), dec!(8)),
            ExpectedLedgerEntry::credit(stock(), dec!(8)),
        ];
        assert_eq!(reconciler.plan(&expected, &[]), ReconcilePlan::Unchanged);
    }

    #[test]
    fn test_replanning_after_insert_is_unchanged() {
        let reconciler = Reconciler::new(2);
        let expected = vec![
            ExpectedLedgerEntry::debit(stock(), dec!(12.3456)),
            ExpectedLedgerEntry::credit(srbnb(), dec!(12.3456)),
        ];
        let ReconcilePlan::Insert(rows) = reconciler.plan(&expected, &[]) else {
            panic!("expected insert");
        };
        let persisted = persist(&rows);

        assert_eq!(reconciler.plan(&expected, &persisted), ReconcilePlan::Unchanged);
    }

    #[test]
    fn test_report_tracks_written_vouchers() {
        let mut report = ReconcileReport::default();
        let other = VoucherRef::new(VoucherKind::StockIssue, "ISS-1");
        report.record(voucher(), ReconcileAction::Inserted { inserted: 2 });
        report.record(other.clone(), ReconcileAction::Unchanged);

        let written = report.written();
        assert_eq!(written.len(), 1);
        assert!(written.contains(&voucher()));
        assert_eq!(report.action(&other), Some(ReconcileAction::Unchanged));
    }
}
