//! General ledger reconciliation.
//!
//! Vouchers derive the entries they should have from their finalized
//! movements; the reconciler brings the persisted entries in line.

pub mod reconcile;
pub mod types;

pub use reconcile::{ReconcileAction, ReconcilePlan, ReconcileReport, Reconciler};
pub use types::{ExpectedLedgerEntry, GlKey, LedgerLine, PersistedLedgerEntry};
