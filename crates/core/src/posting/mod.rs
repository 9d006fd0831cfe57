//! Document actions against the stock ledger.
//!
//! [`StockLedgerService`] ties the pieces together: voucher sources emit
//! movements, the repost engine values them, and the reconciler keeps the
//! general ledger in line. Each action runs synchronously under pair locks.

pub mod change;
pub mod checks;
pub mod options;
pub mod service;

#[cfg(test)]
mod service_props;

pub use change::{Change, Submission};
pub use options::{PostingReport, ServiceOptions};
pub use service::StockLedgerService;
