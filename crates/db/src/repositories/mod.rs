//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for database operations,
//! hiding the `SeaORM` implementation details from the rest of the application.

pub mod location_account;
mod rows;
pub mod stock_ledger;

pub use location_account::LocationAccountRepository;
pub use stock_ledger::{StockLedgerError, StockLedgerRepository};
