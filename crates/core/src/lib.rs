//! Core stock valuation logic for Costflow.
//!
//! This crate contains the valuation, repost, and reconciliation engine with
//! ZERO web or database dependencies. Storage is reached through the
//! [`store::LedgerStore`] trait; an in-memory implementation ships here and
//! the Postgres one lives in `costflow-db`.
//!
//! # Modules
//!
//! - `stock` - Movements, moving-average valuation, dependency resolution
//! - `repost` - Backdated repost windows and the repost engine
//! - `gl` - Expected vs persisted ledger entries and reconciliation
//! - `voucher` - Stock documents and the movements and entries they produce
//! - `store` - Storage contract, pair locks, in-memory ledger
//! - `posting` - Submit, cancel, amend, and repost orchestration

pub mod gl;
pub mod posting;
pub mod repost;
pub mod stock;
pub mod store;
pub mod voucher;

pub use posting::{PostingReport, ServiceOptions, StockLedgerService};
pub use store::{InMemoryStockLedger, LedgerStore};
