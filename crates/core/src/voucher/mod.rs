//! Stock documents and their ledger derivation.

pub mod accounts;
pub mod documents;
pub mod lines;
pub mod source;

pub use accounts::LocationAccounts;
pub use documents::{
    OpeningStock, PurchaseReturn, Repack, SalesReturn, StockIssue, StockReceipt, StockTransfer,
    Voucher,
};
pub use lines::{ProducedLine, ReturnLine, StockLine, SuppliedMaterial, TransferLine};
pub use source::{stock_postings, CounterAccount, VoucherHeader, VoucherSource};
