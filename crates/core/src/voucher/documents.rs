//! Stock document kinds.
//!
//! Each document knows which movements it posts and which accounts take the
//! other side of its stock value. None of them compute values: that happens
//! in the valuation engine, and the documents read the results back.

use costflow_shared::types::AccountCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accounts::LocationAccounts;
use super::lines::{ProducedLine, ReturnLine, StockLine, SuppliedMaterial, TransferLine};
use super::source::{stock_postings, CounterAccount, VoucherHeader, VoucherSource};
use crate::gl::ExpectedLedgerEntry;
use crate::stock::{
    Dependency, Movement, MovementDraft, QuantitySign, StockPair, VoucherError, VoucherKind,
    VoucherRef,
};

fn stock_draft(
    header: &VoucherHeader,
    voucher: &VoucherRef,
    line: &StockLine,
    quantity: Decimal,
) -> MovementDraft {
    MovementDraft::new(
        line.pair(),
        voucher.line(&line.line_id),
        header.posting_date,
        header.posting_time,
        quantity,
    )
    .with_batch(line.batch_id.clone())
    .zero_valued(line.allow_zero_valuation)
}

fn find_line<'a, I>(lines: I, movement: &Movement) -> Option<&'a StockLine>
where
    I: IntoIterator<Item = &'a StockLine>,
{
    lines
        .into_iter()
        .find(|line| line.line_id == movement.line.line_id)
}

fn counter_for(
    header: &VoucherHeader,
    line: Option<&StockLine>,
    default: &AccountCode,
) -> CounterAccount {
    CounterAccount {
        account: line
            .and_then(|l| l.expense_account.clone())
            .unwrap_or_else(|| default.clone()),
        cost_center: line
            .and_then(|l| l.cost_center.clone())
            .or_else(|| header.cost_center.clone()),
    }
}

// ========== Opening Stock ==========

/// Opening balances, valued at the given rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningStock {
    /// Header.
    pub header: VoucherHeader,
    /// Equity account taking the other side.
    pub opening_account: AccountCode,
    /// Lines.
    pub lines: Vec<StockLine>,
}

impl VoucherSource for OpeningStock {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::OpeningStock, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        self.lines
            .iter()
            .map(|line| stock_draft(&self.header, &voucher, line, line.quantity).with_rate(line.rate))
            .collect()
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        stock_postings(&self.header, movements, accounts, |m| {
            counter_for(&self.header, find_line(&self.lines, m), &self.opening_account)
        })
    }
}

// ========== Stock Receipt ==========

/// Goods received from a supplier at the invoiced rate.
///
/// A subcontracted line consumes supplied materials: its value is the value
/// of those materials plus the line rate as service charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceipt {
    /// Header.
    pub header: VoucherHeader,
    /// Accrual account taking the other side.
    pub received_not_billed: AccountCode,
    /// Received lines.
    pub lines: Vec<StockLine>,
    /// Materials consumed at the subcontractor.
    #[serde(default)]
    pub supplied: Vec<SuppliedMaterial>,
}

impl VoucherSource for StockReceipt {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::StockReceipt, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        let mut drafts: Vec<MovementDraft> = self
            .supplied
            .iter()
            .map(|material| {
                MovementDraft::new(
                    StockPair::new(material.item.clone(), material.location.clone()),
                    voucher.line(&material.line_id),
                    self.header.posting_date,
                    self.header.posting_time,
                    -material.quantity,
                )
            })
            .collect();

        for line in &self.lines {
            let mut draft = stock_draft(&self.header, &voucher, line, line.quantity);
            let materials: Vec<&SuppliedMaterial> = self
                .supplied
                .iter()
                .filter(|material| material.for_line == line.line_id)
                .collect();
            if materials.is_empty() {
                draft = draft.with_rate(line.rate);
            } else {
                for material in materials {
                    draft = draft.with_dependency(
                        Dependency::amount(voucher.line(&material.line_id))
                            .with_sign_filter(QuantitySign::Negative),
                    );
                }
                let service = line.rate.unwrap_or_default() * line.quantity;
                draft = draft.with_additional_cost(service);
            }
            drafts.push(draft);
        }
        drafts
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        stock_postings(&self.header, movements, accounts, |m| {
            counter_for(&self.header, find_line(&self.lines, m), &self.received_not_billed)
        })
    }
}

// ========== Stock Issue ==========

/// Goods consumed at moving-average cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIssue {
    /// Header.
    pub header: VoucherHeader,
    /// Expense account taking the other side.
    pub expense_account: AccountCode,
    /// Issued lines.
    pub lines: Vec<StockLine>,
}

impl VoucherSource for StockIssue {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::StockIssue, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        self.lines
            .iter()
            .map(|line| stock_draft(&self.header, &voucher, line, -line.quantity))
            .collect()
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        stock_postings(&self.header, movements, accounts, |m| {
            counter_for(&self.header, find_line(&self.lines, m), &self.expense_account)
        })
    }
}

// ========== Stock Transfer ==========

/// Goods moved between locations at the source's moving average.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    /// Header.
    pub header: VoucherHeader,
    /// Clearing account both sides post against.
    pub transfer_account: AccountCode,
    /// Transfer lines.
    pub lines: Vec<TransferLine>,
}

impl VoucherSource for StockTransfer {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::StockTransfer, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        let mut drafts = Vec::with_capacity(self.lines.len() * 2);
        for line in &self.lines {
            let line_ref = voucher.line(&line.line_id);
            drafts.push(
                MovementDraft::new(
                    StockPair::new(line.item.clone(), line.from.clone()),
                    line_ref.clone(),
                    self.header.posting_date,
                    self.header.posting_time,
                    -line.quantity,
                )
                .with_batch(line.batch_id.clone()),
            );
            drafts.push(
                MovementDraft::new(
                    StockPair::new(line.item.clone(), line.to.clone()),
                    line_ref.clone(),
                    self.header.posting_date,
                    self.header.posting_time,
                    line.quantity,
                )
                .with_batch(line.batch_id.clone())
                .with_dependency(
                    Dependency::rate(line_ref).with_sign_filter(QuantitySign::Negative),
                ),
            );
        }
        drafts
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        stock_postings(&self.header, movements, accounts, |_| CounterAccount {
            account: self.transfer_account.clone(),
            cost_center: self.header.cost_center.clone(),
        })
    }
}

// ========== Repack ==========

/// Materials consumed to produce other items.
///
/// Produced lines without a rate take a share of the consumed value plus the
/// same share of the additional costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repack {
    /// Header.
    pub header: VoucherHeader,
    /// Clearing account for consumed and produced value.
    pub adjustment_account: AccountCode,
    /// Account credited with additional costs.
    pub additional_cost_account: AccountCode,
    /// Overhead added to produced value.
    #[serde(default)]
    pub additional_costs: Decimal,
    /// Consumed lines.
    pub consumed: Vec<StockLine>,
    /// Produced lines.
    pub produced: Vec<ProducedLine>,
}

impl Repack {
    /// Cost share in percent of each produced line, `None` for lines with a fixed rate.
    #[must_use]
    pub fn cost_shares(&self) -> Vec<Option<Decimal>> {
        let unrated = self.produced.iter().filter(|p| p.line.rate.is_none());
        let (explicit, unset) = unrated.fold((Decimal::ZERO, 0u32), |(sum, count), p| {
            match p.cost_percentage {
                Some(percentage) => (sum + percentage, count),
                None => (sum, count + 1),
            }
        });
        let equal = if unset == 0 {
            Decimal::ZERO
        } else {
            (Decimal::ONE_HUNDRED - explicit) / Decimal::from(unset)
        };
        self.produced
            .iter()
            .map(|p| {
                p.line
                    .rate
                    .is_none()
                    .then(|| p.cost_percentage.unwrap_or(equal))
            })
            .collect()
    }
}

impl VoucherSource for Repack {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::Repack, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        let mut drafts: Vec<MovementDraft> = self
            .consumed
            .iter()
            .map(|line| stock_draft(&self.header, &voucher, line, -line.quantity))
            .collect();

        for (produced, share) in self.produced.iter().zip(self.cost_shares()) {
            let mut draft = stock_draft(&self.header, &voucher, &produced.line, produced.line.quantity);
            match share {
                None => draft = draft.with_rate(produced.line.rate),
                Some(percentage) => {
                    for consumed in &self.consumed {
                        draft = draft.with_dependency(
                            Dependency::amount(voucher.line(&consumed.line_id))
                                .with_percentage(percentage)
                                .with_sign_filter(QuantitySign::Negative),
                        );
                    }
                    draft = draft.with_additional_cost(
                        self.additional_costs * percentage / Decimal::ONE_HUNDRED,
                    );
                }
            }
            drafts.push(draft);
        }
        drafts
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        let lines = || {
            self.consumed
                .iter()
                .chain(self.produced.iter().map(|p| &p.line))
        };
        let mut entries = stock_postings(&self.header, movements, accounts, |m| {
            counter_for(&self.header, find_line(lines(), m), &self.adjustment_account)
        })?;

        let included: Decimal = movements
            .iter()
            .filter(|m| !m.is_cancelled() && m.is_incoming() && !m.allow_zero_valuation)
            .map(|m| m.additional_cost)
            .sum();
        if !included.is_zero() {
            entries.push(
                ExpectedLedgerEntry::debit(self.adjustment_account.clone(), included)
                    .with_cost_center(self.header.cost_center.clone()),
            );
            entries.push(
                ExpectedLedgerEntry::credit(self.additional_cost_account.clone(), included)
                    .with_cost_center(self.header.cost_center.clone()),
            );
        }
        Ok(entries)
    }
}

// ========== Purchase Return ==========

/// Received goods sent back at the rate they came in at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReturn {
    /// Header.
    pub header: VoucherHeader,
    /// Receipt being returned against.
    pub return_against: String,
    /// Accrual account taking the other side.
    pub received_not_billed: AccountCode,
    /// Returned lines.
    pub lines: Vec<ReturnLine>,
}

impl VoucherSource for PurchaseReturn {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::PurchaseReturn, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        let receipt = VoucherRef::new(VoucherKind::StockReceipt, &self.return_against);
        self.lines
            .iter()
            .map(|returned| {
                let draft = stock_draft(&self.header, &voucher, &returned.line, -returned.line.quantity);
                match &returned.against_line {
                    Some(original) => draft.with_dependency(
                        Dependency::rate(receipt.line(original))
                            .with_sign_filter(QuantitySign::Positive),
                    ),
                    None => draft.with_rate(returned.line.rate),
                }
            })
            .collect()
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        stock_postings(&self.header, movements, accounts, |m| {
            counter_for(
                &self.header,
                find_line(self.lines.iter().map(|r| &r.line), m),
                &self.received_not_billed,
            )
        })
    }
}

// ========== Sales Return ==========

/// Issued goods coming back, at the rate they left at when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturn {
    /// Header.
    pub header: VoucherHeader,
    /// Issue being returned against.
    #[serde(default)]
    pub return_against: Option<String>,
    /// Cost of goods sold account taking the other side.
    pub cost_of_goods_account: AccountCode,
    /// Returned lines.
    pub lines: Vec<ReturnLine>,
}

impl VoucherSource for SalesReturn {
    fn voucher_ref(&self) -> VoucherRef {
        VoucherRef::new(VoucherKind::SalesReturn, &self.header.id)
    }

    fn header(&self) -> &VoucherHeader {
        &self.header
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        let voucher = self.voucher_ref();
        let issue = self
            .return_against
            .as_ref()
            .map(|id| VoucherRef::new(VoucherKind::StockIssue, id));
        self.lines
            .iter()
            .map(|returned| {
                let draft = stock_draft(&self.header, &voucher, &returned.line, returned.line.quantity);
                match (&issue, &returned.against_line) {
                    (Some(issue), Some(original)) => draft.with_dependency(
                        Dependency::rate(issue.line(original))
                            .with_sign_filter(QuantitySign::Negative),
                    ),
                    _ => draft.with_rate(returned.line.rate),
                }
            })
            .collect()
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        stock_postings(&self.header, movements, accounts, |m| {
            counter_for(
                &self.header,
                find_line(self.lines.iter().map(|r| &r.line), m),
                &self.cost_of_goods_account,
            )
        })
    }
}

// ========== Voucher ==========

/// Any stock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Voucher {
    /// Opening balances.
    OpeningStock(OpeningStock),
    /// Supplier receipt.
    StockReceipt(StockReceipt),
    /// Consumption.
    StockIssue(StockIssue),
    /// Location transfer.
    StockTransfer(StockTransfer),
    /// Repack or manufacture.
    Repack(Repack),
    /// Return to supplier.
    PurchaseReturn(PurchaseReturn),
    /// Return from customer.
    SalesReturn(SalesReturn),
}

impl Voucher {
    /// Returns the document as its source interface.
    #[must_use]
    pub fn as_source(&self) -> &dyn VoucherSource {
        match self {
            Self::OpeningStock(v) => v,
            Self::StockReceipt(v) => v,
            Self::StockIssue(v) => v,
            Self::StockTransfer(v) => v,
            Self::Repack(v) => v,
            Self::PurchaseReturn(v) => v,
            Self::SalesReturn(v) => v,
        }
    }

    /// Returns the document kind.
    #[must_use]
    pub const fn kind(&self) -> VoucherKind {
        match self {
            Self::OpeningStock(_) => VoucherKind::OpeningStock,
            Self::StockReceipt(_) => VoucherKind::StockReceipt,
            Self::StockIssue(_) => VoucherKind::StockIssue,
            Self::StockTransfer(_) => VoucherKind::StockTransfer,
            Self::Repack(_) => VoucherKind::Repack,
            Self::PurchaseReturn(_) => VoucherKind::PurchaseReturn,
            Self::SalesReturn(_) => VoucherKind::SalesReturn,
        }
    }
}

impl VoucherSource for Voucher {
    fn voucher_ref(&self) -> VoucherRef {
        self.as_source().voucher_ref()
    }

    fn header(&self) -> &VoucherHeader {
        self.as_source().header()
    }

    fn stock_movements(&self) -> Vec<MovementDraft> {
        self.as_source().stock_movements()
    }

    fn expected_ledger_entries(
        &self,
        movements: &[Movement],
        accounts: &LocationAccounts,
    ) -> Result<Vec<ExpectedLedgerEntry>, VoucherError> {
        self.as_source().expected_ledger_entries(movements, accounts)
    }
}

macro_rules! voucher_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Voucher {
                fn from(document: $variant) -> Self {
                    Self::$variant(document)
                }
            }
        )*
    };
}

voucher_from!(
    OpeningStock,
    StockReceipt,
    StockIssue,
    StockTransfer,
    Repack,
    PurchaseReturn,
    SalesReturn,
);
