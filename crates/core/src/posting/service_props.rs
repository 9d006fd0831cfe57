//! Property-based tests for the posting service.
//!
//! Feature: stock-valuation, Property 2: Posting Order Independence

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::{ServiceOptions, StockLedgerService};
use crate::stock::{StockPair, ValuationSettings, VoucherKind, VoucherRef};
use crate::store::InMemoryStockLedger;
use crate::voucher::{LocationAccounts, StockIssue, StockLine, StockReceipt, Voucher, VoucherHeader};

/// Strategy for a quantity between 0.01 and 100.00.
fn quantity() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

/// Strategy for a rate between 0.01 and 1,000.00.
fn rate() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn new_service() -> StockLedgerService<InMemoryStockLedger> {
    StockLedgerService::new(
        Arc::new(InMemoryStockLedger::new()),
        ValuationSettings::default(),
        ServiceOptions::default(),
        LocationAccounts::new().with("Main", "1410 Stock In Hand"),
    )
}

fn header(id: &str, day: u32) -> VoucherHeader {
    VoucherHeader::new(
        id,
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    )
}

fn receipt(index: usize, quantity: Decimal, rate: Decimal) -> Voucher {
    let day = u32::try_from(index).unwrap() + 1;
    StockReceipt {
        header: header(&format!("REC-{index}"), day),
        received_not_billed: "2110 Received Not Billed".into(),
        lines: vec![StockLine::new("1", "WIDGET", "Main", quantity).with_rate(rate)],
        supplied: Vec::new(),
    }
    .into()
}

fn issue(quantity: Decimal) -> Voucher {
    StockIssue {
        header: header("ISS-1", 20),
        expense_account: "5100 Consumables".into(),
        lines: vec![StockLine::new("1", "WIDGET", "Main", quantity)],
    }
    .into()
}

/// Computed fields of the pair's history in posting order.
fn snapshot(service: &StockLedgerService<InMemoryStockLedger>) -> Vec<(Decimal, Decimal, Decimal)> {
    service
        .store()
        .history(&StockPair::new("WIDGET", "Main"))
        .unwrap()
        .iter()
        .map(|m| (m.quantity_after, m.value_after, m.valuation_rate))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // =========================================================================
    // Property 2: Posting Order Independence
    // =========================================================================

    /// Property 2.1: Submission order does not change valuation.
    ///
    /// *For any* three dated receipts followed by an issue, submitting the
    /// receipts in any order yields the same running state sequence as
    /// submitting them in date order.
    #[test]
    fn prop_submission_order_does_not_matter(
        receipts in prop::collection::vec((quantity(), rate()), 3),
        order in Just(vec![0usize, 1, 2]).prop_shuffle(),
    ) {
        let total: Decimal = receipts.iter().map(|(q, _)| *q).sum();
        let issued = (total / Decimal::TWO).round_dp(2);

        let in_order = new_service();
        for (index, (q, r)) in receipts.iter().enumerate() {
            in_order.submit(receipt(index, *q, *r)).unwrap();
        }
        in_order.submit(issue(issued)).unwrap();

        let shuffled = new_service();
        for &index in &order {
            let (q, r) = receipts[index];
            shuffled.submit(receipt(index, q, r)).unwrap();
        }
        shuffled.submit(issue(issued)).unwrap();

        prop_assert_eq!(snapshot(&in_order), snapshot(&shuffled));
    }

    /// Property 2.2: Reconciliation after posting is a no-op.
    ///
    /// *For any* backdated posting sequence, reconciling every voucher again
    /// writes nothing.
    #[test]
    fn prop_reconcile_after_posting_writes_nothing(
        receipts in prop::collection::vec((quantity(), rate()), 3),
        order in Just(vec![0usize, 1, 2]).prop_shuffle(),
    ) {
        let service = new_service();
        for &index in &order {
            let (q, r) = receipts[index];
            service.submit(receipt(index, q, r)).unwrap();
        }

        let vouchers: Vec<VoucherRef> = (0..3)
            .map(|index| VoucherRef::new(VoucherKind::StockReceipt, format!("REC-{index}")))
            .collect();
        let report = service.reconcile(&vouchers);

        prop_assert!(report.failures.is_empty());
        prop_assert!(report.written().is_empty());
    }

    /// Property 2.3: Cancelling a backdated receipt restores the balance.
    ///
    /// *For any* receipts, submitting one more receipt dated before all of
    /// them and cancelling it leaves the pair's balance as it was.
    #[test]
    fn prop_cancel_restores_balance(
        receipts in prop::collection::vec((quantity(), rate()), 3),
        extra in (quantity(), rate()),
    ) {
        let service = new_service();
        for (index, (q, r)) in receipts.iter().enumerate() {
            service.submit(receipt(index + 1, *q, *r)).unwrap();
        }
        let pair = StockPair::new("WIDGET", "Main");
        let before = service.balance(&pair).unwrap();

        service.submit(receipt(0, extra.0, extra.1)).unwrap();
        service
            .cancel(&VoucherRef::new(VoucherKind::StockReceipt, "REC-0"))
            .unwrap();

        prop_assert_eq!(service.balance(&pair).unwrap(), before);
    }
}
