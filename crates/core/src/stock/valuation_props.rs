//! Property-based tests for moving-average valuation.
//!
//! Feature: stock-valuation, Property 1: Running State Chain

use chrono::{NaiveDate, NaiveTime};
use costflow_shared::types::MovementId;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::error::StockError;
use super::types::{Movement, MovementDraft, RunningState, StockPair, VoucherKind, VoucherRef};
use super::valuation::{CostBasis, ValuationEngine, ValuationSettings};

/// Strategy for a quantity between 0.01 and 100.00.
fn quantity() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

/// Strategy for a rate between 0.01 and 1,000.00.
fn rate() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for one movement: a receipt with a rate or an issue at average.
fn step() -> impl Strategy<Value = (bool, Decimal, Decimal)> {
    (any::<bool>(), quantity(), rate())
}

fn make_movement(seq: u64, receipt: bool, quantity: Decimal, rate: Decimal) -> Movement {
    let (kind, delta, given) = if receipt {
        (VoucherKind::StockReceipt, quantity, Some(rate))
    } else {
        (VoucherKind::StockIssue, -quantity, None)
    };
    let voucher = VoucherRef::new(kind, format!("V-{seq}"));
    let draft = MovementDraft::new(
        StockPair::new("WIDGET", "Main"),
        voucher.line("1"),
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        delta,
    )
    .with_rate(given);
    Movement::from_draft(draft, MovementId::new(), seq)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // =========================================================================
    // Property 1: Running State Chain
    // =========================================================================

    /// Property 1.1: Each movement continues the previous running state.
    ///
    /// *For any* sequence of receipts and issues, `quantity_after` equals the
    /// previous quantity plus `quantity_delta` and `value_after` equals the
    /// previous value plus `value_delta`.
    #[test]
    fn prop_running_state_chains(steps in prop::collection::vec(step(), 1..40)) {
        let settings = ValuationSettings {
            allow_negative_stock: true,
            fallback_rate: Some(Decimal::ONE),
            ..ValuationSettings::default()
        };
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState::default();

        for (seq, (receipt, qty, rate)) in (1u64..).zip(steps) {
            let before = state;
            let mut movement = make_movement(seq, receipt, qty, rate);
            let basis = CostBasis::direct(&movement);
            engine.apply(&mut state, &mut movement, basis).unwrap();

            prop_assert_eq!(movement.quantity_after, before.quantity + movement.quantity_delta);
            prop_assert_eq!(movement.value_after, before.value + movement.value_delta);
            prop_assert_eq!(state.quantity, movement.quantity_after);
            prop_assert_eq!(state.value, movement.value_after);
            prop_assert_eq!(movement.estimated, movement.quantity_after < Decimal::ZERO);
        }
    }

    /// Property 1.2: Empty stock carries no value.
    ///
    /// *For any* sequence, whenever quantity returns to exactly zero the
    /// running value is zero.
    #[test]
    fn prop_zero_quantity_has_zero_value(steps in prop::collection::vec(step(), 1..40)) {
        let settings = ValuationSettings {
            allow_negative_stock: true,
            ..ValuationSettings::default()
        };
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState::default();

        for (seq, (receipt, qty, rate)) in (1u64..).zip(steps) {
            let mut movement = make_movement(seq, receipt, qty, rate);
            let basis = CostBasis::direct(&movement);
            engine.apply(&mut state, &mut movement, basis).unwrap();
            if state.quantity.is_zero() {
                prop_assert!(state.value.is_zero());
            }
        }
    }

    /// Property 1.3: Negative stock is never reached when disallowed.
    ///
    /// *For any* sequence, with negative stock disallowed every accepted
    /// movement leaves a non-negative quantity, and a rejected movement
    /// leaves the running state untouched.
    #[test]
    fn prop_negative_stock_never_reached(steps in prop::collection::vec(step(), 1..40)) {
        let settings = ValuationSettings::default();
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState::default();

        for (seq, (receipt, qty, rate)) in (1u64..).zip(steps) {
            let before = state;
            let mut movement = make_movement(seq, receipt, qty, rate);
            let basis = CostBasis::direct(&movement);
            match engine.apply(&mut state, &mut movement, basis) {
                Ok(()) => prop_assert!(state.quantity >= Decimal::ZERO),
                Err(StockError::NegativeStock { .. }) => prop_assert_eq!(state, before),
                Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
            }
        }
    }

    /// Property 1.4: Issues leave at the moving average.
    ///
    /// *For any* issue from positive stock that does not empty the location,
    /// the outgoing rate equals the average before the issue.
    #[test]
    fn prop_issue_leaves_at_average(
        receipts in prop::collection::vec((quantity(), rate()), 1..10),
        issue in quantity(),
    ) {
        let settings = ValuationSettings::default();
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState::default();
        let mut seq = 0u64;

        for (qty, rate) in receipts {
            seq += 1;
            let mut movement = make_movement(seq, true, qty, rate);
            let basis = CostBasis::direct(&movement);
            engine.apply(&mut state, &mut movement, basis).unwrap();
        }
        prop_assume!(issue < state.quantity);

        let average = engine.moving_average(&state);
        let mut movement = make_movement(seq + 1, false, issue, Decimal::ZERO);
        engine.apply(&mut state, &mut movement, CostBasis::MovingAverage).unwrap();

        prop_assert_eq!(
            movement.value_delta,
            settings.precision.amount(-issue * average)
        );
    }
}
