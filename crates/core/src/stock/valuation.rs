//! Moving-average valuation of a single stock pair.
//!
//! The engine is a pure function of `(running state, movement, cost basis)`.
//! It never reads the store; callers feed it movements in posting order and
//! carry the running state between calls.

use costflow_shared::types::Precision;
use costflow_shared::ValuationConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dependency::{DependencyResolver, MovementLookup, ResolveError};
use super::error::StockError;
use super::types::{Movement, MovementStatus, RunningState};

/// Valuation policy threaded explicitly into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSettings {
    /// Outgoing movements may drive stock below zero.
    pub allow_negative_stock: bool,
    /// Incoming movements without a rate may be valued at zero.
    pub allow_zero_valuation: bool,
    /// Rate for outgoing stock when no positive rate has been seen.
    pub fallback_rate: Option<Decimal>,
    /// A dependency whose sign filter excludes every candidate contributes zero.
    pub filtered_dependency_as_zero: bool,
    /// Rounding applied to rates and amounts.
    pub precision: Precision,
}

impl Default for ValuationSettings {
    fn default() -> Self {
        Self {
            allow_negative_stock: false,
            allow_zero_valuation: false,
            fallback_rate: None,
            filtered_dependency_as_zero: false,
            precision: Precision::default(),
        }
    }
}

impl From<&ValuationConfig> for ValuationSettings {
    fn from(config: &ValuationConfig) -> Self {
        Self {
            allow_negative_stock: config.allow_negative_stock,
            allow_zero_valuation: config.allow_zero_valuation,
            fallback_rate: config.fallback_rate,
            filtered_dependency_as_zero: config.filtered_dependency_as_zero,
            precision: Precision::new(config.amount_precision, config.rate_precision),
        }
    }
}

/// How the value of a movement is determined before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostBasis {
    /// Value at this unit rate.
    Rate(Decimal),
    /// Value equal to this absolute amount; direction follows quantity.
    Amount(Decimal),
    /// Value at the pair's current moving average.
    MovingAverage,
    /// Keep this signed value delta as stored.
    ///
    /// Used for a movement whose dependency cannot be resolved. The delta is
    /// applied as is, so neither the empty-stock reset nor the restart after
    /// negative stock changes it.
    Kept(Decimal),
}

impl CostBasis {
    /// Basis of a movement without dependencies: its given rate, else the moving average.
    #[must_use]
    pub fn direct(movement: &Movement) -> Self {
        movement.given_rate.map_or(Self::MovingAverage, Self::Rate)
    }
}

/// Result of valuing a batch of movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProgress {
    /// Every movement was valued.
    Complete,
    /// Valuation stopped at this index because a dependency target is not yet available.
    Blocked {
        /// Index of the first unvalued movement.
        at: usize,
    },
}

/// Moving-average valuation engine.
#[derive(Debug, Clone, Copy)]
pub struct ValuationEngine<'a> {
    settings: &'a ValuationSettings,
}

impl<'a> ValuationEngine<'a> {
    /// Creates an engine bound to a valuation policy.
    #[must_use]
    pub const fn new(settings: &'a ValuationSettings) -> Self {
        Self { settings }
    }

    /// Returns the valuation policy.
    #[must_use]
    pub const fn settings(&self) -> &'a ValuationSettings {
        self.settings
    }

    /// Returns the rate outgoing stock leaves at.
    ///
    /// `value / quantity` while stock is positive, otherwise the last positive
    /// rate, then the configured fallback, then zero.
    #[must_use]
    pub fn moving_average(&self, state: &RunningState) -> Decimal {
        if state.quantity > Decimal::ZERO {
            return self.settings.precision.rate(state.value / state.quantity);
        }
        state
            .last_positive_rate
            .or(self.settings.fallback_rate)
            .unwrap_or(Decimal::ZERO)
    }

    /// Values one movement against the running state and advances the state.
    ///
    /// On error neither the state nor the movement is modified.
    pub fn apply(
        &self,
        state: &mut RunningState,
        movement: &mut Movement,
        basis: CostBasis,
    ) -> Result<(), StockError> {
        let precision = self.settings.precision;
        let quantity = movement.quantity_delta;
        let quantity_after = state.quantity + quantity;

        if quantity < Decimal::ZERO
            && quantity_after < Decimal::ZERO
            && !self.settings.allow_negative_stock
        {
            return Err(StockError::NegativeStock {
                pair: movement.pair.clone(),
                posting: movement.posting,
                line: movement.line.clone(),
                quantity_after,
            });
        }

        let zero_valued = movement.allow_zero_valuation;
        let rate = match basis {
            CostBasis::Rate(rate) => precision.rate(rate),
            CostBasis::Amount(_) | CostBasis::Kept(_) if quantity.is_zero() => Decimal::ZERO,
            CostBasis::Amount(amount) | CostBasis::Kept(amount) => {
                precision.rate(amount.abs() / quantity.abs())
            }
            CostBasis::MovingAverage => self.moving_average(state),
        };

        if quantity > Decimal::ZERO
            && rate.is_zero()
            && !zero_valued
            && !self.settings.allow_zero_valuation
            && !matches!(basis, CostBasis::Amount(_) | CostBasis::Kept(_))
        {
            return Err(StockError::MissingIncomingRate {
                pair: movement.pair.clone(),
                line: movement.line.clone(),
            });
        }

        let kept = matches!(basis, CostBasis::Kept(_));
        let raw_delta = if let CostBasis::Kept(delta) = basis {
            delta
        } else if zero_valued {
            Decimal::ZERO
        } else if let CostBasis::Amount(amount) = basis {
            let amount = precision.amount(amount.abs());
            if quantity < Decimal::ZERO { -amount } else { amount }
        } else {
            precision.amount(quantity * rate)
        };

        let (value_after, value_delta) = if kept {
            (state.value + raw_delta, raw_delta)
        } else if quantity_after.is_zero() {
            // Empty stock carries no value.
            (Decimal::ZERO, -state.value)
        } else if quantity > Decimal::ZERO
            && state.quantity < Decimal::ZERO
            && quantity_after > Decimal::ZERO
        {
            // Receipt clearing a negative balance restarts the average at its own rate.
            let unit = if zero_valued { Decimal::ZERO } else { rate };
            let value_after = precision.amount(quantity_after * unit);
            (value_after, value_after - state.value)
        } else {
            (state.value + raw_delta, raw_delta)
        };

        let valuation_rate = if quantity_after > Decimal::ZERO {
            precision.rate(value_after / quantity_after)
        } else {
            state
                .last_positive_rate
                .or(self.settings.fallback_rate)
                .unwrap_or(Decimal::ZERO)
        };
        let last_positive_rate = if quantity_after > Decimal::ZERO && valuation_rate > Decimal::ZERO {
            Some(valuation_rate)
        } else {
            state.last_positive_rate
        };

        movement.incoming_rate = if quantity > Decimal::ZERO && !zero_valued {
            rate
        } else {
            Decimal::ZERO
        };
        movement.outgoing_rate = if quantity < Decimal::ZERO {
            precision.rate(value_delta.abs() / quantity.abs())
        } else {
            Decimal::ZERO
        };
        movement.valuation_rate = valuation_rate;
        movement.quantity_after = quantity_after;
        movement.value_after = value_after;
        movement.value_delta = value_delta;
        movement.estimated = quantity_after < Decimal::ZERO;
        movement.status = MovementStatus::Finalized;

        *state = RunningState {
            quantity: quantity_after,
            value: value_after,
            valuation_rate,
            last_positive_rate,
        };

        if movement.estimated {
            warn!(
                pair = %movement.pair,
                line = %movement.line,
                quantity_after = %quantity_after,
                "Stock is negative, valuation is an estimate"
            );
        }
        debug!(
            pair = %movement.pair,
            posting = %movement.posting,
            value_delta = %value_delta,
            valuation_rate = %valuation_rate,
            "Valued movement"
        );

        Ok(())
    }

    /// Values a run of movements of one pair in posting order.
    ///
    /// Dependencies are resolved against `lookup` only. The batch stops at
    /// the first movement whose dependency target is not available yet so
    /// the caller can queue the remainder; everything before it is valued.
    pub fn value_batch<L: MovementLookup + ?Sized>(
        &self,
        state: &mut RunningState,
        batch: &mut [Movement],
        lookup: &L,
    ) -> Result<BatchProgress, StockError> {
        let resolver = DependencyResolver::new(self.settings);
        for (at, movement) in batch.iter_mut().enumerate() {
            if movement.is_cancelled() {
                continue;
            }
            let basis = match resolver.resolve(movement, lookup) {
                Ok(basis) => basis,
                Err(ResolveError::Fatal(err)) => return Err(err),
                Err(ResolveError::Unresolved { target, reason }) => {
                    debug!(line = %movement.line, target = %target, %reason, "Batch blocked on dependency");
                    return Ok(BatchProgress::Blocked { at });
                }
            };
            self.apply(state, movement, basis)?;
        }
        Ok(BatchProgress::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::dependency::MovementIndex;
    use crate::stock::types::{
        Dependency, MovementDraft, StockPair, VoucherKind, VoucherRef,
    };
    use chrono::{NaiveDate, NaiveTime};
    use costflow_shared::types::MovementId;
    use rust_decimal_macros::dec;

    fn movement(seq: u32, quantity: Decimal, rate: Option<Decimal>) -> Movement {
        let kind = if quantity > Decimal::ZERO {
            VoucherKind::StockReceipt
        } else {
            VoucherKind::StockIssue
        };
        let voucher = VoucherRef::new(kind, format!("V-{seq}"));
        let draft = MovementDraft::new(
            StockPair::new("BOLT", "Stores"),
            voucher.line("1"),
            NaiveDate::from_ymd_opt(2026, 2, seq).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            quantity,
        )
        .with_rate(rate);
        Movement::from_draft(draft, MovementId::new(), u64::from(seq))
    }

    fn run(settings: &ValuationSettings, movements: &mut [Movement]) -> Result<RunningState, StockError> {
        let engine = ValuationEngine::new(settings);
        let mut state = RunningState::default();
        for movement in movements.iter_mut() {
            let basis = CostBasis::direct(movement);
            engine.apply(&mut state, movement, basis)?;
        }
        Ok(state)
    }

    #[test]
    fn test_moving_average_after_two_receipts_and_issue() {
        let settings = ValuationSettings::default();
        let mut movements = vec![
            movement(1, dec!(10), Some(dec!(5))),
            movement(2, dec!(10), Some(dec!(7))),
            movement(3, dec!(-15), None),
        ];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(movements[1].valuation_rate, dec!(6));
        assert_eq!(movements[2].outgoing_rate, dec!(6));
        assert_eq!(movements[2].value_delta, dec!(-90));
        assert_eq!(state.quantity, dec!(5));
        assert_eq!(state.value, dec!(30));
        assert_eq!(state.valuation_rate, dec!(6));
        assert!(movements.iter().all(|m| m.status == MovementStatus::Finalized));
    }

    #[test]
    fn test_issue_to_exactly_zero_is_allowed() {
        let settings = ValuationSettings::default();
        let mut movements = vec![movement(1, dec!(10), Some(dec!(5))), movement(2, dec!(-10), None)];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(state.quantity, Decimal::ZERO);
        assert_eq!(state.value, Decimal::ZERO);
        assert_eq!(movements[1].value_delta, dec!(-50));
        assert!(!movements[1].estimated);
    }

    #[test]
    fn test_issue_below_zero_is_rejected_without_negative_stock() {
        let settings = ValuationSettings::default();
        let mut movements = vec![
            movement(1, dec!(10), Some(dec!(5))),
            movement(2, dec!(-10), None),
            movement(3, dec!(-1), None),
        ];
        let err = run(&settings, &mut movements).unwrap_err();

        match err {
            StockError::NegativeStock { quantity_after, .. } => assert_eq!(quantity_after, dec!(-1)),
            other => panic!("expected NegativeStock, got {other:?}"),
        }
        assert_eq!(movements[2].status, MovementStatus::Provisional);
    }

    #[test]
    fn test_negative_stock_uses_last_positive_rate_and_flags_estimate() {
        let settings = ValuationSettings {
            allow_negative_stock: true,
            ..ValuationSettings::default()
        };
        let mut movements = vec![
            movement(1, dec!(10), Some(dec!(5))),
            movement(2, dec!(-10), None),
            movement(3, dec!(-1), None),
        ];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(movements[2].outgoing_rate, dec!(5));
        assert_eq!(movements[2].value_delta, dec!(-5));
        assert!(movements[2].estimated);
        assert!(state.is_estimate());
        assert_eq!(state.valuation_rate, dec!(5));
    }

    #[test]
    fn test_negative_stock_without_history_uses_fallback_rate() {
        let settings = ValuationSettings {
            allow_negative_stock: true,
            fallback_rate: Some(dec!(2.5)),
            ..ValuationSettings::default()
        };
        let mut movements = vec![movement(1, dec!(-4), None)];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(movements[0].value_delta, dec!(-10));
        assert_eq!(state.value, dec!(-10));
    }

    #[test]
    fn test_receipt_clearing_negative_balance_restarts_average() {
        let settings = ValuationSettings {
            allow_negative_stock: true,
            fallback_rate: Some(dec!(4)),
            ..ValuationSettings::default()
        };
        let mut movements = vec![movement(1, dec!(-2), None), movement(2, dec!(5), Some(dec!(6)))];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(state.quantity, dec!(3));
        assert_eq!(state.value, dec!(18));
        assert_eq!(state.valuation_rate, dec!(6));
        assert_eq!(movements[1].value_delta, dec!(26));
        assert!(!movements[1].estimated);
    }

    #[test]
    fn test_receipt_without_rate_is_rejected() {
        let settings = ValuationSettings::default();
        let mut movements = vec![movement(1, dec!(3), None)];
        let err = run(&settings, &mut movements).unwrap_err();
        assert!(matches!(err, StockError::MissingIncomingRate { .. }));
    }

    #[test]
    fn test_zero_valued_receipt_contributes_no_value() {
        let settings = ValuationSettings::default();
        let mut first = movement(1, dec!(10), Some(dec!(5)));
        let mut free = movement(2, dec!(10), Some(dec!(9)));
        free.allow_zero_valuation = true;
        let mut movements = vec![first.clone(), free];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(movements[1].value_delta, Decimal::ZERO);
        assert_eq!(movements[1].incoming_rate, Decimal::ZERO);
        assert_eq!(state.value, dec!(50));
        assert_eq!(state.valuation_rate, dec!(2.5));

        first.allow_zero_valuation = true;
        first.given_rate = None;
        let mut alone = vec![first];
        assert!(run(&settings, &mut alone).is_ok());
    }

    #[test]
    fn test_amount_basis_follows_quantity_direction() {
        let settings = ValuationSettings::default();
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState::default();
        let mut incoming = movement(1, dec!(4), None);
        engine.apply(&mut state, &mut incoming, CostBasis::Amount(dec!(30))).unwrap();

        assert_eq!(incoming.value_delta, dec!(30));
        assert_eq!(incoming.incoming_rate, dec!(7.5));

        let mut outgoing = movement(2, dec!(-2), None);
        engine.apply(&mut state, &mut outgoing, CostBasis::Amount(dec!(16))).unwrap();
        assert_eq!(outgoing.value_delta, dec!(-16));
        assert_eq!(state.value, dec!(14));
    }

    #[test]
    fn test_kept_value_skips_empty_stock_reset() {
        let settings = ValuationSettings::default();
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState::default();
        let mut incoming = movement(1, dec!(4), Some(dec!(5)));
        let basis = CostBasis::direct(&incoming);
        engine.apply(&mut state, &mut incoming, basis).unwrap();

        // Emptying the pair would normally take the whole 20 out.
        let mut outgoing = movement(2, dec!(-4), None);
        engine.apply(&mut state, &mut outgoing, CostBasis::Kept(dec!(-18))).unwrap();

        assert_eq!(outgoing.value_delta, dec!(-18));
        assert_eq!(outgoing.outgoing_rate, dec!(4.5));
        assert_eq!(state.quantity, Decimal::ZERO);
        assert_eq!(state.value, dec!(2));
    }

    #[test]
    fn test_kept_value_skips_negative_restart() {
        let settings = ValuationSettings {
            allow_negative_stock: true,
            ..ValuationSettings::default()
        };
        let engine = ValuationEngine::new(&settings);
        let mut state = RunningState {
            quantity: dec!(-2),
            value: dec!(-10),
            valuation_rate: dec!(5),
            last_positive_rate: Some(dec!(5)),
        };
        let mut incoming = movement(1, dec!(6), None);
        engine.apply(&mut state, &mut incoming, CostBasis::Kept(dec!(24))).unwrap();

        assert_eq!(incoming.value_delta, dec!(24));
        assert_eq!(incoming.value_after, dec!(14));
        assert_eq!(state.value, dec!(14));
    }

    #[test]
    fn test_rates_round_with_bankers_rounding() {
        let settings = ValuationSettings::default();
        let mut movements = vec![
            movement(1, dec!(3), Some(dec!(1))),
            movement(2, dec!(3), Some(dec!(1.0000000015))),
        ];
        let state = run(&settings, &mut movements).unwrap();

        assert_eq!(movements[1].incoming_rate, dec!(1.000000002));
        assert_eq!(state.value, dec!(6));
    }

    #[test]
    fn test_value_batch_stops_at_unavailable_dependency() {
        let settings = ValuationSettings::default();
        let engine = ValuationEngine::new(&settings);
        let missing = VoucherRef::new(VoucherKind::StockTransfer, "TR-404").line("1");

        let mut batch = vec![
            movement(1, dec!(10), Some(dec!(5))),
            movement(2, dec!(2), None),
            movement(3, dec!(-1), None),
        ];
        batch[1].dependencies.push(Dependency::rate(missing));

        let mut state = RunningState::default();
        let progress = engine
            .value_batch(&mut state, &mut batch, &MovementIndex::default())
            .unwrap();

        assert_eq!(progress, BatchProgress::Blocked { at: 1 });
        assert_eq!(batch[0].status, MovementStatus::Finalized);
        assert_eq!(batch[1].status, MovementStatus::Provisional);
        assert_eq!(state.quantity, dec!(10));
    }

    #[test]
    fn test_value_batch_skips_cancelled_movements() {
        let settings = ValuationSettings::default();
        let engine = ValuationEngine::new(&settings);
        let mut batch = vec![movement(1, dec!(10), Some(dec!(5))), movement(2, dec!(-4), None)];
        batch[1].status = MovementStatus::Cancelled;

        let mut state = RunningState::default();
        let progress = engine
            .value_batch(&mut state, &mut batch, &MovementIndex::default())
            .unwrap();

        assert_eq!(progress, BatchProgress::Complete);
        assert_eq!(state.quantity, dec!(10));
    }

    #[test]
    fn test_settings_from_config() {
        let config = ValuationConfig {
            allow_negative_stock: true,
            fallback_rate: Some(dec!(1.5)),
            amount_precision: 2,
            ..ValuationConfig::default()
        };
        let settings = ValuationSettings::from(&config);
        assert!(settings.allow_negative_stock);
        assert_eq!(settings.fallback_rate, Some(dec!(1.5)));
        assert_eq!(settings.precision, Precision::new(2, 9));
    }
}
