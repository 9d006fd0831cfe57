//! Decimal precision rules for quantities, rates, and amounts.
//!
//! CRITICAL: Never use floating-point for valuation.
//! Amounts and rates are `rust_decimal::Decimal`, rounded with Banker's Rounding
//! (`MidpointNearestEven`) so repeated reposts do not drift in one direction.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default decimal places for amounts (value deltas, debit, credit).
pub const AMOUNT_DECIMAL_PLACES: u32 = 4;

/// Default decimal places for rates (valuation, incoming, outgoing).
pub const RATE_DECIMAL_PLACES: u32 = 9;

/// Rounding precision applied to computed rates and amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    /// Decimal places for amounts.
    pub amount: u32,
    /// Decimal places for rates.
    pub rate: u32,
}

impl Precision {
    /// Creates a precision pair.
    #[must_use]
    pub const fn new(amount: u32, rate: u32) -> Self {
        Self { amount, rate }
    }

    /// Rounds an amount with Banker's Rounding.
    #[must_use]
    pub fn amount(&self, value: Decimal) -> Decimal {
        round(value, self.amount)
    }

    /// Rounds a rate with Banker's Rounding.
    #[must_use]
    pub fn rate(&self, value: Decimal) -> Decimal {
        round(value, self.rate)
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::new(AMOUNT_DECIMAL_PLACES, RATE_DECIMAL_PLACES)
    }
}

/// Round a decimal value using Banker's Rounding.
#[must_use]
pub fn round(value: Decimal, decimal_places: u32) -> Decimal {
    value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointNearestEven)
}
