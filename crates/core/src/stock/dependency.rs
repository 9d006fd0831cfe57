//! Dependency resolution between voucher lines.
//!
//! A dependent movement takes its cost from the movements of another voucher
//! line instead of from its own location's moving average. The resolver only
//! reads already-valued target movements; ordering is the caller's job.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::error::{StockError, UnresolvedReason};
use super::types::{DependencyKind, Movement, VoucherLineRef};
use super::valuation::{CostBasis, ValuationSettings};

/// Source of dependency candidates.
pub trait MovementLookup {
    /// Returns every movement created for the given voucher line.
    fn candidates(&self, line: &VoucherLineRef) -> Vec<&Movement>;
}

/// In-memory movement index keyed by voucher line.
#[derive(Debug, Clone, Default)]
pub struct MovementIndex {
    by_line: HashMap<VoucherLineRef, Vec<Movement>>,
}

impl MovementIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a movement, replacing an earlier snapshot with the same id.
    pub fn insert(&mut self, movement: Movement) {
        let entries = self.by_line.entry(movement.line.clone()).or_default();
        if let Some(existing) = entries.iter_mut().find(|m| m.id == movement.id) {
            *existing = movement;
        } else {
            entries.push(movement);
        }
    }

    /// Returns the number of indexed movements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_line.values().map(Vec::len).sum()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_line.is_empty()
    }
}

impl FromIterator<Movement> for MovementIndex {
    fn from_iter<I: IntoIterator<Item = Movement>>(iter: I) -> Self {
        let mut index = Self::new();
        for movement in iter {
            index.insert(movement);
        }
        index
    }
}

impl MovementLookup for MovementIndex {
    fn candidates(&self, line: &VoucherLineRef) -> Vec<&Movement> {
        self.by_line
            .get(line)
            .map(|movements| movements.iter().collect())
            .unwrap_or_default()
    }
}

/// Why a dependency could not be turned into a cost basis.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// The whole batch must abort.
    Fatal(StockError),
    /// Only the owning voucher is affected.
    Unresolved {
        /// The target line that could not be used.
        target: VoucherLineRef,
        /// Why.
        reason: UnresolvedReason,
    },
}

/// Computes the cost basis of a movement from its dependencies.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'a> {
    settings: &'a ValuationSettings,
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver bound to a valuation policy.
    #[must_use]
    pub const fn new(settings: &'a ValuationSettings) -> Self {
        Self { settings }
    }

    /// Resolves the cost basis of `owner`.
    ///
    /// Without dependencies the basis is the owner's given rate or the
    /// moving average. With dependencies, for each one:
    /// - `Rate`: `|owner qty| * (sum |value_delta| / sum |qty|) * share`
    /// - `Amount`: `sum |value_delta| * share`
    ///
    /// and the owner's additional cost is added on top. A candidate posted
    /// after the owner is fatal for the batch.
    pub fn resolve<L: MovementLookup + ?Sized>(
        &self,
        owner: &Movement,
        lookup: &L,
    ) -> Result<CostBasis, ResolveError> {
        if owner.dependencies.is_empty() {
            return Ok(CostBasis::direct(owner));
        }

        let precision = self.settings.precision;
        let quantity = owner.quantity_delta.abs();
        let mut rate_total = Decimal::ZERO;
        let mut amount_total = Decimal::ZERO;

        for dependency in &owner.dependencies {
            let candidates: Vec<&Movement> = lookup
                .candidates(&dependency.target)
                .into_iter()
                .filter(|m| m.id != owner.id && !m.is_cancelled())
                .collect();
            if candidates.is_empty() {
                return Err(ResolveError::Unresolved {
                    target: dependency.target.clone(),
                    reason: UnresolvedReason::Missing,
                });
            }

            let matched: Vec<&Movement> = candidates
                .into_iter()
                .filter(|m| {
                    dependency
                        .quantity_sign_filter
                        .is_none_or(|sign| sign.matches(m.quantity_delta))
                })
                .collect();
            if matched.is_empty() {
                if self.settings.filtered_dependency_as_zero {
                    continue;
                }
                return Err(ResolveError::Unresolved {
                    target: dependency.target.clone(),
                    reason: UnresolvedReason::FilteredOut,
                });
            }

            if let Some(later) = matched.iter().find(|m| m.posting > owner.posting) {
                return Err(ResolveError::Fatal(StockError::InvalidDependencyOrder {
                    owner: owner.line.clone(),
                    owner_posting: owner.posting,
                    target: dependency.target.clone(),
                    target_posting: later.posting,
                }));
            }

            let value: Decimal = matched.iter().map(|m| m.value_delta.abs()).sum();
            let share = dependency.share();
            match dependency.kind {
                DependencyKind::Rate => {
                    let target_quantity: Decimal =
                        matched.iter().map(|m| m.quantity_delta.abs()).sum();
                    if !target_quantity.is_zero() {
                        rate_total += precision.rate(value / target_quantity) * share;
                    }
                }
                DependencyKind::Amount => amount_total += value * share,
            }
        }

        if amount_total.is_zero() && owner.additional_cost.is_zero() {
            return Ok(CostBasis::Rate(rate_total));
        }
        Ok(CostBasis::Amount(
            amount_total + quantity * rate_total + owner.additional_cost,
        ))
    }
}
