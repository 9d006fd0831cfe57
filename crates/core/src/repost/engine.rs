//! Repost engine: recomputes a window of movements in posting order.
//!
//! The window is split into dependency-connected groups. Each group is a
//! single chronological pass, so a dependency target is always valued before
//! its dependents. Unconnected groups run in parallel on the rayon pool.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::scope;
use super::types::{RepostOutcome, RepostWindow};
use crate::stock::{
    CostBasis, DependencyResolver, Movement, MovementIndex, MovementLookup, ResolveError,
    RunningState, StockError, StockPair, ValuationEngine, ValuationSettings, VoucherError,
    VoucherFailure, VoucherLineRef,
};

/// Candidates from the group being recomputed, then from read-only context.
struct WindowLookup<'a> {
    movements: &'a [Movement],
    by_line: &'a HashMap<VoucherLineRef, Vec<usize>>,
    context: &'a MovementIndex,
}

impl MovementLookup for WindowLookup<'_> {
    fn candidates(&self, line: &VoucherLineRef) -> Vec<&Movement> {
        let mut found: Vec<&Movement> = self
            .by_line
            .get(line)
            .into_iter()
            .flatten()
            .map(|&index| &self.movements[index])
            .collect();
        found.extend(self.context.candidates(line));
        found
    }
}

/// Recomputes repost windows.
#[derive(Debug, Clone, Copy)]
pub struct RepostEngine<'a> {
    settings: &'a ValuationSettings,
    large_window_warning: usize,
}

impl<'a> RepostEngine<'a> {
    /// Creates an engine bound to a valuation policy.
    #[must_use]
    pub const fn new(settings: &'a ValuationSettings) -> Self {
        Self {
            settings,
            large_window_warning: usize::MAX,
        }
    }

    /// Logs a warning for windows larger than `limit` movements.
    #[must_use]
    pub const fn warn_above(mut self, limit: usize) -> Self {
        self.large_window_warning = limit;
        self
    }

    /// Recomputes every movement of the window.
    ///
    /// Returns the movements whose computed fields changed together with the
    /// vouchers affected. Fatal errors abort the whole window; nothing in the
    /// outcome is persisted by this function.
    pub fn run(&self, window: RepostWindow) -> Result<RepostOutcome, StockError> {
        let RepostWindow {
            from,
            movements,
            seeds,
            context,
        } = window;
        let context: MovementIndex = context.into_iter().collect();

        if movements.len() > self.large_window_warning {
            warn!(
                from = %from,
                movements = movements.len(),
                "Large repost window"
            );
        }

        let groups = scope::components(&movements);
        let mut slots: Vec<Option<Movement>> = movements.into_iter().map(Some).collect();
        let batches: Vec<Vec<Movement>> = groups
            .into_iter()
            .map(|group| group.into_iter().filter_map(|i| slots[i].take()).collect())
            .collect();

        info!(
            from = %from,
            groups = batches.len(),
            context = context.len(),
            "Reposting window"
        );

        let outcomes = batches
            .into_par_iter()
            .map(|batch| self.run_group(batch, &seeds, &context))
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcome = RepostOutcome::default();
        for group in outcomes {
            outcome.merge(group);
        }
        outcome.updates.sort_by(|a, b| a.posting.cmp(&b.posting));
        Ok(outcome)
    }

    fn run_group(
        &self,
        original: Vec<Movement>,
        seeds: &BTreeMap<StockPair, RunningState>,
        context: &MovementIndex,
    ) -> Result<RepostOutcome, StockError> {
        let engine = ValuationEngine::new(self.settings);
        let resolver = DependencyResolver::new(self.settings);

        let mut by_line: HashMap<VoucherLineRef, Vec<usize>> = HashMap::new();
        for (index, movement) in original.iter().enumerate() {
            by_line.entry(movement.line.clone()).or_default().push(index);
        }

        let mut movements = original.clone();
        let mut states: BTreeMap<StockPair, RunningState> = BTreeMap::new();
        let mut outcome = RepostOutcome::default();

        for index in 0..movements.len() {
            let resolved = {
                let lookup = WindowLookup {
                    movements: &movements,
                    by_line: &by_line,
                    context,
                };
                resolver.resolve(&movements[index], &lookup)
            };
            let basis = match resolved {
                Ok(basis) => basis,
                Err(ResolveError::Fatal(err)) => return Err(err),
                Err(ResolveError::Unresolved { target, reason }) => {
                    let movement = &movements[index];
                    warn!(
                        line = %movement.line,
                        target = %target,
                        %reason,
                        "Dependency unresolved, keeping previous value"
                    );
                    outcome.failures.push(VoucherFailure::new(
                        movement.voucher().clone(),
                        VoucherError::UnresolvedDependency {
                            owner: movement.line.clone(),
                            target,
                            reason,
                        },
                    ));
                    CostBasis::Kept(original[index].value_delta)
                }
            };

            let pair = movements[index].pair.clone();
            let state = states
                .entry(pair)
                .or_insert_with_key(|pair| seeds.get(pair).copied().unwrap_or_default());
            engine.apply(state, &mut movements[index], basis)?;
        }

        for (before, after) in original.iter().zip(&movements) {
            outcome.touched_vouchers.insert(after.voucher().clone());
            if after.value_delta != before.value_delta {
                outcome
                    .value_changed_vouchers
                    .insert(after.voucher().clone());
            }
            if after.computed_differs(before) {
                outcome.updates.push(after.clone());
            }
        }

        debug!(
            movements = movements.len(),
            updates = outcome.updates.len(),
            "Repost group finished"
        );
        outcome.recomputed = movements.len();
        outcome.final_states = states;
        Ok(outcome)
    }
}
