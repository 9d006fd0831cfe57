//! Repost scope: which pairs a repost must cover and how they split into
//! independently computable groups.
//!
//! Scope grows to a fixpoint. Starting from the trigger's pairs, any movement
//! at or after the window start that depends on a line inside the window pulls
//! its own pair in, and that pair's later movements may pull in more.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::stock::{Movement, StockPair, VoucherLineRef};

/// Returns the voucher lines owning the given movements.
#[must_use]
pub fn lines_of(movements: &[Movement]) -> BTreeSet<VoucherLineRef> {
    movements.iter().map(|m| m.line.clone()).collect()
}

/// Returns the lines the given movements depend on.
#[must_use]
pub fn dependency_targets(movements: &[Movement]) -> BTreeSet<VoucherLineRef> {
    movements
        .iter()
        .flat_map(|m| m.dependencies.iter().map(|d| d.target.clone()))
        .collect()
}

/// Returns the pairs of `dependents` not yet in `current`.
#[must_use]
pub fn new_pairs(current: &BTreeSet<StockPair>, dependents: &[Movement]) -> BTreeSet<StockPair> {
    dependents
        .iter()
        .filter(|m| !m.is_cancelled() && !current.contains(&m.pair))
        .map(|m| m.pair.clone())
        .collect()
}

/// Minimal union-find over pair indexes.
struct DisjointPairs {
    parent: Vec<usize>,
}

impl DisjointPairs {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = ra.min(rb);
        }
    }
}

/// Splits window movements into groups that share no dependency edge.
///
/// Two pairs land in the same group when a movement of one depends on a
/// window movement of the other. Each group holds indexes into `movements`
/// in their original (posting) order, and groups are ordered by their
/// first movement.
#[must_use]
pub fn components(movements: &[Movement]) -> Vec<Vec<usize>> {
    let mut pair_index: BTreeMap<&StockPair, usize> = BTreeMap::new();
    for movement in movements {
        let next = pair_index.len();
        pair_index.entry(&movement.pair).or_insert(next);
    }

    let mut by_line: HashMap<&VoucherLineRef, Vec<usize>> = HashMap::new();
    for (index, movement) in movements.iter().enumerate() {
        by_line.entry(&movement.line).or_default().push(index);
    }

    let mut sets = DisjointPairs::new(pair_index.len());
    for movement in movements {
        let owner = pair_index[&movement.pair];
        for dependency in &movement.dependencies {
            for &target in by_line.get(&dependency.target).into_iter().flatten() {
                sets.union(owner, pair_index[&movements[target].pair]);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    for (index, movement) in movements.iter().enumerate() {
        let root = sets.find(pair_index[&movement.pair]);
        let group = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(index);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::{Dependency, MovementDraft, MovementStatus, VoucherKind, VoucherRef};
    use chrono::{NaiveDate, NaiveTime};
    use costflow_shared::types::MovementId;
    use rust_decimal_macros::dec;

    fn at(pair: (&str, &str), line: &VoucherLineRef, seq: u64) -> Movement {
        let draft = MovementDraft::new(
            StockPair::new(pair.0, pair.1),
            line.clone(),
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            dec!(1),
        );
        Movement::from_draft(draft, MovementId::new(), seq)
    }

    #[test]
    fn test_new_pairs_ignores_known_and_cancelled() {
        let line = VoucherRef::new(VoucherKind::StockTransfer, "TR-1").line("1");
        let known = at(("A", "X"), &line, 1);
        let fresh = at(("A", "Y"), &line, 2);
        let mut cancelled = at(("A", "Z"), &line, 3);
        cancelled.status = MovementStatus::Cancelled;

        let current: BTreeSet<StockPair> = [StockPair::new("A", "X")].into_iter().collect();
        let added = new_pairs(&current, &[known, fresh, cancelled]);

        assert_eq!(added.len(), 1);
        assert!(added.contains(&StockPair::new("A", "Y")));
    }

    #[test]
    fn test_components_join_pairs_linked_by_dependency() {
        let transfer = VoucherRef::new(VoucherKind::StockTransfer, "TR-1").line("1");
        let receipt = VoucherRef::new(VoucherKind::StockReceipt, "REC-1").line("1");
        let other = VoucherRef::new(VoucherKind::StockReceipt, "REC-2").line("1");

        let out = at(("A", "X"), &transfer, 1);
        let unrelated = at(("B", "X"), &other, 2);
        let mut incoming = at(("A", "Y"), &transfer, 3);
        incoming.dependencies.push(Dependency::rate(transfer.clone()));
        let lone = at(("A", "Y"), &receipt, 4);

        let groups = components(&[out, unrelated, incoming, lone]);
        assert_eq!(groups, vec![vec![0, 2, 3], vec![1]]);
    }

    #[test]
    fn test_dependency_targets_collects_all_lines() {
        let target_a = VoucherRef::new(VoucherKind::Repack, "RP-1").line("c1");
        let target_b = VoucherRef::new(VoucherKind::Repack, "RP-1").line("c2");
        let own = VoucherRef::new(VoucherKind::Repack, "RP-1").line("p1");
        let mut produced = at(("FG", "X"), &own, 1);
        produced.dependencies = vec![
            Dependency::amount(target_a.clone()),
            Dependency::amount(target_b.clone()),
        ];

        let targets = dependency_targets(&[produced]);
        assert_eq!(targets, [target_a, target_b].into_iter().collect());
    }
}
