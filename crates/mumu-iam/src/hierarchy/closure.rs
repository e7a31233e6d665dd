//! Pure closure-table planning.
//!
//! Nothing here touches storage. The functions take the closure rows a
//! transaction has already read and return the rows to write or remove.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::{IamError, IamResult};
use crate::types::{AuthorityKind, AuthorityPath};

/// Plans the closure rows created by a new direct edge.
///
/// - `above`: rows whose descendant is `ancestor_id` (its ancestors)
/// - `into_descendant`: rows whose descendant is `descendant_id`
/// - `below`: rows whose ancestor is `descendant_id` (its descendants)
///
/// Every pair `(x, y)` with `x` in `{ancestor} ∪ above` and `y` in
/// `{descendant} ∪ below` gets depth `dx + 1 + dy`. Storage keeps the smaller
/// depth when the pair already exists.
///
/// # Errors
///
/// - `IamError::Cycle` if the ends are equal or `descendant_id` is already an
///   ancestor of `ancestor_id`
/// - `IamError::PathAlreadyExists` if the direct edge is already present
pub fn plan_link(
    kind: AuthorityKind,
    ancestor_id: i64,
    descendant_id: i64,
    above: &[AuthorityPath],
    into_descendant: &[AuthorityPath],
    below: &[AuthorityPath],
) -> IamResult<Vec<AuthorityPath>> {
    let cycle = ancestor_id == descendant_id
        || above.iter().any(|p| p.ancestor_id == descendant_id)
        || below.iter().any(|p| p.descendant_id == ancestor_id);
    if cycle {
        return Err(IamError::Cycle {
            kind,
            ancestor_id,
            descendant_id,
        });
    }

    if into_descendant
        .iter()
        .any(|p| p.ancestor_id == ancestor_id && p.is_direct())
    {
        return Err(IamError::PathAlreadyExists {
            kind,
            ancestor_id,
            descendant_id,
        });
    }

    let uppers =
        std::iter::once((ancestor_id, 0)).chain(above.iter().map(|p| (p.ancestor_id, p.depth)));
    let lowers: Vec<(i64, i32)> = std::iter::once((descendant_id, 0))
        .chain(below.iter().map(|p| (p.descendant_id, p.depth)))
        .collect();

    let mut planned: BTreeMap<(i64, i64), i32> = BTreeMap::new();
    for (upper, up_depth) in uppers {
        for &(lower, down_depth) in &lowers {
            let depth = up_depth + 1 + down_depth;
            planned
                .entry((upper, lower))
                .and_modify(|d| *d = (*d).min(depth))
                .or_insert(depth);
        }
    }

    Ok(planned
        .into_iter()
        .map(|((a, d), depth)| AuthorityPath::new(a, d, depth))
        .collect())
}

/// Direct-edge adjacency loaded incrementally from storage.
#[derive(Debug, Default, Clone)]
pub struct Adjacency {
    children: HashMap<i64, Vec<i64>>,
}

impl Adjacency {
    /// Creates an empty adjacency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the direct children of `id` have been loaded.
    #[must_use]
    pub fn is_loaded(&self, id: i64) -> bool {
        self.children.contains_key(&id)
    }

    /// Marks `id` as loaded, with no children yet.
    pub fn mark_loaded(&mut self, id: i64) {
        self.children.entry(id).or_default();
    }

    /// Records a direct edge.
    pub fn add_edge(&mut self, ancestor_id: i64, descendant_id: i64) {
        self.children
            .entry(ancestor_id)
            .or_default()
            .push(descendant_id);
    }

    /// Direct children of `id`.
    #[must_use]
    pub fn children(&self, id: i64) -> &[i64] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Shortest distance from `source` to every node it reaches.
    ///
    /// The source itself is not included.
    #[must_use]
    pub fn reachable_from(&self, source: i64) -> BTreeMap<i64, i32> {
        let mut distances = BTreeMap::new();
        let mut visited = HashSet::from([source]);
        let mut queue = VecDeque::from([(source, 0)]);

        while let Some((node, depth)) = queue.pop_front() {
            for &child in self.children(node) {
                if visited.insert(child) {
                    distances.insert(child, depth + 1);
                    queue.push_back((child, depth + 1));
                }
            }
        }

        distances
    }
}

/// Closure rows to change after the direct edges below `sources` changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rederivation {
    /// Rows to insert or overwrite.
    pub upserts: Vec<AuthorityPath>,
    /// `(ancestor, descendant)` pairs that are no longer reachable.
    pub removals: Vec<(i64, i64)>,
}

impl Rederivation {
    /// Returns `true` if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// Recomputes the closure rows of every source from the remaining direct
/// edges and diffs them against `existing` (all rows whose ancestor is a
/// source).
#[must_use]
pub fn plan_rederive(
    sources: &[i64],
    adjacency: &Adjacency,
    existing: &[AuthorityPath],
) -> Rederivation {
    let mut current: HashMap<(i64, i64), i32> = existing
        .iter()
        .map(|p| (p.pair(), p.depth))
        .collect();
    let mut plan = Rederivation::default();

    let unique: BTreeMap<i64, ()> = sources.iter().map(|s| (*s, ())).collect();
    for &source in unique.keys() {
        for (descendant, depth) in adjacency.reachable_from(source) {
            match current.remove(&(source, descendant)) {
                Some(old) if old == depth => {}
                _ => plan
                    .upserts
                    .push(AuthorityPath::new(source, descendant, depth)),
            }
        }
    }

    let mut stale: Vec<(i64, i64)> = current
        .into_keys()
        .filter(|(ancestor, _)| unique.contains_key(ancestor))
        .collect();
    stale.sort_unstable();
    plan.removals = stale;

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: AuthorityKind = AuthorityKind::Permission;

    fn p(a: i64, d: i64, depth: i32) -> AuthorityPath {
        AuthorityPath::new(a, d, depth)
    }

    #[test]
    fn test_plan_link_simple_edge() {
        let paths = plan_link(KIND, 1, 2, &[], &[], &[]).unwrap();
        assert_eq!(paths, vec![p(1, 2, 1)]);
    }

    #[test]
    fn test_plan_link_joins_both_sides() {
        // 1 -> 2 exists, 3 -> 4 exists; link 2 -> 3
        let paths = plan_link(KIND, 2, 3, &[p(1, 2, 1)], &[], &[p(3, 4, 1)]).unwrap();

        assert_eq!(
            paths,
            vec![p(1, 3, 2), p(1, 4, 3), p(2, 3, 1), p(2, 4, 2)]
        );
    }

    #[test]
    fn test_plan_link_rejects_cycles() {
        assert!(plan_link(KIND, 1, 1, &[], &[], &[]).unwrap_err().is_cycle());

        // 1 -> 2 -> 3; linking 3 -> 1 closes a loop
        let above = [p(1, 3, 2), p(2, 3, 1)];
        let below = [p(1, 2, 1), p(1, 3, 2)];
        let err = plan_link(KIND, 3, 1, &above, &[], &below).unwrap_err();
        assert!(err.is_cycle());
    }

    #[test]
    fn test_plan_link_rejects_duplicate_edge() {
        let err = plan_link(KIND, 1, 2, &[], &[p(1, 2, 1)], &[]).unwrap_err();
        assert!(matches!(err, IamError::PathAlreadyExists { .. }));

        // an indirect path does not block a direct edge
        let paths = plan_link(KIND, 1, 3, &[], &[p(1, 3, 2), p(2, 3, 1)], &[]).unwrap();
        assert_eq!(paths, vec![p(1, 3, 1)]);
    }

    #[test]
    fn test_reachable_from_uses_shortest_distance() {
        let mut adjacency = Adjacency::new();
        adjacency.add_edge(1, 2);
        adjacency.add_edge(2, 3);
        adjacency.add_edge(1, 3);
        adjacency.add_edge(3, 4);

        let reach = adjacency.reachable_from(1);
        assert_eq!(reach.get(&2), Some(&1));
        assert_eq!(reach.get(&3), Some(&1));
        assert_eq!(reach.get(&4), Some(&2));
        assert!(!reach.contains_key(&1));
    }

    #[test]
    fn test_rederive_removes_unreachable_rows() {
        // before: 1 -> 2 -> 3, edge 1 -> 2 deleted
        let mut adjacency = Adjacency::new();
        adjacency.mark_loaded(1);
        adjacency.add_edge(2, 3);

        let plan = plan_rederive(&[1], &adjacency, &[p(1, 3, 2)]);
        assert!(plan.upserts.is_empty());
        assert_eq!(plan.removals, vec![(1, 3)]);
    }

    #[test]
    fn test_rederive_keeps_redundant_paths() {
        // 1 -> 2 -> 4 and 1 -> 3 -> 4; edge 2 -> 4 deleted
        let mut adjacency = Adjacency::new();
        adjacency.add_edge(1, 2);
        adjacency.add_edge(1, 3);
        adjacency.add_edge(3, 4);
        adjacency.mark_loaded(2);
        adjacency.mark_loaded(4);

        let existing = [p(1, 2, 1), p(1, 3, 1), p(1, 4, 2), p(2, 4, 1)];
        let plan = plan_rederive(&[1, 2], &adjacency, &existing);

        assert!(plan.upserts.is_empty());
        assert_eq!(plan.removals, vec![(2, 4)]);
    }

    #[test]
    fn test_rederive_updates_depth() {
        // 1 -> 3 and 1 -> 2 -> 3; edge 1 -> 3 deleted, depth grows to 2
        let mut adjacency = Adjacency::new();
        adjacency.add_edge(1, 2);
        adjacency.add_edge(2, 3);
        adjacency.mark_loaded(3);

        let plan = plan_rederive(&[1], &adjacency, &[p(1, 2, 1)]);
        assert_eq!(plan.upserts, vec![p(1, 3, 2)]);
        assert!(plan.removals.is_empty());
    }
}
