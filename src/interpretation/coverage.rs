//! Search-time view of the interpretation graph: coverage queries,
//! select/exclude marking and consistent-closure expansion.
//!
//! Markers hold the generation stamp of the search node that set them. A
//! marker only counts when that node is the current node or one of its
//! ancestors, which [`CoverageScope::is_covered`] decides.

use super::{InterpretationGraph, OptionId, OptionKind};
use crate::model::Decision;
use crate::{Error, Result};

/// Position in the search tree against which markers are evaluated.
pub trait CoverageScope {
    /// Stamp used for markers set at this position.
    fn stamp(&self) -> u64;

    /// Whether `marker` was set at this position or above it.
    fn is_covered(&self, marker: u64) -> bool;
}

impl InterpretationGraph {
    pub fn coverage(&self, scope: &dyn CoverageScope, id: OptionId) -> Decision {
        let opt = self.opt(id);
        match opt.fixed {
            Some(true) => return Decision::Selected,
            Some(false) => return Decision::Excluded,
            None => {}
        }
        if opt.kind == OptionKind::Root || scope.is_covered(opt.marked_selected) {
            Decision::Selected
        } else if scope.is_covered(opt.marked_excluded) {
            Decision::Excluded
        } else {
            Decision::Unknown
        }
    }

    /// Marks every not yet selected option in `options` as selected.
    /// Returns the newly marked ones, which are also appended to `changed`.
    pub fn mark_selected(
        &mut self,
        scope: &dyn CoverageScope,
        options: &[OptionId],
        changed: &mut Vec<OptionId>,
    ) -> Vec<OptionId> {
        let stamp = scope.stamp();
        let mut marked = Vec::new();
        for &id in options {
            if self.coverage(scope, id) == Decision::Selected {
                continue;
            }
            self.opt_mut(id).marked_selected = stamp;
            changed.push(id);
            marked.push(id);
        }
        marked
    }

    /// Excludes everything conflicting with `options`.
    pub fn mark_excluded(
        &mut self,
        scope: &dyn CoverageScope,
        options: &[OptionId],
        changed: &mut Vec<OptionId>,
    ) {
        for &id in options {
            for conflicting in self.collect_all_conflicting(id) {
                self.mark_excluded_option(scope, conflicting, changed);
            }
        }
    }

    /// Excludes `id`, its descendants, and every disjunction left without a
    /// non-excluded alternative.
    pub fn mark_excluded_option(
        &mut self,
        scope: &dyn CoverageScope,
        id: OptionId,
        changed: &mut Vec<OptionId>,
    ) {
        let stamp = scope.stamp();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if n == OptionId::ROOT || self.coverage(scope, n) != Decision::Unknown {
                continue;
            }
            self.opt_mut(n).marked_excluded = stamp;
            changed.push(n);

            stack.extend(self.opt(n).children.iter().rev().copied());
            for or in self.opt(n).referenced_by.clone() {
                let all_excluded = self
                    .opt(or)
                    .alternatives
                    .iter()
                    .all(|a| self.coverage(scope, *a) == Decision::Excluded);
                if all_excluded {
                    stack.push(or);
                }
            }
        }
    }

    /// Every option in `options` is already covered-selected.
    pub fn check_selected(&self, scope: &dyn CoverageScope, options: &[OptionId]) -> bool {
        options
            .iter()
            .all(|id| self.coverage(scope, *id) == Decision::Selected)
    }

    /// Some option in `options`, or one of its ancestors, is covered-excluded.
    pub fn check_excluded(&mut self, scope: &dyn CoverageScope, options: &[OptionId]) -> bool {
        let v = self.next_visit();
        let mut stack: Vec<OptionId> = options.to_vec();
        while let Some(n) = stack.pop() {
            if self.opt(n).visited == v {
                continue;
            }
            self.opt_mut(n).visited = v;
            if self.coverage(scope, n) == Decision::Excluded {
                return true;
            }
            stack.extend(self.opt(n).parents.iter().copied());
        }
        false
    }

    /// A direct conflict of `id` is not yet covered-excluded.
    pub fn has_uncovered_conflicts(&self, scope: &dyn CoverageScope, id: OptionId) -> bool {
        self.opt(id)
            .conflicts
            .iter()
            .any(|c| self.coverage(scope, *c) != Decision::Excluded)
    }

    /// Consistent closure of `seed`.
    ///
    /// Adds ancestors of included options, disjunctions over an included
    /// alternative that have no uncovered conflicts, and children whose
    /// parents are all included or covered-selected. Each iteration walks
    /// the included list as a worklist, so chains of any depth close in one
    /// pass; a further pass only picks up children whose last parent joined
    /// after them and confirms the fixpoint. Fails when no fixpoint is
    /// reached within `ceiling` iterations.
    pub fn expand(
        &mut self,
        scope: &dyn CoverageScope,
        seed: &[OptionId],
        ceiling: usize,
    ) -> Result<Vec<OptionId>> {
        let v = self.next_visit();
        let mut included = Vec::new();
        for &id in seed {
            if self.opt(id).marked_expand != v {
                self.opt_mut(id).marked_expand = v;
                included.push(id);
            }
        }

        for _ in 0..ceiling {
            let before = included.len();
            let mut i = 0;
            while i < included.len() {
                let id = included[i];
                i += 1;

                for p in self.opt(id).parents.clone() {
                    if self.opt(p).marked_expand != v {
                        self.opt_mut(p).marked_expand = v;
                        included.push(p);
                    }
                }

                for or in self.opt(id).referenced_by.clone() {
                    if self.opt(or).marked_expand != v
                        && self.coverage(scope, or) != Decision::Excluded
                        && !self.has_uncovered_conflicts(scope, or)
                    {
                        self.opt_mut(or).marked_expand = v;
                        included.push(or);
                    }
                }

                if id == OptionId::ROOT {
                    continue;
                }
                for c in self.opt(id).children.clone() {
                    if self.opt(c).marked_expand == v || self.coverage(scope, c) == Decision::Excluded {
                        continue;
                    }
                    let parents_hold = self.opt(c).parents.iter().all(|p| {
                        self.opt(*p).marked_expand == v || self.coverage(scope, *p) == Decision::Selected
                    });
                    if parents_hold {
                        self.opt_mut(c).marked_expand = v;
                        included.push(c);
                    }
                }
            }

            if included.len() == before {
                return Ok(included);
            }
        }

        tracing::error!(ceiling, included = included.len(), "consistent closure did not converge");
        Err(Error::MalformedConflictGraph { iterations: ceiling, options: included })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ancestor chain given as its stamps, deepest last.
    struct Chain(Vec<u64>);

    impl CoverageScope for Chain {
        fn stamp(&self) -> u64 {
            *self.0.last().unwrap()
        }

        fn is_covered(&self, marker: u64) -> bool {
            self.0.contains(&marker)
        }
    }

    fn pair() -> (InterpretationGraph, OptionId, OptionId) {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let b = g.add_primitive();
        g.add_conflict(a, b).unwrap();
        (g, a, b)
    }

    #[test]
    fn test_coverage_follows_scope() {
        let (mut g, a, b) = pair();
        let node = Chain(vec![1, 2]);
        let mut changed = Vec::new();
        assert_eq!(g.mark_selected(&node, &[a], &mut changed), vec![a]);
        g.mark_excluded(&node, &[a], &mut changed);
        assert_eq!(changed, vec![a, b]);
        assert_eq!(g.coverage(&node, a), Decision::Selected);
        assert_eq!(g.coverage(&node, b), Decision::Excluded);

        // A sibling branch that does not contain stamp 2 sees neither marker.
        let sibling = Chain(vec![1, 3]);
        assert_eq!(g.coverage(&sibling, a), Decision::Unknown);
        assert_eq!(g.coverage(&sibling, b), Decision::Unknown);
        assert_eq!(g.coverage(&sibling, OptionId::ROOT), Decision::Selected);
    }

    #[test]
    fn test_fixed_flag_wins() {
        let (mut g, a, b) = pair();
        g.set_fixed(b, Some(false)).unwrap();
        let node = Chain(vec![1]);
        assert_eq!(g.coverage(&node, b), Decision::Excluded);
        let mut changed = Vec::new();
        g.mark_excluded(&node, &[a], &mut changed);
        assert!(changed.is_empty());
    }

    #[test]
    fn test_excluding_parent_excludes_conjunction_and_disjunction() {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let b = g.add_primitive();
        let c = g.add_primitive();
        let ab = g.add_conjunction([a, b]).unwrap();
        let or = g.add_disjunction([a, c]).unwrap();
        let node = Chain(vec![5]);
        let mut changed = Vec::new();
        g.mark_excluded_option(&node, a, &mut changed);
        assert_eq!(g.coverage(&node, ab), Decision::Excluded);
        // `c` still open, so the disjunction survives.
        assert_eq!(g.coverage(&node, or), Decision::Unknown);
        g.mark_excluded_option(&node, c, &mut changed);
        assert_eq!(g.coverage(&node, or), Decision::Excluded);
    }

    #[test]
    fn test_check_selected_and_excluded() {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let b = g.add_primitive();
        let ab = g.add_conjunction([a, b]).unwrap();
        let node = Chain(vec![1]);
        let mut changed = Vec::new();
        g.mark_selected(&node, &[a], &mut changed);
        assert!(g.check_selected(&node, &[a, OptionId::ROOT]));
        assert!(!g.check_selected(&node, &[a, b]));
        g.opt_mut(b).marked_excluded = 1;
        assert!(g.check_excluded(&node, &[ab]));
        assert!(!g.check_excluded(&node, &[a]));
    }

    #[test]
    fn test_expand_adds_ancestors_children_and_disjunctions() {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let b = g.add_primitive();
        let x = g.add_primitive();
        let ab = g.add_conjunction([a, b]).unwrap();
        let ax = g.add_conjunction([a, x]).unwrap();
        let or = g.add_disjunction([a, x]).unwrap();
        g.add_conflict(x, b).unwrap();

        let node = Chain(vec![1]);
        let mut changed = Vec::new();
        g.mark_selected(&node, &[b], &mut changed);

        let closure = g.expand(&node, &[a], 10).unwrap();
        assert!(closure.contains(&a));
        assert!(closure.contains(&OptionId::ROOT));
        // `b` is covered-selected, so `a ∧ b` follows.
        assert!(closure.contains(&ab));
        // `x` is neither included nor selected.
        assert!(!closure.contains(&ax));
        assert!(closure.contains(&or));
    }

    #[test]
    fn test_expand_skips_disjunction_with_open_conflict() {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let c = g.add_primitive();
        let d = g.add_primitive();
        let or = g.add_disjunction([a, c]).unwrap();
        g.add_conflict(or, d).unwrap();
        let node = Chain(vec![1]);
        assert!(!g.expand(&node, &[a], 10).unwrap().contains(&or));

        let mut changed = Vec::new();
        g.mark_excluded_option(&node, d, &mut changed);
        assert!(g.expand(&node, &[a], 10).unwrap().contains(&or));
    }

    #[test]
    fn test_expand_ceiling_is_fatal() {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let b = g.add_primitive();
        let ab = g.add_conjunction([a, b]).unwrap();
        let node = Chain(vec![1]);
        // Seeding the conjunction needs a second pass to settle.
        let err = g.expand(&node, &[ab], 1).unwrap_err();
        assert!(matches!(err, Error::MalformedConflictGraph { iterations: 1, .. }));
    }

    #[test]
    fn test_expand_reaches_deep_chain_in_one_pass() {
        let mut g = InterpretationGraph::new();
        let a = g.add_primitive();
        let node = Chain(vec![1]);
        let mut changed = Vec::new();
        let mut tip = a;
        let mut chain = Vec::new();
        for _ in 0..6 {
            let b = g.add_primitive();
            g.mark_selected(&node, &[b], &mut changed);
            tip = g.add_conjunction([tip, b]).unwrap();
            chain.push(tip);
        }

        let closure = g.expand(&node, &[a], 2).unwrap();
        for x in &chain {
            assert!(closure.contains(x), "{x} missing from closure");
        }
    }
}
