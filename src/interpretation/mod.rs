//! # Interpretation Graph
//!
//! Arena DAG of interpretation options. Each option may conflict with
//! others, be composed from parent options (conjunctions), or group
//! alternatives (disjunctions). All references are dense [`OptionId`]
//! indices into the arena; traversals use generation stamps instead of
//! cleared visited sets.
//!
//! | Kind | Parents | Created by |
//! |------|---------|------------|
//! | `Root` | none | the graph itself (id 0) |
//! | `Primitive` | root | a competing activation |
//! | `Conjunction` | two or more options | combining input options |
//! | `Disjunction` | root | grouping alternatives |
//!
//! Search-time operations (coverage, marking, expansion) live in
//! [`coverage`].

pub mod coverage;

pub use coverage::CoverageScope;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

use crate::activation::ActivationId;
use crate::{Error, Result};

/// Index of an option in its document's interpretation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionId(pub u32);

impl OptionId {
    pub const ROOT: OptionId = OptionId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for OptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Root,
    Primitive,
    Conjunction,
    Disjunction,
}

#[derive(Debug, Clone)]
pub struct InterpretationOption {
    pub id: OptionId,
    pub kind: OptionKind,
    pub parents: SmallVec<[OptionId; 2]>,
    pub children: Vec<OptionId>,
    pub conflicts: BTreeSet<OptionId>,
    /// Alternatives grouped by a disjunction.
    pub alternatives: SmallVec<[OptionId; 2]>,
    /// Disjunctions listing this option as an alternative.
    pub referenced_by: Vec<OptionId>,
    /// `Some(true)` always selected, `Some(false)` always excluded.
    pub fixed: Option<bool>,
    pub activations: Vec<ActivationId>,
    pub(crate) marked_selected: u64,
    pub(crate) marked_excluded: u64,
    pub(crate) marked_expand: u64,
    visited: u64,
}

impl InterpretationOption {
    fn new(id: OptionId, kind: OptionKind) -> Self {
        Self {
            id,
            kind,
            parents: SmallVec::new(),
            children: Vec::new(),
            conflicts: BTreeSet::new(),
            alternatives: SmallVec::new(),
            referenced_by: Vec::new(),
            fixed: None,
            activations: Vec::new(),
            marked_selected: 0,
            marked_excluded: 0,
            marked_expand: 0,
            visited: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == OptionKind::Root
    }
}

// ============================================================================
// InterpretationGraph
// ============================================================================

#[derive(Debug, Clone)]
pub struct InterpretationGraph {
    options: Vec<InterpretationOption>,
    conjunctions: BTreeMap<Vec<OptionId>, OptionId>,
    disjunctions: BTreeMap<Vec<OptionId>, OptionId>,
    visit_counter: u64,
}

impl Default for InterpretationGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpretationGraph {
    pub fn new() -> Self {
        Self {
            options: vec![InterpretationOption::new(OptionId::ROOT, OptionKind::Root)],
            conjunctions: BTreeMap::new(),
            disjunctions: BTreeMap::new(),
            visit_counter: 0,
        }
    }

    pub fn root(&self) -> OptionId {
        OptionId::ROOT
    }

    /// Number of options, the root included.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// No option has been added besides the root.
    pub fn is_empty(&self) -> bool {
        self.options.len() <= 1
    }

    pub fn get(&self, id: OptionId) -> Option<&InterpretationOption> {
        self.options.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterpretationOption> {
        self.options.iter()
    }

    pub(crate) fn opt(&self, id: OptionId) -> &InterpretationOption {
        &self.options[id.index()]
    }

    fn opt_mut(&mut self, id: OptionId) -> &mut InterpretationOption {
        &mut self.options[id.index()]
    }

    pub(crate) fn next_visit(&mut self) -> u64 {
        self.visit_counter += 1;
        self.visit_counter
    }

    fn check(&self, id: OptionId) -> Result<()> {
        if id.index() < self.options.len() {
            Ok(())
        } else {
            Err(Error::NotFound(format!("interpretation option {id}")))
        }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    fn push(&mut self, kind: OptionKind, parents: &[OptionId]) -> OptionId {
        let id = OptionId(self.options.len() as u32);
        let mut option = InterpretationOption::new(id, kind);
        option.parents.extend(parents.iter().copied());
        self.options.push(option);
        for p in parents {
            self.opt_mut(*p).children.push(id);
        }
        id
    }

    /// New independent alternative below the root.
    pub fn add_primitive(&mut self) -> OptionId {
        self.push(OptionKind::Primitive, &[OptionId::ROOT])
    }

    /// Option holding exactly when all `parents` hold.
    ///
    /// The root is dropped from `parents`; an empty set yields the root and
    /// a single parent yields that parent. Equal parent sets share one option.
    pub fn add_conjunction(&mut self, parents: impl IntoIterator<Item = OptionId>) -> Result<OptionId> {
        let key: Vec<OptionId> = parents
            .into_iter()
            .filter(|p| *p != OptionId::ROOT)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for p in &key {
            self.check(*p)?;
        }
        match key.as_slice() {
            [] => return Ok(OptionId::ROOT),
            [single] => return Ok(*single),
            _ => {}
        }
        if let Some(id) = self.conjunctions.get(&key) {
            return Ok(*id);
        }
        let id = self.push(OptionKind::Conjunction, &key);
        self.conjunctions.insert(key, id);
        Ok(id)
    }

    /// Option holding when any of `alternatives` holds.
    pub fn add_disjunction(&mut self, alternatives: impl IntoIterator<Item = OptionId>) -> Result<OptionId> {
        let key: Vec<OptionId> = alternatives
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if key.is_empty() {
            return Err(Error::InvalidInput("disjunction without alternatives".into()));
        }
        for a in &key {
            self.check(*a)?;
        }
        if let Some(id) = self.disjunctions.get(&key) {
            return Ok(*id);
        }
        let id = self.push(OptionKind::Disjunction, &[OptionId::ROOT]);
        self.opt_mut(id).alternatives.extend(key.iter().copied());
        for a in &key {
            self.opt_mut(*a).referenced_by.push(id);
        }
        self.disjunctions.insert(key, id);
        Ok(id)
    }

    pub fn set_fixed(&mut self, id: OptionId, fixed: Option<bool>) -> Result<()> {
        self.check(id)?;
        if id == OptionId::ROOT && fixed == Some(false) {
            return Err(Error::InvalidInput("the root option cannot be excluded".into()));
        }
        self.opt_mut(id).fixed = fixed;
        Ok(())
    }

    pub(crate) fn register_activation(&mut self, id: OptionId, act: ActivationId) {
        let acts = &mut self.opt_mut(id).activations;
        if !acts.contains(&act) {
            acts.push(act);
        }
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Registers a symmetric conflict. Returns whether it is new.
    pub fn add_conflict(&mut self, a: OptionId, b: OptionId) -> Result<bool> {
        self.check(a)?;
        self.check(b)?;
        if a == b || a == OptionId::ROOT || b == OptionId::ROOT {
            return Ok(false);
        }
        let added = self.opt_mut(a).conflicts.insert(b);
        self.opt_mut(b).conflicts.insert(a);
        if added {
            tracing::debug!(a = a.0, b = b.0, "conflict registered");
        }
        Ok(added)
    }

    pub fn conflicts(&self, id: OptionId) -> impl Iterator<Item = OptionId> + '_ {
        self.opt(id).conflicts.iter().copied()
    }

    pub fn has_conflicts(&self, id: OptionId) -> bool {
        !self.opt(id).conflicts.is_empty()
    }

    /// Number of distinct conflicting pairs.
    pub fn conflict_count(&self) -> usize {
        self.options.iter().map(|o| o.conflicts.len()).sum::<usize>() / 2
    }

    /// Options with at least one direct conflict, by id.
    pub fn conflicted_options(&self) -> Vec<OptionId> {
        self.options
            .iter()
            .filter(|o| !o.conflicts.is_empty())
            .map(|o| o.id)
            .collect()
    }

    /// Every option conflicting with `id` or with one of its ancestors.
    pub fn collect_all_conflicting(&mut self, id: OptionId) -> Vec<OptionId> {
        let v = self.next_visit();
        let mut found = BTreeSet::new();
        let mut stack = vec![id];
        self.opt_mut(id).visited = v;
        while let Some(n) = stack.pop() {
            found.extend(self.opt(n).conflicts.iter().copied());
            let parents = self.opt(n).parents.clone();
            for p in parents {
                if self.opt(p).visited != v {
                    self.opt_mut(p).visited = v;
                    stack.push(p);
                }
            }
        }
        found.into_iter().collect()
    }

    // ========================================================================
    // Ancestry
    // ========================================================================

    /// Whether `other` is `id` itself or one of its ancestors.
    pub fn contains(&self, id: OptionId, other: OptionId) -> bool {
        if id == other {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack: Vec<OptionId> = self.opt(id).parents.to_vec();
        while let Some(n) = stack.pop() {
            if n == other {
                return true;
            }
            if seen.insert(n) {
                stack.extend(self.opt(n).parents.iter().copied());
            }
        }
        false
    }

    /// `id` followed by all of its descendants, each once.
    pub fn descendants(&mut self, id: OptionId) -> Vec<OptionId> {
        let v = self.next_visit();
        let mut result = Vec::new();
        let mut stack = vec![id];
        self.opt_mut(id).visited = v;
        while let Some(n) = stack.pop() {
            result.push(n);
            let children = self.opt(n).children.clone();
            for c in children.into_iter().rev() {
                if self.opt(c).visited != v {
                    self.opt_mut(c).visited = v;
                    stack.push(c);
                }
            }
        }
        result
    }

    /// Options decidable before any branching: the root, everything fixed
    /// to selected and every primitive without conflicts.
    pub fn root_refinement_seed(&self) -> Vec<OptionId> {
        self.options
            .iter()
            .filter(|o| {
                o.is_root()
                    || o.fixed == Some(true)
                    || (o.kind == OptionKind::Primitive && o.conflicts.is_empty() && o.fixed.is_none())
            })
            .map(|o| o.id)
            .collect()
    }
}
