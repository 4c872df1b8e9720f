//! # Interpretation Search
//!
//! Depth-first branch-and-bound over the conflicting interpretation
//! options of a document. Each tree level decides one candidate option:
//! the selected branch marks the candidate's consistent closure as selected
//! (and everything conflicting with it as excluded), the excluded branch
//! marks the candidate and its descendants as excluded. After every
//! decision the affected activations are re-propagated and the change in
//! normalized weight is accumulated along the path. The leaf with the
//! highest accumulated `w / n` wins.
//!
//! Markers carry the stamp of the node that set them and are scoped to
//! that node's subtree through [`SearchPath`]. Activation state changes are
//! journaled per node and undone when the search backtracks; the winning
//! branch is replayed by [`SearchTree::materialize`].
//!
//! Per candidate, the decision and weight gain found under one path are
//! memoized and reused under an equivalent path, pruning subtrees whose
//! best possible outcome cannot beat the best leaf.

pub mod journal;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SearchConfig;
use crate::document::Document;
use crate::interpretation::{CoverageScope, OptionId};
use crate::model::{Decision, NormWeight};
use crate::Result;

use journal::{Journal, Restore};

/// Index of a node in its search tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchNodeId(pub u32);

impl SearchNodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
    Root,
    Selected,
    Excluded,
}

#[derive(Debug, Clone)]
pub struct SearchNode {
    pub id: SearchNodeId,
    /// Generation stamp written into the markers this node sets.
    pub stamp: u64,
    pub parent: Option<SearchNodeId>,
    /// Nearest ancestor whose candidate was selected on the way here.
    pub selected_parent: Option<SearchNodeId>,
    /// Nearest ancestor whose candidate was excluded on the way here.
    pub excluded_parent: Option<SearchNodeId>,
    pub branch: Branch,
    /// Index of the candidate this node decides.
    pub level: usize,
    /// Consistent closure of this node's candidate.
    pub refinement: Vec<OptionId>,
    /// Options this node marked as selected.
    pub selected: Vec<OptionId>,
    pub weight_delta: NormWeight,
    pub accumulated_weight: NormWeight,
}

/// A search node seen as a coverage scope: markers count when they were
/// set by the node itself or by one of its ancestors.
pub struct SearchPath<'a> {
    nodes: &'a [SearchNode],
    tip: SearchNodeId,
}

impl<'a> SearchPath<'a> {
    pub fn new(nodes: &'a [SearchNode], tip: SearchNodeId) -> Self {
        Self { nodes, tip }
    }
}

impl CoverageScope for SearchPath<'_> {
    fn stamp(&self) -> u64 {
        self.nodes[self.tip.index()].stamp
    }

    fn is_covered(&self, marker: u64) -> bool {
        if marker == 0 {
            return false;
        }
        // Stamps strictly increase along every root-to-leaf path.
        let mut current = Some(self.tip);
        while let Some(id) = current {
            let node = &self.nodes[id.index()];
            if marker == node.stamp {
                return true;
            }
            if marker > node.stamp {
                return false;
            }
            current = node.parent;
        }
        false
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A conflicting option awaiting a decision, with its ordering keys.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub option: OptionId,
    pub sequence: u32,
    pub min_begin: i32,
    pub max_end: i32,
    pub min_rid: Option<i32>,
    /// Memoized decisions keyed by the node that stored them.
    cache: BTreeMap<SearchNodeId, CachedDecision>,
}

impl Candidate {
    fn new(doc: &Document, option: OptionId) -> Self {
        let mut candidate = Self {
            option,
            sequence: 0,
            min_begin: 0,
            max_end: 0,
            min_rid: None,
            cache: BTreeMap::new(),
        };
        let acts = &doc.graph.opt(option).activations;
        if let Some(first) = acts.first() {
            let first = &doc.activations[first.index()];
            candidate.min_begin = first.range.begin;
            candidate.max_end = first.range.end;
        }
        for id in acts {
            let a = &doc.activations[id.index()];
            candidate.sequence = candidate.sequence.max(a.sequence);
            candidate.min_begin = candidate.min_begin.min(a.range.begin);
            candidate.max_end = candidate.max_end.max(a.range.end);
            if let Some(rid) = a.rid {
                candidate.min_rid = Some(candidate.min_rid.map_or(rid, |r| r.min(rid)));
            }
        }
        candidate
    }

    /// Conflicting options in text order: earlier ends first, then later
    /// begins, shorter input chains, smaller relational ids, smaller ids.
    fn generate(doc: &Document) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = doc
            .graph
            .conflicted_options()
            .into_iter()
            .map(|o| Candidate::new(doc, o))
            .collect();
        candidates.sort_by(|a, b| {
            a.max_end
                .cmp(&b.max_end)
                .then(b.min_begin.cmp(&a.min_begin))
                .then(a.sequence.cmp(&b.sequence))
                .then(a.min_rid.cmp(&b.min_rid))
                .then(a.option.cmp(&b.option))
        });
        candidates
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Accumulated weight of a leaf and the path leading to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafSummary {
    pub node: SearchNodeId,
    pub weight: NormWeight,
    pub selected: Vec<OptionId>,
    /// Accumulated weight of every node from the root to the leaf.
    pub path: Vec<NormWeight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub candidates: usize,
    pub nodes: usize,
    pub steps: usize,
    pub leaves: usize,
    pub cache_hits: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaf_summaries: Vec<LeafSummary>,
}

// ============================================================================
// SearchTree
// ============================================================================

pub struct SearchTree {
    config: SearchConfig,
    nodes: Vec<SearchNode>,
    journal: Journal,
    candidates: Vec<Candidate>,
    best: Option<SearchNodeId>,
    best_selected: Vec<OptionId>,
    stats: SearchStats,
    interrupted: bool,
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    selected: bool,
    /// Weight gained below the node that stored the entry.
    gain: NormWeight,
}

impl SearchTree {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            journal: Journal::new(),
            candidates: Vec::new(),
            best: None,
            best_selected: Vec::new(),
            stats: SearchStats::default(),
            interrupted: false,
        }
    }

    pub fn nodes(&self) -> &[SearchNode] {
        &self.nodes
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn best(&self) -> Option<&SearchNode> {
        self.best.map(|id| &self.nodes[id.index()])
    }

    pub fn best_weight(&self) -> NormWeight {
        self.best().map_or(NormWeight::ZERO, |n| n.accumulated_weight)
    }

    /// Options selected by the best leaf.
    pub fn selected_options(&self) -> &[OptionId] {
        &self.best_selected
    }

    fn best_norm(&self) -> f64 {
        self.best().map_or(-1.0, |n| n.accumulated_weight.norm())
    }

    /// Searches `doc` for its best interpretation.
    ///
    /// Every activation change made during the search is undone before
    /// returning; [`SearchTree::materialize`] re-applies the winning branch.
    /// A fatal error marks the document as failed.
    pub fn run(&mut self, doc: &mut Document) -> Result<()> {
        doc.ensure_open()?;
        let result = self.run_inner(doc);
        if let Err(e) = &result {
            doc.fail(e);
        }
        result
    }

    fn run_inner(&mut self, doc: &mut Document) -> Result<()> {
        doc.prepare_search()?;
        self.candidates = Candidate::generate(doc);
        self.stats.candidates = self.candidates.len();
        tracing::debug!(
            document = doc.id(),
            candidates = self.candidates.len(),
            options = doc.graph.len(),
            "search started"
        );

        let root = self.alloc(None, Branch::Root);
        let (refinement, selected, delta) = {
            let path = SearchPath::new(&self.nodes, root);
            let seed = doc.graph.root_refinement_seed();
            let refinement = doc.graph.expand(&path, &seed, self.config.max_expand_iterations)?;
            let mut changed = refinement.clone();
            let selected = doc.graph.mark_selected(&path, &refinement, &mut changed);
            doc.graph.mark_excluded(&path, &refinement, &mut changed);
            let delta = doc.adjust_weight(&path, &mut self.journal, root, &changed)?;
            (refinement, selected, delta)
        };
        {
            let node = &mut self.nodes[root.index()];
            node.refinement = refinement;
            node.selected = selected;
            node.weight_delta = delta;
            node.accumulated_weight = delta;
        }

        let result = self.search(doc, root);
        self.journal.restore(root, Restore::Old, &mut doc.activations);
        result?;

        tracing::debug!(
            document = doc.id(),
            steps = self.stats.steps,
            leaves = self.stats.leaves,
            cache_hits = self.stats.cache_hits,
            best = %self.best_weight(),
            interrupted = self.interrupted,
            "search finished"
        );
        Ok(())
    }

    fn alloc(&mut self, parent: Option<SearchNodeId>, branch: Branch) -> SearchNodeId {
        let id = SearchNodeId(self.nodes.len() as u32);
        let (selected_parent, excluded_parent, level) = match parent {
            None => (None, None, 0),
            Some(p) => {
                let p_node = &self.nodes[p.index()];
                match branch {
                    Branch::Excluded => (p_node.selected_parent, Some(p), p_node.level + 1),
                    _ => (Some(p), p_node.excluded_parent, p_node.level + 1),
                }
            }
        };
        self.nodes.push(SearchNode {
            id,
            stamp: self.nodes.len() as u64 + 1,
            parent,
            selected_parent,
            excluded_parent,
            branch,
            level,
            refinement: Vec::new(),
            selected: Vec::new(),
            weight_delta: NormWeight::ZERO,
            accumulated_weight: NormWeight::ZERO,
        });
        self.stats.nodes = self.nodes.len();
        self.journal.open(id);
        id
    }

    fn search(&mut self, doc: &mut Document, node: SearchNodeId) -> Result<NormWeight> {
        let level = self.nodes[node.index()].level;
        let Some(option) = self.candidates.get(level).map(|c| c.option) else {
            return Ok(self.process_leaf(doc, node));
        };
        let acc = self.nodes[node.index()].accumulated_weight;

        let (refinement, already_selected, already_excluded) = {
            let path = SearchPath::new(&self.nodes, node);
            let refinement = doc.graph.expand(&path, &[option], self.config.max_expand_iterations)?;
            let selected = doc.graph.check_selected(&path, &refinement);
            let excluded = doc.graph.check_excluded(&path, &refinement);
            (refinement, selected && !excluded, excluded)
        };
        self.nodes[node.index()].refinement = refinement.clone();

        if self.stats.steps >= self.config.max_search_steps {
            if !self.interrupted {
                tracing::warn!(
                    steps = self.stats.steps,
                    best = %self.best_weight(),
                    "search step budget exhausted, keeping the best interpretation found so far"
                );
            }
            self.interrupted = true;
            return Ok(NormWeight::ZERO);
        }
        self.stats.steps += 1;
        tracing::trace!(
            node = node.0,
            level,
            option = option.0,
            already_selected,
            already_excluded,
            acc = %acc,
            "deciding candidate"
        );

        let undecided = !already_selected && !already_excluded;
        let cached = if undecided && self.config.use_cached_decisions {
            self.cached_decision(doc, node, level)
        } else {
            None
        };
        if cached.is_some() {
            self.stats.cache_hits += 1;
        }

        let mut selected_weight = NormWeight::ZERO;
        let mut excluded_weight = NormWeight::ZERO;

        if !already_excluded && self.should_explore(cached, true, acc) {
            selected_weight = self.descend(doc, node, Branch::Selected, &refinement)?;
        }
        if self.interrupted {
            return Ok(NormWeight::ZERO);
        }
        if !already_selected && self.should_explore(cached, false, acc) {
            excluded_weight = self.descend(doc, node, Branch::Excluded, &refinement)?;
        }
        if self.interrupted {
            return Ok(NormWeight::ZERO);
        }

        let select = selected_weight.norm() >= excluded_weight.norm();
        let chosen = if select { selected_weight } else { excluded_weight };
        if cached.is_none() && undecided && self.config.use_cached_decisions {
            self.candidates[level].cache.insert(
                node,
                CachedDecision { selected: select, gain: chosen.sub(acc) },
            );
        }
        Ok(chosen)
    }

    fn should_explore(&self, cached: Option<CachedDecision>, selected: bool, acc: NormWeight) -> bool {
        match cached {
            None => true,
            Some(c) => c.selected == selected && acc.add(c.gain).norm() >= self.best_norm(),
        }
    }

    /// Creates the child of `parent` for `branch`, applies its decision,
    /// searches below it and undoes its changes again.
    fn descend(
        &mut self,
        doc: &mut Document,
        parent: SearchNodeId,
        branch: Branch,
        refinement: &[OptionId],
    ) -> Result<NormWeight> {
        let child = self.alloc(Some(parent), branch);
        let option = self.candidates[self.nodes[parent.index()].level].option;

        let applied = {
            let path = SearchPath::new(&self.nodes, child);
            let mut changed = Vec::new();
            let mut marked = Vec::new();
            match branch {
                Branch::Excluded => doc.graph.mark_excluded_option(&path, option, &mut changed),
                _ => {
                    marked = doc.graph.mark_selected(&path, refinement, &mut changed);
                    doc.graph.mark_excluded(&path, refinement, &mut changed);
                }
            }
            doc.adjust_weight(&path, &mut self.journal, child, &changed)
                .map(|delta| (delta, marked))
        };
        let (delta, marked) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                self.journal.restore(child, Restore::Old, &mut doc.activations);
                return Err(e);
            }
        };

        let acc = self.nodes[parent.index()].accumulated_weight.add(delta);
        {
            let node = &mut self.nodes[child.index()];
            node.selected = marked;
            node.weight_delta = delta;
            node.accumulated_weight = acc;
        }

        let result = self.search(doc, child);
        self.journal.restore(child, Restore::Old, &mut doc.activations);
        result
    }

    fn process_leaf(&mut self, doc: &Document, node: SearchNodeId) -> NormWeight {
        let acc = self.nodes[node.index()].accumulated_weight;
        self.stats.leaves += 1;
        debug_assert!(
            self.coverage_is_exclusive(doc, node),
            "conflicting options both selected at leaf {}",
            node.0
        );

        let improves = acc.norm() > self.best_norm();
        if improves || self.config.record_leaves {
            let selected = self.covered_selected(doc, node);
            if self.config.record_leaves {
                self.stats.leaf_summaries.push(LeafSummary {
                    node,
                    weight: acc,
                    selected: selected.clone(),
                    path: self.path_weights(node),
                });
            }
            if improves {
                tracing::debug!(node = node.0, weight = %acc, "new best interpretation");
                self.best = Some(node);
                self.best_selected = selected;
            }
        }
        acc
    }

    fn coverage_is_exclusive(&self, doc: &Document, node: SearchNodeId) -> bool {
        let path = SearchPath::new(&self.nodes, node);
        doc.graph.iter().all(|o| {
            doc.graph.coverage(&path, o.id) != Decision::Selected
                || o.conflicts
                    .iter()
                    .all(|c| doc.graph.coverage(&path, *c) != Decision::Selected)
        })
    }

    fn covered_selected(&self, doc: &Document, node: SearchNodeId) -> Vec<OptionId> {
        let path = SearchPath::new(&self.nodes, node);
        doc.graph
            .iter()
            .filter(|o| doc.graph.coverage(&path, o.id) == Decision::Selected)
            .map(|o| o.id)
            .collect()
    }

    fn path_weights(&self, node: SearchNodeId) -> Vec<NormWeight> {
        let mut weights = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let n = &self.nodes[id.index()];
            weights.push(n.accumulated_weight);
            current = n.parent;
        }
        weights.reverse();
        weights
    }

    /// Looks for a decision memoized for the candidate at `level` under a
    /// path equivalent to the one leading to `node`.
    ///
    /// Paths are compared level by level; a level where they branched
    /// differently only disqualifies the entry when that decision still
    /// feeds positive recurrent input into undecided options.
    fn cached_decision(&self, doc: &Document, node: SearchNodeId, level: usize) -> Option<CachedDecision> {
        let path = SearchPath::new(&self.nodes, node);
        'entries: for (&stored, &entry) in &self.candidates[level].cache {
            let (mut n, mut c) = (node, stored);
            loop {
                let (n_node, c_node) = (&self.nodes[n.index()], &self.nodes[c.index()]);
                let (Some(np), Some(cp)) = (n_node.parent, c_node.parent) else {
                    break;
                };
                if n_node.branch != c_node.branch && self.affects_unknown(doc, &path, np) {
                    continue 'entries;
                }
                n = np;
                c = cp;
            }
            return Some(entry);
        }
        None
    }

    fn affects_unknown(&self, doc: &Document, path: &SearchPath<'_>, node: SearchNodeId) -> bool {
        let options: BTreeSet<OptionId> = self.nodes[node.index()].refinement.iter().copied().collect();
        options.iter().any(|o| {
            doc.graph.opt(*o).activations.iter().any(|a| {
                doc.activations[a.index()].outputs.iter().any(|l| {
                    let link = &doc.links[l.index()];
                    link.recurrent
                        && !link.is_negative()
                        && !link.inactive
                        && doc.graph.coverage(path, doc.activations[link.output.index()].option)
                            == Decision::Unknown
                })
            })
        })
    }

    /// Replays the best branch onto `doc` and copies every activation's
    /// rounds and decision into its final slots.
    pub fn materialize(&self, doc: &mut Document) -> Vec<OptionId> {
        if let Some(best) = self.best {
            let mut path = Vec::new();
            let mut current = Some(best);
            while let Some(id) = current {
                path.push(id);
                current = self.nodes[id.index()].parent;
            }
            for id in path.into_iter().rev() {
                self.journal.restore(id, Restore::New, &mut doc.activations);
            }
        }
        for a in doc.activations.iter_mut() {
            a.final_rounds = a.rounds.clone();
            a.final_decision = a.decision;
        }
        self.best_selected.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::InputSpec;
    use crate::model::{SynapseSpec, UnitSpec};
    use crate::network::Network;
    use proptest::prelude::*;

    fn node(id: u32, stamp: u64, parent: Option<u32>) -> SearchNode {
        SearchNode {
            id: SearchNodeId(id),
            stamp,
            parent: parent.map(SearchNodeId),
            selected_parent: None,
            excluded_parent: None,
            branch: Branch::Root,
            level: 0,
            refinement: Vec::new(),
            selected: Vec::new(),
            weight_delta: NormWeight::ZERO,
            accumulated_weight: NormWeight::ZERO,
        }
    }

    #[test]
    fn test_path_covers_ancestor_stamps_only() {
        // root(1) -> a(2) -> c(4); root -> b(3)
        let nodes = vec![node(0, 1, None), node(1, 2, Some(0)), node(2, 3, Some(0)), node(3, 4, Some(1))];
        let c = SearchPath::new(&nodes, SearchNodeId(3));
        assert_eq!(c.stamp(), 4);
        assert!(c.is_covered(4));
        assert!(c.is_covered(2));
        assert!(c.is_covered(1));
        assert!(!c.is_covered(3));
        assert!(!c.is_covered(0));
        assert!(!c.is_covered(9));

        let b = SearchPath::new(&nodes, SearchNodeId(2));
        assert!(!b.is_covered(2));
        assert!(b.is_covered(1));
    }

    /// Words at disjoint ranges, each readable as A or B with an inhibitor
    /// between the two readings.
    fn competing_words(a_weight: f64, b_weight: f64, values: &[f64]) -> Document {
        let net = Network::new();
        let w = net.add_unit(UnitSpec::input("W"));
        let a = net.add_unit(UnitSpec::excitatory("A").with_bias(-1.0));
        let b = net.add_unit(UnitSpec::excitatory("B").with_bias(-1.0));
        let n = net.add_unit(UnitSpec::inhibitory("N"));
        net.connect(a, SynapseSpec::new(w, a_weight)).unwrap();
        net.connect(b, SynapseSpec::new(w, b_weight)).unwrap();
        net.connect(n, SynapseSpec::new(a, 1.0)).unwrap();
        net.connect(n, SynapseSpec::new(b, 1.0)).unwrap();
        net.connect(a, SynapseSpec::new(n, -10.0).recurrent()).unwrap();
        net.connect(b, SynapseSpec::new(n, -10.0).recurrent()).unwrap();

        let config = SearchConfig::default().with_recorded_leaves(true);
        let mut doc = Document::with_config(&net, "w w w", config);
        for (i, v) in values.iter().enumerate() {
            let begin = i as i32 * 2;
            doc.add_input(w, InputSpec::new(begin, begin + 1).with_value(*v)).unwrap();
        }
        doc
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_leaves_never_select_both_sides_of_a_conflict(
            a_weight in 1.0f64..6.0,
            b_weight in 1.0f64..6.0,
            values in proptest::collection::vec(0.2f64..1.0, 1..4),
        ) {
            let mut doc = competing_words(a_weight, b_weight, &values);
            let result = doc.process().unwrap();
            prop_assert_eq!(result.stats.leaf_summaries.len(), result.stats.leaves);

            for leaf in &result.stats.leaf_summaries {
                for &x in &leaf.selected {
                    for y in doc.graph().conflicts(x) {
                        prop_assert!(!leaf.selected.contains(&y), "{} and {} both selected at {:?}", x, y, leaf.node);
                    }
                }
            }

            for a in doc.activations() {
                if a.final_decision == Decision::Selected {
                    let value = a.final_rounds.last().value;
                    prop_assert!(doc.within_bounds(a.id, value), "{} = {} outside [{}, {}]", a.id, value, a.lower_bound, a.upper_bound);
                }
            }
        }
    }
}
