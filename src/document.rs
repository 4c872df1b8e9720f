//! # Document
//!
//! One unit of input text processed against a shared [`Network`]. A
//! document owns every per-text structure: the activation and link arenas,
//! the interpretation graph, and the work queues. Documents never share
//! state with each other; the network is only read, through unit snapshots
//! taken the first time a document touches a unit.
//!
//! ```rust
//! use interp_search::{Document, InputSpec, Network, SynapseSpec, UnitSpec};
//!
//! let net = Network::new();
//! let word = net.add_unit(UnitSpec::input("word"));
//! let entity = net.add_unit(UnitSpec::excitatory("entity").with_bias(-1.0));
//! net.connect(entity, SynapseSpec::new(word, 3.0)).unwrap();
//!
//! let mut doc = Document::new(&net, "Jackson");
//! doc.add_input(word, InputSpec::new(0, 7)).unwrap();
//! let result = doc.process().unwrap();
//! assert_eq!(result.final_activations(entity).len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;

use crate::activation::{Activation, ActivationId, InputSpec, Link, LinkId};
use crate::config::SearchConfig;
use crate::interpretation::{CoverageScope, InterpretationGraph, OptionId};
use crate::model::{NormWeight, Range, Relation, Rounds, SynapseId, UnitId};
use crate::network::{Network, UnitSnapshot};
use crate::queue::{PropagationQueue, UpperBoundQueue};
use crate::result::DocumentResult;
use crate::search::journal::Journal;
use crate::search::{SearchNodeId, SearchTree};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatus {
    /// Accepting inputs.
    Open,
    /// Search finished; final states are available.
    Processed,
    /// A fatal error aborted processing.
    Failed(String),
}

pub struct Document {
    id: u64,
    content: String,
    network: Network,
    pub(crate) config: SearchConfig,
    units: BTreeMap<UnitId, Arc<UnitSnapshot>>,
    pub(crate) graph: InterpretationGraph,
    pub(crate) activations: Vec<Activation>,
    pub(crate) links: Vec<Link>,
    by_unit: BTreeMap<UnitId, Vec<ActivationId>>,
    pub(crate) queue: PropagationQueue,
    pub(crate) bound_queue: UpperBoundQueue,
    visit_counter: u64,
    status: DocumentStatus,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("activations", &self.activations.len())
            .field("options", &self.graph.len())
            .field("status", &self.status)
            .finish()
    }
}

impl Document {
    pub fn new(network: &Network, content: impl Into<String>) -> Self {
        Self::with_config(network, content, SearchConfig::default())
    }

    pub fn with_config(network: &Network, content: impl Into<String>, config: SearchConfig) -> Self {
        Self {
            id: network.next_document_id(),
            content: content.into(),
            network: network.clone(),
            config,
            units: BTreeMap::new(),
            graph: InterpretationGraph::new(),
            activations: Vec::new(),
            links: Vec::new(),
            by_unit: BTreeMap::new(),
            queue: PropagationQueue::new(),
            bound_queue: UpperBoundQueue::default(),
            visit_counter: 0,
            status: DocumentStatus::Open,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn status(&self) -> &DocumentStatus {
        &self.status
    }

    pub fn graph(&self) -> &InterpretationGraph {
        &self.graph
    }

    /// Direct access for callers declaring their own options, conflicts or
    /// fixed decisions before processing.
    pub fn graph_mut(&mut self) -> &mut InterpretationGraph {
        &mut self.graph
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match &self.status {
            DocumentStatus::Open => Ok(()),
            DocumentStatus::Processed => {
                Err(Error::InvalidInput(format!("document {} is already processed", self.id)))
            }
            DocumentStatus::Failed(reason) => Err(Error::DocumentFailed(format!("document {}: {reason}", self.id))),
        }
    }

    /// Rejects ranges that end before they begin. Sentinel ends pass.
    fn check_range(range: Range) -> Result<()> {
        if range.begin > range.end {
            return Err(Error::InvalidInput(format!("range {range} ends before it begins")));
        }
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: &Error) {
        tracing::error!(document = self.id, error = %error, "document processing failed");
        self.status = DocumentStatus::Failed(error.to_string());
    }

    pub(crate) fn next_visit(&mut self) -> u64 {
        self.visit_counter += 1;
        self.visit_counter
    }

    // ========================================================================
    // Units
    // ========================================================================

    /// Snapshot of `unit`, taken from the network on first use.
    pub(crate) fn unit_snapshot(&mut self, unit: UnitId) -> Result<Arc<UnitSnapshot>> {
        if let Some(snapshot) = self.units.get(&unit) {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(self.network.snapshot(unit)?);
        self.units.insert(unit, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Snapshot of a unit that already has activations in this document.
    pub(crate) fn snapshot_of(&self, unit: UnitId) -> &UnitSnapshot {
        &self.units[&unit]
    }

    pub fn unit_label(&self, unit: UnitId) -> Option<&str> {
        self.units.get(&unit).map(|s| s.unit.label.as_str())
    }

    // ========================================================================
    // Activations
    // ========================================================================

    pub(crate) fn push_activation(&mut self, act: Activation) -> ActivationId {
        let id = act.id;
        let (unit, option, anchor) = (act.unit, act.option, act.anchor);
        self.activations.push(act);
        self.by_unit.entry(unit).or_default().push(id);
        self.graph.register_activation(option, id);
        if anchor != option {
            self.graph.register_activation(anchor, id);
        }
        id
    }

    /// Adds a fixed-value input activation and propagates its consequences.
    pub fn add_input(&mut self, unit: UnitId, spec: InputSpec) -> Result<ActivationId> {
        self.ensure_open()?;
        if !spec.value.is_finite() {
            return Err(Error::InvalidInput(format!("input value {} is not finite", spec.value)));
        }
        Self::check_range(spec.range)?;
        let option = spec.option.unwrap_or(OptionId::ROOT);
        if self.graph.get(option).is_none() {
            return Err(Error::NotFound(format!("interpretation option {option}")));
        }
        self.unit_snapshot(unit)?;

        let mut act = Activation::new(ActivationId(self.activations.len() as u32), unit, spec.range, option, option);
        act.rid = spec.rid;
        act.input_value = Some(spec.value.clamp(0.0, 1.0));
        let id = self.push_activation(act);
        tracing::debug!(document = self.id, activation = id.0, unit = unit.0, range = %spec.range, "input added");

        self.link_by_range(id)?;
        self.enqueue_bound(id);
        self.process_bounds()?;
        Ok(id)
    }

    /// Creates an activation of `unit` under `option` without structural
    /// inputs. Range links are added; call [`Document::propagate`] to
    /// update bounds and link downstream units.
    pub fn create_activation(&mut self, unit: UnitId, range: Range, option: OptionId) -> Result<ActivationId> {
        self.ensure_open()?;
        Self::check_range(range)?;
        if self.graph.get(option).is_none() {
            return Err(Error::NotFound(format!("interpretation option {option}")));
        }
        self.unit_snapshot(unit)?;
        let id = self.push_activation(Activation::new(
            ActivationId(self.activations.len() as u32),
            unit,
            range,
            option,
            option,
        ));
        self.link_by_range(id)?;
        self.enqueue_bound(id);
        Ok(id)
    }

    /// Links two existing activations through `synapse`.
    pub fn add_link(&mut self, input: ActivationId, output: ActivationId, synapse: SynapseId) -> Result<Option<LinkId>> {
        self.ensure_open()?;
        for id in [input, output] {
            if self.activation(id).is_none() {
                return Err(Error::NotFound(format!("activation {id}")));
            }
        }
        self.connect_activations(input, output, synapse)
    }

    /// Drains pending bound updates, creating downstream activations.
    pub fn propagate(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.process_bounds()
    }

    pub fn activation(&self, id: ActivationId) -> Option<&Activation> {
        self.activations.get(id.index())
    }

    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.index())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Activations of `unit` in creation order.
    pub fn activations_of(&self, unit: UnitId) -> Vec<ActivationId> {
        self.by_unit.get(&unit).cloned().unwrap_or_default()
    }

    /// Activations whose range stands in `relation` to `range`, optionally
    /// restricted to one unit.
    pub fn select(&self, unit: Option<UnitId>, range: Range, relation: Relation) -> Vec<ActivationId> {
        self.activations
            .iter()
            .filter(|a| unit.is_none_or(|u| a.unit == u))
            .filter(|a| relation.evaluate(&a.range, &range))
            .map(|a| a.id)
            .collect()
    }

    /// Activations of `unit` with a positive final value.
    pub fn final_activations(&self, unit: UnitId) -> Vec<ActivationId> {
        self.activations_of(unit)
            .into_iter()
            .filter(|id| self.activations[id.index()].is_final_activation())
            .collect()
    }

    /// Current rounds of every activation, by id.
    pub fn snapshot_rounds(&self) -> Vec<Rounds> {
        self.activations.iter().map(|a| a.rounds.clone()).collect()
    }

    /// One line per activation, in id order.
    pub fn activations_to_string(&self) -> String {
        let mut out = String::new();
        for a in &self.activations {
            self.write_activation(&mut out, a);
        }
        out
    }

    fn write_activation(&self, out: &mut String, a: &Activation) {
        let label = self.unit_label(a.unit).unwrap_or("?");
        let _ = writeln!(
            out,
            "{} {} {} opt:{} {} lb:{:.3} ub:{:.3} seq:{} {}",
            a.id,
            label,
            a.range,
            a.option,
            a.decision,
            a.lower_bound,
            a.upper_bound,
            a.sequence,
            a.rounds.last()
        );
    }

    pub(crate) fn oscillation(&self, act: ActivationId, round: u32) -> Error {
        let a = &self.activations[act.index()];
        let mut lines = vec![format!("{} {} rounds {}", a.id, self.unit_label(a.unit).unwrap_or("?"), a.rounds)];
        for lid in a.inputs.iter().chain(&a.outputs) {
            let link = &self.links[lid.index()];
            let other = if link.output == act { link.input } else { link.output };
            let mut line = String::new();
            self.write_activation(&mut line, &self.activations[other.index()]);
            lines.push(line.trim_end().to_string());
        }
        tracing::error!(document = self.id, activation = act.0, round, "value oscillation detected");
        Error::Oscillation { activation: act, round, dump: lines }
    }

    // ========================================================================
    // Search support
    // ========================================================================

    /// Re-evaluates every activation of the options in `changed` and their
    /// descendants under `scope`, returning the summed weight change.
    pub(crate) fn adjust_weight(
        &mut self,
        scope: &dyn CoverageScope,
        journal: &mut Journal,
        node: SearchNodeId,
        changed: &[OptionId],
    ) -> Result<NormWeight> {
        let mut affected = BTreeSet::new();
        for &option in changed {
            for o in self.graph.descendants(option) {
                affected.extend(self.graph.opt(o).activations.iter().copied());
            }
        }
        for act in affected {
            self.enqueue_value(0, act);
        }
        self.process_queue(scope, journal, node)
    }

    /// Settles bounds and sequences before the search starts.
    pub(crate) fn prepare_search(&mut self) -> Result<()> {
        self.process_bounds()?;
        self.compute_sequences();
        Ok(())
    }

    /// Length of the longest non-recurrent input chain of every activation.
    fn compute_sequences(&mut self) {
        let n = self.activations.len();
        let mut done = vec![false; n];
        let mut open = vec![false; n];
        for start in 0..n {
            let mut stack = vec![(start, false)];
            while let Some((i, expanded)) = stack.pop() {
                let inputs: Vec<usize> = self.activations[i]
                    .inputs
                    .iter()
                    .map(|l| &self.links[l.index()])
                    .filter(|l| !l.recurrent && !l.inactive)
                    .map(|l| l.input.index())
                    .collect();
                if expanded {
                    let sequence = inputs
                        .iter()
                        .filter(|j| done[**j])
                        .map(|j| self.activations[*j].sequence + 1)
                        .max()
                        .unwrap_or(0);
                    self.activations[i].sequence = sequence;
                    done[i] = true;
                    open[i] = false;
                    continue;
                }
                if done[i] || open[i] {
                    continue;
                }
                open[i] = true;
                stack.push((i, true));
                stack.extend(inputs.into_iter().filter(|j| !done[*j] && !open[*j]).map(|j| (j, false)));
            }
        }
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Searches for the best interpretation and fixes every activation's
    /// final state accordingly.
    pub fn process(&mut self) -> Result<DocumentResult> {
        let mut tree = SearchTree::new(self.config.clone());
        tree.run(self)?;
        let selected = tree.materialize(self);
        self.status = DocumentStatus::Processed;

        let result = DocumentResult::new(self, &tree, selected);
        tracing::info!(
            document = self.id,
            activations = self.activations.len(),
            options = self.graph.len(),
            candidates = tree.stats().candidates,
            steps = tree.stats().steps,
            best = %result.best_weight,
            interrupted = result.interrupted,
            "document processed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SynapseSpec, UnitSpec};

    fn word_network() -> (Network, UnitId, UnitId) {
        let net = Network::new();
        let word = net.add_unit(UnitSpec::input("word"));
        let entity = net.add_unit(UnitSpec::excitatory("entity").with_bias(-1.0));
        net.connect(entity, SynapseSpec::new(word, 3.0)).unwrap();
        (net, word, entity)
    }

    #[test]
    fn test_document_ids_are_unique_per_network() {
        let (net, _, _) = word_network();
        let a = Document::new(&net, "a");
        let b = Document::new(&net, "b");
        assert_ne!(a.id(), b.id());
        assert_eq!(b.content(), "b");
    }

    #[test]
    fn test_add_input_creates_downstream_activation() {
        let (net, word, entity) = word_network();
        let mut doc = Document::new(&net, "Jackson Cash");
        doc.add_input(word, InputSpec::new(0, 7).with_rid(0)).unwrap();
        doc.add_input(word, InputSpec::new(8, 12).with_rid(1)).unwrap();
        assert_eq!(doc.activations_of(entity).len(), 2);
        assert_eq!(doc.select(Some(entity), Range::new(8, 12), Relation::EQUALS).len(), 1);
        assert_eq!(doc.select(None, Range::new(0, 12), Relation::CONTAINED_IN).len(), 4);
        assert!(doc.activations_to_string().contains("entity"));
    }

    #[test]
    fn test_input_value_is_clamped_and_validated() {
        let (net, word, _) = word_network();
        let mut doc = Document::new(&net, "x");
        let a = doc.add_input(word, InputSpec::new(0, 1).with_value(3.0)).unwrap();
        assert_eq!(doc.activation(a).unwrap().input_value, Some(1.0));
        assert!(matches!(
            doc.add_input(word, InputSpec::new(0, 1).with_value(f64::NAN)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            doc.add_input(UnitId(99), InputSpec::new(0, 1)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let (net, word, entity) = word_network();
        let mut doc = Document::new(&net, "reversed");
        assert!(matches!(
            doc.add_input(word, InputSpec::new(5, 2)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            doc.create_activation(entity, Range::new(3, 1), OptionId::ROOT),
            Err(Error::InvalidInput(_))
        ));
        assert!(doc.activations().is_empty());

        // Open-ended ranges are fine.
        doc.create_activation(entity, Range::from_bounds(Some(4), None), OptionId::ROOT).unwrap();
        assert_eq!(doc.activations().len(), 1);
    }

    #[test]
    fn test_sequences_follow_longest_chain() {
        let (net, word, entity) = word_network();
        let mut doc = Document::new(&net, "x");
        let w = doc.add_input(word, InputSpec::new(0, 1)).unwrap();
        doc.prepare_search().unwrap();
        assert_eq!(doc.activation(w).unwrap().sequence, 0);
        let e = doc.activations_of(entity)[0];
        assert_eq!(doc.activation(e).unwrap().sequence, 1);
    }

    #[test]
    fn test_processed_document_rejects_inputs() {
        let (net, word, entity) = word_network();
        let mut doc = Document::new(&net, "x");
        doc.add_input(word, InputSpec::new(0, 1)).unwrap();
        let result = doc.process().unwrap();
        assert_eq!(doc.status(), &DocumentStatus::Processed);
        assert_eq!(result.final_activations(entity).len(), 1);
        assert_eq!(doc.final_activations(entity).len(), 1);
        assert!(matches!(doc.add_input(word, InputSpec::new(1, 2)), Err(Error::InvalidInput(_))));
        assert!(doc.process().is_err());
    }
}
