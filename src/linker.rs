//! Activation linking.
//!
//! When an activation's upper bound turns positive it is offered to every
//! downstream unit it structurally feeds:
//!
//! - a **conjunctive** unit (slot synapses) joins it with relevant
//!   activations on its other slots, subject to the slot relations, and
//!   creates one activation per consistent assignment;
//! - any other unit creates one activation per structural input.
//!
//! New activations are then linked by range to every activation their
//! non-structural synapses connect with. Negative recurrent links register
//! conflicts between the interpretations involved.

use crate::activation::{Activation, ActivationId, Link, LinkId};
use crate::document::Document;
use crate::interpretation::OptionId;
use crate::model::{Range, Synapse, SynapseId, UnitId, UnitKind};
use crate::network::UnitSnapshot;
use crate::{Error, Result};

impl Document {
    /// Offers `act` to every unit it structurally feeds.
    pub(crate) fn link_downstream(&mut self, act: ActivationId) -> Result<()> {
        let unit = self.activations[act.index()].unit;
        let source = self.unit_snapshot(unit)?;
        for syn in &source.outputs {
            if syn.recurrent || syn.is_negative() || syn.inactive {
                continue;
            }
            let target = self.unit_snapshot(syn.output)?;
            if !target.is_structural(syn) {
                continue;
            }
            if target.conjunctive {
                self.join(&target, syn.id, act)?;
            } else {
                let range = self.activations[act.index()].range;
                self.create_structural(&target, range, vec![(syn.id, act)])?;
            }
        }
        Ok(())
    }

    /// Joins `act`, bound to slot synapse `fixed`, with relevant activations
    /// on the target's remaining slots.
    fn join(&mut self, target: &UnitSnapshot, fixed: SynapseId, act: ActivationId) -> Result<()> {
        let slots = target.slots();
        let Some(fixed_slot) = slots.iter().position(|s| s.id == fixed) else {
            return Ok(());
        };

        let mut candidates = Vec::with_capacity(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            let acts = if i == fixed_slot { vec![act] } else { self.relevant_activations(slot.input) };
            if acts.is_empty() {
                return Ok(());
            }
            candidates.push(acts);
        }

        let mut matches = Vec::new();
        join_step(&self.activations, &slots, &candidates, &mut Vec::with_capacity(slots.len()), &mut matches);

        for assignment in matches {
            let range = output_range(&self.activations, &slots, &assignment);
            if !range.is_resolved() {
                tracing::debug!(unit = target.id().0, %range, "join produced an unresolved range");
                continue;
            }
            let inputs = slots.iter().map(|s| s.id).zip(assignment).collect();
            self.create_structural(target, range, inputs)?;
        }
        Ok(())
    }

    fn relevant_activations(&self, unit: UnitId) -> Vec<ActivationId> {
        self.activations_of(unit)
            .into_iter()
            .filter(|a| self.activations[a.index()].relevant)
            .collect()
    }

    /// Creates the activation of `target` identified by `range` and its
    /// structural inputs, or returns the existing one.
    fn create_structural(
        &mut self,
        target: &UnitSnapshot,
        range: Range,
        inputs: Vec<(SynapseId, ActivationId)>,
    ) -> Result<ActivationId> {
        let existing = self.activations_of(target.id()).into_iter().find(|id| {
            let a = &self.activations[id.index()];
            a.range == range && a.structural == inputs
        });
        if let Some(id) = existing {
            return Ok(id);
        }

        let input_options: Vec<OptionId> = inputs
            .iter()
            .map(|(_, a)| self.activations[a.index()].option)
            .collect();
        let (option, anchor) = if target.competing {
            let primitive = self.graph.add_primitive();
            let option = self.graph.add_conjunction(input_options.into_iter().chain([primitive]))?;
            (option, primitive)
        } else {
            let option = self.graph.add_conjunction(input_options)?;
            (option, option)
        };

        let id = self.push_activation(Activation::new(
            ActivationId(self.activations.len() as u32),
            target.id(),
            range,
            option,
            anchor,
        ));
        self.activations[id.index()].structural = inputs.clone();
        tracing::debug!(
            activation = id.0,
            unit = %target.unit.label,
            %range,
            option = option.0,
            "activation created"
        );

        for (syn, input) in inputs {
            self.connect_activations(input, id, syn)?;
        }
        self.link_by_range(id)?;
        self.enqueue_bound(id);
        Ok(id)
    }

    /// Links `act` to and from existing activations over every
    /// non-structural synapse whose range relation holds.
    pub(crate) fn link_by_range(&mut self, act: ActivationId) -> Result<()> {
        let unit = self.activations[act.index()].unit;
        let snapshot = self.unit_snapshot(unit)?;

        for syn in &snapshot.inputs {
            if snapshot.is_structural(syn) {
                continue;
            }
            let output_range = self.activations[act.index()].range;
            for input in self.activations_of(syn.input) {
                if input != act && syn.range_match.evaluate(&self.activations[input.index()].range, &output_range) {
                    self.connect_activations(input, act, syn.id)?;
                }
            }
        }

        for syn in &snapshot.outputs {
            let target = self.unit_snapshot(syn.output)?;
            if target.is_structural(syn) {
                continue;
            }
            let input_range = self.activations[act.index()].range;
            for output in self.activations_of(syn.output) {
                if output != act && syn.range_match.evaluate(&input_range, &self.activations[output.index()].range) {
                    self.connect_activations(act, output, syn.id)?;
                }
            }
        }
        Ok(())
    }

    /// Instantiates synapse `synapse` between two activations. Returns
    /// `None` when the link already exists.
    pub(crate) fn connect_activations(
        &mut self,
        input: ActivationId,
        output: ActivationId,
        synapse: SynapseId,
    ) -> Result<Option<LinkId>> {
        let duplicate = self.activations[output.index()].inputs.iter().any(|l| {
            let link = &self.links[l.index()];
            link.synapse == synapse && link.input == input
        });
        if duplicate {
            return Ok(None);
        }

        let snapshot = self.unit_snapshot(self.activations[output.index()].unit)?;
        let syn: &Synapse = snapshot
            .input(synapse)
            .ok_or_else(|| Error::NotFound(format!("synapse {synapse} into unit {}", snapshot.id())))?;
        if syn.input != self.activations[input.index()].unit {
            return Err(Error::InvalidInput(format!(
                "synapse {synapse} does not start at the unit of activation {input}"
            )));
        }

        let id = LinkId(self.links.len() as u32);
        self.links.push(Link {
            id,
            synapse,
            input,
            output,
            weight: syn.weight,
            recurrent: syn.recurrent,
            distance: syn.distance,
            inactive: syn.inactive,
        });

        let links = &self.links;
        let inputs = &mut self.activations[output.index()].inputs;
        let at = inputs.partition_point(|l| (links[l.index()].synapse, links[l.index()].input) < (synapse, input));
        inputs.insert(at, id);
        let outputs = &mut self.activations[input.index()].outputs;
        let at = outputs.partition_point(|l| (links[l.index()].synapse, links[l.index()].output) < (synapse, output));
        outputs.insert(at, id);

        if syn.recurrent && syn.is_negative() && !syn.inactive {
            self.register_conflicts(input, output)?;
        }
        self.enqueue_bound(output);
        Ok(Some(id))
    }

    /// Registers conflicts between the interpretation of `output` and every
    /// interpretation `input` inhibits on behalf of.
    fn register_conflicts(&mut self, input: ActivationId, output: ActivationId) -> Result<()> {
        let (target_option, target_anchor) = {
            let a = &self.activations[output.index()];
            (a.option, a.anchor)
        };
        for origin in self.conflict_origins(input) {
            let (origin_option, origin_anchor) = {
                let a = &self.activations[origin.index()];
                (a.option, a.anchor)
            };
            if origin_anchor == target_anchor
                || self.graph.contains(target_option, origin_anchor)
                || self.graph.contains(origin_option, target_anchor)
            {
                continue;
            }
            self.graph.add_conflict(target_anchor, origin_anchor)?;
        }
        Ok(())
    }

    /// Activations an inhibitory activation stands in for: its positive
    /// non-recurrent inputs, recursively through nested inhibitors.
    fn conflict_origins(&mut self, act: ActivationId) -> Vec<ActivationId> {
        let v = self.next_visit();
        let mut origins = Vec::new();
        let mut stack = vec![act];
        while let Some(id) = stack.pop() {
            let a = &mut self.activations[id.index()];
            if a.visited == v {
                continue;
            }
            a.visited = v;
            let unit = a.unit;
            if self.snapshot_of(unit).unit.kind != UnitKind::Inhibitory {
                origins.push(id);
                continue;
            }
            for lid in &self.activations[id.index()].inputs {
                let link = &self.links[lid.index()];
                if !link.recurrent && !link.is_negative() && !link.inactive {
                    stack.push(link.input);
                }
            }
        }
        origins
    }
}

/// Depth-first enumeration of slot assignments satisfying the slot relations.
fn join_step(
    acts: &[Activation],
    slots: &[&Synapse],
    candidates: &[Vec<ActivationId>],
    chosen: &mut Vec<ActivationId>,
    out: &mut Vec<Vec<ActivationId>>,
) {
    let i = chosen.len();
    if i == slots.len() {
        out.push(chosen.clone());
        return;
    }
    for &c in &candidates[i] {
        if !chosen.contains(&c) && relations_hold(acts, slots, chosen, c) {
            chosen.push(c);
            join_step(acts, slots, candidates, chosen, out);
            chosen.pop();
        }
    }
}

/// Checks candidate `c` for the next slot against every already chosen slot.
fn relations_hold(acts: &[Activation], slots: &[&Synapse], chosen: &[ActivationId], c: ActivationId) -> bool {
    let i = chosen.len();
    let range = &acts[c.index()].range;
    let position = |slot: u16| slots.iter().position(|s| s.slot == Some(slot));

    for rel in &slots[i].relations {
        if let Some(j) = position(rel.slot).filter(|j| *j < i)
            && !rel.relation.evaluate(range, &acts[chosen[j].index()].range)
        {
            return false;
        }
    }
    for (j, earlier) in slots[..i].iter().enumerate() {
        for rel in &earlier.relations {
            if position(rel.slot) == Some(i) && !rel.relation.evaluate(&acts[chosen[j].index()].range, range) {
                return false;
            }
        }
    }
    true
}

/// Output range of a join: begin and end are taken from the slots whose
/// synapses export them.
fn output_range(acts: &[Activation], slots: &[&Synapse], assignment: &[ActivationId]) -> Range {
    let mut begin = None;
    let mut end = None;
    for (slot, act) in slots.iter().zip(assignment) {
        let range = acts[act.index()].range;
        if slot.range_output.begin {
            begin = range.begin_bound();
        }
        if slot.range_output.end {
            end = range.end_bound();
        }
    }
    Range::from_bounds(begin, end)
}
