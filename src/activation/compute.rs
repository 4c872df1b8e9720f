//! State, bound and self-reference computations over a document's
//! activation arena.

use super::{ActivationId, Link, LinkId};
use crate::document::Document;
use crate::interpretation::{CoverageScope, OptionId};
use crate::model::{Decision, NormWeight, State, SynapseId};

/// Slack allowed when comparing values against bounds.
const BOUND_TOLERANCE: f64 = 1e-9;

impl Document {
    /// Computes the state of `act` at `round` under `scope` along with the
    /// decision it was computed for.
    pub(crate) fn compute_state(
        &mut self,
        scope: &dyn CoverageScope,
        act: ActivationId,
        round: u32,
    ) -> (State, Decision) {
        let (option, input_value, unit, inputs) = {
            let a = &self.activations[act.index()];
            (a.option, a.input_value, a.unit, a.inputs.clone())
        };
        let decision = self.graph.coverage(scope, option);

        if let Some(value) = input_value {
            let state = if decision.is_selected() { State::input(value) } else { State::ZERO };
            return (state, decision);
        }

        let snapshot = self.snapshot_of(unit);
        let bias = snapshot.unit.bias;
        let transfer = snapshot.unit.transfer;
        let neg_rec_sum = snapshot.neg_rec_sum;

        // Max-pool per synapse: the strongest input value wins, first on ties.
        let mut pooled: Vec<(LinkId, State)> = Vec::with_capacity(inputs.len());
        for lid in inputs {
            let link = self.links[lid.index()].clone();
            if link.inactive || link.input == act {
                continue;
            }
            let state = self.input_state(scope, &link, round);
            match pooled.last_mut() {
                Some((prev, best)) if self.links[prev.index()].synapse == link.synapse => {
                    if state.value > best.value {
                        *prev = lid;
                        *best = state;
                    }
                }
                _ => pooled.push((lid, state)),
            }
        }

        let mut net = bias;
        let mut net_pos = bias;
        let mut fired = -1;
        for (lid, input) in &pooled {
            let link = &self.links[lid.index()];
            let x = input.value * link.weight * self.distance_factor(link);
            net += x;
            if x > 0.0 {
                net_pos += x;
            }
            if fired < 0 && !link.recurrent && !link.is_negative() && net >= 0.0 {
                fired = input.fired + 1;
            }
        }

        let selected = decision.is_selected();
        let w = if selected { (-neg_rec_sum).min(net).max(0.0) } else { 0.0 };
        let n = if decision.is_decided() { (-neg_rec_sum).min(net_pos).max(0.0) } else { 0.0 };
        let state = if selected {
            State::new(transfer.apply(net), net, fired, NormWeight::new(w, n))
        } else {
            State::new(0.0, 0.0, -1, NormWeight::new(0.0, n))
        };
        (state, decision)
    }

    /// Input state seen through `link` when computing `round`.
    fn input_state(&mut self, scope: &dyn CoverageScope, link: &Link, round: u32) -> State {
        if !link.recurrent {
            return self.activations[link.input.index()].rounds.get(round);
        }
        if link.is_negative() && self.is_self_referencing(Some(scope), link.input, link.output) {
            return State::ZERO;
        }
        if round == 0 {
            let option = self.activations[link.input.index()].option;
            if self.graph.coverage(scope, option).is_selected() {
                State::new(1.0, 0.0, 0, NormWeight::ZERO)
            } else {
                State::ZERO
            }
        } else {
            self.activations[link.input.index()].rounds.get(round - 1)
        }
    }

    fn distance_factor(&self, link: &Link) -> f64 {
        match link.distance {
            Some(d) => d.apply(
                &self.activations[link.input.index()].range,
                &self.activations[link.output.index()].range,
            ),
            None => 1.0,
        }
    }

    /// Lower and upper bound of `act`'s value over every interpretation
    /// that may still be chosen.
    pub(crate) fn compute_bounds(&mut self, act: ActivationId) -> (f64, f64) {
        let (input_value, unit, inputs) = {
            let a = &self.activations[act.index()];
            (a.input_value, a.unit, a.inputs.clone())
        };
        if let Some(value) = input_value {
            return (value, value);
        }

        let snapshot = self.snapshot_of(unit);
        let transfer = snapshot.unit.transfer;
        let mut lb = snapshot.unit.bias;
        let mut ub = snapshot.unit.bias + snapshot.pos_rec_sum;

        // (synapse, lb contribution, ub contribution) pooled per synapse.
        let mut pooled: Vec<(SynapseId, f64, f64)> = Vec::new();
        for lid in inputs {
            let link = self.links[lid.index()].clone();
            if link.inactive || link.input == act {
                continue;
            }
            let (in_lb, in_ub) = {
                let input = &self.activations[link.input.index()];
                (input.lower_bound, input.upper_bound)
            };
            let factor = link.weight * self.distance_factor(&link);

            let (lb_part, ub_part) = match (link.recurrent, link.is_negative()) {
                (true, false) => continue,
                (true, true) => (link.weight, 0.0),
                (false, false) => (in_lb * factor, in_ub * factor),
                (false, true) => {
                    let ub_part = if self.is_self_referencing(None, link.input, act) {
                        0.0
                    } else {
                        in_lb * factor
                    };
                    (link.weight, ub_part)
                }
            };

            match pooled.last_mut() {
                Some((syn, lb_max, ub_max)) if *syn == link.synapse => {
                    if link.is_negative() {
                        *lb_max = lb_max.min(lb_part);
                        *ub_max = ub_max.min(ub_part);
                    } else {
                        *lb_max = lb_max.max(lb_part);
                        *ub_max = ub_max.max(ub_part);
                    }
                }
                _ => pooled.push((link.synapse, lb_part, ub_part)),
            }
        }

        for (_, lb_part, ub_part) in pooled {
            lb += lb_part;
            ub += ub_part;
        }

        let (lb, ub) = (transfer.apply(lb), transfer.apply(ub));
        debug_assert!(lb <= ub + BOUND_TOLERANCE, "lower bound {lb} above upper bound {ub} for activation {act}");
        (lb, ub)
    }

    /// Whether the bounds of `act` constrain its value under `scope`.
    ///
    /// Bounds assume every non-recurrent input delivers a value inside its
    /// own bounds. That holds when `act` and its whole non-recurrent input
    /// cone are covered-selected and none of them hit the bound-pass cap.
    pub(crate) fn bounds_apply(&self, scope: &dyn CoverageScope, act: ActivationId) -> bool {
        let mut seen = hashbrown::HashSet::new();
        let mut stack = vec![act];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let a = &self.activations[id.index()];
            if a.bound_passes > self.config.max_bound_passes
                || !self.graph.coverage(scope, a.option).is_selected()
            {
                return false;
            }
            for lid in &a.inputs {
                let link = &self.links[lid.index()];
                if !link.recurrent && !link.inactive && link.input != id {
                    stack.push(link.input);
                }
            }
        }
        true
    }

    /// `value` lies within the stored bounds of `act`.
    pub(crate) fn within_bounds(&self, act: ActivationId, value: f64) -> bool {
        let a = &self.activations[act.index()];
        a.lower_bound - BOUND_TOLERANCE <= value && value <= a.upper_bound + BOUND_TOLERANCE
    }

    /// Whether inhibitor `inhibitor` draws its input from `origin`'s own
    /// interpretation, so that `origin` would be inhibiting itself.
    ///
    /// With a scope only covered-selected inputs are followed. The walk stops
    /// at the configured depth and then reports no self-reference.
    pub(crate) fn is_self_referencing(
        &mut self,
        scope: Option<&dyn CoverageScope>,
        inhibitor: ActivationId,
        origin: ActivationId,
    ) -> bool {
        let origin_option = self.activations[origin.index()].option;
        let max_depth = self.config.max_self_reference_depth;
        let v = self.next_visit();

        let mut stack = vec![(inhibitor, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let a = &mut self.activations[id.index()];
            if a.visited == v {
                continue;
            }
            a.visited = v;
            if id == origin {
                return true;
            }
            let option = a.option;
            if option != OptionId::ROOT && self.graph.contains(origin_option, option) {
                return true;
            }
            if depth >= max_depth {
                continue;
            }
            for lid in self.activations[id.index()].inputs.clone() {
                let link = &self.links[lid.index()];
                if link.recurrent || link.inactive {
                    continue;
                }
                let input = link.input;
                if let Some(scope) = scope {
                    let input_option = self.activations[input.index()].option;
                    if self.graph.coverage(scope, input_option) != Decision::Selected {
                        continue;
                    }
                }
                stack.push((input, depth + 1));
            }
        }
        false
    }
}
