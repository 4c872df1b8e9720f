//! # Activations
//!
//! The numeric firing record of one unit at one range under one
//! interpretation option, plus the weighted links between records.
//!
//! Activations and links live in per-document arenas and refer to each
//! other through [`ActivationId`] / [`LinkId`] indices. The state and bound
//! computations are in [`compute`].

pub mod compute;

use serde::{Deserialize, Serialize};

use crate::interpretation::OptionId;
use crate::model::{Decision, DistanceModifier, Range, Rounds, State, SynapseId, UnitId};
use crate::search::SearchNodeId;

/// Index of an activation in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivationId(pub u32);

impl ActivationId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ActivationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a link in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl LinkId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Link
// ============================================================================

/// Instance of a synapse between two activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub synapse: SynapseId,
    pub input: ActivationId,
    pub output: ActivationId,
    pub weight: f64,
    pub recurrent: bool,
    pub distance: Option<DistanceModifier>,
    pub inactive: bool,
}

impl Link {
    pub fn is_negative(&self) -> bool {
        self.weight <= 0.0
    }
}

// ============================================================================
// Activation
// ============================================================================

#[derive(Debug, Clone)]
pub struct Activation {
    pub id: ActivationId,
    pub unit: UnitId,
    pub range: Range,
    /// Relational position id, used to order search candidates.
    pub rid: Option<i32>,
    pub option: OptionId,
    /// Option against which this activation's conflicts are registered.
    pub anchor: OptionId,
    /// Fixed value of an input activation.
    pub input_value: Option<f64>,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub decision: Decision,
    /// Length of the longest non-recurrent input chain.
    pub sequence: u32,
    pub(crate) rounds: Rounds,
    pub(crate) final_rounds: Rounds,
    pub(crate) final_decision: Decision,
    pub(crate) inputs: Vec<LinkId>,
    pub(crate) outputs: Vec<LinkId>,
    /// Structural inputs this activation was created from, by synapse.
    pub(crate) structural: Vec<(SynapseId, ActivationId)>,
    /// Upper bound has become positive and downstream units were notified.
    pub(crate) relevant: bool,
    pub(crate) bound_queued: bool,
    pub(crate) bound_passes: usize,
    pub(crate) journal_slot: Option<(SearchNodeId, usize)>,
    pub(crate) visited: u64,
}

impl Activation {
    pub(crate) fn new(
        id: ActivationId,
        unit: UnitId,
        range: Range,
        option: OptionId,
        anchor: OptionId,
    ) -> Self {
        Self {
            id,
            unit,
            range,
            rid: None,
            option,
            anchor,
            input_value: None,
            lower_bound: 0.0,
            upper_bound: 0.0,
            decision: Decision::Unknown,
            sequence: 0,
            rounds: Rounds::new(),
            final_rounds: Rounds::new(),
            final_decision: Decision::Unknown,
            inputs: Vec::new(),
            outputs: Vec::new(),
            structural: Vec::new(),
            relevant: false,
            bound_queued: false,
            bound_passes: 0,
            journal_slot: None,
            visited: 0,
        }
    }

    pub fn is_input(&self) -> bool {
        self.input_value.is_some()
    }

    /// Rounds as currently set by the search.
    pub fn rounds(&self) -> &Rounds {
        &self.rounds
    }

    pub fn state(&self) -> State {
        self.rounds.last()
    }

    /// Rounds of the best interpretation once the document is processed.
    pub fn final_rounds(&self) -> &Rounds {
        &self.final_rounds
    }

    pub fn final_state(&self) -> State {
        self.final_rounds.last()
    }

    pub fn final_decision(&self) -> Decision {
        self.final_decision
    }

    pub fn is_final_activation(&self) -> bool {
        self.final_state().value > 0.0
    }

    pub fn inputs(&self) -> &[LinkId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[LinkId] {
        &self.outputs
    }

    pub fn is_relevant(&self) -> bool {
        self.relevant
    }
}

// ============================================================================
// InputSpec
// ============================================================================

/// Parameters of a fixed-value input activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub range: Range,
    pub value: f64,
    pub rid: Option<i32>,
    pub option: Option<OptionId>,
}

impl InputSpec {
    pub fn new(begin: i32, end: i32) -> Self {
        Self {
            range: Range::new(begin, end),
            value: 1.0,
            rid: None,
            option: None,
        }
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = range;
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn with_rid(mut self, rid: i32) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn with_option(mut self, option: OptionId) -> Self {
        self.option = Some(option);
        self
    }
}
