//! Units (neuron-like nodes) and the synapses connecting them.
//!
//! These are the long-lived model entities shared read-only by every
//! document; see [`crate::network::Network`] for the registry that owns them.

use serde::{Deserialize, Serialize};

use super::range::{Range, Relation};

/// Opaque unit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u32);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque synapse identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SynapseId(pub u32);

impl std::fmt::Display for SynapseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a unit in the activation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// Fed directly with fixed values by the caller.
    Input,
    /// Regular unit; conjunctive when its structural synapses carry slots.
    Excitatory,
    /// Disjunctive unit whose activations stand in for their inputs when
    /// conflicts are collected.
    Inhibitory,
}

/// Non-decreasing transfer function mapping `net` to `value`.
///
/// Every variant is `0` for `net <= 0` and never exceeds `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferFunction {
    #[default]
    RectifiedHyperbolicTangent,
    RectifiedScaledLogisticSigmoid,
    ClampedLinear,
}

impl TransferFunction {
    pub fn apply(&self, net: f64) -> f64 {
        if net <= 0.0 {
            return 0.0;
        }
        match self {
            TransferFunction::RectifiedHyperbolicTangent => net.tanh(),
            TransferFunction::RectifiedScaledLogisticSigmoid => (2.0 / (1.0 + (-net).exp())) - 1.0,
            TransferFunction::ClampedLinear => net.min(1.0),
        }
    }
}

/// Scales a link's contribution by the positional distance of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistanceModifier {
    /// `1 / (1 + gap / decay)` where `gap` counts positions between the ranges.
    Gap { decay: f64 },
    /// Fraction of the input range covered by the output range.
    Overlap,
}

impl DistanceModifier {
    /// Factor in `[0, 1]`; unresolved ranges are not penalized.
    pub fn apply(&self, input: &Range, output: &Range) -> f64 {
        if !input.is_resolved() || !output.is_resolved() {
            return 1.0;
        }
        match *self {
            DistanceModifier::Gap { decay } => {
                if decay <= 0.0 {
                    return 1.0;
                }
                1.0 / (1.0 + input.gap(output) as f64 / decay)
            }
            DistanceModifier::Overlap => {
                let len = input.length();
                if len <= 0 {
                    return 1.0;
                }
                input.overlap_length(output) as f64 / len as f64
            }
        }
    }
}

// ============================================================================
// Unit
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub label: String,
    pub kind: UnitKind,
    pub bias: f64,
    pub transfer: TransferFunction,
}

/// Construction parameters for [`Unit`]; the network assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub label: String,
    pub kind: UnitKind,
    pub bias: f64,
    pub transfer: TransferFunction,
}

impl UnitSpec {
    pub fn input(label: impl Into<String>) -> Self {
        Self::new(label, UnitKind::Input)
    }

    pub fn excitatory(label: impl Into<String>) -> Self {
        Self::new(label, UnitKind::Excitatory)
    }

    pub fn inhibitory(label: impl Into<String>) -> Self {
        Self::new(label, UnitKind::Inhibitory)
    }

    fn new(label: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            label: label.into(),
            kind,
            bias: 0.0,
            transfer: TransferFunction::default(),
        }
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferFunction) -> Self {
        self.transfer = transfer;
        self
    }
}

// ============================================================================
// Synapse
// ============================================================================

/// Which ends of an input range carry over to the output range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RangeOutput {
    pub begin: bool,
    pub end: bool,
}

impl RangeOutput {
    pub const NONE: RangeOutput = RangeOutput { begin: false, end: false };
    pub const BEGIN: RangeOutput = RangeOutput { begin: true, end: false };
    pub const END: RangeOutput = RangeOutput { begin: false, end: true };
    pub const BOTH: RangeOutput = RangeOutput { begin: true, end: true };
}

/// Positional constraint between this synapse's input and the input bound
/// to another slot of the same conjunctive unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRelation {
    pub slot: u16,
    /// Evaluated as `relation.evaluate(this_input, other_input)`.
    pub relation: Relation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: SynapseId,
    pub input: UnitId,
    pub output: UnitId,
    pub weight: f64,
    pub recurrent: bool,
    /// Join slot for conjunctive units.
    pub slot: Option<u16>,
    /// Required relation of input range to output range for range linking.
    pub range_match: Relation,
    pub range_output: RangeOutput,
    pub relations: Vec<SlotRelation>,
    pub distance: Option<DistanceModifier>,
    pub inactive: bool,
}

impl Synapse {
    pub fn is_negative(&self) -> bool {
        self.weight <= 0.0
    }
}

/// Construction parameters for [`Synapse`]; the network assigns id and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapseSpec {
    pub input: UnitId,
    pub weight: f64,
    pub recurrent: bool,
    pub slot: Option<u16>,
    pub range_match: Relation,
    pub range_output: RangeOutput,
    pub relations: Vec<SlotRelation>,
    pub distance: Option<DistanceModifier>,
    pub inactive: bool,
}

impl SynapseSpec {
    pub fn new(input: UnitId, weight: f64) -> Self {
        Self {
            input,
            weight,
            recurrent: false,
            slot: None,
            range_match: Relation::EQUALS,
            range_output: RangeOutput::BOTH,
            relations: Vec::new(),
            distance: None,
            inactive: false,
        }
    }

    pub fn recurrent(mut self) -> Self {
        self.recurrent = true;
        self
    }

    pub fn with_slot(mut self, slot: u16) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_range_match(mut self, relation: Relation) -> Self {
        self.range_match = relation;
        self
    }

    pub fn with_range_output(mut self, output: RangeOutput) -> Self {
        self.range_output = output;
        self
    }

    pub fn with_relation(mut self, slot: u16, relation: Relation) -> Self {
        self.relations.push(SlotRelation { slot, relation });
        self
    }

    pub fn with_distance(mut self, distance: DistanceModifier) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.inactive = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_functions_are_rectified_and_bounded() {
        for f in [
            TransferFunction::RectifiedHyperbolicTangent,
            TransferFunction::RectifiedScaledLogisticSigmoid,
            TransferFunction::ClampedLinear,
        ] {
            assert_eq!(f.apply(-3.0), 0.0);
            assert_eq!(f.apply(0.0), 0.0);
            assert!(f.apply(0.5) > 0.0);
            assert!(f.apply(50.0) <= 1.0);
            assert!(f.apply(2.0) >= f.apply(1.0));
        }
    }

    #[test]
    fn test_distance_modifiers() {
        let gap = DistanceModifier::Gap { decay: 2.0 };
        assert_eq!(gap.apply(&Range::new(0, 2), &Range::new(2, 4)), 1.0);
        assert_eq!(gap.apply(&Range::new(0, 2), &Range::new(4, 6)), 0.5);
        assert_eq!(gap.apply(&Range::UNBOUNDED, &Range::new(4, 6)), 1.0);

        let overlap = DistanceModifier::Overlap;
        assert_eq!(overlap.apply(&Range::new(0, 4), &Range::new(2, 8)), 0.5);
        assert_eq!(overlap.apply(&Range::new(0, 4), &Range::new(4, 8)), 0.0);
    }

    #[test]
    fn test_synapse_spec_builder() {
        let spec = SynapseSpec::new(UnitId(3), -2.0)
            .recurrent()
            .with_range_match(Relation::OVERLAPS)
            .with_relation(0, Relation::BEGIN_TO_END_EQUALS);
        assert!(spec.recurrent);
        assert_eq!(spec.slot, None);
        assert_eq!(spec.range_match, Relation::OVERLAPS);
        assert_eq!(spec.relations.len(), 1);
    }
}
