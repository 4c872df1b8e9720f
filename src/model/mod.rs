//! # Model
//!
//! Plain data shared by every layer: ranges and relations, normalized
//! weights, per-round states and the unit/synapse descriptions.
//!
//! No document state lives here: no arenas, locks or search markers.

pub mod range;
pub mod weight;
pub mod state;
pub mod decision;
pub mod unit;

pub use range::{Range, Operator, Relation};
pub use weight::{NormWeight, WEIGHT_TOLERANCE};
pub use state::{State, Rounds};
pub use decision::Decision;
pub use unit::{
    Unit, UnitId, UnitKind, UnitSpec,
    Synapse, SynapseId, SynapseSpec, SlotRelation, RangeOutput,
    TransferFunction, DistanceModifier,
};
