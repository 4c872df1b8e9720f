//! # interp-search: Interpretation Search Engine
//!
//! Finds the most coherent interpretation of a text over a network of
//! units. Each document builds activations (a unit firing at a text range
//! under an interpretation option), discovers which interpretations exclude
//! each other, and runs a branch-and-bound search in which every candidate
//! decision is followed by a multi-round fixpoint over recurrent links.
//!
//! ## Design Principles
//!
//! 1. **Arenas, not pointers**: activations, links, options and search nodes
//!    live in per-document vectors and refer to each other by dense ids
//! 2. **Shared model, private documents**: a [`Network`] is read through
//!    per-document unit snapshots, so documents never touch each other
//! 3. **Stamps over flags**: search markers and traversal visits carry
//!    generation counters, scoped by search path instead of being cleared
//! 4. **Journaled search**: every state change is undone on backtrack and
//!    the best branch is replayed at the end
//!
//! ## Quick Start
//!
//! ```rust
//! use interp_search::{Document, InputSpec, Network, SynapseSpec, UnitSpec};
//!
//! let net = Network::new();
//! let word = net.add_unit(UnitSpec::input("word"));
//! let place = net.add_unit(UnitSpec::excitatory("place").with_bias(-1.0));
//! let person = net.add_unit(UnitSpec::excitatory("person").with_bias(-1.0));
//! let inhib = net.add_unit(UnitSpec::inhibitory("entity"));
//! net.connect(place, SynapseSpec::new(word, 4.0)).unwrap();
//! net.connect(person, SynapseSpec::new(word, 3.0)).unwrap();
//! net.connect(inhib, SynapseSpec::new(place, 1.0)).unwrap();
//! net.connect(inhib, SynapseSpec::new(person, 1.0)).unwrap();
//! net.connect(place, SynapseSpec::new(inhib, -10.0).recurrent()).unwrap();
//! net.connect(person, SynapseSpec::new(inhib, -10.0).recurrent()).unwrap();
//!
//! let mut doc = Document::new(&net, "Jackson");
//! doc.add_input(word, InputSpec::new(0, 7)).unwrap();
//! let result = doc.process().unwrap();
//!
//! assert_eq!(result.final_activations(place).len(), 1);
//! assert!(result.final_activations(person).is_empty());
//! ```
//!
//! ## Layers
//!
//! | Module | Holds |
//! |--------|-------|
//! | [`model`] | ranges, relations, weights, round states, unit/synapse data |
//! | [`network`] | shared unit and synapse registry |
//! | [`interpretation`] | option DAG, conflicts, coverage and expansion |
//! | [`activation`] | activation records, links, state and bound computation |
//! | [`search`] | branch-and-bound tree, memoization, undo journal |
//! | [`document`] | per-text arenas and the processing entry point |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod network;
pub mod interpretation;
pub mod activation;
pub mod queue;
mod linker;
pub mod search;
pub mod document;
pub mod result;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    Range, Operator, Relation,
    NormWeight, State, Rounds, Decision,
    Unit, UnitId, UnitKind, UnitSpec,
    Synapse, SynapseId, SynapseSpec, SlotRelation, RangeOutput,
    TransferFunction, DistanceModifier,
};

// ============================================================================
// Re-exports: Documents and search
// ============================================================================

pub use activation::{Activation, ActivationId, InputSpec, Link, LinkId};
pub use config::SearchConfig;
pub use document::{Document, DocumentStatus};
pub use interpretation::{InterpretationGraph, OptionId, OptionKind};
pub use network::{Network, UnitSnapshot};
pub use result::{DocumentResult, FinalActivation};
pub use search::{SearchStats, SearchTree};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Oscillation of activation {activation} past round {round}")]
    Oscillation {
        activation: ActivationId,
        round: u32,
        /// The activation and its neighbours, one line each.
        dump: Vec<String>,
    },

    #[error("Malformed conflict graph: no closure after {iterations} iterations ({} options)", .options.len())]
    MalformedConflictGraph { iterations: usize, options: Vec<OptionId> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Document failed: {0}")]
    DocumentFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
