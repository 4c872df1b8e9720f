//! Serializable outcome of processing a document.
//!
//! ```rust
//! use interp_search::{Document, InputSpec, Network, UnitSpec};
//! use interp_search::result::DocumentResult;
//!
//! let net = Network::new();
//! let word = net.add_unit(UnitSpec::input("word"));
//! let mut doc = Document::new(&net, "hi");
//! doc.add_input(word, InputSpec::new(0, 2)).unwrap();
//! let result = doc.process().unwrap();
//!
//! let json = result.to_json().unwrap();
//! assert_eq!(DocumentResult::from_json(&json).unwrap(), result);
//! ```

use serde::{Deserialize, Serialize};

use crate::activation::ActivationId;
use crate::document::Document;
use crate::interpretation::OptionId;
use crate::model::{Decision, NormWeight, Range, State, UnitId};
use crate::search::{SearchStats, SearchTree};
use crate::{Error, Result};

/// Final state of one activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalActivation {
    pub id: ActivationId,
    pub unit: UnitId,
    pub label: String,
    pub range: Range,
    pub option: OptionId,
    pub state: State,
    pub decision: Decision,
    /// Training signal, `target - value` once targets are supplied.
    #[serde(default)]
    pub error_signal: f64,
}

impl FinalActivation {
    /// Part of the best interpretation.
    pub fn is_final(&self) -> bool {
        self.state.value > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_id: u64,
    /// The step budget ran out; the result is the best found so far.
    pub interrupted: bool,
    pub selected_options: Vec<OptionId>,
    pub best_weight: NormWeight,
    pub stats: SearchStats,
    pub activations: Vec<FinalActivation>,
}

impl DocumentResult {
    pub(crate) fn new(doc: &Document, tree: &SearchTree, selected_options: Vec<OptionId>) -> Self {
        let activations = doc
            .activations()
            .iter()
            .map(|a| FinalActivation {
                id: a.id,
                unit: a.unit,
                label: doc.unit_label(a.unit).unwrap_or_default().to_string(),
                range: a.range,
                option: a.option,
                state: a.final_state(),
                decision: a.final_decision(),
                error_signal: 0.0,
            })
            .collect();
        Self {
            document_id: doc.id(),
            interrupted: tree.is_interrupted(),
            selected_options,
            best_weight: tree.best_weight(),
            stats: tree.stats().clone(),
            activations,
        }
    }

    pub fn activation(&self, id: ActivationId) -> Option<&FinalActivation> {
        self.activations.get(id.0 as usize).filter(|a| a.id == id)
    }

    /// Final activations of `unit`, in id order.
    pub fn final_activations(&self, unit: UnitId) -> Vec<&FinalActivation> {
        self.activations
            .iter()
            .filter(|a| a.unit == unit && a.is_final())
            .collect()
    }

    pub fn is_selected(&self, option: OptionId) -> bool {
        self.selected_options.contains(&option)
    }

    pub fn set_error_signal(&mut self, id: ActivationId, error: f64) -> Result<()> {
        let index = self
            .activations
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(format!("activation {id}")))?;
        self.activations[index].error_signal = error;
        Ok(())
    }

    /// Sets `target - value` as the error signal of every listed activation.
    pub fn output_errors(&mut self, targets: &[(ActivationId, f64)]) -> Result<()> {
        for &(id, target) in targets {
            let value = self
                .activation(id)
                .map(|a| a.state.value)
                .ok_or_else(|| Error::NotFound(format!("activation {id}")))?;
            self.set_error_signal(id, target - value)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::InputSpec;
    use crate::model::{SynapseSpec, UnitSpec};
    use crate::network::Network;

    fn processed() -> (DocumentResult, UnitId) {
        let net = Network::new();
        let word = net.add_unit(UnitSpec::input("word"));
        let entity = net.add_unit(UnitSpec::excitatory("entity").with_bias(-1.0));
        net.connect(entity, SynapseSpec::new(word, 3.0)).unwrap();
        let mut doc = Document::new(&net, "Jackson");
        doc.add_input(word, InputSpec::new(0, 7)).unwrap();
        (doc.process().unwrap(), entity)
    }

    #[test]
    fn test_result_lists_every_activation() {
        let (result, entity) = processed();
        assert_eq!(result.activations.len(), 2);
        assert!(!result.interrupted);
        assert!(result.is_selected(OptionId::ROOT));
        let finals = result.final_activations(entity);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].label, "entity");
        assert!((finals[0].state.value - 2.0f64.tanh()).abs() < 1e-9);
    }

    #[test]
    fn test_output_errors() {
        let (mut result, entity) = processed();
        let id = result.final_activations(entity)[0].id;
        result.output_errors(&[(id, 1.0)]).unwrap();
        let signal = result.activation(id).unwrap().error_signal;
        assert!((signal - (1.0 - 2.0f64.tanh())).abs() < 1e-9);
        assert!(matches!(
            result.set_error_signal(ActivationId(99), 0.5),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let (result, _) = processed();
        let json = result.to_json().unwrap();
        assert!(json.contains("\"best_weight\""));
        assert_eq!(DocumentResult::from_json(&json).unwrap(), result);
    }
}
