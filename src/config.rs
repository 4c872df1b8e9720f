//! Search and propagation limits.
//!
//! Every field has a default, so a JSON document only needs to name the
//! values it overrides:
//!
//! ```rust
//! use interp_search::SearchConfig;
//!
//! let config = SearchConfig::from_json(r#"{ "max_search_steps": 500 }"#).unwrap();
//! assert_eq!(config.max_search_steps, 500);
//! assert_eq!(config.max_self_reference_depth, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Highest round a value change may propagate from before the
    /// document is declared oscillating.
    pub max_rounds: u32,
    /// Search-node visits before the search gives up and returns its best.
    pub max_search_steps: usize,
    /// Depth of the input walk that detects self-referencing inhibition.
    pub max_self_reference_depth: usize,
    /// Iteration ceiling of the consistent-closure expansion.
    pub max_expand_iterations: usize,
    /// Upper-bound change that re-triggers downstream bound computation.
    pub upper_bound_epsilon: f64,
    /// Bound recomputations allowed per activation while draining.
    pub max_bound_passes: usize,
    /// Memoize branch decisions per candidate.
    pub use_cached_decisions: bool,
    /// Keep a summary of every leaf in the search statistics.
    pub record_leaves: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            max_search_steps: 100_000,
            max_self_reference_depth: 5,
            max_expand_iterations: 1_000,
            upper_bound_epsilon: 0.01,
            max_bound_passes: 64,
            use_cached_decisions: true,
            record_leaves: false,
        }
    }
}

impl SearchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_expand_iterations == 0 {
            return Err(Error::Config("max_expand_iterations must be positive".into()));
        }
        if self.upper_bound_epsilon.is_nan() || self.upper_bound_epsilon < 0.0 {
            return Err(Error::Config(format!(
                "upper_bound_epsilon must be non-negative, got {}",
                self.upper_bound_epsilon
            )));
        }
        Ok(())
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_max_search_steps(mut self, steps: usize) -> Self {
        self.max_search_steps = steps;
        self
    }

    pub fn with_cached_decisions(mut self, enabled: bool) -> Self {
        self.use_cached_decisions = enabled;
        self
    }

    pub fn with_recorded_leaves(mut self, enabled: bool) -> Self {
        self.record_leaves = enabled;
        self
    }
}
