//! Resolution status of an interpretation option.

use serde::{Deserialize, Serialize};

/// Tri-state decision mirrored by activations from their option's coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Decision {
    #[default]
    Unknown,
    Selected,
    Excluded,
}

impl Decision {
    pub fn is_selected(self) -> bool {
        self == Decision::Selected
    }

    pub fn is_decided(self) -> bool {
        self != Decision::Unknown
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Decision::Unknown => "UNKNOWN",
            Decision::Selected => "SELECTED",
            Decision::Excluded => "EXCLUDED",
        };
        f.write_str(s)
    }
}
