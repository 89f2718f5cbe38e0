//! Refinement request vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Category of rewrite requested from the refine collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementKind {
    Improve,
    Shorten,
    Expand,
    Rephrase,
    FixGrammar,
    /// Free-form instruction carried entirely by the prompt.
    #[default]
    Custom,
}

impl RefinementKind {
    pub const ALL: [RefinementKind; 6] = [
        Self::Improve,
        Self::Shorten,
        Self::Expand,
        Self::Rephrase,
        Self::FixGrammar,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improve => "improve",
            Self::Shorten => "shorten",
            Self::Expand => "expand",
            Self::Rephrase => "rephrase",
            Self::FixGrammar => "fix_grammar",
            Self::Custom => "custom",
        }
    }
}

impl Display for RefinementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown refinement kind `{0}`; expected improve|shorten|expand|rephrase|fix_grammar|custom")]
pub struct UnknownRefinementKind(pub String);

impl FromStr for RefinementKind {
    type Err = UnknownRefinementKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownRefinementKind(value.trim().to_string()))
    }
}
