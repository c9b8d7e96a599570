//! Engine-level errors.

use crate::gateway::GatewayError;
use crate::store::StoreError;
use thiserror::Error;

/// How much raw output an error keeps for diagnostics.
const SNIPPET_CHARS: usize = 200;

/// Pipeline stage names used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Bible,
    Opening,
    Scenario,
    Outline,
    Draft,
    Polish,
    Profile,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Bible => "bible",
            Stage::Opening => "opening",
            Stage::Scenario => "scenario",
            Stage::Outline => "outline",
            Stage::Draft => "draft",
            Stage::Polish => "polish",
            Stage::Profile => "profile",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from chapter generation and story management.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Generation failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Malformed {stage} output: {snippet}")]
    MalformedOutput { stage: Stage, snippet: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Story {0} already has a chapter in progress")]
    Busy(String),

    #[error("Story {story} has no character named {name}")]
    CharacterNotFound { story: String, name: String },
}

impl EngineError {
    pub fn malformed(stage: Stage, raw: &str) -> Self {
        EngineError::MalformedOutput {
            stage,
            snippet: raw.trim().chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_truncates() {
        let raw = "x".repeat(500);
        match EngineError::malformed(Stage::Draft, &raw) {
            EngineError::MalformedOutput { stage, snippet } => {
                assert_eq!(stage, Stage::Draft);
                assert_eq!(snippet.len(), SNIPPET_CHARS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let err = EngineError::malformed(Stage::Outline, "oops");
        assert_eq!(err.to_string(), "Malformed outline output: oops");

        let err = EngineError::CharacterNotFound {
            story: "s1".to_string(),
            name: "Ren".to_string(),
        };
        assert_eq!(err.to_string(), "Story s1 has no character named Ren");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Bible.to_string(), "bible");
        assert_eq!(Stage::Polish.to_string(), "polish");
        assert_eq!(Stage::Profile.to_string(), "profile");
    }
}
