//! Persisted story progress state and the records it carries.
//!
//! [`StoryProgressState`] is the continuation token for a story: every
//! chapter generation reads the previous one and produces the next. It is
//! created at story inception and never deleted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Progress value a freshly minted scenario starts at.
pub const SEED_PROGRESS: u8 = 5;

/// Upper bound of `instance_progress`.
pub const MAX_PROGRESS: u8 = 100;

/// Narrative stage of the current chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Investigation,
    Climax,
    Resolution,
    Rest,
    Finale,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Setup,
        Phase::Investigation,
        Phase::Climax,
        Phase::Resolution,
        Phase::Rest,
        Phase::Finale,
    ];

    /// Derive the in-scenario phase from a progress value.
    pub fn from_progress(progress: u8) -> Phase {
        match progress {
            0..=15 => Phase::Setup,
            16..=75 => Phase::Investigation,
            76..=95 => Phase::Climax,
            _ => Phase::Resolution,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Investigation => "investigation",
            Phase::Climax => "climax",
            Phase::Resolution => "resolution",
            Phase::Rest => "rest",
            Phase::Finale => "finale",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A self-contained story arc ("dungeon") the protagonist must clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub difficulty_tier: String,
    #[serde(default, alias = "background")]
    pub background_summary: String,
    #[serde(default)]
    pub mechanics: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub win_conditions: Vec<String>,
}

/// Whether a scenario is driven by rules to obey or missions to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSetKind {
    /// Regulations and riddles (rule-horror scenarios).
    Rules,
    /// Tasks and objectives.
    #[default]
    Missions,
}

/// The rule sheet or mission board shown inside a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub title: String,
    #[serde(default)]
    pub kind: RuleSetKind,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub hidden_truth: String,
}

/// Per-story progress state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryProgressState {
    pub phase: Phase,
    /// Completion of the current scenario, 0–100.
    pub instance_progress: u8,
    /// Scenario cycles started so far (≥ 1).
    pub cycle_number: u32,
    pub arc_name: String,
    #[serde(default)]
    pub current_scenario: Option<Scenario>,
    #[serde(default)]
    pub current_rule_set: Option<RuleSet>,
    #[serde(default)]
    pub used_theme_names: BTreeSet<String>,
    /// Clues resolved since the current scenario began.
    #[serde(default)]
    pub resolved_clue_count: u32,
    /// Progress increment suggested by the last chapter plan.
    #[serde(default)]
    pub pending_increment: Option<u8>,
}

impl StoryProgressState {
    /// State written by the opening chapter.
    pub fn inception() -> Self {
        Self {
            phase: Phase::Setup,
            instance_progress: SEED_PROGRESS,
            cycle_number: 1,
            arc_name: volume_name(1),
            current_scenario: None,
            current_rule_set: None,
            used_theme_names: BTreeSet::new(),
            resolved_clue_count: 0,
            pending_increment: None,
        }
    }

    /// Whether a scenario is in flight and not yet complete.
    pub fn has_unfinished_scenario(&self) -> bool {
        self.current_scenario.is_some() && self.instance_progress < MAX_PROGRESS
    }

    /// Drop the current scenario and its rule set.
    pub fn clear_scenario(&mut self) {
        self.current_scenario = None;
        self.current_rule_set = None;
        self.resolved_clue_count = 0;
    }
}

impl Default for StoryProgressState {
    fn default() -> Self {
        Self::inception()
    }
}

/// Default arc label for a cycle.
pub fn volume_name(cycle: u32) -> String {
    format!("Volume {cycle}")
}

/// A chapter outline produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlan {
    pub title: String,
    pub outline: String,
    pub key_clue_action: String,
    pub romance_beat: String,
    /// Suggested progress increment, always within 1–10.
    pub suggested_progress_increment: u8,
    pub should_finish_scenario: bool,
}

impl ChapterPlan {
    /// Minimal outline used when planning fails.
    pub fn fallback() -> Self {
        Self {
            title: "Untitled Chapter".to_string(),
            outline: "Advance the current storyline and follow the director's instructions."
                .to_string(),
            key_clue_action: "Advance an open clue".to_string(),
            romance_beat: String::new(),
            suggested_progress_increment: 5,
            should_finish_scenario: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inception_state() {
        let state = StoryProgressState::inception();
        assert_eq!(state.phase, Phase::Setup);
        assert_eq!(state.instance_progress, 5);
        assert_eq!(state.cycle_number, 1);
        assert!(state.current_scenario.is_none());
        assert!(!state.has_unfinished_scenario());
    }

    #[test]
    fn test_phase_from_progress_boundaries() {
        assert_eq!(Phase::from_progress(0), Phase::Setup);
        assert_eq!(Phase::from_progress(15), Phase::Setup);
        assert_eq!(Phase::from_progress(16), Phase::Investigation);
        assert_eq!(Phase::from_progress(75), Phase::Investigation);
        assert_eq!(Phase::from_progress(76), Phase::Climax);
        assert_eq!(Phase::from_progress(95), Phase::Climax);
        assert_eq!(Phase::from_progress(96), Phase::Resolution);
        assert_eq!(Phase::from_progress(100), Phase::Resolution);
    }

    #[test]
    fn test_state_serialization_defaults() {
        // Older saves only carried the core fields.
        let json = r#"{"phase": "investigation", "instance_progress": 40, "cycle_number": 2, "arc_name": "Volume 2"}"#;
        let state: StoryProgressState = serde_json::from_str(json).unwrap();
        assert_eq!(state.phase, Phase::Investigation);
        assert!(state.used_theme_names.is_empty());
        assert_eq!(state.pending_increment, None);
    }

    #[test]
    fn test_scenario_accepts_background_alias() {
        let json = r#"{"name": "Ward 4", "background": "An abandoned hospital"}"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.background_summary, "An abandoned hospital");
        assert!(scenario.mechanics.is_empty());
    }
}
