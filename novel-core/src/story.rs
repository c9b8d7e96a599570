//! Persistent story records.
//!
//! A [`StoryRecord`] holds everything needed to resume a story: the bible,
//! the cast, memories and clues, the plot state, every chapter and the
//! scenario history. Applying a generated chapter is a pure in-memory
//! mutation; the caller saves the record once afterwards.

use crate::bible::StoryBible;
use crate::characters::{merge_updates, Character};
use crate::engine::{ChapterContext, ChapterOutput, OpeningOutput};
use crate::genre::Genre;
use crate::planner::MintedScenario;
use crate::state::{Phase, RuleSet, Scenario, StoryProgressState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// One written chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    /// Zero-based; the opening chapter is 0.
    pub index: u32,
    pub title: String,
    pub content: String,
    pub served_by: String,
    #[serde(default)]
    pub via_fallback: bool,
    #[serde(default)]
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

/// A scenario minted at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub story_id: String,
    pub cycle_number: u32,
    pub theme: String,
    pub category: String,
    pub scenario: Scenario,
    pub rule_set: RuleSet,
    /// Built from the theme alone after the backend failed.
    #[serde(default)]
    pub minimal: bool,
    /// Chapter that opened the scenario.
    pub chapter_index: u32,
    pub created_at: DateTime<Utc>,
}

/// Settings a story is created with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewStory {
    pub genre_label: String,
    pub tags: Vec<String>,
    pub tone: String,
    pub pov: String,
    pub category: String,
    pub target_ending_chapter: Option<u32>,
}

/// A saved story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub version: u32,
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub genre_label: String,
    pub genre: Genre,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub pov: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub target_ending_chapter: Option<u32>,

    pub bible: StoryBible,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub memories: Vec<String>,
    #[serde(default)]
    pub clues: Vec<String>,
    #[serde(default)]
    pub plot_state: StoryProgressState,
    #[serde(default)]
    pub chapters: Vec<ChapterRecord>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioRecord>,
}

/// Listing entry for a saved story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub genre_label: String,
    pub chapter_count: usize,
    pub arc_name: String,
    pub phase: Phase,
    pub updated_at: DateTime<Utc>,
}

impl StoryRecord {
    /// A story with its bible and opening chapter.
    pub fn new(settings: NewStory, bible: StoryBible, opening: OpeningOutput) -> Self {
        let now = Utc::now();
        let title = if bible.title.trim().is_empty() {
            "Chapter 1".to_string()
        } else {
            bible.title.clone()
        };
        let chapter = ChapterRecord {
            index: 0,
            title,
            content: opening.content,
            served_by: opening.served_by,
            via_fallback: opening.via_fallback,
            degraded: opening.degraded,
            created_at: now,
        };

        Self {
            version: SAVE_VERSION,
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            genre: Genre::from_label(&settings.genre_label),
            genre_label: settings.genre_label,
            tags: settings.tags,
            tone: settings.tone,
            pov: settings.pov,
            category: settings.category,
            target_ending_chapter: settings.target_ending_chapter,
            bible,
            characters: opening.characters,
            memories: opening.new_memories,
            clues: dedup(opening.new_clues),
            plot_state: opening.plot_state,
            chapters: vec![chapter],
            scenarios: Vec::new(),
        }
    }

    /// Index of the chapter to write next.
    pub fn next_chapter_index(&self) -> u32 {
        u32::try_from(self.chapters.len()).unwrap_or(u32::MAX)
    }

    pub fn title(&self) -> &str {
        &self.bible.title
    }

    /// Build the engine input for the next chapter.
    pub fn chapter_context(&self) -> ChapterContext {
        ChapterContext {
            title: self.bible.title.clone(),
            genre_label: self.genre_label.clone(),
            genre: self.genre,
            tags: self.tags.clone(),
            tone: self.tone.clone(),
            pov: self.pov.clone(),
            current_chapter_index: self.next_chapter_index(),
            target_ending_chapter: self.target_ending_chapter,
            blueprint: self.bible.blueprint.clone(),
            characters: self.characters.clone(),
            memories: self.memories.clone(),
            clues: self.clues.clone(),
            prior_plot_state: Some(self.plot_state.clone()),
            previous_content: self
                .chapters
                .last()
                .map(|c| c.content.clone())
                .unwrap_or_default(),
        }
    }

    /// Fold a generated chapter into the record.
    ///
    /// New clues are appended once, resolved clues removed, memories
    /// appended, the cast merged and a minted scenario recorded.
    pub fn apply_chapter(&mut self, index: u32, output: &ChapterOutput) {
        let now = Utc::now();

        self.memories.extend(
            output
                .new_memories
                .iter()
                .filter(|m| !m.trim().is_empty())
                .cloned(),
        );
        for clue in &output.new_clues {
            if !clue.trim().is_empty() && !self.clues.contains(clue) {
                self.clues.push(clue.clone());
            }
        }
        self.clues.retain(|c| !output.resolved_clues.contains(c));
        merge_updates(&mut self.characters, &output.character_updates);

        if let Some(minted) = &output.minted_scenario {
            self.scenarios
                .push(self.scenario_record(minted, output.plot_state.cycle_number, index, now));
        }

        self.plot_state = output.plot_state.clone();
        self.chapters.push(ChapterRecord {
            index,
            title: output.title.clone(),
            content: output.content.clone(),
            served_by: output.served_by.clone(),
            via_fallback: output.via_fallback,
            degraded: output.degraded,
            created_at: now,
        });
        self.updated_at = now;
    }

    fn scenario_record(
        &self,
        minted: &MintedScenario,
        cycle_number: u32,
        chapter_index: u32,
        created_at: DateTime<Utc>,
    ) -> ScenarioRecord {
        ScenarioRecord {
            story_id: self.id.clone(),
            cycle_number,
            theme: minted.theme.name.clone(),
            category: minted.theme.category.clone(),
            scenario: minted.scenario.clone(),
            rule_set: minted.rule_set.clone(),
            minimal: minted.minimal,
            chapter_index,
            created_at,
        }
    }

    pub fn summary(&self) -> StorySummary {
        StorySummary {
            id: self.id.clone(),
            title: self.bible.title.clone(),
            genre_label: self.genre_label.clone(),
            chapter_count: self.chapters.len(),
            arc_name: self.plot_state.arc_name.clone(),
            phase: self.plot_state.phase,
            updated_at: self.updated_at,
        }
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !item.trim().is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characters::CharacterUpdate;
    use crate::state::{ChapterPlan, RuleSetKind};
    use crate::testing::sample_bible;
    use crate::themes::ThemePick;

    fn opening() -> OpeningOutput {
        OpeningOutput {
            content: "The contract was signed at midnight.".to_string(),
            new_memories: vec!["signed the contract".to_string()],
            new_clues: vec!["no fourth floor".to_string(), "no fourth floor".to_string()],
            characters: sample_bible().initial_cast(),
            plot_state: StoryProgressState::inception(),
            served_by: "primary".to_string(),
            via_fallback: false,
            degraded: false,
            polished: false,
        }
    }

    fn record() -> StoryRecord {
        StoryRecord::new(
            NewStory {
                genre_label: "無限流".to_string(),
                ..NewStory::default()
            },
            sample_bible(),
            opening(),
        )
    }

    fn output(state: StoryProgressState) -> ChapterOutput {
        ChapterOutput {
            title: "Lights Out".to_string(),
            content: "The lights died.".to_string(),
            new_memories: vec!["the lights died".to_string(), " ".to_string()],
            new_clues: vec!["red ink".to_string()],
            resolved_clues: vec!["no fourth floor".to_string()],
            character_updates: vec![CharacterUpdate {
                status: Some("Injured".to_string()),
                ..CharacterUpdate::named("林湘")
            }],
            plot_state: state,
            plan: ChapterPlan::fallback(),
            minted_scenario: None,
            served_by: "primary".to_string(),
            via_fallback: false,
            degraded: false,
            polished: true,
        }
    }

    #[test]
    fn test_new_record_from_opening() {
        let record = record();
        assert_eq!(record.version, SAVE_VERSION);
        assert_eq!(record.genre, Genre::InfiniteFlow);
        assert_eq!(record.chapters.len(), 1);
        assert_eq!(record.clues, vec!["no fourth floor".to_string()]);
        assert_eq!(record.next_chapter_index(), 1);
        assert_eq!(record.plot_state.phase, Phase::Setup);
    }

    #[test]
    fn test_chapter_context_carries_state() {
        let record = record();
        let ctx = record.chapter_context();
        assert_eq!(ctx.current_chapter_index, 1);
        assert_eq!(ctx.previous_content, "The contract was signed at midnight.");
        assert_eq!(ctx.prior_plot_state, Some(record.plot_state.clone()));
    }

    #[test]
    fn test_apply_chapter_bookkeeping() {
        let mut record = record();
        let mut state = record.plot_state.clone();
        state.instance_progress = 10;
        record.apply_chapter(1, &output(state));

        assert_eq!(record.chapters.len(), 2);
        assert_eq!(record.chapters[1].title, "Lights Out");
        assert_eq!(record.memories.len(), 2);
        assert_eq!(record.clues, vec!["red ink".to_string()]);
        assert_eq!(record.characters[0].status, "Injured");
        assert_eq!(record.plot_state.instance_progress, 10);
        assert!(record.scenarios.is_empty());
    }

    #[test]
    fn test_apply_chapter_records_scenario() {
        let mut record = record();
        let mut out = output(record.plot_state.clone());
        out.minted_scenario = Some(MintedScenario {
            theme: ThemePick {
                name: "Abandoned Hospital".to_string(),
                category: "urban_legend".to_string(),
                degraded: false,
            },
            scenario: Scenario {
                name: "Ward 4".to_string(),
                ..Scenario::default()
            },
            rule_set: RuleSet {
                title: "Ward Regulations".to_string(),
                kind: RuleSetKind::Rules,
                rules: vec!["Never answer the intercom".to_string()],
                hidden_truth: String::new(),
            },
            minimal: false,
        });
        record.apply_chapter(1, &out);

        assert_eq!(record.scenarios.len(), 1);
        let scenario = &record.scenarios[0];
        assert_eq!(scenario.story_id, record.id);
        assert_eq!(scenario.cycle_number, 1);
        assert_eq!(scenario.theme, "Abandoned Hospital");
        assert_eq!(scenario.chapter_index, 1);
    }
}
