//! Testing utilities.
//!
//! - [`ScriptedBackend`] replays canned responses without network calls
//! - [`sample_bible`] and [`sample_context`] build small story fixtures

use crate::bible::{CharacterSeed, StoryBible};
use crate::characters::Character;
use crate::engine::ChapterContext;
use crate::genre::Genre;
use async_trait::async_trait;
use novel_llm::{Error, Prompt, TextBackend};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Text(String),
    Error(Error),
}

/// A backend that returns scripted responses in order.
///
/// Once the script runs out it returns the [`always`](Self::always) text,
/// or [`Error::EmptyResponse`] when none was set. Every prompt it receives
/// is recorded.
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    default_text: Option<String>,
    received: Mutex<Vec<Prompt>>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            default_text: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text response.
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Text(text.into()))
    }

    /// Queue an error.
    pub fn then_error(self, error: Error) -> Self {
        self.push(Scripted::Error(error))
    }

    /// Response used once the script is exhausted.
    pub fn always(mut self, text: impl Into<String>) -> Self {
        self.default_text = Some(text.into());
        self
    }

    fn push(self, entry: Scripted) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Prompts received, oldest first.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("name", &self.name)
            .field("remaining", &self.remaining())
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, Error> {
        if let Ok(mut received) = self.received.lock() {
            received.push(prompt.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Error(error)) => Err(error),
            None => self.default_text.clone().ok_or(Error::EmptyResponse),
        }
    }
}

/// A small rule-horror bible.
pub fn sample_bible() -> StoryBible {
    StoryBible {
        title: "Rules of the Night Shift".to_string(),
        summary: "A nurse signs a contract that binds her to a hospital that is not on any map.".to_string(),
        trope: "rule horror".to_string(),
        blueprint: json!({
            "main_goal": "Escape the hospital",
            "world_truth": "The hospital feeds on broken rules",
            "ending_vision": "open",
            "instance": {"total_clues": 4}
        }),
        protagonist: CharacterSeed {
            name: "林湘".to_string(),
            role: "Protagonist".to_string(),
            gender: Some("Female".to_string()),
            profile: json!({"biography": "Night-shift nurse"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        },
        love_interest: CharacterSeed {
            name: "Gu Chen".to_string(),
            role: "Love Interest".to_string(),
            gender: Some("Male".to_string()),
            profile: json!({"biography": "Ward director who never sleeps"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        },
    }
}

/// Context for chapter 1 of [`sample_bible`], with no prior plot state.
pub fn sample_context() -> ChapterContext {
    let bible = sample_bible();
    ChapterContext {
        title: bible.title.clone(),
        genre_label: "無限流".to_string(),
        genre: Genre::InfiniteFlow,
        tags: vec!["規則怪談".to_string()],
        tone: "dark".to_string(),
        pov: "third person".to_string(),
        current_chapter_index: 1,
        target_ending_chapter: None,
        blueprint: bible.blueprint.clone(),
        characters: vec![
            Character::new("林湘", "Protagonist").with_description("Night-shift nurse"),
            Character::new("Gu Chen", "Love Interest"),
        ],
        memories: vec!["林湘 signed the contract at midnight".to_string()],
        clues: vec!["The lift has no fourth floor".to_string()],
        prior_plot_state: None,
        previous_content: "The corridor lights flickered twice.".to_string(),
    }
}

/// JSON an outline call might return.
pub fn outline_json(title: &str, increment: u8, finish: bool) -> String {
    json!({
        "title": title,
        "outline": "She follows the rule card to the basement.",
        "key_clue_action": "Finds the second rule card",
        "romance_beat": "He covers her eyes when the lights die",
        "suggested_progress_increment": increment,
        "should_finish_scenario": finish
    })
    .to_string()
}

/// JSON a scenario design call might return.
pub fn scenario_json(name: &str) -> String {
    json!({
        "scenario": {
            "name": name,
            "difficulty_tier": "C",
            "background_summary": "An abandoned ward that resets every night.",
            "mechanics": ["lights out at 2am"],
            "entities": ["the head nurse"],
            "win_conditions": ["survive until dawn"]
        },
        "rule_set": {
            "title": "Ward Regulations",
            "kind": "rules",
            "rules": ["Never answer the intercom", "Do not count the beds"],
            "hidden_truth": "The head nurse wrote rule two"
        }
    })
    .to_string()
}

/// JSON a draft call might return.
pub fn draft_json(content: &str) -> String {
    json!({
        "content": content,
        "new_memories": ["林湘 found the second rule card"],
        "new_clues": ["The card is signed in red ink"],
        "resolved_clues": ["The lift has no fourth floor"],
        "character_updates": [{"name": "Head Nurse", "role": "Antagonist", "is_new": true}]
    })
    .to_string()
}
