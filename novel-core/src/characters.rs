//! Cast records and the merge rules for character updates.
//!
//! Chapter drafts report character changes as partial updates. Names are
//! matched loosely (whitespace-insensitive, substring either way) so a
//! trailing space or a partial name never creates a duplicate record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_STATUS: &str = "Alive";
pub const DEFAULT_ROLE: &str = "Supporting";
pub const DEFAULT_GENDER: &str = "Unknown";
pub const NEW_CHARACTER_DESCRIPTION: &str = "Newly introduced character";

/// Separator between appended description segments.
const APPEND_SEPARATOR: &str = " | ";

/// A member of the story's cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_gender")]
    pub gender: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile: Map<String, Value>,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_gender() -> String {
    DEFAULT_GENDER.to_string()
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

impl Character {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            gender: default_gender(),
            status: default_status(),
            description: String::new(),
            profile: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = gender.into();
        self
    }

    /// One-line summary used in prompts.
    pub fn prompt_line(&self) -> String {
        format!(
            "- {} ({}): {} [status: {}]",
            self.name, self.role, self.description, self.status
        )
    }
}

/// A partial character change reported by a chapter draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterUpdate {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Replaces the description.
    #[serde(default)]
    pub description: Option<String>,
    /// Appended to the description.
    #[serde(default)]
    pub description_append: Option<String>,
    #[serde(default)]
    pub is_new: Option<bool>,
    /// Shallow-merged into the profile.
    #[serde(default)]
    pub profile_update: Option<Map<String, Value>>,
}

impl CharacterUpdate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whether two names refer to the same character.
pub fn names_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a)
}

/// Index of the cast member an update refers to.
///
/// Exact (normalized) matches win over substring matches.
pub fn find_character(cast: &[Character], name: &str) -> Option<usize> {
    let target = normalize(name);
    cast.iter()
        .position(|c| !target.is_empty() && normalize(&c.name) == target)
        .or_else(|| cast.iter().position(|c| names_match(&c.name, name)))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn append_description(existing: &str, segment: &str) -> String {
    let existing_trimmed = existing.trim_end();
    if existing_trimmed == segment
        || existing_trimmed.ends_with(&format!("{APPEND_SEPARATOR}{segment}"))
    {
        return existing.to_string();
    }
    if existing.trim().is_empty() {
        return segment.to_string();
    }
    format!("{existing}{APPEND_SEPARATOR}{segment}")
}

/// Apply one update to the cast.
pub fn merge_update(cast: &mut Vec<Character>, update: &CharacterUpdate) {
    if normalize(&update.name).is_empty() {
        return;
    }

    match find_character(cast, &update.name) {
        Some(index) => {
            let existing = &mut cast[index];
            if let Some(description) = non_empty(&update.description) {
                existing.description = description.to_string();
            } else if let Some(segment) = non_empty(&update.description_append) {
                existing.description = append_description(&existing.description, segment);
            }
            if let Some(status) = non_empty(&update.status) {
                existing.status = status.to_string();
            }
            if existing.gender == DEFAULT_GENDER {
                if let Some(gender) = non_empty(&update.gender) {
                    existing.gender = gender.to_string();
                }
            }
            if let Some(profile) = &update.profile_update {
                for (key, value) in profile {
                    existing.profile.insert(key.clone(), value.clone());
                }
            }
        }
        None => {
            let description = non_empty(&update.description)
                .or_else(|| non_empty(&update.description_append))
                .unwrap_or(NEW_CHARACTER_DESCRIPTION);
            cast.push(Character {
                name: update.name.trim().to_string(),
                role: non_empty(&update.role).unwrap_or(DEFAULT_ROLE).to_string(),
                gender: non_empty(&update.gender).unwrap_or(DEFAULT_GENDER).to_string(),
                status: non_empty(&update.status).unwrap_or(DEFAULT_STATUS).to_string(),
                description: description.to_string(),
                profile: update.profile_update.clone().unwrap_or_default(),
            });
        }
    }
}

/// Apply a batch of updates in order.
pub fn merge_updates(cast: &mut Vec<Character>, updates: &[CharacterUpdate]) {
    for update in updates {
        merge_update(cast, update);
    }
}
