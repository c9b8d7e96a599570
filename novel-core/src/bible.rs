//! Story bible: the premise a story starts from.

use crate::characters::{Character, CharacterUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Title used when bible generation returns nothing usable.
pub const PLACEHOLDER_TITLE: &str = "Untitled Story";

/// A lead character as described by the bible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterSeed {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub gender: Option<String>,
    /// Appearance, personality, biography, trauma, desire, fear and so on.
    #[serde(default)]
    pub profile: Map<String, Value>,
}

impl CharacterSeed {
    fn has_thin_profile(&self) -> bool {
        !self.name.trim().is_empty() && self.profile.is_empty()
    }

    /// Take missing gender and profile keys from `details`.
    fn fill(&mut self, details: SeedDetails) {
        if self.gender.as_deref().map_or(true, |g| g.trim().is_empty()) {
            self.gender = details.gender.filter(|g| !g.trim().is_empty());
        }
        for (key, value) in details.profile {
            self.profile.entry(key).or_insert(value);
        }
    }

    fn to_character(&self, default_role: &str) -> Option<Character> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        let role = if self.role.trim().is_empty() {
            default_role
        } else {
            self.role.trim()
        };
        let mut character = Character::new(name, role);
        if let Some(gender) = self.gender.as_deref().filter(|g| !g.trim().is_empty()) {
            character = character.with_gender(gender);
        }
        if let Some(bio) = self.profile.get("biography").and_then(Value::as_str) {
            character = character.with_description(bio);
        }
        character.profile = self.profile.clone();
        Some(character)
    }
}

/// Extra details requested for a thin bible.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BibleDetails {
    #[serde(default, alias = "design_blueprint")]
    pub blueprint: Value,
    #[serde(default)]
    pub protagonist: SeedDetails,
    #[serde(default, alias = "loveInterest")]
    pub love_interest: SeedDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeedDetails {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub profile: Map<String, Value>,
}

/// Generated premise for a new story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBible {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub trope: String,
    /// Long-range design: main goal, world truth, ending vision.
    #[serde(default, alias = "design_blueprint")]
    pub blueprint: Value,
    #[serde(default)]
    pub protagonist: CharacterSeed,
    #[serde(default, alias = "loveInterest")]
    pub love_interest: CharacterSeed,
}

impl StoryBible {
    /// Bible used when generation returns malformed output.
    pub fn placeholder() -> Self {
        Self {
            title: PLACEHOLDER_TITLE.to_string(),
            summary: "Inspiration ran dry. Please try again.".to_string(),
            trope: String::new(),
            blueprint: Value::Object(Map::new()),
            protagonist: CharacterSeed {
                name: "Unknown".to_string(),
                role: "Protagonist".to_string(),
                ..CharacterSeed::default()
            },
            love_interest: CharacterSeed {
                name: "Unknown".to_string(),
                role: "Love Interest".to_string(),
                ..CharacterSeed::default()
            },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    /// Whether the blueprint or a named lead's profile is missing.
    /// The placeholder never asks for details.
    pub fn needs_details(&self) -> bool {
        if self.is_placeholder() {
            return false;
        }
        let thin_blueprint = self.blueprint.as_object().map_or(true, Map::is_empty);
        thin_blueprint || self.protagonist.has_thin_profile() || self.love_interest.has_thin_profile()
    }

    /// Merge `details` into the bible. Values already present are kept.
    pub fn fill_details(&mut self, details: BibleDetails) {
        if let Value::Object(extra) = details.blueprint {
            if let Some(existing) = self.blueprint.as_object_mut() {
                for (key, value) in extra {
                    existing.entry(key).or_insert(value);
                }
            } else {
                self.blueprint = Value::Object(extra);
            }
        }
        self.protagonist.fill(details.protagonist);
        self.love_interest.fill(details.love_interest);
    }

    /// The starting cast: protagonist then love interest.
    pub fn initial_cast(&self) -> Vec<Character> {
        let mut cast = Vec::new();
        let seeds = [
            (&self.protagonist, "Protagonist"),
            (&self.love_interest, "Love Interest"),
        ];
        for (seed, role) in seeds {
            if let Some(character) = seed.to_character(role) {
                crate::characters::merge_update(
                    &mut cast,
                    &CharacterUpdate {
                        role: Some(character.role.clone()),
                        gender: Some(character.gender.clone()),
                        description: Some(character.description.clone()),
                        profile_update: Some(character.profile.clone()),
                        ..CharacterUpdate::named(character.name.clone())
                    },
                );
            }
        }
        cast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_aliases() {
        let bible: StoryBible = serde_json::from_str(
            r#"{
                "title": "Rules of the Night Shift",
                "summary": "She signed the contract at midnight.",
                "trope": "rule horror",
                "design_blueprint": {"main_goal": "escape", "world_truth": "the city is a dream"},
                "protagonist": {"name": "林湘", "role": "Protagonist", "profile": {"biography": "Night-shift nurse"}},
                "loveInterest": {"name": "Gu Chen", "profile": {}}
            }"#,
        )
        .unwrap();
        assert_eq!(bible.blueprint["main_goal"], "escape");
        assert_eq!(bible.love_interest.name, "Gu Chen");
        assert!(!bible.is_placeholder());
    }

    #[test]
    fn test_initial_cast() {
        let bible: StoryBible = serde_json::from_str(
            r#"{"protagonist": {"name": "林湘", "profile": {"biography": "Night-shift nurse"}}, "love_interest": {"name": "Gu Chen"}}"#,
        )
        .unwrap();
        let cast = bible.initial_cast();
        assert_eq!(cast.len(), 2);
        assert_eq!(cast[0].role, "Protagonist");
        assert_eq!(cast[0].description, "Night-shift nurse");
        assert_eq!(cast[1].role, "Love Interest");
        assert_eq!(cast[1].description, crate::characters::NEW_CHARACTER_DESCRIPTION);
    }

    #[test]
    fn test_fill_details_keeps_existing_values() {
        let mut bible: StoryBible = serde_json::from_str(
            r#"{
                "title": "Ash Road",
                "design_blueprint": {"main_goal": "reach the coast"},
                "protagonist": {"name": "Mei", "gender": "Female", "profile": {"biography": "Courier"}},
                "love_interest": {"name": "Ren"}
            }"#,
        )
        .unwrap();
        assert!(bible.needs_details());

        let details: BibleDetails = serde_json::from_str(
            r#"{
                "design_blueprint": {"main_goal": "other", "world_truth": "the sea is gone"},
                "protagonist": {"gender": "Male", "profile": {"biography": "Thief", "fear": "silence"}},
                "loveInterest": {"gender": "Male", "profile": {"appearance": "scarred"}}
            }"#,
        )
        .unwrap();
        bible.fill_details(details);

        assert_eq!(bible.blueprint["main_goal"], "reach the coast");
        assert_eq!(bible.blueprint["world_truth"], "the sea is gone");
        assert_eq!(bible.protagonist.gender.as_deref(), Some("Female"));
        assert_eq!(bible.protagonist.profile["biography"], "Courier");
        assert_eq!(bible.protagonist.profile["fear"], "silence");
        assert_eq!(bible.love_interest.gender.as_deref(), Some("Male"));
        assert!(!bible.needs_details());
    }

    #[test]
    fn test_placeholder_needs_no_details() {
        assert!(!StoryBible::placeholder().needs_details());
    }

    #[test]
    fn test_placeholder_cast_folds_duplicate_names() {
        let cast = StoryBible::placeholder().initial_cast();
        // Both seeds are named "Unknown" and fold into one record.
        assert_eq!(cast.len(), 1);
    }
}
