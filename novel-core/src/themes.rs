//! Scenario theme catalog and non-repeating selection.
//!
//! The built-in catalog is a static table shared read-only by every story.
//! Selection weights categories matching the story's tags, always offers the
//! baseline categories, and unlocks escalation categories after the third
//! cycle. Names already used by the story are filtered out; when everything
//! has been used the selector degrades to the full candidate set rather than
//! stalling.

use crate::genre::TagSet;
use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;
use tracing::warn;

/// Cycle after which escalation categories join the candidate set.
pub const ESCALATION_AFTER_CYCLE: u32 = 3;

/// How a category enters the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryTier {
    /// Offered twice when one of its tag keywords matches a story tag.
    Tagged,
    /// Always offered once.
    Baseline,
    /// Offered once when the cycle number passes the escalation threshold.
    Escalation,
}

/// A named group of scenario themes.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeCategory {
    pub id: String,
    pub tier: CategoryTier,
    pub tag_keywords: Vec<String>,
    pub names: Vec<String>,
}

impl ThemeCategory {
    pub fn new(id: impl Into<String>, tier: CategoryTier) -> Self {
        Self {
            id: id.into(),
            tier,
            tag_keywords: Vec::new(),
            names: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.tag_keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    fn matches(&self, tags: TagSet<'_>) -> bool {
        let keywords: Vec<&str> = self.tag_keywords.iter().map(String::as_str).collect();
        !keywords.is_empty() && tags.matches_any(&keywords)
    }
}

/// A selected theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemePick {
    pub name: String,
    pub category: String,
    /// Every candidate had already been used; the pick repeats a theme.
    pub degraded: bool,
}

/// A read-only catalog of theme categories.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemePool {
    categories: Vec<ThemeCategory>,
}

lazy_static! {
    static ref BUILTIN: ThemePool = ThemePool::new(vec![
        ThemeCategory::new("chinese_horror", CategoryTier::Tagged)
            .with_keywords(&["中式恐怖", "民俗", "chinese horror", "folk horror"])
            .with_names(&[
                "The Paper Bride's Wedding",
                "Village of the Night Opera",
                "Coffin Shop on Yin Street",
                "The Ancestral Hall at Midnight",
                "Ghost Market of the Seventh Moon",
            ]),
        ThemeCategory::new("tomb_raiding", CategoryTier::Tagged)
            .with_keywords(&["盜墓", "tomb", "grave robbing"])
            .with_names(&[
                "The Nine-Layer Demon Tower",
                "Bronze Tree of the Western Tombs",
                "Sunken Palace of the Yellow River",
                "The Corpse King's Mausoleum",
            ]),
        ThemeCategory::new("rule_horror", CategoryTier::Tagged)
            .with_keywords(&["規則怪談", "rule horror", "rules horror"])
            .with_names(&[
                "Employee Handbook of the Night Shift",
                "Guest Rules of the Seaside Hotel",
                "The Kindergarten Bylaws",
                "Last Train Passenger Notice",
                "Tenant Rules of Unit 404",
            ]),
        ThemeCategory::new("ancient", CategoryTier::Tagged)
            .with_keywords(&["古風", "仙俠", "宮廷", "wuxia", "ancient"])
            .with_names(&[
                "The Cursed Imperial Exam",
                "Banquet of the Fox Consort",
                "Sword Tomb of the Fallen Sect",
                "The Emperor Who Never Died",
            ]),
        ThemeCategory::new("apocalypse", CategoryTier::Tagged)
            .with_keywords(&["末世", "喪屍", "apocalypse", "zombie"])
            .with_names(&[
                "Quarantine Zone Seven",
                "The Last Supermarket",
                "Frozen Metropolis",
                "Fungal Bloom Hospital",
            ]),
        ThemeCategory::new("space", CategoryTier::Tagged)
            .with_keywords(&["星際", "科幻", "sci-fi", "space"])
            .with_names(&[
                "Derelict Colony Ship",
                "The Dyson Swarm Trial",
                "Mind-Upload Asylum",
                "Starport Under Lockdown",
            ]),
        ThemeCategory::new("western_gothic", CategoryTier::Tagged)
            .with_keywords(&["西方", "克蘇魯", "gothic", "lovecraft"])
            .with_names(&[
                "Manor of the Drowned Heir",
                "Witch Trial at Salem Hollow",
                "The Lighthouse Keeper's Log",
                "Carnival of Hollow Masks",
            ]),
        ThemeCategory::new("campus", CategoryTier::Tagged)
            .with_keywords(&["校園", "campus", "school"])
            .with_names(&[
                "The Eighth Campus Mystery",
                "Midnight Dormitory Roll Call",
                "The Exam That Never Ends",
            ]),
        ThemeCategory::new("modern_urban", CategoryTier::Baseline).with_names(&[
            "Haunted Shopping Mall",
            "The Endless Subway Line",
            "Apartment Block Livestream",
            "Abandoned Amusement Park",
            "The Hospital on Floor Minus One",
        ]),
        ThemeCategory::new("closed_space", CategoryTier::Baseline).with_names(&[
            "Snowbound Mountain Villa",
            "The Cruise Ship Murders",
            "Sealed Research Station",
            "Island of the Last Guests",
        ]),
        ThemeCategory::new("survival_game", CategoryTier::Baseline).with_names(&[
            "Royale on the Drowned Isle",
            "The Death Lottery",
            "Hide and Seek in the Doll Factory",
            "Twelve-Hour Escape Room",
        ]),
        ThemeCategory::new("cosmic", CategoryTier::Escalation).with_names(&[
            "The Star-Eating Abyss",
            "Library at the End of Time",
            "Dream of the Sleeping God",
        ]),
        ThemeCategory::new("divine_war", CategoryTier::Escalation).with_names(&[
            "Twilight of the Pantheon",
            "Siege of the Heavenly Court",
            "The Throne Beyond Reincarnation",
        ]),
    ]);
}

impl ThemePool {
    /// Build a pool from explicit categories.
    pub fn new(categories: Vec<ThemeCategory>) -> Self {
        Self { categories }
    }

    /// The built-in catalog.
    pub fn builtin() -> &'static ThemePool {
        &BUILTIN
    }

    pub fn categories(&self) -> &[ThemeCategory] {
        &self.categories
    }

    /// Candidate multiset for a story, before filtering used names.
    pub fn candidates(&self, tags: &[String], cycle_number: u32) -> Vec<(&str, &str)> {
        let tags = TagSet::new(tags);
        let mut out = Vec::new();

        for category in &self.categories {
            let copies = match category.tier {
                CategoryTier::Tagged if category.matches(tags) => 2,
                CategoryTier::Tagged => 0,
                CategoryTier::Baseline => 1,
                CategoryTier::Escalation if cycle_number > ESCALATION_AFTER_CYCLE => 1,
                CategoryTier::Escalation => 0,
            };
            for _ in 0..copies {
                out.extend(
                    category
                        .names
                        .iter()
                        .map(|name| (name.as_str(), category.id.as_str())),
                );
            }
        }

        out
    }

    /// Pick a theme with the thread-local RNG.
    pub fn select(
        &self,
        tags: &[String],
        cycle_number: u32,
        used: &BTreeSet<String>,
    ) -> Option<ThemePick> {
        self.select_with_rng(tags, cycle_number, used, &mut rand::thread_rng())
    }

    /// Pick a theme with a caller-provided RNG.
    ///
    /// Returns `None` only when the pool offers no candidates at all.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        tags: &[String],
        cycle_number: u32,
        used: &BTreeSet<String>,
        rng: &mut R,
    ) -> Option<ThemePick> {
        let candidates = self.candidates(tags, cycle_number);
        let fresh: Vec<(&str, &str)> = candidates
            .iter()
            .copied()
            .filter(|(name, _)| !used.contains(*name))
            .collect();

        let (pool, degraded) = if fresh.is_empty() {
            if !candidates.is_empty() {
                warn!(
                    cycle_number,
                    used = used.len(),
                    "theme pool exhausted, repeating a used theme"
                );
            }
            (candidates, true)
        } else {
            (fresh, false)
        };

        pool.choose(rng).map(|(name, category)| ThemePick {
            name: name.to_string(),
            category: category.to_string(),
            degraded,
        })
    }
}

/// Pick a theme from the built-in catalog.
pub fn select_theme(tags: &[String], cycle_number: u32, used: &BTreeSet<String>) -> Option<ThemePick> {
    ThemePool::builtin().select(tags, cycle_number, used)
}
