//! Genres and story tags.
//!
//! Genres and tags arrive as free-form labels (often Chinese web-novel
//! terms). This module normalizes them so the director, theme pool and
//! fallback pipeline can look them up in tables instead of comparing
//! strings inline.

use serde::{Deserialize, Serialize};

/// Tags that make romance beats angst-heavy.
pub const ANGST_TAGS: &[&str] = &["虐戀", "追妻", "angst"];

/// Tags that enable the hidden-identity subplot.
pub const SECRET_IDENTITY_TAGS: &[&str] = &[
    "馬甲",
    "掉馬",
    "臥底",
    "隱藏身分",
    "secret identity",
    "undercover",
];

/// Tags that turn scenario mission boards into rule sheets.
pub const RULE_HORROR_TAGS: &[&str] = &["規則怪談", "rule horror", "rules horror"];

/// Tags whose stories read better when the fallback writes natively
/// instead of translating from English.
pub const NATIVE_FLAVOUR_TAGS: &[&str] = &["中式恐怖", "古風", "盜墓", "chinese horror", "wuxia"];

/// Tags hinting at a boss or final antagonist in memory entries.
pub const BOSS_FORESHADOW_MARKERS: &[&str] = &[
    "boss",
    "final guardian",
    "antagonist",
    "mastermind",
    "魔王",
    "首領",
    "幕後黑手",
    "最終",
];

/// Story genre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    InfiniteFlow,
    Xianxia,
    Espionage,
    Apocalypse,
    PalaceIntrigue,
    UrbanRomance,
    WesternFantasy,
    SciFi,
    Other,
}

impl Genre {
    pub const ALL: [Genre; 9] = [
        Genre::InfiniteFlow,
        Genre::Xianxia,
        Genre::Espionage,
        Genre::Apocalypse,
        Genre::PalaceIntrigue,
        Genre::UrbanRomance,
        Genre::WesternFantasy,
        Genre::SciFi,
        Genre::Other,
    ];

    /// Parse a genre label. Unknown labels map to [`Genre::Other`].
    ///
    /// An exact key wins. Otherwise the longest key found in the label
    /// decides; between keys of equal length the later one does, so
    /// "romance fantasy" is a fantasy.
    pub fn from_label(label: &str) -> Genre {
        let label = label.trim().to_lowercase();
        let table: &[(Genre, &[&str])] = &[
            (Genre::InfiniteFlow, &["無限流", "infinite"]),
            (Genre::Xianxia, &["修仙", "玄幻", "xianxia", "cultivation"]),
            (Genre::Espionage, &["諜戰", "黑道", "espionage", "spy", "gangster"]),
            (Genre::Apocalypse, &["末世", "apocalypse", "zombie"]),
            (Genre::PalaceIntrigue, &["豪門", "宮鬥", "palace", "court"]),
            (Genre::UrbanRomance, &["都市", "urban", "romance"]),
            (Genre::WesternFantasy, &["西方奇幻", "western fantasy", "fantasy"]),
            (Genre::SciFi, &["星際", "科幻", "sci-fi", "science fiction", "space"]),
        ];

        let exact = table.iter().find(|(genre, keys)| {
            genre.label() == label || keys.iter().any(|k| *k == label)
        });
        if let Some((genre, _)) = exact {
            return *genre;
        }

        let label = label.as_str();
        table
            .iter()
            .flat_map(|&(genre, keys)| {
                keys.iter().filter_map(move |k| {
                    label
                        .rfind(k)
                        .map(|at| ((k.chars().count(), at + k.len()), genre))
                })
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, genre)| genre)
            .unwrap_or(Genre::Other)
    }

    /// Recommended total chapter budget when the story sets no ending.
    pub fn recommended_total_chapters(self) -> u32 {
        match self {
            Genre::InfiniteFlow | Genre::Xianxia | Genre::WesternFantasy | Genre::SciFi => 200,
            Genre::Apocalypse => 160,
            _ => 120,
        }
    }

    /// Genres written natively by the fallback backend.
    pub fn has_native_flavour(self) -> bool {
        matches!(self, Genre::Xianxia | Genre::PalaceIntrigue)
    }

    pub fn label(self) -> &'static str {
        match self {
            Genre::InfiniteFlow => "infinite flow",
            Genre::Xianxia => "xianxia",
            Genre::Espionage => "espionage",
            Genre::Apocalypse => "apocalypse",
            Genre::PalaceIntrigue => "palace intrigue",
            Genre::UrbanRomance => "urban romance",
            Genre::WesternFantasy => "western fantasy",
            Genre::SciFi => "sci-fi",
            Genre::Other => "general",
        }
    }
}

/// Borrowed view over a story's tags with substring matching.
#[derive(Debug, Clone, Copy)]
pub struct TagSet<'a>(&'a [String]);

impl<'a> TagSet<'a> {
    pub fn new(tags: &'a [String]) -> Self {
        Self(tags)
    }

    /// Whether any tag contains any of the given keywords (case-insensitive).
    pub fn matches_any(&self, keywords: &[&str]) -> bool {
        self.0.iter().any(|tag| {
            let tag = tag.to_lowercase();
            keywords.iter().any(|k| tag.contains(&k.to_lowercase()))
        })
    }

    pub fn is_angst(&self) -> bool {
        self.matches_any(ANGST_TAGS)
    }

    pub fn has_secret_identity(&self) -> bool {
        self.matches_any(SECRET_IDENTITY_TAGS)
    }

    pub fn is_rule_horror(&self) -> bool {
        self.matches_any(RULE_HORROR_TAGS)
    }

    pub fn joined(&self) -> String {
        self.0.join(", ")
    }
}

/// Whether the fallback should write in the target language directly.
pub fn prefers_native_fallback(genre: Genre, tags: &[String]) -> bool {
    genre.has_native_flavour() || TagSet::new(tags).matches_any(NATIVE_FLAVOUR_TAGS)
}
