//! Plot orchestration engine for serialized fiction.
//!
//! This crate provides:
//! - A director that picks phase, intensity and arc from the chapter count
//! - A planner that mints scenarios from a theme pool and outlines chapters
//! - A writer and editor with a content-policy fallback pipeline
//! - A progress tracker that reconciles backend verdicts with organic signals
//! - Story persistence and a service that commits chapters atomically
//!
//! # Quick Start
//!
//! ```ignore
//! use novel_core::{
//!     ChapterEngine, EngineConfig, Gateway, GatewayConfig, JsonStoryStore, NewStory,
//!     NovelService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::from_config(&GatewayConfig::from_env()?)?;
//!     let engine = ChapterEngine::new(gateway, EngineConfig::default());
//!     let service = NovelService::new(engine, JsonStoryStore::new("stories"));
//!
//!     let story = service
//!         .start_story(NewStory {
//!             genre_label: "無限流".to_string(),
//!             ..NewStory::default()
//!         })
//!         .await?;
//!     let chapter = service.next_chapter(&story.id).await?;
//!     println!("{}", chapter.output.content);
//!     Ok(())
//! }
//! ```

pub mod bible;
pub mod characters;
pub mod config;
pub mod director;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod genre;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod state;
pub mod store;
pub mod story;
pub mod testing;
pub mod themes;
pub mod writer;

// Primary public API
pub use bible::StoryBible;
pub use characters::{Character, CharacterUpdate};
pub use config::{ConfigError, EngineConfig, GatewayConfig, PrimaryBackend};
pub use director::{direct, Directive, Intensity};
pub use engine::{ChapterContext, ChapterEngine, ChapterOutput};
pub use error::{EngineError, Stage};
pub use gateway::{Gateway, GatewayError};
pub use genre::Genre;
pub use service::{CommittedChapter, NovelService};
pub use state::{ChapterPlan, Phase, RuleSet, Scenario, StoryProgressState};
pub use store::{JsonStoryStore, MemoryStoryStore, StoreError, StoryStore};
pub use story::{NewStory, StoryRecord, StorySummary};
pub use themes::{select_theme, ThemePick, ThemePool};
