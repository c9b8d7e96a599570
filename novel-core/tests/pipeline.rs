//! End-to-end story flow through NovelService with scripted backends.

use novel_core::state::Phase;
use novel_core::store::MemoryStoryStore;
use novel_core::testing::{draft_json, outline_json, sample_bible, scenario_json, ScriptedBackend};
use novel_core::engine::BibleRequest;
use novel_core::{
    ChapterEngine, EngineConfig, EngineError, Gateway, JsonStoryStore, NewStory, NovelService,
    StoryStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn settings() -> NewStory {
    NewStory {
        genre_label: "無限流".to_string(),
        tags: vec!["規則怪談".to_string()],
        tone: "dark".to_string(),
        pov: "third person".to_string(),
        category: "BG".to_string(),
        target_ending_chapter: None,
    }
}

fn opening_json() -> String {
    serde_json::json!({
        "content": "The contract was signed at midnight.",
        "new_memories": ["林湘 signed the contract"],
        "new_clues": ["The lift has no fourth floor"],
        "character_updates": [{"name": "Old Wang", "role": "Supporting", "is_new": true}]
    })
    .to_string()
}

fn bible_json() -> String {
    serde_json::to_string(&sample_bible()).unwrap()
}

fn service_with<S: StoryStore>(
    primary: Arc<ScriptedBackend>,
    secondary: Option<Arc<ScriptedBackend>>,
    store: S,
) -> NovelService<S> {
    let mut gateway = Gateway::new(primary);
    if let Some(secondary) = secondary {
        gateway = gateway.with_secondary(secondary);
    }
    let engine = ChapterEngine::new(gateway, EngineConfig::default().with_seed(11));
    NovelService::new(engine, store)
}

#[tokio::test]
async fn test_start_story_and_first_two_chapters() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json())
            .then_text(scenario_json("Ward 4"))
            .then_text(outline_json("Lights Out", 6, false))
            .then_text(draft_json("The lights died at two."))
            .then_text(outline_json("The Intercom", 5, false))
            .then_text(draft_json("The intercom crackled.")),
    );
    let service = service_with(primary.clone(), None, MemoryStoryStore::new());

    let story = service.start_story(settings()).await.unwrap();
    assert_eq!(story.title(), "Rules of the Night Shift");
    assert_eq!(story.chapters.len(), 1);
    assert_eq!(story.plot_state.phase, Phase::Setup);
    assert_eq!(story.plot_state.cycle_number, 1);
    assert!(story.characters.iter().any(|c| c.name == "Old Wang"));

    let first = service.next_chapter(&story.id).await.unwrap();
    assert_eq!(first.index, 1);
    assert_eq!(first.output.title, "Lights Out");
    let minted = first.output.minted_scenario.as_ref().unwrap();
    assert_eq!(minted.scenario.name, "Ward 4");
    assert_eq!(first.output.plot_state.cycle_number, 1);
    assert!(first.output.plot_state.arc_name.starts_with("Volume 1: "));
    assert_eq!(first.output.plot_state.pending_increment, Some(6));

    let saved = service.load(&story.id).await.unwrap();
    assert_eq!(saved.chapters.len(), 2);
    assert_eq!(saved.scenarios.len(), 1);
    assert_eq!(saved.scenarios[0].cycle_number, 1);
    assert!(!saved.clues.contains(&"The lift has no fourth floor".to_string()));
    assert!(saved.clues.contains(&"The card is signed in red ink".to_string()));
    assert_eq!(saved.plot_state.resolved_clue_count, 1);

    let second = service.next_chapter(&story.id).await.unwrap();
    assert_eq!(second.index, 2);
    assert!(second.output.minted_scenario.is_none());
    // 5 + 6 from the outline, but one of four clues resolved pushes it to 13.
    assert_eq!(second.output.plot_state.instance_progress, 13);
    assert_eq!(second.output.plot_state.current_scenario, saved.plot_state.current_scenario);
    assert_eq!(primary.remaining(), 0);
}

#[tokio::test]
async fn test_refused_draft_served_by_translated_fallback() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json())
            .then_text(scenario_json("Ward 4"))
            .then_text(outline_json("Lights Out", 5, false))
            .then_error(novel_llm::Error::Refused {
                reason: "SAFETY".to_string(),
            }),
    );
    let secondary = Arc::new(
        ScriptedBackend::new("secondary")
            .then_text("The lights went out.")
            .then_text("燈滅了。"),
    );
    let service = service_with(primary, Some(secondary.clone()), MemoryStoryStore::new());

    let story = service.start_story(settings()).await.unwrap();
    let chapter = service.next_chapter(&story.id).await.unwrap();

    assert!(chapter.output.via_fallback);
    assert!(!chapter.output.degraded);
    assert_eq!(chapter.output.content, "燈滅了。");
    assert!(chapter.output.new_memories.is_empty());
    assert_eq!(chapter.output.served_by, "secondary");
    // The state update still lands even though the fallback only wrote prose.
    let saved = service.load(&story.id).await.unwrap();
    assert!(saved.plot_state.current_scenario.is_some());
    assert_eq!(saved.memories, story.memories);
    assert_eq!(secondary.calls(), 2);
}

#[tokio::test]
async fn test_failed_chapter_leaves_store_untouched() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json())
            .then_text(scenario_json("Ward 4"))
            .then_text(outline_json("Lights Out", 5, false))
            .then_error(novel_llm::Error::Network("connection reset".to_string()))
            .then_text(scenario_json("Ward 4"))
            .then_text(outline_json("Lights Out", 5, false))
            .then_text(draft_json("The lights died at two.")),
    );
    let dir = TempDir::new().unwrap();
    let service = service_with(primary, None, JsonStoryStore::new(dir.path()));

    let story = service.start_story(settings()).await.unwrap();
    let err = service.next_chapter(&story.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Gateway(_)));

    let unchanged = service.load(&story.id).await.unwrap();
    assert_eq!(unchanged, story);

    let retried = service.next_chapter(&story.id).await.unwrap();
    assert_eq!(retried.index, 1);
    assert_eq!(service.load(&story.id).await.unwrap().chapters.len(), 2);
    assert_eq!(service.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_draft_without_refusal_is_an_error() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json())
            .then_text(scenario_json("Ward 4"))
            .then_text(outline_json("Lights Out", 5, false))
            .then_text("Chapter 2: the lights died"),
    );
    let service = service_with(primary, None, MemoryStoryStore::new());

    let story = service.start_story(settings()).await.unwrap();
    let err = service.next_chapter(&story.id).await.unwrap_err();
    assert!(matches!(err, EngineError::MalformedOutput { .. }));
    assert_eq!(service.load(&story.id).await.unwrap().chapters.len(), 1);
}

#[tokio::test]
async fn test_planner_failures_fall_back_to_defaults() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json())
            .then_text("no scenario here")
            .then_text("no outline either")
            .then_text(draft_json("She walked the ward anyway.")),
    );
    let service = service_with(primary, None, MemoryStoryStore::new());

    let story = service.start_story(settings()).await.unwrap();
    let chapter = service.next_chapter(&story.id).await.unwrap();

    assert_eq!(chapter.output.title, "Untitled Chapter");
    let minted = chapter.output.minted_scenario.as_ref().unwrap();
    assert!(minted.minimal);
    assert_eq!(chapter.output.plot_state.pending_increment, Some(5));
    assert_eq!(chapter.output.content, "She walked the ward anyway.");
}

fn thin_bible_json() -> String {
    serde_json::json!({
        "title": "Ash Road",
        "summary": "Two couriers cross a burnt continent.",
        "trope": "road trip",
        "protagonist": {"name": "Mei", "role": "Protagonist"},
        "love_interest": {"name": "Ren", "role": "Love Interest"}
    })
    .to_string()
}

#[tokio::test]
async fn test_thin_bible_is_detailed_before_opening() {
    let details = serde_json::json!({
        "design_blueprint": {"main_goal": "Reach the coast", "world_truth": "The sea is gone"},
        "protagonist": {"gender": "Female", "profile": {"biography": "Courier on the ash road", "fear": "silence"}},
        "love_interest": {"profile": {"appearance": "Burn scars on both hands"}}
    });
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(thin_bible_json())
            .then_text(details.to_string())
            .then_text(opening_json()),
    );
    let service = service_with(primary.clone(), None, MemoryStoryStore::new());

    let story = service.start_story(settings()).await.unwrap();
    assert_eq!(story.bible.blueprint["world_truth"], "The sea is gone");
    assert_eq!(story.bible.protagonist.gender.as_deref(), Some("Female"));

    let mei = story.characters.iter().find(|c| c.name == "Mei").unwrap();
    assert_eq!(mei.description, "Courier on the ash road");
    assert_eq!(mei.gender, "Female");
    let ren = story.characters.iter().find(|c| c.name == "Ren").unwrap();
    assert_eq!(ren.profile["appearance"], "Burn scars on both hands");

    let prompts = primary.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].user.contains("Ash Road"));
    assert!(prompts[2].user.contains("The sea is gone"));
}

#[tokio::test]
async fn test_failed_detail_pass_keeps_bible() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(thin_bible_json())
            .then_error(novel_llm::Error::Network("connection reset".to_string()))
            .then_text(opening_json()),
    );
    let service = service_with(primary.clone(), None, MemoryStoryStore::new());

    let story = service.start_story(settings()).await.unwrap();
    assert_eq!(story.title(), "Ash Road");
    assert!(story.bible.blueprint.is_null());
    assert_eq!(story.chapters.len(), 1);
    assert_eq!(primary.remaining(), 0);
}

#[tokio::test]
async fn test_detailed_bible_skips_detail_pass() {
    let backend = Arc::new(ScriptedBackend::new("primary"));
    let engine = ChapterEngine::new(Gateway::new(backend.clone()), EngineConfig::default());
    let request = BibleRequest {
        genre_label: "無限流".to_string(),
        tags: Vec::new(),
        tone: "dark".to_string(),
        target_chapters: None,
        category: "BG".to_string(),
    };

    let bible = engine.ensure_detailed_settings(&request, sample_bible()).await;
    assert_eq!(bible, sample_bible());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_refine_character_merges_profile() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json())
            .then_text(
                serde_json::json!({
                    "profile": {"appearance": "Silver-rimmed glasses", "personality_core": "Guilt"}
                })
                .to_string(),
            ),
    );
    let service = service_with(primary.clone(), None, MemoryStoryStore::new());
    let story = service.start_story(settings()).await.unwrap();

    let refined = service.refine_character(&story.id, "Gu Chen ").await.unwrap();
    assert_eq!(refined.name, "Gu Chen");
    assert_eq!(refined.profile["appearance"], "Silver-rimmed glasses");
    assert_eq!(refined.profile["biography"], "Ward director who never sleeps");

    let saved = service.load(&story.id).await.unwrap();
    let gu = saved.characters.iter().find(|c| c.name == "Gu Chen").unwrap();
    assert_eq!(gu, &refined);
    assert_eq!(saved.characters.len(), story.characters.len());
    assert!(primary.prompts()[2].user.contains("Gu Chen"));
    assert!(!service.is_busy(&story.id));
}

#[tokio::test]
async fn test_refine_unknown_character() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .then_text(bible_json())
            .then_text(opening_json()),
    );
    let service = service_with(primary.clone(), None, MemoryStoryStore::new());
    let story = service.start_story(settings()).await.unwrap();

    let err = service.refine_character(&story.id, "Nobody").await.unwrap_err();
    assert!(matches!(err, EngineError::CharacterNotFound { .. }));
    assert_eq!(primary.calls(), 2);
}
