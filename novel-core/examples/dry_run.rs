//! Offline walk through a story cycle using scripted backends.
//!
//! Prints the director's phase, progress and arc for each chapter.

use novel_core::store::MemoryStoryStore;
use novel_core::testing::{sample_bible, ScriptedBackend};
use novel_core::{ChapterEngine, EngineConfig, Gateway, NewStory, NovelService};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Dry run ===\n");

    let reply = serde_json::json!({
        "scenario": {"name": "", "difficulty_tier": "C", "background_summary": "A ward that resets every night."},
        "rule_set": {"title": "", "rules": ["Never answer the intercom"]},
        "chapter_title": "Night Shift",
        "outline": "The rules tighten.",
        "suggested_progress_increment": 8,
        "should_finish_instance": true,
        "content": "The corridor lights flickered twice.",
        "new_memories": ["the lights flickered"],
        "new_clues": [],
        "resolved_clues": []
    })
    .to_string();

    let backend = ScriptedBackend::new("scripted")
        .then_text(serde_json::to_string(&sample_bible())?)
        .always(reply);
    let engine = ChapterEngine::new(
        Gateway::new(Arc::new(backend)),
        EngineConfig::default().with_seed(1),
    );
    let service = NovelService::new(engine, MemoryStoryStore::new());

    let story = service
        .start_story(NewStory {
            genre_label: "無限流".to_string(),
            tags: vec!["規則怪談".to_string()],
            tone: "dark".to_string(),
            ..NewStory::default()
        })
        .await?;
    println!("Created: {} ({})\n", story.title(), story.id);

    for _ in 0..12 {
        let chapter = service.next_chapter(&story.id).await?;
        let state = &chapter.output.plot_state;
        let minted = chapter
            .output
            .minted_scenario
            .as_ref()
            .map(|m| format!("  new scenario: {}", m.theme.name))
            .unwrap_or_default();
        println!(
            "{:>3}  {:<13} {:>3}%  cycle {}  {}{}",
            chapter.index, state.phase, state.instance_progress, state.cycle_number, state.arc_name, minted
        );
    }

    Ok(())
}
