//! Command-line driver for serialized fiction generation.
//!
//! ```bash
//! novelist new --genre 無限流 --tags 規則怪談 --chapters 120
//! novelist next <story-id> --count 3
//! novelist show <story-id>
//! novelist refine <story-id> <character>
//! novelist list
//! ```

mod cli;

use cli::{Cli, Command, NewArgs};
use novel_core::{
    ChapterEngine, EngineConfig, Gateway, GatewayConfig, JsonStoryStore, NewStory, NovelService,
    StoryRecord, StoryStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match cli::parse_args(&args, std::env::var("NOVELIST_DIR").ok()) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run 'novelist --help' for usage.");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("NOVELIST_LOG_JSON")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let store = JsonStoryStore::new(cli.store_dir.clone());

    match cli.command {
        Command::Help => cli::print_help(),
        Command::List => {
            let stories = store.list().await?;
            if stories.is_empty() {
                println!("No stories in {}", cli.store_dir.display());
            }
            for story in stories {
                println!(
                    "{}  {}  [{}]  {} chapters  {} ({})",
                    story.id,
                    story.title,
                    story.genre_label,
                    story.chapter_count,
                    story.arc_name,
                    story.phase
                );
            }
        }
        Command::Show { id, chapter } => {
            let story = store.load(&id).await?;
            match chapter {
                Some(index) => match story.chapters.iter().find(|c| c.index == index) {
                    Some(chapter) => {
                        println!("# {}\n", chapter.title);
                        println!("{}", chapter.content);
                    }
                    None => return Err(format!("story {id} has no chapter {index}").into()),
                },
                None => print_story(&story),
            }
        }
        Command::Refine { id, name } => {
            let service = service(store)?;
            let character = service.refine_character(&id, &name).await?;
            println!("{}", character.prompt_line());
            for (key, value) in &character.profile {
                match value.as_str() {
                    Some(text) => println!("  {key}: {text}"),
                    None => println!("  {key}: {value}"),
                }
            }
        }
        Command::New(args) => {
            let service = service(store)?;
            let story = service.start_story(new_story(args)).await?;
            println!("Created {} ({})", story.title(), story.id);
            println!();
            if let Some(opening) = story.chapters.first() {
                println!("{}", opening.content);
            }
        }
        Command::Next { id, count, no_wait } => {
            let service = service(store)?;
            for _ in 0..count {
                let committed = if no_wait {
                    service.try_next_chapter(&id).await?
                } else {
                    service.next_chapter(&id).await?
                };
                let output = &committed.output;
                let state = &output.plot_state;
                println!(
                    "# Chapter {}: {}  [{} | {} {}%]",
                    committed.index, output.title, state.arc_name, state.phase, state.instance_progress
                );
                if output.via_fallback {
                    println!("(written by {})", output.served_by);
                }
                println!();
                println!("{}", output.content);
                println!();
            }
        }
    }

    Ok(())
}

fn engine_config() -> EngineConfig {
    match std::env::var("NOVELIST_LANGUAGE") {
        Ok(language) if !language.trim().is_empty() => {
            EngineConfig::default().with_target_language(language)
        }
        _ => EngineConfig::default(),
    }
}

fn service(store: JsonStoryStore) -> Result<NovelService<JsonStoryStore>, BoxError> {
    let gateway = Gateway::from_config(&GatewayConfig::from_env()?)?;
    let engine = ChapterEngine::new(gateway, engine_config());
    Ok(NovelService::new(engine, store))
}

fn new_story(args: NewArgs) -> NewStory {
    NewStory {
        genre_label: args.genre,
        tags: args.tags,
        tone: args.tone,
        pov: args.pov,
        category: args.category,
        target_ending_chapter: args.chapters,
    }
}

fn print_story(story: &StoryRecord) {
    let state = &story.plot_state;
    println!("{} ({})", story.title(), story.id);
    println!("Genre: {}  Tags: {}", story.genre_label, story.tags.join(", "));
    println!("{}", story.bible.summary);
    println!();
    println!(
        "Arc: {}  Phase: {}  Progress: {}%  Cycle: {}",
        state.arc_name, state.phase, state.instance_progress, state.cycle_number
    );
    if let Some(scenario) = &state.current_scenario {
        println!("Scenario: {} [{}]", scenario.name, scenario.difficulty_tier);
    }
    if let Some(rules) = &state.current_rule_set {
        println!("{}:", rules.title);
        for rule in &rules.rules {
            println!("  - {rule}");
        }
    }
    println!();
    println!("Characters:");
    for character in &story.characters {
        println!("  {}", character.prompt_line());
    }
    println!("Open clues:");
    for clue in &story.clues {
        println!("  - {clue}");
    }
    println!();
    println!("Chapters:");
    for chapter in &story.chapters {
        let marker = if chapter.via_fallback { " *" } else { "" };
        println!("  {:>4}  {}{}", chapter.index, chapter.title, marker);
    }
}
