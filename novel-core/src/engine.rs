//! The chapter engine: director, planner, writer and editor in sequence.
//!
//! [`ChapterEngine`] is stateless between calls. It reads a
//! [`ChapterContext`] and returns a [`ChapterOutput`]; persisting the result
//! is the caller's job (see [`crate::service`]).

use crate::bible::{BibleDetails, StoryBible};
use crate::characters::{merge_updates, Character, CharacterUpdate};
use crate::config::EngineConfig;
use crate::director::{direct, Directive};
use crate::error::{EngineError, Stage};
use crate::gateway::{generate_structured, FallbackRoute, Gateway, Structured};
use crate::genre::{prefers_native_fallback, Genre, TagSet};
use crate::planner::{MintedScenario, PlanOutcome, PlanRequest, Planner};
use crate::progress::OrganicSignals;
use crate::prompts::{
    ending_instruction, format_clues, format_memories_condensed, format_memories_full,
    style_guide, tail_chars, ANTI_CLICHE, PREVIOUS_TAIL_CHARS,
};
use crate::state::{ChapterPlan, StoryProgressState};
use crate::themes::ThemePool;
use crate::writer::Writer;
use novel_llm::Prompt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Everything needed to generate the next chapter of a story.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterContext {
    pub title: String,
    /// Genre label as the user wrote it.
    pub genre_label: String,
    pub genre: Genre,
    pub tags: Vec<String>,
    pub tone: String,
    pub pov: String,
    /// Zero-based index of the chapter being generated.
    pub current_chapter_index: u32,
    pub target_ending_chapter: Option<u32>,
    pub blueprint: Value,
    pub characters: Vec<Character>,
    pub memories: Vec<String>,
    pub clues: Vec<String>,
    pub prior_plot_state: Option<StoryProgressState>,
    /// Text of the previous chapter.
    pub previous_content: String,
}

impl ChapterContext {
    /// Chapter budget: the target ending, or the genre's recommendation.
    pub fn total_chapters(&self) -> u32 {
        self.target_ending_chapter
            .unwrap_or_else(|| self.genre.recommended_total_chapters())
    }

    /// Fallback route for this story's flavour.
    pub fn fallback_route(&self) -> FallbackRoute {
        if prefers_native_fallback(self.genre, &self.tags) {
            FallbackRoute::Native
        } else {
            FallbackRoute::Translated
        }
    }
}

/// A generated chapter and the state it leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterOutput {
    pub title: String,
    pub content: String,
    pub new_memories: Vec<String>,
    pub new_clues: Vec<String>,
    pub resolved_clues: Vec<String>,
    pub character_updates: Vec<CharacterUpdate>,
    pub plot_state: StoryProgressState,
    pub plan: ChapterPlan,
    pub minted_scenario: Option<MintedScenario>,
    pub served_by: String,
    pub via_fallback: bool,
    /// Fallback text that could not be translated.
    pub degraded: bool,
    pub polished: bool,
}

/// Inputs for a story bible.
#[derive(Debug, Clone, PartialEq)]
pub struct BibleRequest {
    pub genre_label: String,
    pub tags: Vec<String>,
    pub tone: String,
    pub target_chapters: Option<u32>,
    /// Audience category, e.g. "BG" or "BL".
    pub category: String,
}

/// Inputs for the opening chapter.
#[derive(Debug, Clone, Copy)]
pub struct OpeningRequest<'a> {
    pub genre_label: &'a str,
    pub tags: &'a [String],
    pub tone: &'a str,
    pub pov: &'a str,
    pub bible: &'a StoryBible,
}

/// The opening chapter with the starting cast and state.
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningOutput {
    pub content: String,
    pub new_memories: Vec<String>,
    pub new_clues: Vec<String>,
    pub characters: Vec<Character>,
    pub plot_state: StoryProgressState,
    pub served_by: String,
    pub via_fallback: bool,
    pub degraded: bool,
    pub polished: bool,
}

/// Runs the generation pipeline.
#[derive(Debug)]
pub struct ChapterEngine {
    gateway: Gateway,
    planner: Planner,
    config: EngineConfig,
}

impl ChapterEngine {
    pub fn new(gateway: Gateway, config: EngineConfig) -> Self {
        let planner = Planner::new(config.seed).with_memory_head(config.memory_head);
        Self {
            gateway,
            planner,
            config,
        }
    }

    /// Replace the built-in theme pool.
    pub fn with_theme_pool(mut self, pool: ThemePool) -> Self {
        self.planner = self.planner.with_pool(pool);
        self
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate the next chapter.
    pub async fn generate(&self, ctx: &ChapterContext) -> Result<ChapterOutput, EngineError> {
        let directive = direct(
            ctx.current_chapter_index,
            ctx.total_chapters(),
            ctx.prior_plot_state.as_ref(),
            ctx.genre,
            &ctx.tags,
        );
        let prior = ctx.prior_plot_state.clone().unwrap_or_default();
        let signals = OrganicSignals::gather(prior.resolved_clue_count, &ctx.blueprint, &ctx.memories);
        let previous_tail = tail_chars(&ctx.previous_content, PREVIOUS_TAIL_CHARS);

        info!(
            chapter = ctx.current_chapter_index,
            phase = %directive.phase,
            intensity = %directive.intensity,
            arc = %directive.arc_name,
            "directing chapter"
        );

        let outcome = self
            .planner
            .plan(
                &self.gateway,
                PlanRequest {
                    directive: &directive,
                    blueprint: &ctx.blueprint,
                    summary: previous_tail,
                    memories: &ctx.memories,
                    clues: &ctx.clues,
                    tags: &ctx.tags,
                    prior: &prior,
                    signals,
                },
            )
            .await;

        let (primary, fallback) = self.chapter_prompts(ctx, &directive, &outcome, previous_tail);
        let writer = Writer::new(&self.gateway, &self.config, ctx.fallback_route());
        let mut written = writer.draft(Stage::Draft, &primary, &fallback).await?;
        writer.polish(&mut written, &ctx.tone).await;

        let PlanOutcome {
            plan,
            state: mut plot_state,
            minted,
            ..
        } = outcome;
        let resolved = u32::try_from(written.draft.resolved_clues.len()).unwrap_or(u32::MAX);
        plot_state.resolved_clue_count = plot_state.resolved_clue_count.saturating_add(resolved);

        info!(
            chapter = ctx.current_chapter_index,
            served_by = %written.served_by,
            via_fallback = written.via_fallback,
            chars = written.draft.content.chars().count(),
            "chapter written"
        );

        let draft = written.draft;
        Ok(ChapterOutput {
            title: plan.title.clone(),
            content: draft.content,
            new_memories: draft.new_memories,
            new_clues: draft.new_clues,
            resolved_clues: draft.resolved_clues,
            character_updates: draft.character_updates,
            plot_state,
            plan,
            minted_scenario: minted,
            served_by: written.served_by,
            via_fallback: written.via_fallback,
            degraded: written.degraded,
            polished: written.polished,
        })
    }

    /// Generate a story bible. Malformed output yields the placeholder bible.
    pub async fn generate_bible(&self, request: &BibleRequest) -> Result<StoryBible, EngineError> {
        let genre = Genre::from_label(&request.genre_label);
        let total = request
            .target_chapters
            .unwrap_or_else(|| genre.recommended_total_chapters());

        let user = format!(
            "Create an original premise with breakout potential for a \"{genre_label}\" web novel.\n\
             Category: {category}\n\
             Planned length: {total} chapters.\n\
             {style}\n\n\
             {ANTI_CLICHE}\n\n\
             [Requirements]\n\
             1. Fully original: never reuse names from well-known works.\n\
             2. Deep characters: give the protagonist and the love interest a complete iceberg profile.\n\
             3. Long-range design: fix the ultimate goal and the hidden truth of the world from the start.\n\n\
             Return JSON:\n\
             {{\n  \"title\": \"title\",\n  \"summary\": \"150-200 word back-cover blurb\",\n  \"trope\": \"core trope\",\n  \"design_blueprint\": {{\"main_goal\": \"\", \"world_truth\": \"\", \"ending_vision\": \"happy / bad / open\"}},\n  \"protagonist\": {{\"name\": \"\", \"role\": \"Protagonist\", \"profile\": {{\"appearance\": \"\", \"personality_surface\": \"\", \"personality_core\": \"\", \"biography\": \"\", \"trauma\": \"\", \"desire\": \"\", \"fear\": \"\", \"charm_point\": \"\"}}}},\n  \"love_interest\": {{\"name\": \"\", \"role\": \"Love Interest\", \"profile\": {{}}}}\n}}",
            genre_label = request.genre_label,
            category = request.category,
            style = style_guide(&request.genre_label, &request.tags, &request.tone, ""),
        );
        let prompt = Prompt::new(user)
            .with_system(format!(
                "You are a bestselling web-fiction planner. Write every field in {}.",
                self.config.target_language
            ))
            .with_temperature(1.0)
            .json();

        match generate_structured::<StoryBible>(self.gateway.primary(), &prompt).await? {
            Structured::Parsed(bible) if !bible.title.trim().is_empty() => Ok(bible),
            Structured::Parsed(_) | Structured::Malformed { .. } => {
                warn!(stage = %Stage::Bible, "bible generation returned malformed output, using placeholder");
                Ok(StoryBible::placeholder())
            }
        }
    }

    /// Fill a thin bible's blueprint and lead profiles.
    ///
    /// Bibles that are already detailed (and the placeholder) come back
    /// without a call. A failed or malformed call keeps the bible as it was.
    pub async fn ensure_detailed_settings(
        &self,
        request: &BibleRequest,
        mut bible: StoryBible,
    ) -> StoryBible {
        if !bible.needs_details() {
            return bible;
        }

        let user = format!(
            "Fill in the detailed settings for this novel.\n\
             Title: {title}\n\
             Genre: {genre_label}\n\
             Tags: {tags}\n\
             Tone: {tone}\n\
             Category: {category}\n\
             Summary: {summary}\n\
             Protagonist: {p_name}\n\
             Love interest: {l_name}\n\
             Existing blueprint: {blueprint}\n\n\
             Return JSON:\n\
             {{\n  \"design_blueprint\": {{\"main_goal\": \"\", \"world_truth\": \"\", \"ending_vision\": \"\"}},\n  \"protagonist\": {{\"gender\": \"\", \"profile\": {{\"appearance\": \"\", \"personality_surface\": \"\", \"personality_core\": \"\", \"biography\": \"\"}}}},\n  \"love_interest\": {{\"gender\": \"\", \"profile\": {{\"appearance\": \"\", \"personality_surface\": \"\", \"personality_core\": \"\", \"biography\": \"\"}}}}\n}}",
            title = bible.title,
            genre_label = request.genre_label,
            tags = request.tags.join(", "),
            tone = request.tone,
            category = request.category,
            summary = bible.summary,
            p_name = bible.protagonist.name,
            l_name = bible.love_interest.name,
            blueprint = bible.blueprint,
        );
        let prompt = Prompt::new(user)
            .with_system(format!(
                "You are a web-fiction planner. Write every field in {}.",
                self.config.target_language
            ))
            .json();

        match generate_structured::<BibleDetails>(self.gateway.primary(), &prompt).await {
            Ok(Structured::Parsed(details)) => {
                bible.fill_details(details);
                info!(stage = %Stage::Bible, title = %bible.title, "bible details filled");
            }
            Ok(Structured::Malformed { raw }) => {
                warn!(stage = %Stage::Bible, raw_len = raw.len(), "detail pass returned malformed output, keeping bible");
            }
            Err(e) => warn!(stage = %Stage::Bible, error = %e, "detail pass failed, keeping bible"),
        }
        bible
    }

    /// Ask for a fuller profile of one character.
    ///
    /// The result carries the profile as `profile_update` for
    /// [`merge_update`](crate::characters::merge_update). The profile is
    /// empty when the call fails or returns nothing usable.
    pub async fn refine_character(&self, story_title: &str, character: &Character) -> CharacterUpdate {
        #[derive(Deserialize)]
        struct ProfileReply {
            #[serde(default)]
            profile: Map<String, Value>,
        }

        let user = format!(
            "Complete the character profile of {name} ({role}) in the novel \"{story_title}\".\n\
             Current description: {description}\n\
             Known profile: {profile}\n\n\
             Keep every known fact. Return JSON:\n\
             {{\n  \"profile\": {{\"appearance\": \"\", \"personality_surface\": \"\", \"personality_core\": \"\", \"biography\": \"\"}}\n}}",
            name = character.name,
            role = character.role,
            description = character.description,
            profile = Value::Object(character.profile.clone()),
        );
        let prompt = Prompt::new(user)
            .with_system(format!(
                "You are a character designer for web fiction. Write every field in {}.",
                self.config.target_language
            ))
            .json();

        let profile = match generate_structured::<ProfileReply>(self.gateway.primary(), &prompt).await {
            Ok(Structured::Parsed(reply)) => reply.profile,
            Ok(Structured::Malformed { raw }) => {
                warn!(stage = %Stage::Profile, name = %character.name, raw_len = raw.len(), "malformed profile output");
                Map::new()
            }
            Err(e) => {
                warn!(stage = %Stage::Profile, name = %character.name, error = %e, "profile refinement failed");
                Map::new()
            }
        };

        CharacterUpdate {
            profile_update: Some(profile),
            ..CharacterUpdate::named(character.name.clone())
        }
    }

    /// Write the opening chapter and set up the inception state.
    pub async fn generate_opening(
        &self,
        request: OpeningRequest<'_>,
    ) -> Result<OpeningOutput, EngineError> {
        let genre = Genre::from_label(request.genre_label);
        let route = if prefers_native_fallback(genre, request.tags) {
            FallbackRoute::Native
        } else {
            FallbackRoute::Translated
        };
        let (primary, fallback) = self.opening_prompts(genre, request);

        let writer = Writer::new(&self.gateway, &self.config, route);
        let mut written = writer.draft(Stage::Opening, &primary, &fallback).await?;
        writer.polish(&mut written, request.tone).await;

        let mut characters = request.bible.initial_cast();
        merge_updates(&mut characters, &written.draft.character_updates);

        info!(
            served_by = %written.served_by,
            cast = characters.len(),
            "opening chapter written"
        );

        Ok(OpeningOutput {
            content: written.draft.content,
            new_memories: written.draft.new_memories,
            new_clues: written.draft.new_clues,
            characters,
            plot_state: StoryProgressState::inception(),
            served_by: written.served_by,
            via_fallback: written.via_fallback,
            degraded: written.degraded,
            polished: written.polished,
        })
    }

    fn system_prompt(&self, task: &str) -> String {
        format!(
            "You are a professional novelist. {task} Write the prose in {}.",
            self.config.target_language
        )
    }

    fn chapter_prompts(
        &self,
        ctx: &ChapterContext,
        directive: &Directive,
        outcome: &PlanOutcome,
        previous_tail: &str,
    ) -> (Prompt, Prompt) {
        let state = &outcome.state;
        let plan = &outcome.plan;
        let characters = ctx
            .characters
            .iter()
            .map(Character::prompt_line)
            .collect::<Vec<_>>()
            .join("\n");
        let scenario = match (&state.current_scenario, &state.current_rule_set) {
            (Some(scenario), rules) => format!(
                "{} [{}]: {}\nRules ({}): {}",
                scenario.name,
                scenario.difficulty_tier,
                scenario.background_summary,
                rules.as_ref().map(|r| r.title.as_str()).unwrap_or("none"),
                rules.as_ref().map(|r| r.rules.join(" / ")).unwrap_or_default(),
            ),
            (None, _) => "none".to_string(),
        };
        let ending = ending_instruction(ctx.current_chapter_index, ctx.target_ending_chapter)
            .unwrap_or_default();

        let shared = format!(
            "{ANTI_CLICHE}\n\n\
             [Story] {title} | {arc} | {phase} ({progress}%)\n\
             [Style] {style}\n\
             [Blueprint] {blueprint}\n\
             [Scenario] {scenario}\n\
             [Director] {directive}\n\
             [Intensity] {intensity}\n\
             [Outline]\nTitle: {plan_title}\nPlot: {outline}\nClues: {clue_action}\nRomance: {romance}\n\
             {ending}\n\n\
             [Continuity] Never repeat the ending or dialogue of the previous chapter. The plot must move forward.",
            title = ctx.title,
            arc = state.arc_name,
            phase = state.phase,
            progress = state.instance_progress,
            style = style_guide(&ctx.genre_label, &ctx.tags, &ctx.tone, &ctx.pov),
            blueprint = ctx.blueprint,
            directive = directive.text,
            intensity = directive.intensity,
            plan_title = plan.title,
            outline = plan.outline,
            clue_action = plan.key_clue_action,
            romance = plan.romance_beat,
        );

        let primary_user = format!(
            "{shared}\n\n\
             [Context]\nMemories:\n{memories}\nClues:\n{clues}\nCharacters:\n{characters}\nPrevious text:\n{previous_tail}\n\n\
             Return JSON:\n\
             {{\n  \"content\": \"chapter text\",\n  \"new_memories\": [],\n  \"new_clues\": [],\n  \"resolved_clues\": [],\n  \"character_updates\": [{{\"name\": \"\", \"status\": \"\", \"description_append\": \"\", \"is_new\": false, \"profile_update\": {{}}}}]\n}}",
            memories = format_memories_full(&ctx.memories),
            clues = format_clues(&ctx.clues),
        );
        let fallback_user = format!(
            "{shared}\n\n\
             [Context]\nMemories:\n{memories}\nCharacters:\n{characters}\nPrevious text:\n{previous_tail}\n\n\
             Output only the chapter text.",
            memories = format_memories_condensed(&ctx.memories, self.config.memory_head, self.config.memory_window),
        );

        (
            self.writing_prompt(primary_user, "Write the next chapter and maintain the world data.")
                .json(),
            self.writing_prompt(fallback_user, "Write the next chapter."),
        )
    }

    fn opening_prompts(&self, genre: Genre, request: OpeningRequest<'_>) -> (Prompt, Prompt) {
        let bible = request.bible;
        let tags = TagSet::new(request.tags);
        let mut extra = opening_focus(genre).to_string();
        if tags.matches_any(&["重生", "rebirth", "reborn"]) {
            extra.push_str(" Show the tragic death in the past life and the shock of being reborn.");
        }
        if tags.has_secret_identity() {
            extra.push_str(" Stress how carefully the protagonist hides their identity and how little they trust anyone.");
        }
        let profile = |seed: &crate::bible::CharacterSeed| {
            serde_json::to_string(&seed.profile).unwrap_or_default()
        };

        let shared = format!(
            "{ANTI_CLICHE}\n\n\
             [Premise] {title} / {trope}\n\
             {style}\n\
             [Blueprint] {blueprint}\n\
             [Protagonist] {p_name}: {p_profile}\n\
             [Love interest] {l_name}: {l_profile}\n\n\
             [Requirements]\n\
             1. Length: 1500-2000 words.\n\
             2. Golden opening: start in media res, straight into the conflict.\n\
             3. Ensemble: naturally introduce one or two functional side characters with vivid traits.\n\
             4. Meaningful conflict: the trouble must block the protagonist's core desire and force them to act.\n\
             5. {extra}",
            title = bible.title,
            trope = bible.trope,
            style = style_guide(request.genre_label, request.tags, request.tone, request.pov),
            blueprint = bible.blueprint,
            p_name = bible.protagonist.name,
            p_profile = profile(&bible.protagonist),
            l_name = bible.love_interest.name,
            l_profile = profile(&bible.love_interest),
        );

        let primary_user = format!(
            "{shared}\n\n\
             Return JSON:\n\
             {{\n  \"content\": \"chapter text\",\n  \"new_memories\": [],\n  \"new_clues\": [],\n  \"character_updates\": [\n    {{\"name\": \"{p_name}\", \"role\": \"Protagonist\", \"status\": \"initial status\", \"is_new\": false}},\n    {{\"name\": \"side character\", \"role\": \"Supporting\", \"status\": \"introduced\", \"is_new\": true, \"profile_update\": {{\"appearance\": \"\", \"personality\": \"\", \"biography\": \"\"}}}}\n  ]\n}}",
            p_name = bible.protagonist.name,
        );
        let fallback_user = format!("{shared}\n\nOutput only the chapter text.");

        (
            self.writing_prompt(primary_user, "Write the first chapter.").json(),
            self.writing_prompt(fallback_user, "Write the first chapter."),
        )
    }

    fn writing_prompt(&self, user: String, task: &str) -> Prompt {
        let mut prompt = Prompt::new(user)
            .with_system(self.system_prompt(task))
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            prompt = prompt.with_temperature(temperature);
        }
        prompt
    }
}

/// What the opening chapter of each genre should focus on.
fn opening_focus(genre: Genre) -> &'static str {
    match genre {
        Genre::InfiniteFlow => "The protagonist enters the first lethal instance together with a crowd of ten to twenty people: screaming newcomers, cold veterans and doomed bystanders. Build group panic. It is never a computer program or virtual world; death and blood are real.",
        Genre::Xianxia => "Show the sect or the bottom rung the protagonist lives on: mocking disciples and the crowd of menial workers. The protagonist is never alone in the scene.",
        Genre::Espionage => "The protagonist is already undercover. Show the busy organization around them and its foot soldiers and bystanders.",
        Genre::Apocalypse => "Disaster breaks out. Show fleeing crowds, bitten passers-by and jammed traffic on an epic scale.",
        Genre::PalaceIntrigue => "The protagonist is framed. Show the gawking crowd, snobbish servants and cold onlookers.",
        Genre::UrbanRomance => "The protagonist meets the love interest for the first time. Show the lively setting and how bystanders react.",
        _ => "Open on the inciting incident and place the protagonist among other people.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_context, ScriptedBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_bible_placeholder_on_malformed() {
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_text("no json")));
        let engine = ChapterEngine::new(gateway, EngineConfig::default());
        let bible = engine
            .generate_bible(&BibleRequest {
                genre_label: "無限流".to_string(),
                tags: Vec::new(),
                tone: "dark".to_string(),
                target_chapters: None,
                category: "BG".to_string(),
            })
            .await
            .unwrap();
        assert!(bible.is_placeholder());
    }

    #[tokio::test]
    async fn test_bible_gateway_failure_propagates() {
        let gateway = Gateway::new(Arc::new(
            ScriptedBackend::new("primary").then_error(novel_llm::Error::Network("down".to_string())),
        ));
        let engine = ChapterEngine::new(gateway, EngineConfig::default());
        let result = engine
            .generate_bible(&BibleRequest {
                genre_label: "無限流".to_string(),
                tags: Vec::new(),
                tone: String::new(),
                target_chapters: Some(100),
                category: "BG".to_string(),
            })
            .await;
        assert!(matches!(result, Err(EngineError::Gateway(_))));
    }

    #[test]
    fn test_total_chapters_and_route() {
        let mut ctx = sample_context();
        ctx.target_ending_chapter = None;
        ctx.genre = Genre::Apocalypse;
        assert_eq!(ctx.total_chapters(), 160);
        ctx.target_ending_chapter = Some(90);
        assert_eq!(ctx.total_chapters(), 90);

        ctx.genre = Genre::Xianxia;
        assert_eq!(ctx.fallback_route(), FallbackRoute::Native);
        ctx.genre = Genre::InfiniteFlow;
        ctx.tags = vec!["規則怪談".to_string()];
        assert_eq!(ctx.fallback_route(), FallbackRoute::Translated);
    }
}
