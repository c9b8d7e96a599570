//! The planner turns a director decision into a concrete chapter outline.
//!
//! Planning runs in three steps:
//! 1. reconcile the director's proposal with the prior progress state
//! 2. mint a new scenario when a setup chapter has none
//! 3. ask a backend for the chapter outline and fold its verdict in
//!
//! The planner never fails. Malformed or failed backend calls fall back to
//! a minimal scenario or a default outline so generation keeps moving.

use crate::director::Directive;
use crate::error::Stage;
use crate::gateway::{generate_structured, Gateway, GatewayError, Structured};
use crate::genre::TagSet;
use crate::progress::{apply_verdict, reconcile, OrganicSignals};
use crate::prompts::{format_clues, format_memories_condensed, ANTI_CLICHE};
use crate::state::{
    volume_name, ChapterPlan, Phase, RuleSet, RuleSetKind, Scenario, StoryProgressState,
};
use crate::themes::{ThemePick, ThemePool};
use novel_llm::Prompt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Theme name used when the pool offers nothing at all.
const UNCHARTED_THEME: &str = "Uncharted Instance";

/// Memory entries kept from the end of the story in planning prompts.
const PLANNING_MEMORY_LIMIT: usize = 50;

/// Everything the planner reads for one chapter.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub directive: &'a Directive,
    pub blueprint: &'a Value,
    /// Recent story text the outline continues from.
    pub summary: &'a str,
    pub memories: &'a [String],
    pub clues: &'a [String],
    pub tags: &'a [String],
    pub prior: &'a StoryProgressState,
    pub signals: OrganicSignals,
}

/// A scenario minted during planning.
#[derive(Debug, Clone, PartialEq)]
pub struct MintedScenario {
    pub theme: ThemePick,
    pub scenario: Scenario,
    pub rule_set: RuleSet,
    /// The design call failed and the scenario was built from the theme alone.
    pub minimal: bool,
}

/// Result of planning a chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub plan: ChapterPlan,
    /// Progress state for this chapter, with the outline's verdict applied.
    pub state: StoryProgressState,
    pub minted: Option<MintedScenario>,
    /// The outline came from a backend rather than the default.
    pub outlined: bool,
}

/// Gameplay hint for a phase.
pub fn gameplay_hint(phase: Phase) -> &'static str {
    match phase {
        Phase::Setup => "explore the new environment and learn its rules the hard way",
        Phase::Investigation => "gather clues, test the rules and deal with rival participants",
        Phase::Climax => "exploit a rule loophole against the antagonist",
        Phase::Resolution => "settle the rewards and expose the truth of the scenario",
        Phase::Rest => "recover, trade and deepen relationships",
        Phase::Finale => "bring every long-running thread to a close",
    }
}

// ============================================================================
// Backend response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScenarioDesign {
    scenario: Scenario,
    #[serde(default, alias = "rules", alias = "missions")]
    rule_set: Option<RuleSetDraft>,
}

#[derive(Debug, Deserialize)]
struct RuleSetDraft {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "items", alias = "missions")]
    rules: Vec<String>,
    #[serde(default)]
    hidden_truth: String,
}

#[derive(Debug, Deserialize)]
struct OutlineResponse {
    #[serde(default, alias = "chapter_title")]
    title: String,
    #[serde(default)]
    outline: String,
    #[serde(default)]
    key_clue_action: String,
    #[serde(default, alias = "romance_moment")]
    romance_beat: String,
    #[serde(default)]
    suggested_progress_increment: Option<f64>,
    #[serde(default, alias = "should_finish_instance")]
    should_finish_scenario: bool,
}

impl OutlineResponse {
    fn into_plan(self) -> ChapterPlan {
        let fallback = ChapterPlan::fallback();
        let increment = self
            .suggested_progress_increment
            .filter(|n| n.is_finite())
            .map(|n| n.round().clamp(1.0, 10.0) as u8)
            .unwrap_or(fallback.suggested_progress_increment);

        ChapterPlan {
            title: non_empty_or(self.title, fallback.title),
            outline: non_empty_or(self.outline, fallback.outline),
            key_clue_action: self.key_clue_action,
            romance_beat: self.romance_beat,
            suggested_progress_increment: increment,
            should_finish_scenario: self.should_finish_scenario,
        }
    }
}

fn non_empty_or(value: String, default: String) -> String {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

// ============================================================================
// Planner
// ============================================================================

/// Chapter planner.
pub struct Planner {
    pool: Cow<'static, ThemePool>,
    rng: Mutex<StdRng>,
    memory_head: usize,
}

impl Planner {
    /// Create a planner over the built-in theme pool.
    ///
    /// With a seed, theme selection is reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pool: Cow::Borrowed(ThemePool::builtin()),
            rng: Mutex::new(rng),
            memory_head: 5,
        }
    }

    /// Use a custom theme pool.
    pub fn with_pool(mut self, pool: ThemePool) -> Self {
        self.pool = Cow::Owned(pool);
        self
    }

    pub fn with_memory_head(mut self, entries: usize) -> Self {
        self.memory_head = entries;
        self
    }

    /// Plan one chapter.
    pub async fn plan(&self, gateway: &Gateway, request: PlanRequest<'_>) -> PlanOutcome {
        let directive = request.directive;
        let mut state = reconcile(directive.phase, request.prior, request.signals);
        state.arc_name = directive.arc_name.clone();

        let minted = if state.phase == Phase::Setup && state.current_scenario.is_none() {
            let minted = self.mint(gateway, &state, request).await;
            state.current_scenario = Some(minted.scenario.clone());
            state.current_rule_set = Some(minted.rule_set.clone());
            state.used_theme_names.insert(minted.theme.name.clone());
            state.arc_name = format!("{}: {}", volume_name(state.cycle_number), minted.theme.name);
            Some(minted)
        } else {
            None
        };

        let (plan, outlined) = match self.outline(gateway, &state, request).await {
            Some(plan) => (plan, true),
            None => (ChapterPlan::fallback(), false),
        };
        apply_verdict(&mut state, &plan);

        info!(
            phase = %state.phase,
            progress = state.instance_progress,
            cycle = state.cycle_number,
            arc = %state.arc_name,
            minted = minted.is_some(),
            outlined,
            "chapter planned"
        );

        PlanOutcome {
            plan,
            state,
            minted,
            outlined,
        }
    }

    fn pick_theme(&self, tags: &[String], state: &StoryProgressState) -> ThemePick {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.pool
            .select_with_rng(tags, state.cycle_number, &state.used_theme_names, &mut *rng)
            .unwrap_or_else(|| {
                warn!("theme pool is empty, minting an uncharted scenario");
                ThemePick {
                    name: UNCHARTED_THEME.to_string(),
                    category: "uncharted".to_string(),
                    degraded: true,
                }
            })
    }

    async fn mint(
        &self,
        gateway: &Gateway,
        state: &StoryProgressState,
        request: PlanRequest<'_>,
    ) -> MintedScenario {
        let theme = self.pick_theme(request.tags, state);
        let kind = if TagSet::new(request.tags).is_rule_horror() {
            RuleSetKind::Rules
        } else {
            RuleSetKind::Missions
        };
        info!(theme = %theme.name, category = %theme.category, degraded = theme.degraded, "minting scenario");

        let prompt = scenario_prompt(&theme, kind, state, request);
        let design: Option<ScenarioDesign> = structured_call(gateway, &prompt, Stage::Scenario).await;

        match design {
            Some(design) => {
                let mut scenario = design.scenario;
                if scenario.name.trim().is_empty() {
                    scenario.name = theme.name.clone();
                }
                let draft = design.rule_set.unwrap_or(RuleSetDraft {
                    title: String::new(),
                    rules: Vec::new(),
                    hidden_truth: String::new(),
                });
                let rule_set = RuleSet {
                    title: non_empty_or(draft.title, default_rule_title(&theme.name, kind)),
                    kind,
                    rules: draft.rules,
                    hidden_truth: draft.hidden_truth,
                };
                MintedScenario {
                    theme,
                    scenario,
                    rule_set,
                    minimal: false,
                }
            }
            None => minimal_scenario(theme, kind),
        }
    }

    async fn outline(
        &self,
        gateway: &Gateway,
        state: &StoryProgressState,
        request: PlanRequest<'_>,
    ) -> Option<ChapterPlan> {
        let prompt = self.outline_prompt(state, request);
        structured_call::<OutlineResponse>(gateway, &prompt, Stage::Outline)
            .await
            .map(OutlineResponse::into_plan)
    }

    fn outline_prompt(&self, state: &StoryProgressState, request: PlanRequest<'_>) -> Prompt {
        let scenario = state
            .current_scenario
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
            .unwrap_or_else(|| "none".to_string());
        let rules = state
            .current_rule_set
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok())
            .unwrap_or_else(|| "none".to_string());

        let user = format!(
            "Plan the next chapter from the director's instructions, the blueprint and the current progress.\n\n\
             {ANTI_CLICHE}\n\n\
             [Current state]\n\
             - Phase: {phase}\n\
             - Arc: {arc}\n\
             - Scenario progress: {progress}% (pace the plot by this: near 100% means climax or wrap-up, near 0% means groundwork)\n\
             - Gameplay focus: {hint}\n\n\
             [Director]\n{directive}\n\n\
             [Blueprint]\n{blueprint}\n\n\
             [Scenario]\n{scenario}\n\n\
             [Rules / missions]\n{rules}\n\n\
             [Story so far]\n{summary}\n\n\
             [Memories]\n{memories}\n\n\
             [Open clues]\n{clues}\n\n\
             Return JSON:\n\
             {{\n  \"chapter_title\": \"working title\",\n  \"outline\": \"detailed outline, 300-500 words\",\n  \"key_clue_action\": \"what happens to the clues\",\n  \"romance_moment\": \"the romance highlight\",\n  \"suggested_progress_increment\": 5,\n  \"should_finish_instance\": false\n}}\n\
             suggested_progress_increment is 1-10. Set should_finish_instance only when the scenario should end now.",
            phase = state.phase,
            arc = state.arc_name,
            progress = state.instance_progress,
            hint = gameplay_hint(state.phase),
            directive = request.directive.text,
            blueprint = request.blueprint,
            summary = request.summary,
            memories = format_memories_condensed(request.memories, self.memory_head, PLANNING_MEMORY_LIMIT),
            clues = format_clues(request.clues),
        );

        Prompt::new(user)
            .with_system("You are a plot architect for serialized web fiction.")
            .with_temperature(0.7)
            .json()
    }
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("categories", &self.pool.categories().len())
            .field("memory_head", &self.memory_head)
            .finish()
    }
}

fn default_rule_title(theme: &str, kind: RuleSetKind) -> String {
    match kind {
        RuleSetKind::Rules => format!("Rules of {theme}"),
        RuleSetKind::Missions => format!("Missions: {theme}"),
    }
}

/// Scenario built from the theme alone.
fn minimal_scenario(theme: ThemePick, kind: RuleSetKind) -> MintedScenario {
    let scenario = Scenario {
        name: theme.name.clone(),
        difficulty_tier: "Unknown".to_string(),
        background_summary: format!("A new scenario themed \"{}\".", theme.name),
        mechanics: Vec::new(),
        entities: Vec::new(),
        win_conditions: vec!["Survive and uncover the truth of the scenario".to_string()],
    };
    let rule_set = RuleSet {
        title: default_rule_title(&theme.name, kind),
        kind,
        rules: Vec::new(),
        hidden_truth: String::new(),
    };
    MintedScenario {
        theme,
        scenario,
        rule_set,
        minimal: true,
    }
}

fn scenario_prompt(
    theme: &ThemePick,
    kind: RuleSetKind,
    state: &StoryProgressState,
    request: PlanRequest<'_>,
) -> Prompt {
    let list_instruction = match kind {
        RuleSetKind::Rules => "a rule sheet: 6-10 numbered regulations the participants must obey, some of them contradictory or deadly, plus the hidden truth that explains them",
        RuleSetKind::Missions => "a mission board: 3-6 objectives (main and side missions) with their rewards or penalties, plus the hidden truth behind the scenario",
    };

    let user = format!(
        "Design scenario #{cycle} for the story, themed \"{theme}\".\n\
         Story tags: {tags}\n\
         Blueprint: {blueprint}\n\n\
         Provide the scenario design and {list_instruction}.\n\n\
         Return JSON:\n\
         {{\n  \"scenario\": {{\n    \"name\": \"scenario name\",\n    \"difficulty_tier\": \"difficulty\",\n    \"background_summary\": \"background\",\n    \"mechanics\": [\"core mechanic\"],\n    \"entities\": [\"monster or NPC\"],\n    \"win_conditions\": [\"how to clear it\"]\n  }},\n  \"rule_set\": {{\n    \"title\": \"sheet title\",\n    \"rules\": [\"1. ...\"],\n    \"hidden_truth\": \"what is really going on\"\n  }}\n}}",
        cycle = state.cycle_number,
        theme = theme.name,
        tags = TagSet::new(request.tags).joined(),
        blueprint = request.blueprint,
    );

    Prompt::new(user)
        .with_system("You are a game designer for infinite-flow web fiction. Scenarios are lethal and real, never computer simulations.")
        .with_temperature(0.9)
        .json()
}

/// Structured call on the primary, retrying on the secondary after a
/// policy rejection. Every failure collapses to `None`.
async fn structured_call<T: DeserializeOwned>(
    gateway: &Gateway,
    prompt: &Prompt,
    stage: Stage,
) -> Option<T> {
    let result = match generate_structured::<T>(gateway.primary(), prompt).await {
        Err(GatewayError::ContentPolicy { .. }) => match gateway.secondary() {
            Some(secondary) => {
                debug!(%stage, "primary refused, planning with the secondary backend");
                generate_structured::<T>(secondary, prompt).await
            }
            None => Err(GatewayError::Unavailable {
                backend: "fallback".to_string(),
                message: "no fallback backend configured".to_string(),
            }),
        },
        other => other,
    };

    match result {
        Ok(Structured::Parsed(value)) => Some(value),
        Ok(Structured::Malformed { raw }) => {
            warn!(%stage, raw_len = raw.len(), "malformed structured output, using default");
            None
        }
        Err(e) => {
            warn!(%stage, error = %e, "planning call failed, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::direct;
    use crate::genre::Genre;
    use crate::testing::ScriptedBackend;
    use crate::themes::{CategoryTier, ThemeCategory};
    use serde_json::json;
    use std::sync::Arc;

    fn pool() -> ThemePool {
        ThemePool::new(vec![ThemeCategory::new("urban", CategoryTier::Baseline)
            .with_names(&["Haunted Mall"])])
    }

    const OUTLINE: &str = r#"{"chapter_title": "Closing Time", "outline": "The lights go out.", "key_clue_action": "Find the ledger", "romance_moment": "Hands touch", "suggested_progress_increment": 7, "should_finish_instance": false}"#;

    const DESIGN: &str = r#"{"scenario": {"name": "Haunted Mall", "difficulty_tier": "C", "background_summary": "A mall that never closes", "mechanics": ["Lights-out"], "entities": ["Mannequins"], "win_conditions": ["Survive until dawn"]}, "rule_set": {"title": "Staff Notice", "rules": ["1. Never run"], "hidden_truth": "The manager is dead"}}"#;

    fn request<'a>(
        directive: &'a Directive,
        prior: &'a StoryProgressState,
        tags: &'a [String],
        blueprint: &'a Value,
    ) -> PlanRequest<'a> {
        PlanRequest {
            directive,
            blueprint,
            summary: "The protagonist woke in a mall.",
            memories: &[],
            clues: &[],
            tags,
            prior,
            signals: OrganicSignals::default(),
        }
    }

    #[tokio::test]
    async fn test_setup_mints_scenario() {
        let backend = Arc::new(ScriptedBackend::new("primary").then_text(DESIGN).then_text(OUTLINE));
        let gateway = Gateway::new(backend.clone());
        let planner = Planner::new(Some(1)).with_pool(pool());
        let prior = StoryProgressState::inception();
        let directive = direct(1, 200, Some(&prior), Genre::InfiniteFlow, &[]);
        let blueprint = json!({});
        let tags: Vec<String> = vec!["規則怪談".to_string()];

        let outcome = planner
            .plan(&gateway, request(&directive, &prior, &tags, &blueprint))
            .await;

        let minted = outcome.minted.expect("scenario minted");
        assert!(!minted.minimal);
        assert_eq!(minted.rule_set.kind, RuleSetKind::Rules);
        assert_eq!(outcome.state.current_scenario.as_ref().unwrap().name, "Haunted Mall");
        assert!(outcome.state.used_theme_names.contains("Haunted Mall"));
        assert_eq!(outcome.state.arc_name, "Volume 1: Haunted Mall");
        assert_eq!(outcome.plan.title, "Closing Time");
        assert_eq!(outcome.plan.romance_beat, "Hands touch");
        assert_eq!(outcome.state.pending_increment, Some(7));
        assert!(outcome.outlined);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_outline_uses_default() {
        let backend = Arc::new(ScriptedBackend::new("primary").then_text(DESIGN).then_text("not json"));
        let gateway = Gateway::new(backend);
        let planner = Planner::new(Some(1)).with_pool(pool());
        let prior = StoryProgressState::inception();
        let directive = direct(1, 200, Some(&prior), Genre::InfiniteFlow, &[]);
        let blueprint = json!({});

        let outcome = planner
            .plan(&gateway, request(&directive, &prior, &[], &blueprint))
            .await;
        assert_eq!(outcome.plan, ChapterPlan::fallback());
        assert!(!outcome.outlined);
        assert_eq!(outcome.state.pending_increment, Some(5));
    }

    #[tokio::test]
    async fn test_failed_design_mints_minimal_scenario() {
        let backend = Arc::new(
            ScriptedBackend::new("primary")
                .then_error(novel_llm::Error::Network("reset".to_string()))
                .then_text(OUTLINE),
        );
        let gateway = Gateway::new(backend);
        let planner = Planner::new(Some(1)).with_pool(pool());
        let prior = StoryProgressState::inception();
        let directive = direct(1, 200, Some(&prior), Genre::InfiniteFlow, &[]);
        let blueprint = json!({});

        let outcome = planner
            .plan(&gateway, request(&directive, &prior, &[], &blueprint))
            .await;
        let minted = outcome.minted.unwrap();
        assert!(minted.minimal);
        assert_eq!(minted.scenario.name, "Haunted Mall");
        assert_eq!(minted.rule_set.kind, RuleSetKind::Missions);
        assert!(outcome.state.used_theme_names.contains("Haunted Mall"));
    }

    #[tokio::test]
    async fn test_finish_verdict_escalates() {
        let outline = r#"{"chapter_title": "Break", "outline": "x", "suggested_progress_increment": 30, "should_finish_instance": true}"#;
        let backend = Arc::new(ScriptedBackend::new("primary").then_text(outline));
        let gateway = Gateway::new(backend.clone());
        let planner = Planner::new(Some(1)).with_pool(pool());

        let prior = StoryProgressState {
            phase: Phase::Investigation,
            instance_progress: 40,
            current_scenario: Some(minimal_scenario(
                ThemePick {
                    name: "Haunted Mall".to_string(),
                    category: "urban".to_string(),
                    degraded: false,
                },
                RuleSetKind::Missions,
            )
            .scenario),
            ..StoryProgressState::inception()
        };
        let directive = direct(20, 200, Some(&prior), Genre::InfiniteFlow, &[]);
        let blueprint = json!({});

        let outcome = planner
            .plan(&gateway, request(&directive, &prior, &[], &blueprint))
            .await;
        assert!(outcome.minted.is_none());
        assert_eq!(outcome.state.phase, Phase::Climax);
        assert_eq!(outcome.state.instance_progress, 80);
        assert_eq!(outcome.plan.suggested_progress_increment, 10);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_policy_refusal_plans_on_secondary() {
        let primary = Arc::new(ScriptedBackend::new("primary").then_error(novel_llm::Error::Refused {
            reason: "SAFETY".to_string(),
        }));
        let secondary = Arc::new(ScriptedBackend::new("secondary").then_text(OUTLINE));
        let gateway = Gateway::new(primary).with_secondary(secondary.clone());
        let planner = Planner::new(Some(1)).with_pool(pool());

        let mut prior = StoryProgressState::inception();
        prior.current_scenario = Some(minimal_scenario(
            ThemePick {
                name: "Haunted Mall".to_string(),
                category: "urban".to_string(),
                degraded: false,
            },
            RuleSetKind::Missions,
        )
        .scenario);
        prior.instance_progress = 30;
        prior.phase = Phase::Investigation;
        let directive = direct(20, 200, Some(&prior), Genre::InfiniteFlow, &[]);
        let blueprint = json!({});

        let outcome = planner
            .plan(&gateway, request(&directive, &prior, &[], &blueprint))
            .await;
        assert_eq!(outcome.plan.title, "Closing Time");
        assert_eq!(secondary.calls(), 1);
    }

    #[test]
    fn test_outline_aliases_and_clamp() {
        let response: OutlineResponse = serde_json::from_str(
            r#"{"title": "T", "outline": "O", "romance_beat": "R", "suggested_progress_increment": 0.2, "should_finish_scenario": true}"#,
        )
        .unwrap();
        let plan = response.into_plan();
        assert_eq!(plan.suggested_progress_increment, 1);
        assert!(plan.should_finish_scenario);
        assert_eq!(plan.romance_beat, "R");
    }
}
