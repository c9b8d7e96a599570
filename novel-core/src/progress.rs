//! Progress tracking across chapters.
//!
//! The tracker reconciles the director's phase proposal with the prior
//! state and the organic signals read from the story so far. It is a pure
//! transformation: the planner calls it, then stores the result.

use crate::genre::BOSS_FORESHADOW_MARKERS;
use crate::state::{ChapterPlan, Phase, StoryProgressState, MAX_PROGRESS, SEED_PROGRESS};
use serde_json::Value;
use tracing::debug;

/// Increment applied when the previous outline suggested none.
pub const DEFAULT_INCREMENT: u8 = 5;

/// Clue total assumed when the blueprint does not carry one.
pub const DEFAULT_TOTAL_CLUES: u32 = 5;

/// Progress floor once a finish verdict lands during investigation.
pub const CLIMAX_FLOOR: u8 = 80;

/// How many trailing memory entries are scanned for boss foreshadowing.
const BOSS_SCAN_WINDOW: usize = 5;

/// Evidence of progress read from the story content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrganicSignals {
    /// Fraction of the scenario's clues resolved, 0.0–1.0.
    pub clue_progress: f32,
    /// A boss or final antagonist has been foreshadowed.
    pub boss_foreshadowed: bool,
}

impl OrganicSignals {
    /// Read signals from the resolved clue count, the blueprint and recent memories.
    pub fn gather(resolved_clues: u32, blueprint: &Value, memories: &[String]) -> Self {
        let total = estimated_total_clues(blueprint);
        let clue_progress = (resolved_clues as f32 / total as f32).clamp(0.0, 1.0);

        let recent = memories.iter().rev().take(BOSS_SCAN_WINDOW);
        let boss_foreshadowed = recent.into_iter().any(|memory| {
            let memory = memory.to_lowercase();
            BOSS_FORESHADOW_MARKERS.iter().any(|m| memory.contains(m))
        });

        Self {
            clue_progress,
            boss_foreshadowed,
        }
    }

    /// Progress the story content alone justifies.
    pub fn organic_progress(&self) -> u8 {
        let boss_weight = if self.boss_foreshadowed { 0.5 } else { 0.0 };
        let value = self.clue_progress * 50.0 + boss_weight * 30.0;
        value.round().clamp(0.0, MAX_PROGRESS as f32) as u8
    }
}

/// Total clues the blueprint plans for the current scenario.
///
/// Read from `instance.total_clues` (or `total_clues` at the top level).
pub fn estimated_total_clues(blueprint: &Value) -> u32 {
    blueprint
        .pointer("/instance/total_clues")
        .or_else(|| blueprint.get("total_clues"))
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(DEFAULT_TOTAL_CLUES)
}

/// Whether a setup proposal against this state starts a new cycle.
///
/// A cycle closes once a scenario has been minted and finished, or after
/// a rest chapter. A story that never minted a scenario stays in cycle 1.
pub fn opens_new_cycle(prior: &StoryProgressState) -> bool {
    !prior.has_unfinished_scenario()
        && (prior.current_scenario.is_some() || prior.phase == Phase::Rest)
}

/// Reconcile the director's proposal with the prior state.
pub fn reconcile(
    proposed: Phase,
    prior: &StoryProgressState,
    signals: OrganicSignals,
) -> StoryProgressState {
    let mut next = prior.clone();

    match proposed {
        Phase::Rest => {
            next.phase = Phase::Rest;
            next.instance_progress = 0;
            next.clear_scenario();
            next.pending_increment = None;
        }
        Phase::Setup if !prior.has_unfinished_scenario() => {
            if opens_new_cycle(prior) {
                next.cycle_number = prior.cycle_number.saturating_add(1);
            }
            next.phase = Phase::Setup;
            next.instance_progress = SEED_PROGRESS;
            next.clear_scenario();
            next.pending_increment = None;
        }
        _ => {
            // A setup proposal while a scenario is in flight falls through
            // here and keeps the scenario.
            let increment = prior.pending_increment.unwrap_or(DEFAULT_INCREMENT);
            let advanced = prior.instance_progress.saturating_add(increment);
            let progress = advanced
                .max(signals.organic_progress())
                .min(MAX_PROGRESS);

            next.instance_progress = progress;
            next.phase = match proposed {
                Phase::Finale => Phase::Finale,
                _ => Phase::from_progress(progress),
            };
            next.pending_increment = None;
        }
    }

    debug!(
        proposed = %proposed,
        phase = %next.phase,
        progress = next.instance_progress,
        cycle = next.cycle_number,
        "progress reconciled"
    );
    next
}

/// Apply the outline's verdict to the reconciled state.
///
/// A finish verdict escalates immediately; the suggested increment is kept
/// for the next reconciliation.
pub fn apply_verdict(state: &mut StoryProgressState, plan: &ChapterPlan) {
    if plan.should_finish_scenario {
        match state.phase {
            Phase::Investigation => {
                state.phase = Phase::Climax;
                state.instance_progress = state.instance_progress.max(CLIMAX_FLOOR);
            }
            Phase::Climax => {
                state.phase = Phase::Resolution;
                state.instance_progress = MAX_PROGRESS;
            }
            _ => {}
        }
    }
    state.pending_increment = Some(plan.suggested_progress_increment.clamp(1, 10));
}
