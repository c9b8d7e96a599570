//! The director: decides what kind of chapter comes next.
//!
//! [`direct`] is a pure function of the chapter index, the chapter budget,
//! the prior progress state, the genre and the tags. It proposes a phase,
//! an intensity and an arc name, and composes the directive text from four
//! layers:
//!
//! 1. genre stage wording for the proposed phase
//! 2. a romance beat keyed to the position inside the 40-chapter window
//! 3. a hidden-identity beat when the story carries a secret-identity tag
//! 4. world-stakes framing keyed to the act (thirds of the budget)
//!
//! Within the last 20 chapters the finale overrides everything else.

use crate::genre::{Genre, TagSet};
use crate::progress::opens_new_cycle;
use crate::state::{volume_name, Phase, StoryProgressState};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;

/// Chapters per cyclic window.
pub const ARC_LENGTH: u32 = 40;

/// Remaining chapters at which the finale takes over.
pub const FINALE_WINDOW: i64 = 20;

/// First cyclic position of the rest sub-window (last 20% of the window).
pub const REST_WINDOW_START: u32 = ARC_LENGTH - ARC_LENGTH / 5 + 1;

/// Arc name used for every finale chapter.
pub const FINALE_ARC_NAME: &str = "Final Volume";

/// How hard the chapter should push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Intensity {
    Low,
    Medium,
    High,
}

impl Intensity {
    fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Setup | Phase::Rest => Intensity::Low,
            Phase::Investigation | Phase::Resolution => Intensity::Medium,
            Phase::Climax | Phase::Finale => Intensity::High,
        }
    }

    fn step_down(self) -> Self {
        match self {
            Intensity::High => Intensity::Medium,
            _ => Intensity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long-horizon position in the chapter budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Act {
    Early,
    Middle,
    Late,
}

impl Act {
    pub fn of(chapter_index: u32, total_chapters: u32) -> Self {
        if total_chapters == 0 {
            return Act::Late;
        }
        match (chapter_index as u64 * 3) / total_chapters as u64 {
            0 => Act::Early,
            1 => Act::Middle,
            _ => Act::Late,
        }
    }

    fn stakes(self) -> &'static str {
        match self {
            Act::Early => "Stakes: personal. The danger threatens the protagonist and their small circle. Enemies are beatable and the protagonist is still growing.",
            Act::Middle => "Stakes: factional. The crisis spreads to a city, a sect, a company or a large organization. The protagonist has a seat at the table and enemies grow cunning.",
            Act::Late => "Stakes: world-level. The crisis touches the survival of the world, the rules of reality or the gods themselves. Every move of the protagonist shifts the balance.",
        }
    }
}

/// Whether the chapter sits in the active or the rest part of its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Active,
    Rest,
}

impl Window {
    fn of(cycle_position: u32) -> Self {
        if cycle_position >= REST_WINDOW_START {
            Window::Rest
        } else {
            Window::Active
        }
    }
}

/// Sub-stage of the finale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinaleStage {
    Revelation,
    Confrontation,
    Epilogue,
}

impl FinaleStage {
    fn from_remaining(remaining: i64) -> Self {
        match remaining {
            r if r <= 3 => FinaleStage::Epilogue,
            r if r <= 10 => FinaleStage::Confrontation,
            _ => FinaleStage::Revelation,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            FinaleStage::Revelation => "FINALE, final revelation: pull every long-running thread into the open. Reveal the truth behind the world and set the last confrontation in motion. No new side plots.",
            FinaleStage::Confrontation => "FINALE, climactic confrontation: the protagonist faces the ultimate antagonist. Spend the hard-won clues, allies and sacrifices. The cost must be real.",
            FinaleStage::Epilogue => "FINALE, epilogue: resolve the main conflict and the romance. Close every open foreshadowing and give the cast their endings.",
        }
    }
}

/// The director's decision for one chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub phase: Phase,
    pub intensity: Intensity,
    pub text: String,
    pub arc_name: String,
    pub act: Act,
    pub window: Window,
    /// Position inside the cyclic window, 1–40.
    pub cycle_position: u32,
    pub finale: Option<FinaleStage>,
}

// ============================================================================
// Genre stage templates
// ============================================================================

/// Stage wording for one genre.
#[derive(Debug, Clone, Copy)]
pub struct StageTemplates {
    pub setup: &'static str,
    pub investigation: &'static str,
    pub climax: &'static str,
    pub resolution: &'static str,
    pub rest: &'static str,
}

impl StageTemplates {
    pub fn for_phase(&self, phase: Phase) -> &'static str {
        match phase {
            Phase::Setup => self.setup,
            Phase::Investigation => self.investigation,
            Phase::Climax => self.climax,
            Phase::Resolution => self.resolution,
            Phase::Rest | Phase::Finale => self.rest,
        }
    }
}

const GENERIC_TEMPLATES: StageTemplates = StageTemplates {
    setup: "Stage: a new chapter of the story opens. Establish the new situation and its open questions.",
    investigation: "Stage: development and challenge. Complicate the situation and let the protagonist make real progress.",
    climax: "Stage: the crisis peaks. Force a decisive choice.",
    resolution: "Stage: wrap up the current arc and show its consequences.",
    rest: "Stage: a breather. Let relationships and the cast breathe before the next arc.",
};

lazy_static! {
    static ref STAGE_TEMPLATES: HashMap<Genre, StageTemplates> = {
        let mut m = HashMap::new();
        m.insert(Genre::InfiniteFlow, StageTemplates {
            setup: "Stage: entering the instance. The protagonist arrives in a new scenario. Dwell on the uncanny rules and the oppressive atmosphere. Do not start fighting yet; build suspense first.",
            investigation: "Stage: deep exploration. Hunt for clues through trial and error: find rule loopholes and key items. Run two threads at once: the instance puzzle and the partner, who helps or is suspected in the middle of the danger.",
            climax: "Stage: final decryption. The instance countdown is running. A boss fight or death mechanism triggers and the protagonist turns the clues into a counterattack. Reveal the truth of this instance.",
            resolution: "Stage: clearing the instance. Tally rewards and losses and let the survivors react to the truth they uncovered.",
            rest: "Stage: back in the hub space. Count the rewards. Ensemble moment: show teammates' private lives and side-couple interactions.",
        });
        m.insert(Genre::Espionage, StageTemplates {
            setup: "Stage: infiltration. A new assignment places the protagonist inside a new organization. Build the cover and survive the first tests.",
            investigation: "Stage: rising through the ranks. Turf wars heat up: street chases and brawls. Earn trust through ruthlessness while passing intelligence out.",
            climax: "Stage: closing the net. The police or the rival faction launch the final assault. Carry out the last mission in the chaos.",
            resolution: "Stage: aftermath. Count the dead, burn the evidence and decide who can still be trusted.",
            rest: "Stage: lying low. A tense quiet between operations where the mask almost slips at home.",
        });
        m.insert(Genre::Xianxia, StageTemplates {
            setup: "Stage: a new map. The protagonist reaches a higher realm, gathers trump cards and is looked down upon. Show the hunger for power.",
            investigation: "Stage: trials and fortune. Venture out for opportunities and survive treasure-hunting ambushes. Show the protagonist defeating opponents above their level.",
            climax: "Stage: breakthrough. Cultivation surges and the protagonist returns in force before a watching crowd.",
            resolution: "Stage: reputation settles. Rivals recalculate and old debts are collected.",
            rest: "Stage: seclusion. Quiet cultivation, sect life and time with companions before ascending to the next realm.",
        });
        m.insert(Genre::Apocalypse, StageTemplates {
            setup: "Stage: a new crisis. The old base is no longer safe. Set out on the road with supplies running desperately low.",
            investigation: "Stage: hard survival. Human nature is tested on the road and the horde closes in. Teammates get hurt or fall.",
            climax: "Stage: holding the line. The horde hits the new stronghold and everything rides on one night.",
            resolution: "Stage: a new home. The horde is repelled and building and defences begin.",
            rest: "Stage: fragile peace. Daily life inside the walls, small joys and the scars everyone carries.",
        });
        m.insert(Genre::PalaceIntrigue, StageTemplates {
            setup: "Stage: new board. The protagonist enters a new household or court and a new rival provokes them. Hold still and plot in secret.",
            investigation: "Stage: chained counterattacks. Pull the net tight, expose the scheme and humiliate the schemer in public.",
            climax: "Stage: the decisive audience. Every prepared move lands at once before the highest authority.",
            resolution: "Stage: promotion. A clear victory raises the protagonist's standing and wins followers.",
            rest: "Stage: quiet days in the inner court, tea, gossip and alliances made in private.",
        });
        m.insert(Genre::UrbanRomance, StageTemplates {
            setup: "Stage: daily sweetness and workplace sparks. Flirtation, tentative moves and doting in small moments.",
            investigation: "Stage: everyday life deepens. Shared work and shared secrets bring the couple closer.",
            climax: "Stage: an outside obstacle or workplace crisis hits and the couple solve it by trusting each other.",
            resolution: "Stage: the relationship moves a step forward after the trouble.",
            rest: "Stage: a soft slice-of-life chapter full of small domestic moments.",
        });
        m.insert(Genre::WesternFantasy, StageTemplates {
            setup: "Stage: a new quest. The party gathers in an unfamiliar land and an omen sets the adventure in motion.",
            investigation: "Stage: the road. Ruins, bargains and monsters; each answer raises a darker question.",
            climax: "Stage: the lair. The party faces the power behind the quest.",
            resolution: "Stage: the return. Rewards, oaths kept and oaths broken.",
            rest: "Stage: the tavern. Songs, wounds mended and the party's bonds tested in peacetime.",
        });
        m.insert(Genre::SciFi, StageTemplates {
            setup: "Stage: first contact with the problem. A new station, ship or colony and an anomaly nobody can explain.",
            investigation: "Stage: analysis under pressure. Data, sabotage and shrinking oxygen margins.",
            climax: "Stage: critical failure. The system collapses and the protagonist has one window to act.",
            resolution: "Stage: debrief. The anomaly is understood and the cost is counted.",
            rest: "Stage: shore leave. Crew downtime and quiet conversations under artificial stars.",
        });
        m
    };
}

/// Stage wording for a genre, falling back to generic wording.
pub fn stage_templates(genre: Genre) -> &'static StageTemplates {
    STAGE_TEMPLATES.get(&genre).unwrap_or(&GENERIC_TEMPLATES)
}

// ============================================================================
// Tag overlays
// ============================================================================

/// A condition on the story's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPredicate {
    Angst,
    SecretIdentity,
}

impl TagPredicate {
    fn holds(self, tags: TagSet<'_>) -> bool {
        match self {
            TagPredicate::Angst => tags.is_angst(),
            TagPredicate::SecretIdentity => tags.has_secret_identity(),
        }
    }
}

/// Romance beats for the crisis part of the window, first match wins.
const CRISIS_ROMANCE_OVERLAYS: &[(TagPredicate, &str)] = &[
    (
        TagPredicate::SecretIdentity,
        "Romance: identity crisis and suspicion. The partner has noticed a crack in the protagonist's cover. Each new lie to patch the old one hurts, and trust is close to breaking.",
    ),
    (
        TagPredicate::Angst,
        "Romance: freezing point. A misunderstanding explodes and affection seems to hit bottom. They torment each other and say the opposite of what they feel.",
    ),
];

fn romance_beat(cycle_position: u32, tags: TagSet<'_>) -> &'static str {
    match cycle_position {
        0..=5 => "Romance: first contact in the new stage. The two draw closer but the secrets between them keep a charged distance. Lingering looks, restrained words.",
        6..=20 => "Romance: warming up. Shared danger builds wordless teamwork, accidental touches and protective gestures.",
        21..=35 => CRISIS_ROMANCE_OVERLAYS
            .iter()
            .find(|(predicate, _)| predicate.holds(tags))
            .map(|(_, beat)| *beat)
            .unwrap_or("Romance: hardship. Outside pressure breeds anxiety. One pushes the other away to protect them, or gets hurt and leaves the other torn by guilt."),
        _ => "Romance: clearing skies. The crisis passes, misunderstandings are resolved and the tested bond is stronger than before.",
    }
}

fn identity_beat(cycle_position: u32, tags: TagSet<'_>) -> Option<&'static str> {
    if !TagPredicate::SecretIdentity.holds(tags) {
        return None;
    }
    match cycle_position {
        0..=10 => Some("Hidden identity: the protagonist carefully conceals their true identity and ability. Solve a problem without revealing anything."),
        11..=30 => Some("Hidden identity: trouble the cover identity cannot solve. Stage a near-exposure, such as an ability they should not have or a familiar silhouette recognized."),
        31..=38 => Some("Hidden identity: forced reveal. During the climax the protagonist has to use their real power. Show the shock and suspicion around them, above all from the partner. The protagonist refuses to explain, for now."),
        _ => None,
    }
}

// ============================================================================
// Direction
// ============================================================================

/// Propose the next phase from the prior state.
fn propose_phase(prior: Option<&StoryProgressState>) -> Phase {
    match prior {
        None => Phase::Setup,
        Some(state) => match state.phase {
            Phase::Resolution => Phase::Rest,
            Phase::Rest => Phase::Setup,
            _ => Phase::from_progress(state.instance_progress),
        },
    }
}

fn arc_name_for(phase: Phase, cycle_position: u32, prior: Option<&StoryProgressState>) -> String {
    match prior {
        None => volume_name(1),
        Some(state) if phase == Phase::Setup && opens_new_cycle(state) => {
            volume_name(state.cycle_number.saturating_add(1))
        }
        Some(state) if cycle_position == 1 => volume_name(state.cycle_number),
        Some(state) => state.arc_name.clone(),
    }
}

/// Decide the phase, intensity, arc name and directive for a chapter.
pub fn direct(
    chapter_index: u32,
    total_chapters: u32,
    prior: Option<&StoryProgressState>,
    genre: Genre,
    tags: &[String],
) -> Directive {
    let tags = TagSet::new(tags);
    let cycle_position = chapter_index % ARC_LENGTH + 1;
    let window = Window::of(cycle_position);
    let act = Act::of(chapter_index, total_chapters);
    let remaining = total_chapters as i64 - chapter_index as i64;

    if remaining <= FINALE_WINDOW {
        let stage = FinaleStage::from_remaining(remaining);
        let mut layers = vec![stage.directive()];
        if let Some(beat) = identity_beat(cycle_position, tags) {
            layers.push(beat);
        }
        layers.push(Act::Late.stakes());

        return Directive {
            phase: Phase::Finale,
            intensity: Intensity::High,
            text: layers.join("\n\n"),
            arc_name: FINALE_ARC_NAME.to_string(),
            act,
            window,
            cycle_position,
            finale: Some(stage),
        };
    }

    let phase = propose_phase(prior);
    let mut intensity = Intensity::for_phase(phase);
    let mut layers = vec![stage_templates(genre).for_phase(phase)];

    if window == Window::Rest && phase == Phase::Investigation {
        intensity = intensity.step_down();
        layers.push("Pacing: this stretch is a lull. Let the characters recover, regroup and talk between the dangers.");
    }
    if let Some(beat) = identity_beat(cycle_position, tags) {
        layers.push(beat);
    }
    layers.push(romance_beat(cycle_position, tags));
    layers.push(act.stakes());

    Directive {
        phase,
        intensity,
        text: layers.join("\n\n"),
        arc_name: arc_name_for(phase, cycle_position, prior),
        act,
        window,
        cycle_position,
        finale: None,
    }
}
