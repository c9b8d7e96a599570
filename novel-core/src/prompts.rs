//! Prompt fragments shared by the planner, writer and editor.
//!
//! The wording here is prompt content, not control logic. Everything is
//! built from static tables and the chapter context; nothing in this module
//! talks to a backend.

use crate::genre::TagSet;

/// Characters of the previous chapter carried into the next prompt.
pub const PREVIOUS_TAIL_CHARS: usize = 2000;

/// Style constraints appended to every writing prompt.
pub const ANTI_CLICHE: &str = "\
[Writing constraints]
1. Genre integrity. Spy, urban and family-saga stories are strictly realistic: no magic, cultivation, system panels or supernatural powers. Ancient-court stories have no modern technology or internet slang. Western fantasy uses spell slots, mana and knighthood, never Eastern cultivation terms. Apocalypse stories lean on mutations or technology, not immortal arts.
2. No AI cadence. Avoid stock phrases like \"not X but Y\", \"it is worth mentioning\" or \"the wheels of fate began to turn\". Do not close a chapter with a summary or a moral. Never repeat dialogue or scenes from the previous chapter.
3. Unless the setting is sci-fi or cyberpunk, the protagonist is never a data analyst or AI engineer.
4. Magic and cultivation worlds never use words like data stream, source code, download or upload.
5. Infinite-flow hubs are a brutal arena, not a computer system. Instances are random and lethal.";

/// Tone instruction for a tone label.
pub fn tone_instruction(tone: &str) -> &'static str {
    let tone = tone.trim().to_lowercase();
    let table: &[(&[&str], &str)] = &[
        (&["歡脫", "humor", "comedy", "light"], "Tone: comedic. Lots of inner snark, light on gravity, contrast-driven jokes."),
        (&["嚴肅", "serious"], "Tone: serious drama. Tight logic, solemn atmosphere, focus on harsh reality and human games."),
        (&["暗黑", "dark", "grim"], "Tone: dark and oppressive. Cold prose depicting despair and the dark side of people."),
        (&["溫馨", "warm", "cozy", "heal"], "Tone: warm and healing. Gentle detail, small joys and kindness."),
        (&["爽文", "power fantasy", "hype"], "Tone: fast and satisfying. Brisk rhythm, the protagonist never swallows an insult and every face-slap lands."),
    ];
    table
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| tone.contains(k)))
        .map(|(_, text)| *text)
        .unwrap_or("Tone: standard web fiction. Smooth pacing balancing plot and interaction.")
}

/// Point-of-view instruction for a POV label.
pub fn pov_instruction(pov: &str) -> &'static str {
    let pov = pov.trim().to_lowercase();
    let table: &[(&[&str], &str)] = &[
        (&["女主", "female lead", "heroine"], "POV: the female lead. Focus on her inner life, fine emotions and how she reads the male lead."),
        (&["男主", "male lead", "hero"], "POV: the male lead. Focus on decisive action, the big picture and his protectiveness."),
        (&["主受", "bottom"], "POV: the uke lead (BL). Focus on inner struggle, sensory detail and the pull of the other's presence."),
        (&["主攻", "top"], "POV: the seme lead (BL). Focus on control, lingering gazes and possessive tenderness."),
        (&["第三人稱", "omniscient"], "POV: omniscient third person. The camera moves freely across the ensemble."),
    ];
    table
        .iter()
        .find(|(keys, _)| keys.iter().any(|k| pov.contains(k)))
        .map(|(_, text)| *text)
        .unwrap_or("POV: limited third person, staying close to the protagonist.")
}

/// Genre, tags, tone and POV in one block.
pub fn style_guide(genre_label: &str, tags: &[String], tone: &str, pov: &str) -> String {
    format!(
        "Genre: {genre_label} | Tags: {} \n{}\n{}",
        TagSet::new(tags).joined(),
        tone_instruction(tone),
        pov_instruction(pov)
    )
}

/// Every memory entry, numbered.
pub fn format_memories_full(memories: &[String]) -> String {
    if memories.is_empty() {
        return "No memories yet.".to_string();
    }
    memories
        .iter()
        .enumerate()
        .map(|(i, m)| format!("[Event {}] {m}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The first `head` entries plus the last `limit`, without duplicates.
pub fn format_memories_condensed(memories: &[String], head: usize, limit: usize) -> String {
    if memories.is_empty() {
        return "No memories yet.".to_string();
    }
    let tail_start = memories.len().saturating_sub(limit);
    let mut seen = std::collections::HashSet::new();
    memories
        .iter()
        .take(head)
        .chain(memories[tail_start..].iter())
        .filter(|m| seen.insert(m.as_str()))
        .map(|m| format!("- {m}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_clues(clues: &[String]) -> String {
    if clues.is_empty() {
        return "No open clues yet.".to_string();
    }
    clues
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Countdown instruction near the target ending.
pub fn ending_instruction(chapter_index: u32, target_ending: Option<u32>) -> Option<String> {
    let left = target_ending? as i64 - chapter_index as i64;
    match left {
        l if l <= 0 => Some("[Grand finale] This is the final chapter of the book!".to_string()),
        l if l <= 3 => Some(format!(
            "[Ending countdown] {l} chapters remain. Gather every loose thread and reveal the ultimate truth."
        )),
        _ => None,
    }
}

/// The last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}
