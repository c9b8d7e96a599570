//! Writer and editor stages.
//!
//! The writer asks the primary backend for a structured chapter draft
//! through the fallback pipeline. Fallback drafts carry prose only. The
//! editor polishes long primary drafts and keeps the draft on any failure.

use crate::characters::CharacterUpdate;
use crate::config::EngineConfig;
use crate::error::{EngineError, Stage};
use crate::gateway::{
    generate_text, is_refusal_text, parse_structured, FallbackPipeline, FallbackRoute, Gateway,
    Structured,
};
use crate::prompts::ANTI_CLICHE;
use novel_llm::Prompt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A chapter draft with its bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterDraft {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub new_memories: Vec<String>,
    #[serde(default)]
    pub new_clues: Vec<String>,
    #[serde(default)]
    pub resolved_clues: Vec<String>,
    #[serde(default)]
    pub character_updates: Vec<CharacterUpdate>,
}

impl ChapterDraft {
    /// A draft with prose only.
    pub fn prose(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// A draft and how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenChapter {
    pub draft: ChapterDraft,
    pub served_by: String,
    pub via_fallback: bool,
    /// Untranslated fallback text.
    pub degraded: bool,
    pub polished: bool,
}

/// Writer and editor over a gateway.
#[derive(Debug, Clone, Copy)]
pub struct Writer<'a> {
    gateway: &'a Gateway,
    config: &'a EngineConfig,
    route: FallbackRoute,
}

impl<'a> Writer<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a EngineConfig, route: FallbackRoute) -> Self {
        Self {
            gateway,
            config,
            route,
        }
    }

    fn pipeline(&self) -> FallbackPipeline<'a> {
        FallbackPipeline::new(self.gateway, self.route, &self.config.target_language)
    }

    /// Write a draft.
    ///
    /// `primary` asks for the structured draft; `fallback` asks for prose
    /// only and is used when the primary refuses.
    pub async fn draft(
        &self,
        stage: Stage,
        primary: &Prompt,
        fallback: &Prompt,
    ) -> Result<WrittenChapter, EngineError> {
        let pipeline = self.pipeline();
        let output = pipeline.run_with(primary, fallback).await?;

        if output.via_fallback() {
            return Ok(WrittenChapter {
                draft: ChapterDraft::prose(output.text),
                served_by: output.served_by,
                via_fallback: true,
                degraded: output.degraded,
                polished: false,
            });
        }

        match parse_structured::<ChapterDraft>(output.text) {
            Structured::Parsed(draft) if !draft.content.trim().is_empty() => Ok(WrittenChapter {
                draft,
                served_by: output.served_by,
                via_fallback: false,
                degraded: false,
                polished: false,
            }),
            Structured::Parsed(_) => Err(EngineError::malformed(stage, "draft has no content")),
            Structured::Malformed { raw } if is_refusal_text(&raw) => {
                warn!(%stage, backend = %output.served_by, "primary answered with a refusal, switching to fallback");
                let output = pipeline.fallback(fallback).await?;
                Ok(WrittenChapter {
                    draft: ChapterDraft::prose(output.text),
                    served_by: output.served_by,
                    via_fallback: true,
                    degraded: output.degraded,
                    polished: false,
                })
            }
            Structured::Malformed { raw } => Err(EngineError::malformed(stage, &raw)),
        }
    }

    /// Polish a primary draft in place when it is long enough.
    pub async fn polish(&self, written: &mut WrittenChapter, tone: &str) {
        if written.via_fallback {
            return;
        }
        let length = written.draft.content.chars().count();
        if length <= self.config.polish_threshold {
            debug!(length, "draft too short to polish");
            return;
        }

        let prompt = editor_prompt(&written.draft.content, tone, &self.config.target_language);
        match generate_text(self.gateway.primary(), &prompt).await {
            Ok(text) if !text.trim().is_empty() && !is_refusal_text(&text) => {
                info!(stage = %Stage::Polish, before = length, after = text.chars().count(), "draft polished");
                written.draft.content = text;
                written.polished = true;
            }
            Ok(_) => warn!(stage = %Stage::Polish, "editor returned no usable text, keeping draft"),
            Err(e) => warn!(stage = %Stage::Polish, error = %e, "editor failed, keeping draft"),
        }
    }
}

fn editor_prompt(draft: &str, tone: &str, language: &str) -> Prompt {
    Prompt::new(format!(
        "Deep-edit the following draft.\n\n{ANTI_CLICHE}\n\n\
         [Goals] Remove the AI flavour, sharpen the imagery and match the tone \"{tone}\". \
         Keep every plot event and every line of dialogue's meaning. Write in {language}. \
         Output only the revised chapter text.\n\n[Draft]\n{draft}"
    ))
    .with_system("You are a senior web-fiction editor.")
    .with_temperature(0.7)
}
