//! Primary/fallback generation pipeline.
//!
//! The pipeline tries the primary backend first. Only a content-policy
//! rejection moves it to the fallback state; any other primary failure is
//! returned as is. In the fallback state the secondary backend writes the
//! text, either directly in the target language or in English followed by
//! a translation pass.

use super::{is_content_policy_error, Gateway, GatewayError};
use novel_llm::Prompt;
use tracing::{info, warn};

/// Appended to fallback text when the translation pass fails.
pub const TRANSLATION_NOTICE: &str = "(translation unavailable, original text shown)";

const ENGLISH_INSTRUCTION: &str = "IMPORTANT: Write the story in ENGLISH. Do not use any other language yet. Focus on high-quality prose and tension.";

const TRANSLATOR_SYSTEM: &str = "You are a professional literary translator of web fiction. Preserve paragraphing, dialogue punctuation and tone. Output only the translation.";

/// Where the pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Primary,
    Fallback,
}

/// How the secondary backend produces text in the target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackRoute {
    /// Write directly in the target language.
    Native,
    /// Write in English, then translate.
    Translated,
}

/// Text produced by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub text: String,
    /// Name of the backend that wrote the text.
    pub served_by: String,
    /// State the pipeline finished in.
    pub state: PipelineState,
    /// The translation pass failed and the text is untranslated.
    pub degraded: bool,
}

impl PipelineOutput {
    pub fn via_fallback(&self) -> bool {
        self.state == PipelineState::Fallback
    }
}

/// A two-state generation pipeline over a [`Gateway`].
#[derive(Debug, Clone, Copy)]
pub struct FallbackPipeline<'a> {
    gateway: &'a Gateway,
    route: FallbackRoute,
    target_language: &'a str,
}

impl<'a> FallbackPipeline<'a> {
    pub fn new(gateway: &'a Gateway, route: FallbackRoute, target_language: &'a str) -> Self {
        Self {
            gateway,
            route,
            target_language,
        }
    }

    pub fn route(&self) -> FallbackRoute {
        self.route
    }

    /// Run the pipeline with the same prompt for both states.
    pub async fn run(&self, prompt: &Prompt) -> Result<PipelineOutput, GatewayError> {
        self.run_with(prompt, prompt).await
    }

    /// Run the pipeline, using `fallback` if the primary refuses `primary`.
    pub async fn run_with(
        &self,
        primary: &Prompt,
        fallback: &Prompt,
    ) -> Result<PipelineOutput, GatewayError> {
        let mut state = PipelineState::Primary;
        loop {
            match state {
                PipelineState::Primary => {
                    let backend = self.gateway.primary();
                    match backend.complete(primary).await {
                        Ok(text) => {
                            return Ok(PipelineOutput {
                                text,
                                served_by: backend.name().to_string(),
                                state,
                                degraded: false,
                            })
                        }
                        Err(e) if is_content_policy_error(&e) => {
                            warn!(backend = backend.name(), error = %e, "primary refused, switching to fallback");
                            state = PipelineState::Fallback;
                        }
                        Err(e) => return Err(GatewayError::from_backend(backend.name(), e)),
                    }
                }
                PipelineState::Fallback => return self.fallback(fallback).await,
            }
        }
    }

    /// Generate with the secondary backend directly.
    ///
    /// Used when the primary answered but its answer was a refusal.
    pub async fn fallback(&self, prompt: &Prompt) -> Result<PipelineOutput, GatewayError> {
        let secondary = self.gateway.secondary().ok_or_else(|| GatewayError::Unavailable {
            backend: "fallback".to_string(),
            message: "no fallback backend configured".to_string(),
        })?;

        let prompt = match self.route {
            FallbackRoute::Native => prompt.clone().append_system(&format!(
                "IMPORTANT: Write the story directly in {}.",
                self.target_language
            )),
            FallbackRoute::Translated => prompt.clone().append_system(ENGLISH_INSTRUCTION),
        };

        info!(backend = secondary.name(), route = ?self.route, "generating with fallback backend");
        let text = secondary
            .complete(&prompt)
            .await
            .map_err(|e| GatewayError::from_backend(secondary.name(), e))?;

        let served_by = secondary.name().to_string();
        if self.route == FallbackRoute::Native {
            return Ok(PipelineOutput {
                text,
                served_by,
                state: PipelineState::Fallback,
                degraded: false,
            });
        }

        match self.translate(&text).await {
            Ok(translated) => Ok(PipelineOutput {
                text: translated,
                served_by,
                state: PipelineState::Fallback,
                degraded: false,
            }),
            Err(e) => {
                warn!(error = %e, "translation failed, returning untranslated text");
                Ok(PipelineOutput {
                    text: format!("{text}\n\n{TRANSLATION_NOTICE}"),
                    served_by,
                    state: PipelineState::Fallback,
                    degraded: true,
                })
            }
        }
    }

    async fn translate(&self, text: &str) -> Result<String, GatewayError> {
        let translator = self.gateway.translator().ok_or_else(|| GatewayError::Unavailable {
            backend: "translator".to_string(),
            message: "no translation backend configured".to_string(),
        })?;

        let prompt = Prompt::new(format!(
            "Translate the following story text into {}. Keep every paragraph.\n\n{text}",
            self.target_language
        ))
        .with_system(TRANSLATOR_SYSTEM)
        .with_temperature(0.3);

        translator
            .complete(&prompt)
            .await
            .map_err(|e| GatewayError::from_backend(translator.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use std::sync::Arc;

    fn refused() -> novel_llm::Error {
        novel_llm::Error::Refused {
            reason: "candidate was blocked: SAFETY".to_string(),
        }
    }

    #[tokio::test]
    async fn test_primary_success() {
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_text("Chapter")));
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Translated, "Traditional Chinese");
        let out = pipeline.run(&Prompt::new("write")).await.unwrap();
        assert_eq!(out.text, "Chapter");
        assert_eq!(out.served_by, "primary");
        assert!(!out.via_fallback());
    }

    #[tokio::test]
    async fn test_non_policy_error_is_hard_failure() {
        let secondary = Arc::new(ScriptedBackend::new("secondary").then_text("unused"));
        let gateway = Gateway::new(Arc::new(
            ScriptedBackend::new("primary").then_error(novel_llm::Error::Network("reset".to_string())),
        ))
        .with_secondary(secondary.clone());
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Translated, "Traditional Chinese");

        let err = pipeline.run(&Prompt::new("write")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Backend { .. }));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_translated_route() {
        let secondary = Arc::new(ScriptedBackend::new("secondary").then_text("The door creaked."));
        let translator = Arc::new(ScriptedBackend::new("translator").then_text("門吱呀作響。"));
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_error(refused())))
            .with_secondary(secondary.clone())
            .with_translator(translator.clone());
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Translated, "Traditional Chinese");

        let out = pipeline.run(&Prompt::new("write")).await.unwrap();
        assert_eq!(out.text, "門吱呀作響。");
        assert_eq!(out.served_by, "secondary");
        assert!(out.via_fallback());
        assert!(!out.degraded);

        let sent = secondary.prompts();
        assert!(sent[0].system.as_deref().unwrap_or_default().contains("ENGLISH"));
        assert!(translator.prompts()[0].user.contains("The door creaked."));
    }

    #[tokio::test]
    async fn test_native_route_skips_translation() {
        let secondary = Arc::new(ScriptedBackend::new("secondary").then_text("門吱呀作響。"));
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_error(refused())))
            .with_secondary(secondary.clone());
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Native, "Traditional Chinese");

        let out = pipeline.run(&Prompt::new("write")).await.unwrap();
        assert_eq!(out.text, "門吱呀作響。");
        assert_eq!(secondary.calls(), 1);
        assert!(secondary.prompts()[0]
            .system
            .as_deref()
            .unwrap_or_default()
            .contains("Traditional Chinese"));
    }

    #[tokio::test]
    async fn test_translation_failure_degrades() {
        let secondary = Arc::new(
            ScriptedBackend::new("secondary")
                .then_text("The door creaked.")
                .then_error(novel_llm::Error::Network("timeout".to_string())),
        );
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_error(refused())))
            .with_secondary(secondary);
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Translated, "Traditional Chinese");

        let out = pipeline.run(&Prompt::new("write")).await.unwrap();
        assert!(out.degraded);
        assert!(out.text.starts_with("The door creaked."));
        assert!(out.text.ends_with(TRANSLATION_NOTICE));
    }

    #[tokio::test]
    async fn test_missing_secondary_is_terminal() {
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_error(refused())));
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Translated, "Traditional Chinese");
        let err = pipeline.run(&Prompt::new("write")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_failing_secondary_is_terminal() {
        let gateway = Gateway::new(Arc::new(ScriptedBackend::new("primary").then_error(refused())))
            .with_secondary(Arc::new(ScriptedBackend::new("secondary").then_error(refused())));
        let pipeline = FallbackPipeline::new(&gateway, FallbackRoute::Native, "Traditional Chinese");
        let err = pipeline.run(&Prompt::new("write")).await.unwrap_err();
        assert!(err.is_content_policy());
    }
}
