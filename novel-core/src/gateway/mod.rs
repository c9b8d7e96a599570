//! Generation gateway.
//!
//! Wraps the text backends with structured-output extraction, error
//! classification and the primary/fallback pipeline. Callers never talk to
//! a [`TextBackend`] directly.

mod fallback;
mod policy;

pub use fallback::{FallbackPipeline, FallbackRoute, PipelineOutput, PipelineState, TRANSLATION_NOTICE};
pub use policy::{is_content_policy_error, is_refusal_text};

use crate::config::{GatewayConfig, PrimaryBackend};
use novel_llm::{Anthropic, Gemini, OpenRouter, Prompt, TextBackend};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{backend} rejected the request on content policy grounds: {message}")]
    ContentPolicy { backend: String, message: String },

    #[error("{backend} is unavailable: {message}")]
    Unavailable { backend: String, message: String },

    #[error("{backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: novel_llm::Error,
    },
}

impl GatewayError {
    /// Classify a backend error.
    pub fn from_backend(backend: &str, error: novel_llm::Error) -> Self {
        if is_content_policy_error(&error) {
            return GatewayError::ContentPolicy {
                backend: backend.to_string(),
                message: error.to_string(),
            };
        }
        match error {
            novel_llm::Error::NoApiKey { .. } | novel_llm::Error::Config(_) => {
                GatewayError::Unavailable {
                    backend: backend.to_string(),
                    message: error.to_string(),
                }
            }
            source => GatewayError::Backend {
                backend: backend.to_string(),
                source,
            },
        }
    }

    pub fn is_content_policy(&self) -> bool {
        matches!(self, GatewayError::ContentPolicy { .. })
    }
}

/// Result of a structured request.
///
/// Malformed output is a value, not an error, so each caller can apply its
/// own fallback policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Structured<T> {
    Parsed(T),
    Malformed { raw: String },
}

impl<T> Structured<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            Structured::Parsed(value) => Some(value),
            Structured::Malformed { .. } => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Structured::Malformed { .. })
    }
}

/// Extract the JSON object from a response that may be wrapped in prose or
/// markdown code fences.
///
/// Returns the slice from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].trim())
}

/// Parse raw backend output into `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: String) -> Structured<T> {
    let parsed = extract_json(&raw).and_then(|json| match serde_json::from_str::<T>(json) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "structured output did not match the expected shape");
            None
        }
    });
    match parsed {
        Some(value) => Structured::Parsed(value),
        None => Structured::Malformed { raw },
    }
}

/// Send an unstructured request.
pub async fn generate_text(backend: &dyn TextBackend, prompt: &Prompt) -> Result<String, GatewayError> {
    backend
        .complete(prompt)
        .await
        .map_err(|e| GatewayError::from_backend(backend.name(), e))
}

/// Send a structured request and parse the first JSON object in the reply.
pub async fn generate_structured<T: DeserializeOwned>(
    backend: &dyn TextBackend,
    prompt: &Prompt,
) -> Result<Structured<T>, GatewayError> {
    let raw = generate_text(backend, prompt).await?;
    Ok(parse_structured(raw))
}

/// The set of backends a story is generated with.
#[derive(Clone)]
pub struct Gateway {
    primary: Arc<dyn TextBackend>,
    secondary: Option<Arc<dyn TextBackend>>,
    translator: Option<Arc<dyn TextBackend>>,
}

impl Gateway {
    pub fn new(primary: Arc<dyn TextBackend>) -> Self {
        Self {
            primary,
            secondary: None,
            translator: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn TextBackend>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn TextBackend>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Build the backends described by a configuration.
    ///
    /// The primary backend must have credentials. The OpenRouter fallback
    /// and translator are optional; without them a policy rejection is a
    /// terminal error.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let primary: Arc<dyn TextBackend> = match config.primary {
            PrimaryBackend::Anthropic => {
                let key = required_key(&config.anthropic_api_key, "anthropic")?;
                let mut client = Anthropic::new(key);
                if let Some(model) = &config.anthropic_model {
                    client = client.with_model(model);
                }
                if let Some(url) = &config.anthropic_base_url {
                    client = client.with_base_url(url);
                }
                Arc::new(client)
            }
            PrimaryBackend::Gemini => {
                let key = required_key(&config.gemini_api_key, "gemini")?;
                let mut client = Gemini::new(key).with_safety_threshold(config.gemini_safety);
                if let Some(model) = &config.gemini_model {
                    client = client.with_model(model);
                }
                if let Some(url) = &config.gemini_base_url {
                    client = client.with_base_url(url);
                }
                Arc::new(client)
            }
        };

        let mut gateway = Gateway::new(primary);

        if let Some(key) = config.openrouter_api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut base = OpenRouter::new(key);
            if let Some(url) = &config.site_url {
                base = base.with_site(url, &config.site_name);
            }
            if let Some(url) = &config.openrouter_base_url {
                base = base.with_base_url(url);
            }
            let secondary = match &config.fallback_model {
                Some(model) => base.clone().with_model(model),
                None => base.clone(),
            };
            gateway = gateway.with_secondary(Arc::new(secondary));
            if let Some(model) = &config.translator_model {
                gateway = gateway.with_translator(Arc::new(base.with_model(model)));
            }
        }

        Ok(gateway)
    }

    pub fn primary(&self) -> &dyn TextBackend {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&dyn TextBackend> {
        self.secondary.as_deref()
    }

    /// Translation backend, defaulting to the secondary.
    pub fn translator(&self) -> Option<&dyn TextBackend> {
        self.translator.as_deref().or_else(|| self.secondary())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.as_ref().map(|b| b.name().to_string()))
            .field("translator", &self.translator().map(|b| b.name().to_string()))
            .finish()
    }
}

fn required_key<'a>(key: &'a Option<String>, backend: &str) -> Result<&'a str, GatewayError> {
    key.as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| GatewayError::Unavailable {
            backend: backend.to_string(),
            message: "API key not configured".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Outline {
        title: String,
    }

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"title": "Night Shift"}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_extract_json_fenced() {
        let text = "```json\n{\"title\": \"Night Shift\"}\n```";
        assert_eq!(extract_json(text), Some(r#"{"title": "Night Shift"}"#));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Here is the outline:\n{\"title\": \"A {nested} title\"}\nHope this helps!";
        assert_eq!(extract_json(text), Some(r#"{"title": "A {nested} title"}"#));
    }

    #[test]
    fn test_extract_json_missing() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_structured_malformed_keeps_raw() {
        let result: Structured<Outline> = parse_structured("{\"name\": 3}".to_string());
        assert_eq!(
            result,
            Structured::Malformed {
                raw: "{\"name\": 3}".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_generate_structured() {
        let backend = ScriptedBackend::new("primary").then_text("```json\n{\"title\": \"Ward 4\"}\n```");
        let result: Structured<Outline> = generate_structured(&backend, &Prompt::new("outline"))
            .await
            .unwrap();
        assert_eq!(
            result.parsed(),
            Some(Outline {
                title: "Ward 4".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_error_classification() {
        let backend = ScriptedBackend::new("primary")
            .then_error(novel_llm::Error::Refused {
                reason: "SAFETY".to_string(),
            })
            .then_error(novel_llm::Error::NoApiKey {
                backend: "primary".to_string(),
            })
            .then_error(novel_llm::Error::Network("reset".to_string()));

        let prompt = Prompt::new("x");
        assert!(generate_text(&backend, &prompt).await.unwrap_err().is_content_policy());
        assert!(matches!(
            generate_text(&backend, &prompt).await,
            Err(GatewayError::Unavailable { .. })
        ));
        assert!(matches!(
            generate_text(&backend, &prompt).await,
            Err(GatewayError::Backend { .. })
        ));
    }

    #[test]
    fn test_from_config_requires_primary_key() {
        let config = GatewayConfig::default();
        assert!(matches!(
            Gateway::from_config(&config),
            Err(GatewayError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_from_config_builds_fallback() {
        let config = GatewayConfig {
            gemini_api_key: Some("g".to_string()),
            openrouter_api_key: Some("o".to_string()),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::from_config(&config).unwrap();
        assert_eq!(gateway.primary().name(), "gemini");
        assert_eq!(gateway.secondary().map(|b| b.name()), Some("openrouter"));
        assert_eq!(gateway.translator().map(|b| b.name()), Some("openrouter"));
    }

    #[tokio::test]
    async fn test_from_config_applies_base_url() {
        let config = GatewayConfig {
            primary: PrimaryBackend::Anthropic,
            anthropic_api_key: Some("a".to_string()),
            anthropic_base_url: Some("http://127.0.0.1:9".to_string()),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::from_config(&config).unwrap();
        match generate_text(gateway.primary(), &Prompt::new("hello")).await {
            Err(GatewayError::Backend {
                source: novel_llm::Error::Network(message),
                ..
            }) => assert!(message.contains("127.0.0.1:9"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
