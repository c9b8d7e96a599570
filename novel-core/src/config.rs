//! Engine and backend configuration.

use novel_llm::SafetyThreshold;
use thiserror::Error;

/// Errors reading configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown primary backend '{0}' (expected 'anthropic' or 'gemini')")]
    UnknownBackend(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Which backend writes chapters first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryBackend {
    Anthropic,
    #[default]
    Gemini,
}

impl PrimaryBackend {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(PrimaryBackend::Anthropic),
            "gemini" | "google" => Ok(PrimaryBackend::Gemini),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Credentials, models and safety settings for every backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfig {
    pub primary: PrimaryBackend,

    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub anthropic_base_url: Option<String>,

    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_base_url: Option<String>,
    pub gemini_safety: SafetyThreshold,

    /// OpenRouter key; enables the fallback pipeline.
    pub openrouter_api_key: Option<String>,
    /// Model the fallback writes with.
    pub fallback_model: Option<String>,
    /// Model the translation pass uses; defaults to the fallback model.
    pub translator_model: Option<String>,
    pub openrouter_base_url: Option<String>,
    pub site_url: Option<String>,
    pub site_name: String,
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `NOVEL_PRIMARY_BACKEND` | `anthropic` or `gemini` (default) |
    /// | `ANTHROPIC_API_KEY`, `ANTHROPIC_MODEL` | Anthropic credentials and model |
    /// | `GEMINI_API_KEY`, `GEMINI_MODEL` | Gemini credentials and model |
    /// | `GEMINI_SAFETY_THRESHOLD` | e.g. `block_none`, `block_only_high` |
    /// | `OPENROUTER_API_KEY` | enables the fallback backend |
    /// | `OPENROUTER_FALLBACK_MODEL`, `OPENROUTER_TRANSLATOR_MODEL` | fallback models |
    /// | `OPENROUTER_SITE_URL`, `OPENROUTER_SITE_NAME` | attribution headers |
    /// | `ANTHROPIC_BASE_URL`, `GEMINI_BASE_URL`, `OPENROUTER_BASE_URL` | endpoint overrides (proxies) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let primary = match get("NOVEL_PRIMARY_BACKEND") {
            Some(value) => PrimaryBackend::parse(&value)?,
            None => PrimaryBackend::default(),
        };

        let gemini_safety = match get("GEMINI_SAFETY_THRESHOLD") {
            Some(value) => {
                SafetyThreshold::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                    name: "GEMINI_SAFETY_THRESHOLD".to_string(),
                    value,
                })?
            }
            None => SafetyThreshold::default(),
        };

        Ok(Self {
            primary,
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_model: get("ANTHROPIC_MODEL"),
            anthropic_base_url: get("ANTHROPIC_BASE_URL"),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
            gemini_base_url: get("GEMINI_BASE_URL"),
            gemini_safety,
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            fallback_model: get("OPENROUTER_FALLBACK_MODEL"),
            translator_model: get("OPENROUTER_TRANSLATOR_MODEL"),
            openrouter_base_url: get("OPENROUTER_BASE_URL"),
            site_url: get("OPENROUTER_SITE_URL"),
            site_name: get("OPENROUTER_SITE_NAME").unwrap_or_else(|| "Novelist".to_string()),
        })
    }

    pub fn with_primary(mut self, primary: PrimaryBackend) -> Self {
        self.primary = primary;
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.openrouter_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Tunables for chapter generation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Language chapters are written in.
    pub target_language: String,

    /// Primary drafts longer than this many characters get an editing pass.
    pub polish_threshold: usize,

    /// Most recent memory entries kept in condensed (fallback) prompts.
    pub memory_window: usize,

    /// Memory entries from the start of the story kept in condensed prompts.
    pub memory_head: usize,

    /// Temperature for chapter prose.
    pub temperature: Option<f32>,

    /// Maximum tokens for a chapter draft.
    pub max_tokens: usize,

    /// Seed for theme selection. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_language: "Traditional Chinese".to_string(),
            polish_threshold: 500,
            memory_window: 30,
            memory_head: 5,
            temperature: Some(0.9),
            max_tokens: 8192,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    pub fn with_polish_threshold(mut self, chars: usize) -> Self {
        self.polish_threshold = chars;
        self
    }

    pub fn with_memory_window(mut self, entries: usize) -> Self {
        self.memory_window = entries;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    /// Fix the theme RNG seed for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.primary, PrimaryBackend::Gemini);
        assert_eq!(config.gemini_safety, SafetyThreshold::BlockOnlyHigh);
        assert_eq!(config.site_name, "Novelist");
        assert!(!config.has_fallback());
    }

    #[test]
    fn test_reads_variables() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("NOVEL_PRIMARY_BACKEND", "Anthropic"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("GEMINI_SAFETY_THRESHOLD", "block_none"),
            ("OPENROUTER_API_KEY", "or-test"),
            ("OPENROUTER_FALLBACK_MODEL", "deepseek/deepseek-chat"),
            ("GEMINI_API_KEY", "  "),
            ("ANTHROPIC_BASE_URL", "http://proxy.local/v1"),
        ]))
        .unwrap();
        assert_eq!(config.anthropic_base_url.as_deref(), Some("http://proxy.local/v1"));
        assert_eq!(config.openrouter_base_url, None);
        assert_eq!(config.primary, PrimaryBackend::Anthropic);
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.gemini_safety, SafetyThreshold::BlockNone);
        assert_eq!(config.gemini_api_key, None);
        assert!(config.has_fallback());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = GatewayConfig::from_lookup(lookup(&[("NOVEL_PRIMARY_BACKEND", "gpt")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownBackend("gpt".to_string()));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let err = GatewayConfig::from_lookup(lookup(&[("GEMINI_SAFETY_THRESHOLD", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::default()
            .with_target_language("English")
            .with_polish_threshold(1000)
            .with_seed(42);
        assert_eq!(config.target_language, "English");
        assert_eq!(config.polish_threshold, 1000);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.memory_window, 30);
    }
}
