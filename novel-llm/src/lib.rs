//! Text-generation backend clients.
//!
//! This crate provides small clients for the chat/completion APIs the
//! novel engine talks to, all behind the [`TextBackend`] trait:
//! - [`Anthropic`] for the Messages API
//! - [`Gemini`] for `generateContent`, with configurable safety thresholds
//! - [`OpenRouter`] for OpenAI-compatible chat completions
//!
//! Every backend reports safety refusals as [`Error::Refused`] so callers can
//! tell a content block apart from a network or configuration failure.

mod anthropic;
mod gemini;
mod openrouter;

pub use anthropic::Anthropic;
pub use gemini::{Gemini, HarmCategory, SafetyThreshold};
pub use openrouter::OpenRouter;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Request timeout for generation calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Connect timeout for generation calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when calling a backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured for {backend}")]
    NoApiKey { backend: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Request refused by content filter: {reason}")]
    Refused { reason: String },

    #[error("Response contained no text")]
    EmptyResponse,
}

/// A single-turn generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    pub model: Option<String>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    /// Ask the backend for a JSON object response where it supports it.
    pub json: bool,
}

impl Prompt {
    /// Create a prompt with the given user text.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            model: None,
            max_tokens: 8192,
            temperature: None,
            json: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Request a JSON object response.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Append an instruction to the system prompt, creating it if absent.
    pub fn append_system(mut self, extra: &str) -> Self {
        self.system = Some(match self.system.take() {
            Some(existing) => format!("{existing}\n{extra}"),
            None => extra.to_string(),
        });
        self
    }
}

/// A text-generation backend.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the backend has the credentials it needs.
    fn is_ready(&self) -> bool;

    /// Send the prompt and return the generated text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, Error>;
}

/// Build the shared HTTP client used by every backend.
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a non-success HTTP response into an [`Error::Api`].
async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Error::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builder() {
        let prompt = Prompt::new("Write chapter two")
            .with_system("You are a novelist")
            .with_max_tokens(1000)
            .with_temperature(0.7)
            .json();

        assert_eq!(prompt.user, "Write chapter two");
        assert_eq!(prompt.system.as_deref(), Some("You are a novelist"));
        assert_eq!(prompt.max_tokens, 1000);
        assert_eq!(prompt.temperature, Some(0.7));
        assert!(prompt.json);
    }

    #[test]
    fn test_append_system() {
        let prompt = Prompt::new("x").append_system("Write in English.");
        assert_eq!(prompt.system.as_deref(), Some("Write in English."));

        let prompt = Prompt::new("x")
            .with_system("Base")
            .append_system("Extra");
        assert_eq!(prompt.system.as_deref(), Some("Base\nExtra"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::NoApiKey {
            backend: "openrouter".to_string(),
        };
        assert_eq!(err.to_string(), "API key not configured for openrouter");

        let err = Error::Refused {
            reason: "SAFETY".to_string(),
        };
        assert!(err.to_string().contains("SAFETY"));
    }
}
