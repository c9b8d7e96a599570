//! Anthropic Messages API backend.

use crate::{api_error, http_client, Error, Prompt, TextBackend};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct Anthropic {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Anthropic {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_api_request(&self, prompt: &Prompt) -> ApiRequest {
        // The Messages API has no JSON mode; ask for it in the system prompt.
        let system = if prompt.json {
            Some(match &prompt.system {
                Some(system) => format!("{system}\nRespond with a single JSON object only."),
                None => "Respond with a single JSON object only.".to_string(),
            })
        } else {
            prompt.system.clone()
        };

        ApiRequest {
            model: prompt.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: prompt.max_tokens,
            system,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: vec![ApiContentBlock::Text {
                    text: prompt.user.clone(),
                }],
            }],
            temperature: prompt.temperature.map(|t| t.clamp(0.0, 1.0)),
        }
    }
}

/// Extract the text of a response, mapping refusals to [`Error::Refused`].
fn response_text(api_response: ApiResponse) -> Result<String, Error> {
    if api_response.stop_reason.as_deref() == Some("refusal") {
        return Err(Error::Refused {
            reason: "stop_reason: refusal".to_string(),
        });
    }

    let text = api_response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ApiContent::Text { text } => Some(text),
            ApiContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(Error::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextBackend for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, Error> {
        if !self.is_ready() {
            return Err(Error::NoApiKey {
                backend: self.name().to_string(),
            });
        }

        let headers = self.build_headers()?;
        let api_request = self.build_api_request(prompt);
        tracing::debug!(model = %api_request.model, "anthropic POST /messages");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        response_text(api_response)
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Anthropic::new("test-key");
        assert_eq!(client.model, DEFAULT_MODEL);
        assert!(client.is_ready());
        assert!(!Anthropic::new("").is_ready());
    }

    #[test]
    fn test_json_prompt_adds_instruction() {
        let client = Anthropic::new("test-key").with_model("claude-3-5-haiku-20241022");
        let request = client.build_api_request(&Prompt::new("plan").with_system("Planner").json());

        assert_eq!(request.model, "claude-3-5-haiku-20241022");
        let system = request.system.unwrap();
        assert!(system.starts_with("Planner"));
        assert!(system.contains("JSON object"));
    }

    #[test]
    fn test_temperature_clamped() {
        let client = Anthropic::new("test-key");
        let request = client.build_api_request(&Prompt::new("x").with_temperature(1.1));
        assert_eq!(request.temperature, Some(1.0));
    }

    #[test]
    fn test_refusal_maps_to_refused() {
        let api_response: ApiResponse = serde_json::from_str(
            r#"{"content": [], "stop_reason": "refusal"}"#,
        )
        .unwrap();
        assert!(matches!(
            response_text(api_response),
            Err(Error::Refused { .. })
        ));
    }

    #[test]
    fn test_text_blocks_joined() {
        let api_response: ApiResponse = serde_json::from_str(
            r#"{"content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Hello "},
                {"type": "text", "text": "world"}
            ], "stop_reason": "end_turn"}"#,
        )
        .unwrap();
        assert_eq!(response_text(api_response).unwrap(), "Hello world");
    }
}
