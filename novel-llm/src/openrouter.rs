//! OpenRouter chat-completions backend (OpenAI-compatible).

use crate::{api_error, http_client, Error, Prompt, TextBackend};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
const DEFAULT_SITE_NAME: &str = "Novelist";

/// OpenRouter client. Each instance is bound to one model, so the fallback
/// writer and the translator can be two instances with different models.
#[derive(Clone)]
pub struct OpenRouter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    site_url: Option<String>,
    site_name: String,
}

impl OpenRouter {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
            site_url: None,
            site_name: DEFAULT_SITE_NAME.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the attribution headers OpenRouter shows on its dashboards.
    pub fn with_site(mut self, url: impl Into<String>, name: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self.site_name = name.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        if let Some(url) = &self.site_url {
            headers.insert(
                "HTTP-Referer",
                HeaderValue::from_str(url)
                    .map_err(|e| Error::Config(format!("Invalid site URL: {e}")))?,
            );
        }
        headers.insert(
            "X-Title",
            HeaderValue::from_str(&self.site_name)
                .map_err(|e| Error::Config(format!("Invalid site name: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, prompt: &Prompt) -> ApiRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: prompt.user.clone(),
        });

        ApiRequest {
            model: prompt.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
            response_format: prompt.json.then(|| ApiResponseFormat {
                r#type: "json_object".to_string(),
            }),
        }
    }
}

/// Extract the text of a response, mapping filtered completions to [`Error::Refused`].
fn response_text(api_response: ApiResponse) -> Result<String, Error> {
    if let Some(error) = api_response.error {
        return Err(Error::Api {
            status: error.code.unwrap_or(500),
            message: error.message,
        });
    }

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or(Error::EmptyResponse)?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(Error::Refused {
            reason: "finish_reason: content_filter".to_string(),
        });
    }

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(Error::EmptyResponse),
    }
}

#[async_trait]
impl TextBackend for OpenRouter {
    fn name(&self) -> &str {
        "openrouter"
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
        tracing::debug!(model = %api_request.model, "openrouter POST /chat/completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
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
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}
