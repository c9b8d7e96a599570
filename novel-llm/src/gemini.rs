//! Google Gemini `generateContent` backend.

use crate::{api_error, http_client, Error, Prompt, TextBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Finish reasons Gemini uses when a candidate is withheld by a filter.
const BLOCKED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

/// Harm categories the safety thresholds apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmCategory {
    Harassment,
    HateSpeech,
    SexuallyExplicit,
    DangerousContent,
}

impl HarmCategory {
    pub const ALL: [HarmCategory; 4] = [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
    ];

    fn api_name(self) -> &'static str {
        match self {
            HarmCategory::Harassment => "HARM_CATEGORY_HARASSMENT",
            HarmCategory::HateSpeech => "HARM_CATEGORY_HATE_SPEECH",
            HarmCategory::SexuallyExplicit => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            HarmCategory::DangerousContent => "HARM_CATEGORY_DANGEROUS_CONTENT",
        }
    }
}

/// Blocking threshold applied to every harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyThreshold {
    BlockNone,
    #[default]
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl SafetyThreshold {
    fn api_name(self) -> &'static str {
        match self {
            SafetyThreshold::BlockNone => "BLOCK_NONE",
            SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            SafetyThreshold::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }

    /// Parse a threshold name such as `block_only_high` or `BLOCK_NONE`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "block_none" | "none" => Some(SafetyThreshold::BlockNone),
            "block_only_high" | "high" => Some(SafetyThreshold::BlockOnlyHigh),
            "block_medium_and_above" | "medium" => Some(SafetyThreshold::BlockMediumAndAbove),
            "block_low_and_above" | "low" => Some(SafetyThreshold::BlockLowAndAbove),
            _ => None,
        }
    }
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    threshold: SafetyThreshold,
}

impl Gemini {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
            threshold: SafetyThreshold::default(),
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

    /// Set the blocking threshold for all harm categories.
    pub fn with_safety_threshold(mut self, threshold: SafetyThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    fn build_api_request(&self, prompt: &Prompt) -> ApiRequest {
        ApiRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart {
                    text: prompt.user.clone(),
                }],
            }],
            system_instruction: prompt.system.as_ref().map(|system| ApiContent {
                role: None,
                parts: vec![ApiPart {
                    text: system.clone(),
                }],
            }),
            safety_settings: HarmCategory::ALL
                .iter()
                .map(|category| ApiSafetySetting {
                    category: category.api_name().to_string(),
                    threshold: self.threshold.api_name().to_string(),
                })
                .collect(),
            generation_config: ApiGenerationConfig {
                temperature: prompt.temperature,
                max_output_tokens: prompt.max_tokens,
                response_mime_type: prompt.json.then(|| "application/json".to_string()),
            },
        }
    }
}

/// Extract the text of a response, mapping safety blocks to [`Error::Refused`].
fn response_text(api_response: ApiResponse) -> Result<String, Error> {
    if let Some(reason) = api_response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(Error::Refused {
            reason: format!("prompt blocked: {reason}"),
        });
    }

    let candidate = api_response
        .candidates
        .into_iter()
        .next()
        .ok_or(Error::EmptyResponse)?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKED_FINISH_REASONS.contains(&reason) {
            return Err(Error::Refused {
                reason: format!("candidate was blocked: {reason}"),
            });
        }
    }

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextBackend for Gemini {
    fn name(&self) -> &str {
        "gemini"
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

        let model = prompt.model.as_deref().unwrap_or(&self.model);
        let api_request = self.build_api_request(prompt);
        tracing::debug!(%model, "gemini POST generateContent");

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .header("x-goog-api-key", &self.api_key)
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
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    safety_settings: Vec<ApiSafetySetting>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct ApiSafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_output_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
