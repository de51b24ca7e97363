//! HTTP reasoning backend speaking the `generateContent` JSON API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use studykit_shared::{ReasoningConfig, Result, StudyKitError};

use crate::service::{GenerateRequest, ReasoningService, ServiceError};

/// User-Agent string for reasoning requests.
const USER_AGENT: &str = concat!("StudyKit/", env!("CARGO_PKG_VERSION"));

/// Error bodies are cut to this many bytes before they end up in messages.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// GeminiService
// ---------------------------------------------------------------------------

/// [`ReasoningService`] over HTTP.
pub struct GeminiService {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiService {
    /// Build a service from the `[reasoning]` config section.
    pub fn new(config: &ReasoningConfig, api_key: impl Into<String>) -> Result<Self> {
        let endpoint = config.endpoint_url()?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| StudyKitError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url_for(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.endpoint)
    }
}

#[async_trait]
impl ReasoningService for GeminiService {
    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<String, ServiceError> {
        let body = GenerateContentBody {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &request.response_schema,
            },
        };

        let url = self.url_for(&request.model);
        debug!(%url, prompt_len = request.prompt.len(), "sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::new(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let mut cut = text.len().min(MAX_ERROR_BODY);
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            return Err(ServiceError::new(format!("HTTP {status}: {}", &text[..cut])));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::new(format!("unreadable response envelope: {e}")))?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            warn!("response contained no candidates");
            return Ok(String::new());
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        Ok(text)
    }
}
