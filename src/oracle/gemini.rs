//! Gemini `generateContent` backend

use std::time::Duration;

use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};

use super::{OracleError, ScoringBackend};
use crate::credential::Credential;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Upstream statuses that mean the key itself was refused
const CREDENTIAL_STATUSES: &[&str] = &["INVALID_ARGUMENT", "UNAUTHENTICATED", "PERMISSION_DENIED"];

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 1,
            top_p: 0.1,
            max_output_tokens: 1,
        }
    }
}

/// Oracle client configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    pub generation: GenerationConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content>,
    generation_config: &'a GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
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
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: Option<String>,
    message: Option<String>,
}

/// HTTP backend talking to the Gemini API
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    http_client: ReqwestClient,
    config: OracleConfig,
}

impl GeminiBackend {
    pub fn new(config: OracleConfig) -> Result<Self, reqwest::Error> {
        let http_client = ReqwestClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    fn request_body<'a>(&'a self, prompt: &str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: &self.config.generation,
        }
    }
}

/// Maps a non-success response to an oracle error
fn classify_failure(status: StatusCode, body: &str) -> OracleError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);

    let (upstream_status, message) = match error {
        Some(ErrorBody { status, message }) => (status, message),
        None => (None, None),
    };

    if upstream_status
        .as_deref()
        .map_or(false, |s| CREDENTIAL_STATUSES.contains(&s))
    {
        return OracleError::InvalidCredential;
    }

    let message = message
        .filter(|m| !m.trim().is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string());
    OracleError::Upstream(message)
}

/// Pulls `candidates[0].content.parts[0].text` out of a success body
fn answer_text(body: &str) -> Result<String, OracleError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| OracleError::UnparsableResponse(format!("invalid response body: {}", e)))?;

    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().next())
        .map(|part| part.text)
        .ok_or_else(|| {
            OracleError::UnparsableResponse("response contained no candidate text".to_string())
        })
}

#[async_trait::async_trait]
impl ScoringBackend for GeminiBackend {
    async fn generate(&self, credential: &Credential, prompt: &str) -> Result<String, OracleError> {
        let response = self
            .http_client
            .post(self.url())
            .query(&[("key", credential.expose())])
            .json(&self.request_body(prompt))
            .send()
            .await
            // The URL carries the key, so keep it out of the message.
            .map_err(|e| OracleError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Network(e.without_url().to_string()))?;

        if !status.is_success() {
            let error = classify_failure(status, &body);
            tracing::warn!(%status, error = %error, "oracle request failed");
            return Err(error);
        }

        answer_text(&body)
    }
}
