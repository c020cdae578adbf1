// Generative-language provider: text in, text out

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no provider configured")]
    NotConfigured,

    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("request to provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider response contained no text")]
    EmptyResponse,

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

/// An external text generation service
///
/// No retries happen on this side of the trait; a client that wants them
/// does its own.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Stand-in used when no API key is configured; every call fails
pub struct DisabledProvider;

#[async_trait]
impl Provider for DisabledProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Client for the Gemini `generateContent` REST endpoint
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    auth_headers: header::HeaderMap,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, endpoint: Option<&str>, model: Option<&str>) -> Result<Self, ProviderError> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let key = header::HeaderValue::from_str(api_key)
            .map_err(|e| ProviderError::Config(format!("invalid API key format: {}", e)))?;
        auth_headers.insert("x-goog-api-key", key);

        Ok(Self {
            client: Client::new(),
            auth_headers,
            endpoint: endpoint.unwrap_or(DEFAULT_GEMINI_ENDPOINT).trim_end_matches('/').to_string(),
            model: model.unwrap_or(DEFAULT_GEMINI_MODEL).to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl Provider for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Sending generateContent request");

        let response = self
            .client
            .post(self.url())
            .headers(self.auth_headers.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
