//! Hosted completion-service client used by the AI-assisted actions.
//!
//! The rest of the workspace depends on it only through the narrow
//! [`CompletionProvider`] contract: given a prompt, return generated text or
//! fail. Structured outputs are validated separately by [`parse_structured`].

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::warn;

const COMPLETION_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("missing api key: ANTHROPIC_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("response does not match the expected schema: {0}")]
    Schema(String),
}

impl CompletionError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Narrow contract for the external generation endpoint. Billing code takes
/// this as a trait object so tests can script responses.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<String>,
    ) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Production completion client.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: Client,
    api_key: String,
    model: String,
}

impl CompletionClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    const MAX_TOKENS: u32 = 4096;

    /// Create a client from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, CompletionError> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").map_err(|_| CompletionError::MissingApiKey)?;
        Self::new(api_key, None)
    }

    pub fn new(api_key: String, model: Option<String>) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("codehive/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
    ) -> Result<CompletionResponse, CompletionError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: Self::MAX_TOKENS,
            messages,
            system,
        };

        (|| async { self.send_request(&request).await })
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &CompletionError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "completion request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn send_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let res = self
            .http
            .post(COMPLETION_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<CompletionResponse>()
                .await
                .map_err(|e| CompletionError::Schema(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(CompletionError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(CompletionError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(CompletionError::Http { status, body })
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn generate(
        &self,
        prompt: &str,
        system: Option<String>,
    ) -> Result<String, CompletionError> {
        let response = self.complete(vec![Message::user(prompt)], system).await?;

        response
            .text()
            .map(|s| s.to_string())
            .ok_or_else(|| CompletionError::Schema("no text content in response".to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Transport(e.to_string())
    }
}

/// Validate generated text against the expected output shape: extract the
/// JSON payload (models tend to wrap it in markdown fences) and deserialize.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, CompletionError> {
    let json_str = extract_json(text);

    if json_str.trim().is_empty() {
        return Err(CompletionError::Schema("empty response".to_string()));
    }

    serde_json::from_str(json_str).map_err(|e| {
        CompletionError::Schema(format!(
            "{} (response preview: {})",
            e,
            json_str.chars().take(200).collect::<String>()
        ))
    })
}

/// Extract the JSON payload from generated text, unwrapping a markdown code
/// fence if the model emitted one.
fn extract_json(text: &str) -> &str {
    let text = text.trim();
    fenced_block(text, "```json")
        .or_else(|| fenced_block(text, "```"))
        .unwrap_or(text)
}

fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let mut start = text.find(opener)? + opener.len();
    if opener == "```" {
        // a bare fence may carry a language identifier on the opening line
        let rest = &text[start..];
        if let (Some(newline), Some(close)) = (rest.find('\n'), rest.find("```")) {
            if newline < close {
                start += newline + 1;
            }
        }
    }
    let end = text[start..].find("```")?;
    Some(text[start..start + end].trim())
}
