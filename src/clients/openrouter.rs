//! OpenRouter chat-completions client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clients::traits::{ChatMessage, LlmClient, LlmError};
use crate::config::{MAX_HTTP_RETRIES, OpenRouterConfig};
use crate::error::{PipelineError, Result};

const REFERER: &str = "https://github.com/jessewhite/llm-coding-analysis";
const TITLE: &str = "LLM Coding Analysis";
const BACKOFF_BASE_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay before retry number `attempt + 1`: doubles from the base, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

impl OpenRouterClient {
    pub fn new(api_key: Option<String>, config: &OpenRouterConfig) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| PipelineError::Config {
            message: "No API key provided. Set OPENROUTER_API_KEY or use --api-key".to_string(),
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        tracing::info!(
            "Initialized OpenRouter client with model: {}",
            config.default_model
        );
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.default_model.clone(),
            timeout_secs: config.timeout_secs.max(1),
            max_retries: config.max_retries.clamp(1, MAX_HTTP_RETRIES),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Same transport and credentials, different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn attempt(&self, body: &ChatRequest<'_>, timeout_secs: u64) -> std::result::Result<String, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .timeout(Duration::from_secs(timeout_secs))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { timeout_secs }
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LlmError::Auth(format!("{}: {}", status, error_text))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    LlmError::RateLimit(format!("{}: {}", status, error_text))
                }
                _ => LlmError::Transport(format!("OpenRouter API error {}: {}", status, error_text)),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout { timeout_secs }
            } else {
                LlmError::InvalidResponse(format!("undecodable body: {}", e))
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                LlmError::InvalidResponse("missing choices[0].message.content".to_string())
            })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn send(&self, prompt: &str, history: &[ChatMessage]) -> std::result::Result<String, LlmError> {
        let user_turn = ChatMessage::user(prompt);
        let body = ChatRequest {
            model: &self.model,
            messages: history.iter().chain(std::iter::once(&user_turn)).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(
            "OpenRouter request (model={}, turns={}, chars={})",
            self.model,
            body.messages.len(),
            prompt.len()
        );

        // Retry with growing timeout and exponential backoff
        let mut last_err: Option<LlmError> = None;
        for i in 0..self.max_retries {
            let timeout_secs = self.timeout_secs.saturating_mul(u64::from(i + 1));
            match self.attempt(&body, timeout_secs).await {
                Ok(content) => {
                    debug!("Raw content from API:\n{}", content);
                    return Ok(content);
                }
                Err(LlmError::Auth(msg)) => return Err(LlmError::Auth(msg)),
                Err(e) => {
                    warn!(
                        "Attempt {}/{}: OpenRouter {} error: {}",
                        i + 1,
                        self.max_retries,
                        e.kind(),
                        e
                    );
                    last_err = Some(e);
                    if i + 1 < self.max_retries {
                        tokio::time::sleep(backoff_delay(i)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Transport("no attempt was made".to_string())))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
