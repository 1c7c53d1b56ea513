//! Inference client — chat-completion requests over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::InferenceConfig;
use crate::error::AiError;

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// One chat-completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Parsed completion result: the model text plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
    pub tokens_used: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ── Client seam ─────────────────────────────────────────────────────

/// Inference endpoint seam. Tests swap in a mock; production uses
/// `HttpInferenceClient`.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AiError>;
}

/// Bearer-token chat-completions client over reqwest.
pub struct HttpInferenceClient {
    http: reqwest::Client,
    api_url: String,
    api_key: SecretString,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AiError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout { timeout: self.timeout }
                } else {
                    AiError::RequestFailed { reason: e.to_string() }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AiError::AuthFailed);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AiError::RateLimited);
        }
        if status.is_server_error() {
            return Err(AiError::RequestFailed { reason: format!("server error: {status}") });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::InvalidResponse { reason: format!("{status}: {body}") });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse { reason: e.to_string() })?;

        let content = wire
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AiError::InvalidResponse { reason: "no choices in response".to_string() })?;
        let tokens_used = wire.usage.map_or(0, |u| u.total_tokens);

        debug!(tokens = tokens_used, "completion received");
        Ok(CompletionResponse { content, tokens_used })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Scripted mock: pops one result per call, counts calls.
    pub struct MockClient {
        pub responses: Mutex<Vec<Result<CompletionResponse, AiError>>>,
        pub calls: AtomicU32,
        pub last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockClient {
        pub fn new(responses: Vec<Result<CompletionResponse, AiError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
                last_request: Mutex::new(None),
            }
        }

        pub fn succeeding(content: &str, tokens: u32) -> Self {
            Self::new(vec![Ok(CompletionResponse {
                content: content.to_string(),
                tokens_used: tokens,
            })])
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceClient for MockClient {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(AiError::RequestFailed { reason: "mock exhausted".to_string() })
            } else {
                responses.remove(0)
            }
        }
    }
}
