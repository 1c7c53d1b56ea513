//! Response engine — cache, prompt assembly, inference, fallback.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::ai::analysis::parse_output;
use crate::ai::client::{ChatMessage, CompletionRequest, InferenceClient};
use crate::ai::retry::{RateLimiter, RetryPolicy, retry_with_backoff};
use crate::ai::templates::TemplateSet;
use crate::config::InferenceConfig;
use crate::mail::types::{MessageAnalysis, NormalizedMessage};
use crate::store::{CacheEntry, Database};

const SYSTEM_PROMPT: &str = "You are a professional email assistant. Generate concise, helpful, and contextually appropriate email responses. Be polite, professional, and direct.";

/// Result of a generation attempt. Producing one never fails; the
/// fallback path absorbs every error.
#[derive(Debug, Clone)]
pub struct AiOutcome {
    pub text: String,
    pub tokens_used: u32,
    pub used_template: Option<String>,
    pub analysis: MessageAnalysis,
    pub from_cache: bool,
}

/// Hex SHA-256 of subject and body, the response-cache key.
pub fn content_hash(subject: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(body.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Generates reply text for admitted messages.
pub struct ResponseEngine {
    client: Arc<dyn InferenceClient>,
    db: Arc<dyn Database>,
    templates: TemplateSet,
    limiter: RateLimiter,
    policy: RetryPolicy,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl ResponseEngine {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        db: Arc<dyn Database>,
        templates: TemplateSet,
        config: &InferenceConfig,
    ) -> Self {
        Self {
            client,
            db,
            templates,
            limiter: RateLimiter::new(Duration::from_millis(config.min_call_interval_ms)),
            policy: RetryPolicy {
                max_retries: config.max_retries,
                initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
                factor: 2,
            },
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a reply for the message. Cache first; on any inference
    /// failure the fixed fallback is returned, so this never errors.
    pub async fn generate(&self, msg: &NormalizedMessage, context: &str) -> AiOutcome {
        let hash = content_hash(&msg.subject, &msg.body);

        match self.db.cache_get(&hash).await {
            Ok(Some(entry)) => {
                info!(id = %msg.message_id, "cache hit, skipping inference");
                return AiOutcome {
                    text: entry.response_text,
                    tokens_used: 0,
                    used_template: None,
                    analysis: entry.analysis,
                    from_cache: true,
                };
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache lookup failed, generating fresh"),
        }

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_user_prompt(msg, context, &self.templates)),
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        // Acquire inside the retry loop so backed-off attempts are also
        // spaced by the minimum interval.
        let response = retry_with_backoff(self.policy, || async {
            self.limiter.acquire().await;
            self.client.complete(&request).await
        })
        .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(id = %msg.message_id, error = %e, "inference failed, using fallback");
                return fallback(&msg.subject);
            }
        };

        let parsed = parse_output(&response.content);
        let (text, used_template) = match parsed
            .template
            .as_deref()
            .and_then(|name| self.templates.get(name).map(|body| (name.to_string(), body)))
        {
            Some((name, body)) => {
                debug!(id = %msg.message_id, template = %name, "model selected a template");
                (body.to_string(), Some(name))
            }
            None => (parsed.text, None),
        };

        if text.is_empty() {
            warn!(id = %msg.message_id, "model returned empty text, using fallback");
            return fallback(&msg.subject);
        }

        let entry = CacheEntry { response_text: text.clone(), analysis: parsed.analysis };
        if let Err(e) = self.db.cache_put(&hash, &entry).await {
            warn!(error = %e, "failed to cache response");
        }

        AiOutcome {
            text,
            tokens_used: response.tokens_used,
            used_template,
            analysis: parsed.analysis,
            from_cache: false,
        }
    }
}

/// Fixed acknowledgment used whenever generation fails.
fn fallback(subject: &str) -> AiOutcome {
    let text = format!(
        "Thank you for your email regarding \"{subject}\".\n\n\
         I have received your message and will review it carefully. \
         I will get back to you with a detailed response as soon as possible.\n\n\
         Best regards"
    );
    AiOutcome {
        text,
        tokens_used: 0,
        used_template: None,
        analysis: MessageAnalysis::default(),
        from_cache: false,
    }
}

fn build_user_prompt(msg: &NormalizedMessage, context: &str, templates: &TemplateSet) -> String {
    let mut prompt = format!(
        "Please generate a professional email response for the following email:\n\n\
         From: {}\n\
         Subject: {}\n\n\
         Email Content:\n{}\n",
        msg.sender, msg.subject, msg.body
    );

    if !context.is_empty() {
        prompt.push_str(&format!("\nAdditional Context:\n{context}\n"));
    }

    if !templates.is_empty() {
        prompt.push_str(&format!(
            "\nAvailable reply templates: {}.\n\
             If one of them fully answers this email, respond with a single line \
             USE_TEMPLATE: <name> instead of writing a reply.\n",
            templates.names().join(", ")
        ));
    }

    prompt.push_str(
        "\nRequirements:\n\
         - Keep response concise (2-3 paragraphs max)\n\
         - Maintain professional tone\n\
         - Address the main points from the original email\n\
         - Include appropriate greeting and closing\n\
         - Do not include signature (will be added automatically)\n\n\
         After the response, add three final lines classifying the email:\n\
         CATEGORY: <inquiry|support|meeting|feedback|spam|other>\n\
         SENTIMENT: <positive|neutral|negative>\n\
         PRIORITY: <high|medium|low>\n",
    );

    prompt
}
