//! Core message types — `NormalizedMessage`, enrichment enums, sanitization.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Maximum sanitized subject length.
pub const MAX_SUBJECT_LEN: usize = 200;

/// Maximum sanitized body length.
pub const MAX_BODY_LEN: usize = 10_000;

/// Coarse message category, parsed from model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inquiry,
    Support,
    Meeting,
    Feedback,
    Spam,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Inquiry => "inquiry",
            Category::Support => "support",
            Category::Meeting => "meeting",
            Category::Feedback => "feedback",
            Category::Spam => "spam",
            Category::Other => "other",
        }
    }

    /// Lenient parse — unknown values map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "inquiry" => Category::Inquiry,
            "support" => Category::Support,
            "meeting" => Category::Meeting,
            "feedback" => Category::Feedback,
            "spam" => Category::Spam,
            _ => Category::Other,
        }
    }
}

/// Message sentiment, parsed from model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// Lenient parse — unknown values map to `Neutral`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

/// Message priority, parsed from model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Lenient parse — unknown values map to `Medium`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// Structured metadata extracted from a model completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageAnalysis {
    pub category: Category,
    pub sentiment: Sentiment,
    pub priority: Priority,
}

/// Attachment metadata. Content persistence is the extractor's concern;
/// the pipeline only carries names and sizes into the prompt context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,
}

/// A sanitized inbound message, ready for filtering and response generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Provider Message-ID, or a deterministic fallback when absent.
    pub message_id: String,
    /// Sender address (validated).
    pub sender: String,
    /// Subject, sanitized and capped at 200 chars.
    pub subject: String,
    /// Plain-text body, sanitized and capped at 10 000 chars.
    pub body: String,
    /// Local, offset-naive receive time.
    pub timestamp: NaiveDateTime,
    /// Thread root id, derived from reply headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Attachment metadata, in MIME part order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Set exactly once, on successful delivery of a reply.
    #[serde(default)]
    pub is_replied: bool,
    /// Post-inference enrichment.
    #[serde(default)]
    pub analysis: MessageAnalysis,
}

/// Strip control characters (keeping newlines and tabs) and cap length
/// on a char boundary.
pub fn sanitize_text(input: &str, max_len: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    if cleaned.chars().count() <= max_len {
        cleaned.trim().to_string()
    } else {
        cleaned.chars().take(max_len).collect::<String>().trim().to_string()
    }
}

/// Minimal structural check on a sender address: exactly one `@`, a
/// non-empty local part, and a dotted domain.
pub fn is_valid_address(addr: &str) -> bool {
    let mut parts = addr.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !addr.contains(char::is_whitespace)
        && addr.matches('@').count() == 1
}
