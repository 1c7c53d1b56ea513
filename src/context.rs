//! Prompt context — thread history rendering and attachment notes.

use std::sync::Arc;

use crate::error::DatabaseError;
use crate::mail::types::NormalizedMessage;
use crate::store::{Database, ThreadMessage, ThreadRole};

/// Most recent turns included in the prompt.
const MAX_TURNS: usize = 5;

/// Characters of each turn kept in the prompt.
const CLIP_CHARS: usize = 500;

/// Builds a textual summary of prior conversation turns for the prompt.
pub struct ThreadContextBuilder {
    db: Arc<dyn Database>,
}

impl ThreadContextBuilder {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Render the last turns of a thread, oldest first. Empty string when
    /// the thread has no history.
    pub async fn build(&self, thread_id: &str) -> Result<String, DatabaseError> {
        let history = self.db.thread_history(thread_id).await?;
        Ok(render(&history))
    }
}

/// Render history turns as `Role: clipped content` lines.
pub fn render(history: &[ThreadMessage]) -> String {
    let skip = history.len().saturating_sub(MAX_TURNS);
    history
        .iter()
        .skip(skip)
        .map(|turn| {
            let role = match turn.role {
                ThreadRole::User => "User",
                ThreadRole::Assistant => "Assistant",
            };
            format!("{role}: {}", clip(&turn.content))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Baseline context for a message: attachment names, when present.
pub fn baseline(msg: &NormalizedMessage) -> String {
    if msg.attachments.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = msg.attachments.iter().map(|a| a.filename.as_str()).collect();
    format!("The message includes attachments: {}", names.join(", "))
}

fn clip(content: &str) -> String {
    if content.chars().count() <= CLIP_CHARS {
        content.to_string()
    } else {
        let clipped: String = content.chars().take(CLIP_CHARS).collect();
        format!("{clipped}...")
    }
}
