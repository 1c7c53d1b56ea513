//! `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::types::{MessageAnalysis, NormalizedMessage};

/// A cached generated response, keyed externally by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub response_text: String,
    pub analysis: MessageAnalysis,
}

/// One successful reply delivery. Immutable once written.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub message_external_id: String,
    pub response_text: String,
    pub sent_at: NaiveDateTime,
    pub model: String,
    pub tokens_used: u32,
    pub variant: String,
}

/// Who produced a turn in a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    User,
    Assistant,
}

/// One turn of thread history, inbound or our own reply.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub role: ThreadRole,
    pub content: String,
    pub timestamp: NaiveDateTime,
}

/// Backend-agnostic persistence trait covering messages, deliveries,
/// and the response cache.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message, ignoring it if the external id is already known.
    /// Returns true when the message was new.
    async fn upsert_message(&self, msg: &NormalizedMessage) -> Result<bool, DatabaseError>;

    /// Look up a message by its external (provider) id.
    async fn get_message(&self, external_id: &str)
    -> Result<Option<NormalizedMessage>, DatabaseError>;

    /// All messages not yet replied to, oldest first.
    async fn pending_messages(&self) -> Result<Vec<NormalizedMessage>, DatabaseError>;

    /// Store post-inference enrichment for a message.
    async fn update_analysis(
        &self,
        external_id: &str,
        analysis: &MessageAnalysis,
    ) -> Result<(), DatabaseError>;

    /// Flip the replied flag. Errors if the message is unknown.
    async fn mark_replied(&self, external_id: &str) -> Result<(), DatabaseError>;

    // ── Threads ─────────────────────────────────────────────────────

    /// All turns belonging to a thread, ascending by timestamp: inbound
    /// messages whose `thread_id` or own id equals `thread_id`, plus our
    /// delivered replies to them.
    async fn thread_history(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, DatabaseError>;

    // ── Deliveries ──────────────────────────────────────────────────

    /// Record a successful delivery.
    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DatabaseError>;

    /// Deliveries for one message, oldest first.
    async fn deliveries_for(&self, external_id: &str)
    -> Result<Vec<DeliveryRecord>, DatabaseError>;

    // ── Response cache ──────────────────────────────────────────────

    /// Look up a cached response by content hash.
    async fn cache_get(&self, content_hash: &str) -> Result<Option<CacheEntry>, DatabaseError>;

    /// Store or overwrite a cached response (last writer wins).
    async fn cache_put(&self, content_hash: &str, entry: &CacheEntry)
    -> Result<(), DatabaseError>;
}
