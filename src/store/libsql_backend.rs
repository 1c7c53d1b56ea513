//! libSQL persistence backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::types::{
    Attachment, Category, MessageAnalysis, NormalizedMessage, Priority, Sentiment,
};
use crate::store::migrations;
use crate::store::traits::{CacheEntry, Database, DeliveryRecord, ThreadMessage, ThreadRole};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self { db: Arc::new(db), conn };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self { db: Arc::new(db), conn };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_dt(dt: NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

/// Parse our canonical datetime format, tolerating fractional seconds.
fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .unwrap_or(NaiveDateTime::MIN)
}

fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

const MESSAGE_COLUMNS: &str = "external_id, sender, subject, body, received_at, thread_id, attachments, replied, category, sentiment, priority";

const DELIVERY_COLUMNS: &str =
    "id, message_external_id, response_text, sent_at, model, tokens_used, variant";

/// Map a libsql Row (MESSAGE_COLUMNS order) to a NormalizedMessage.
fn row_to_message(row: &libsql::Row) -> Result<NormalizedMessage, DatabaseError> {
    let received_str: String = row.get(4).map_err(query_err)?;
    let attachments_json: String = row.get(6).map_err(query_err)?;
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments_json)
        .map_err(|e| DatabaseError::Serialization(format!("attachments: {e}")))?;
    let replied: i64 = row.get(7).map_err(query_err)?;
    let category: String = row.get(8).map_err(query_err)?;
    let sentiment: String = row.get(9).map_err(query_err)?;
    let priority: String = row.get(10).map_err(query_err)?;

    Ok(NormalizedMessage {
        message_id: row.get(0).map_err(query_err)?,
        sender: row.get(1).map_err(query_err)?,
        subject: row.get(2).map_err(query_err)?,
        body: row.get(3).map_err(query_err)?,
        timestamp: parse_dt(&received_str),
        thread_id: row.get::<Option<String>>(5).map_err(query_err)?,
        attachments,
        is_replied: replied != 0,
        analysis: MessageAnalysis {
            category: Category::parse(&category),
            sentiment: Sentiment::parse(&sentiment),
            priority: Priority::parse(&priority),
        },
    })
}

/// Map a libsql Row (DELIVERY_COLUMNS order) to a DeliveryRecord.
fn row_to_delivery(row: &libsql::Row) -> Result<DeliveryRecord, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let sent_str: String = row.get(3).map_err(query_err)?;
    let tokens: i64 = row.get(5).map_err(query_err)?;

    Ok(DeliveryRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("delivery id: {e}")))?,
        message_external_id: row.get(1).map_err(query_err)?,
        response_text: row.get(2).map_err(query_err)?,
        sent_at: parse_dt(&sent_str),
        model: row.get(4).map_err(query_err)?,
        tokens_used: tokens as u32,
        variant: row.get(6).map_err(query_err)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn upsert_message(&self, msg: &NormalizedMessage) -> Result<bool, DatabaseError> {
        let attachments_json = serde_json::to_string(&msg.attachments)
            .map_err(|e| DatabaseError::Serialization(format!("attachments: {e}")))?;
        let now = fmt_dt(chrono::Local::now().naive_local());

        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO messages (id, external_id, sender, subject, body, received_at, thread_id, attachments, replied, category, sentiment, priority, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    Uuid::new_v4().to_string(),
                    msg.message_id.clone(),
                    msg.sender.clone(),
                    msg.subject.clone(),
                    msg.body.clone(),
                    fmt_dt(msg.timestamp),
                    opt_text_owned(msg.thread_id.clone()),
                    attachments_json,
                    i64::from(msg.is_replied),
                    msg.analysis.category.as_str(),
                    msg.analysis.sentiment.as_str(),
                    msg.analysis.priority.as_str(),
                    now.clone(),
                    now,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn get_message(
        &self,
        external_id: &str,
    ) -> Result<Option<NormalizedMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = ?1"),
                params![external_id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_message(&row)?)),
            None => Ok(None),
        }
    }

    async fn pending_messages(&self) -> Result<Vec<NormalizedMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE replied = 0 ORDER BY received_at ASC"
                ),
                (),
            )
            .await
            .map_err(query_err)?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn update_analysis(
        &self,
        external_id: &str,
        analysis: &MessageAnalysis,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET category = ?1, sentiment = ?2, priority = ?3, updated_at = ?4 WHERE external_id = ?5",
                params![
                    analysis.category.as_str(),
                    analysis.sentiment.as_str(),
                    analysis.priority.as_str(),
                    fmt_dt(chrono::Local::now().naive_local()),
                    external_id,
                ],
            )
            .await
            .map_err(query_err)?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".to_string(),
                id: external_id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_replied(&self, external_id: &str) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET replied = 1, updated_at = ?1 WHERE external_id = ?2",
                params![fmt_dt(chrono::Local::now().naive_local()), external_id],
            )
            .await
            .map_err(query_err)?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".to_string(),
                id: external_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Threads ─────────────────────────────────────────────────────

    async fn thread_history(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, DatabaseError> {
        let mut turns = Vec::new();

        let mut rows = self
            .conn()
            .query(
                "SELECT body, received_at FROM messages WHERE thread_id = ?1 OR external_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let content: String = row.get(0).map_err(query_err)?;
            let ts: String = row.get(1).map_err(query_err)?;
            turns.push(ThreadMessage {
                role: ThreadRole::User,
                content,
                timestamp: parse_dt(&ts),
            });
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT d.response_text, d.sent_at FROM deliveries d \
                 JOIN messages m ON d.message_external_id = m.external_id \
                 WHERE m.thread_id = ?1 OR m.external_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(query_err)?;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let content: String = row.get(0).map_err(query_err)?;
            let ts: String = row.get(1).map_err(query_err)?;
            turns.push(ThreadMessage {
                role: ThreadRole::Assistant,
                content,
                timestamp: parse_dt(&ts),
            });
        }

        turns.sort_by_key(|t| t.timestamp);
        Ok(turns)
    }

    // ── Deliveries ──────────────────────────────────────────────────

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO deliveries ({DELIVERY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    record.id.to_string(),
                    record.message_external_id.clone(),
                    record.response_text.clone(),
                    fmt_dt(record.sent_at),
                    record.model.clone(),
                    i64::from(record.tokens_used),
                    record.variant.clone(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn deliveries_for(
        &self,
        external_id: &str,
    ) -> Result<Vec<DeliveryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE message_external_id = ?1 ORDER BY sent_at ASC"
                ),
                params![external_id],
            )
            .await
            .map_err(query_err)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            records.push(row_to_delivery(&row)?);
        }
        Ok(records)
    }

    // ── Response cache ──────────────────────────────────────────────

    async fn cache_get(&self, content_hash: &str) -> Result<Option<CacheEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT response_text, category, sentiment, priority FROM response_cache WHERE content_hash = ?1",
                params![content_hash],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let category: String = row.get(1).map_err(query_err)?;
                let sentiment: String = row.get(2).map_err(query_err)?;
                let priority: String = row.get(3).map_err(query_err)?;
                Ok(Some(CacheEntry {
                    response_text: row.get(0).map_err(query_err)?,
                    analysis: MessageAnalysis {
                        category: Category::parse(&category),
                        sentiment: Sentiment::parse(&sentiment),
                        priority: Priority::parse(&priority),
                    },
                }))
            }
            None => Ok(None),
        }
    }

    async fn cache_put(
        &self,
        content_hash: &str,
        entry: &CacheEntry,
    ) -> Result<(), DatabaseError> {
        let now = fmt_dt(chrono::Local::now().naive_local());
        self.conn()
            .execute(
                "INSERT INTO response_cache (content_hash, response_text, category, sentiment, priority, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
                 ON CONFLICT(content_hash) DO UPDATE SET \
                 response_text = excluded.response_text, category = excluded.category, \
                 sentiment = excluded.sentiment, priority = excluded.priority, \
                 updated_at = excluded.updated_at",
                params![
                    content_hash,
                    entry.response_text.clone(),
                    entry.analysis.category.as_str(),
                    entry.analysis.sentiment.as_str(),
                    entry.analysis.priority.as_str(),
                    now,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
