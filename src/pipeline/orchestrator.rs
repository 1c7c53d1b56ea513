//! Pipeline orchestrator — fetch, filter, generate, deliver, record.
//!
//! One pass handles every pending message sequentially. A pass holds a
//! `tokio::sync::Mutex` so passes never overlap. Per-message failures
//! are logged and the pass continues with the next message.
//!
//! Delivery and bookkeeping are record-then-mark: the delivery record is
//! written, then the replied flag is set. A crash between the two (or
//! between the SMTP send and the record) can produce a duplicate reply
//! on restart; that risk is accepted rather than pre-marking messages
//! that may never have been sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai::ResponseEngine;
use crate::context::{self, ThreadContextBuilder};
use crate::error::PipelineError;
use crate::filter::{FilterEngine, Verdict};
use crate::mail::extract;
use crate::mail::reply::{self, RenderedReply};
use crate::mail::transport::MailTransport;
use crate::mail::types::NormalizedMessage;
use crate::store::{Database, DeliveryRecord};

/// Counters for one pipeline pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub fetched: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub replied: usize,
    pub failed: usize,
}

enum MessageResult {
    Rejected,
    Replied,
}

/// Drives messages through the pipeline.
pub struct Orchestrator {
    db: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    engine: Arc<ResponseEngine>,
    filter: FilterEngine,
    context: ThreadContextBuilder,
    signature: String,
    variant: String,
    response_delay: Duration,
    pass_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        transport: Arc<dyn MailTransport>,
        engine: Arc<ResponseEngine>,
        filter: FilterEngine,
        signature: String,
        variant: String,
        response_delay: Duration,
    ) -> Self {
        let context = ThreadContextBuilder::new(db.clone());
        Self {
            db,
            transport,
            engine,
            filter,
            context,
            signature,
            variant,
            response_delay,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one full pass: ingest new mail, then work through everything
    /// pending. Honors `shutdown` between messages and during pacing.
    pub async fn run_pass(&self, shutdown: &AtomicBool) -> PassOutcome {
        let _guard = self.pass_lock.lock().await;
        let mut outcome = PassOutcome::default();

        outcome.fetched = self.ingest_new_mail().await;

        let pending = match self.db.pending_messages().await {
            Ok(msgs) => msgs,
            Err(e) => {
                error!(error = %e, "failed to load pending messages");
                return outcome;
            }
        };
        if pending.is_empty() {
            return outcome;
        }
        info!(count = pending.len(), "processing pending messages");

        let last_index = pending.len() - 1;
        for (i, msg) in pending.iter().enumerate() {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, stopping pass");
                break;
            }

            match self.process_message(msg).await {
                Ok(MessageResult::Rejected) => outcome.rejected += 1,
                Ok(MessageResult::Replied) => {
                    outcome.admitted += 1;
                    outcome.replied += 1;
                    // Pace replies so the mailbox doesn't look automated.
                    if i < last_index {
                        self.pacing_delay(shutdown).await;
                    }
                }
                Err(e) => {
                    outcome.admitted += 1;
                    outcome.failed += 1;
                    error!(id = %msg.message_id, error = %e, "message failed, continuing pass");
                }
            }
        }

        info!(
            fetched = outcome.fetched,
            rejected = outcome.rejected,
            replied = outcome.replied,
            failed = outcome.failed,
            "pass complete"
        );
        outcome
    }

    /// Fetch unread mail, normalize, and store it. Fetch problems are
    /// logged; the pass still works through what is already stored.
    async fn ingest_new_mail(&self) -> usize {
        let transport = self.transport.clone();
        let fetched = tokio::task::spawn_blocking(move || transport.fetch_unread()).await;

        let raws = match fetched {
            Ok(Ok(raws)) => raws,
            Ok(Err(e)) => {
                warn!(error = %e, "mail fetch failed, processing stored backlog only");
                return 0;
            }
            Err(e) => {
                error!(error = %e, "mail fetch task panicked");
                return 0;
            }
        };

        let mut stored = 0;
        for raw in &raws {
            let Some(msg) = extract::extract_or_skip(raw) else {
                continue;
            };
            match self.db.upsert_message(&msg).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(e) => warn!(id = %msg.message_id, error = %e, "failed to store message"),
            }
        }
        stored
    }

    async fn process_message(&self, msg: &NormalizedMessage) -> Result<MessageResult, PipelineError> {
        let now = Local::now().naive_local();
        if let Verdict::Reject(reason) = self.filter.evaluate(msg, now) {
            info!(id = %msg.message_id, reason = ?reason, "message rejected");
            return Ok(MessageResult::Rejected);
        }

        let mut prompt_context = context::baseline(msg);
        if let Some(thread_id) = &msg.thread_id {
            let thread = self.context.build(thread_id).await?;
            if !thread.is_empty() {
                if !prompt_context.is_empty() {
                    prompt_context.push('\n');
                }
                prompt_context.push_str(&thread);
            }
        }

        let ai = self.engine.generate(msg, &prompt_context).await;
        self.db.update_analysis(&msg.message_id, &ai.analysis).await?;

        let record = self.deliver_and_record(msg, &ai.text, ai.tokens_used).await?;
        info!(
            id = %msg.message_id,
            delivery = %record.id,
            tokens = record.tokens_used,
            cached = ai.from_cache,
            template = ai.used_template.as_deref().unwrap_or("none"),
            "reply delivered"
        );
        Ok(MessageResult::Replied)
    }

    /// Send the reply, then record it, then mark the message replied.
    /// A transport failure leaves no record and no replied mark.
    async fn deliver_and_record(
        &self,
        msg: &NormalizedMessage,
        text: &str,
        tokens_used: u32,
    ) -> Result<DeliveryRecord, PipelineError> {
        let rendered: RenderedReply = reply::compose(msg, text, &self.signature);

        let transport = self.transport.clone();
        let to_send = rendered.clone();
        tokio::task::spawn_blocking(move || transport.send(&to_send))
            .await
            .map_err(|e| PipelineError::Delivery(format!("send task panicked: {e}")))?
            .map_err(|e| PipelineError::Delivery(e.to_string()))?;

        let record = DeliveryRecord {
            id: Uuid::new_v4(),
            message_external_id: msg.message_id.clone(),
            response_text: rendered.body,
            sent_at: Local::now().naive_local(),
            model: self.engine.model().to_string(),
            tokens_used,
            variant: self.variant.clone(),
        };
        self.db
            .insert_delivery(&record)
            .await
            .map_err(|e| PipelineError::Record(e.to_string()))?;
        self.db.mark_replied(&msg.message_id).await?;
        Ok(record)
    }

    /// Sleep out the inter-message delay in one-second slices, bailing
    /// early on shutdown.
    async fn pacing_delay(&self, shutdown: &AtomicBool) {
        let mut remaining = self.response_delay;
        while !remaining.is_zero() {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let step = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }
}

/// Spawn the periodic driver loop.
///
/// Runs a pass immediately, then every `check_interval`. Returns the
/// task handle and a shutdown flag; setting the flag interrupts in-pass
/// pacing sleeps and stops the loop within a second, so callers can
/// await the handle for a clean exit.
pub fn spawn_driver(
    orchestrator: Arc<Orchestrator>,
    check_interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = check_interval.as_secs(), "pipeline driver started");
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("pipeline driver shutting down");
                return;
            }
            orchestrator.run_pass(&shutdown).await;

            // Wait out the interval in one-second slices so a shutdown
            // request is honored promptly.
            let mut remaining = check_interval;
            while !remaining.is_zero() {
                if shutdown.load(Ordering::Relaxed) {
                    info!("pipeline driver shutting down");
                    return;
                }
                let step = remaining.min(Duration::from_secs(1));
                tokio::time::sleep(step).await;
                remaining -= step;
            }
        }
    });

    (handle, shutdown_flag)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::testing::MockClient;
    use crate::ai::templates::TemplateSet;
    use crate::config::InferenceConfig;
    use crate::error::AiError;
    use crate::filter::{BusinessHours, FilterRule};
    use crate::mail::types::MessageAnalysis;
    use crate::mail::transport::testing::MockTransport;
    use crate::store::LibSqlBackend;

    fn permissive_filter(deny: Vec<FilterRule>) -> FilterEngine {
        FilterEngine::new(
            vec![],
            deny,
            BusinessHours { days: vec![0, 1, 2, 3, 4, 5, 6], start_hour: 0, end_hour: 24 },
            24 * 365,
        )
    }

    fn fast_inference() -> InferenceConfig {
        InferenceConfig {
            max_retries: 0,
            retry_initial_delay_ms: 1,
            min_call_interval_ms: 0,
            ..InferenceConfig::default()
        }
    }

    fn stored_message(id: &str, sender: &str, subject: &str, body: &str) -> NormalizedMessage {
        NormalizedMessage {
            message_id: id.to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: Local::now().naive_local(),
            thread_id: None,
            attachments: vec![],
            is_replied: false,
            analysis: MessageAnalysis::default(),
        }
    }

    struct Setup {
        orchestrator: Orchestrator,
        db: Arc<LibSqlBackend>,
        transport: Arc<MockTransport>,
        client: Arc<MockClient>,
    }

    async fn setup(client: MockClient, transport: MockTransport, deny: Vec<FilterRule>) -> Setup {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let client = Arc::new(client);
        let transport = Arc::new(transport);
        let engine = Arc::new(ResponseEngine::new(
            client.clone(),
            db.clone(),
            TemplateSet::empty(),
            &fast_inference(),
        ));
        let orchestrator = Orchestrator::new(
            db.clone(),
            transport.clone(),
            engine,
            permissive_filter(deny),
            "\n\n--\nSent by MailMind".to_string(),
            "default".to_string(),
            Duration::ZERO,
        );
        Setup { orchestrator, db, transport, client }
    }

    #[tokio::test]
    async fn pass_replies_to_pending_message() {
        let s = setup(
            MockClient::succeeding("Generated answer.\nCATEGORY: Support", 50),
            MockTransport::default(),
            vec![],
        )
        .await;
        let msg = stored_message("<m1@example.com>", "alice@example.com", "Help", "It broke");
        s.db.upsert_message(&msg).await.unwrap();

        let shutdown = AtomicBool::new(false);
        let outcome = s.orchestrator.run_pass(&shutdown).await;
        assert_eq!(outcome.replied, 1);
        assert_eq!(outcome.failed, 0);

        let sent = s.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].subject, "Re: Help");
        assert_eq!(sent[0].in_reply_to, "<m1@example.com>");
        assert_eq!(sent[0].references, "<m1@example.com>");
        assert!(sent[0].body.starts_with("Generated answer."));
        assert!(sent[0].body.ends_with("Sent by MailMind"));
        drop(sent);

        let stored = s.db.get_message("<m1@example.com>").await.unwrap().unwrap();
        assert!(stored.is_replied);
        assert_eq!(
            stored.analysis.category,
            crate::mail::types::Category::Support
        );
        let deliveries = s.db.deliveries_for("<m1@example.com>").await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].tokens_used, 50);
    }

    #[tokio::test]
    async fn denied_message_stays_pending_without_send() {
        let s = setup(
            MockClient::succeeding("Should not be used", 1),
            MockTransport::default(),
            vec![FilterRule::Domain("@spam.example".into())],
        )
        .await;
        s.db.upsert_message(&stored_message(
            "<m1@example.com>",
            "bot@spam.example",
            "Buy now",
            "Spam",
        ))
        .await
        .unwrap();

        let outcome = s.orchestrator.run_pass(&AtomicBool::new(false)).await;
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.replied, 0);
        assert!(s.transport.sent.lock().unwrap().is_empty());
        assert_eq!(s.client.call_count(), 0);
        assert!(!s.db.get_message("<m1@example.com>").await.unwrap().unwrap().is_replied);
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_record_and_no_mark() {
        let s = setup(
            MockClient::succeeding("Answer", 1),
            MockTransport { fail_send: true, ..Default::default() },
            vec![],
        )
        .await;
        s.db.upsert_message(&stored_message(
            "<m1@example.com>",
            "alice@example.com",
            "Hi",
            "Hello",
        ))
        .await
        .unwrap();

        let outcome = s.orchestrator.run_pass(&AtomicBool::new(false)).await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.replied, 0);
        assert!(s.db.deliveries_for("<m1@example.com>").await.unwrap().is_empty());
        assert!(!s.db.get_message("<m1@example.com>").await.unwrap().unwrap().is_replied);
    }

    #[tokio::test]
    async fn ai_failure_falls_back_without_stopping_the_pass() {
        let s = setup(
            MockClient::new(vec![
                Err(AiError::AuthFailed),
                Ok(crate::ai::client::CompletionResponse {
                    content: "Real answer".into(),
                    tokens_used: 7,
                }),
            ]),
            MockTransport::default(),
            vec![],
        )
        .await;
        s.db.upsert_message(&stored_message("<a@example.com>", "a@x.example", "One", "1"))
            .await
            .unwrap();
        s.db.upsert_message(&stored_message("<b@example.com>", "b@x.example", "Two", "2"))
            .await
            .unwrap();

        let outcome = s.orchestrator.run_pass(&AtomicBool::new(false)).await;
        assert_eq!(outcome.replied, 2);
        let sent = s.transport.sent.lock().unwrap();
        assert!(sent[0].body.contains("Thank you for your email"));
        assert!(sent[1].body.contains("Real answer"));
    }

    #[tokio::test]
    async fn identical_content_hits_cache_on_second_message() {
        let s = setup(
            MockClient::succeeding("Cached once", 30),
            MockTransport::default(),
            vec![],
        )
        .await;
        s.db.upsert_message(&stored_message("<a@example.com>", "a@x.example", "Same", "Body"))
            .await
            .unwrap();
        s.db.upsert_message(&stored_message("<b@example.com>", "b@x.example", "Same", "Body"))
            .await
            .unwrap();

        let outcome = s.orchestrator.run_pass(&AtomicBool::new(false)).await;
        assert_eq!(outcome.replied, 2);
        assert_eq!(s.client.call_count(), 1);
        let second = &s.db.deliveries_for("<b@example.com>").await.unwrap()[0];
        assert_eq!(second.tokens_used, 0);
        assert!(second.response_text.starts_with("Cached once"));
    }

    #[tokio::test]
    async fn fetch_path_ingests_raw_mail() {
        let transport = MockTransport::default();
        let date = Local::now().format("%a, %d %b %Y %H:%M:%S %z").to_string();
        let raw = format!(
            "From: carol@example.com\r\nSubject: Fetched\r\nMessage-ID: <f1@example.com>\r\nDate: {date}\r\n\r\nFetched body.\r\n"
        );
        transport.inbox.lock().unwrap().push(raw.into_bytes());

        let s = setup(MockClient::succeeding("Reply", 5), transport, vec![]).await;
        let outcome = s.orchestrator.run_pass(&AtomicBool::new(false)).await;
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.replied, 1);
        // mail-parser strips the angle brackets from the Message-ID.
        assert!(s.db.get_message("f1@example.com").await.unwrap().unwrap().is_replied);
    }

    #[tokio::test]
    async fn shutdown_stops_pass_between_messages() {
        let s = setup(MockClient::succeeding("Reply", 5), MockTransport::default(), vec![]).await;
        s.db.upsert_message(&stored_message("<a@example.com>", "a@x.example", "One", "1"))
            .await
            .unwrap();
        let shutdown = AtomicBool::new(true);
        let outcome = s.orchestrator.run_pass(&shutdown).await;
        assert_eq!(outcome.replied, 0);
        assert_eq!(outcome.rejected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_honors_shutdown_flag() {
        let s = setup(MockClient::succeeding("Reply", 5), MockTransport::default(), vec![]).await;
        let (handle, shutdown) = spawn_driver(Arc::new(s.orchestrator), Duration::from_secs(300));
        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn driver_exits_during_interval_wait() {
        let s = setup(MockClient::succeeding("Reply", 5), MockTransport::default(), vec![]).await;
        let (handle, shutdown) = spawn_driver(Arc::new(s.orchestrator), Duration::from_secs(3600));
        // Let the first pass finish, then request shutdown mid-interval.
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();
    }
}
