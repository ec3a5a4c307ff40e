//! Side Effect Queue and Worker
//!
//! States declare side effects to fire on entry. The executor either
//! dispatches them inline after the commit point or enqueues them as
//! pending rows; the worker here drains the queue with bounded retries and
//! marks exhausted effects failed so an operator can re-drive them.
//! Dispatch is at-least-once, idempotency is expected from the sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::document::Document;
use crate::sinks::{
    LedgerEntry, LedgerSink, LinkedDocumentSink, Notification, NotificationSink, SinkError,
};
use crate::store::DocumentStore;

/// Maximum dispatch attempts before an effect is marked failed
const MAX_ATTEMPTS: u32 = 3;

/// Polling interval when queue is empty
const POLL_INTERVAL_MS: u64 = 100;

/// Backoff interval after a queue error
const ERROR_BACKOFF_MS: u64 = 1000;

/// A side effect a state can declare in its `on_enter` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffectDef {
    /// Post the document totals to the ledger
    PostLedger,
    /// Post a reversing ledger entry (cancellation of a posted document)
    ReverseLedger,
    /// Propagate the change to linked documents
    SyncLinkedDocuments,
    /// Announce the new state to interested parties
    Notify,
}

impl SideEffectDef {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectDef::PostLedger => "post_ledger",
            SideEffectDef::ReverseLedger => "reverse_ledger",
            SideEffectDef::SyncLinkedDocuments => "sync_linked_documents",
            SideEffectDef::Notify => "notify",
        }
    }
}

impl std::fmt::Display for SideEffectDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStatus {
    Pending,
    Dispatched,
    Failed,
}

impl EffectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectStatus::Pending => "pending",
            EffectStatus::Dispatched => "dispatched",
            EffectStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EffectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EffectStatus::Pending),
            "dispatched" => Ok(EffectStatus::Dispatched),
            "failed" => Ok(EffectStatus::Failed),
            _ => Err(format!("Unknown effect status: {s}")),
        }
    }
}

/// A side effect recorded at the commit point, awaiting dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEffect {
    pub effect_id: Uuid,
    pub document_id: Uuid,
    pub effect: SideEffectDef,
    /// Actor the transition ran as; attribution for the dispatched effect
    pub actor: Uuid,
    #[serde(default)]
    pub comment: Option<String>,
    pub status: EffectStatus,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingEffect {
    pub fn new(
        document_id: Uuid,
        effect: SideEffectDef,
        actor: Uuid,
        comment: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            effect_id: Uuid::new_v4(),
            document_id,
            effect,
            actor,
            comment,
            status: EffectStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Error type for effect queues
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queued effect {0} not found")]
    NotFound(Uuid),

    #[error("queued effect {0} is not in failed status")]
    NotFailed(Uuid),

    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Queue of effects awaiting dispatch
#[async_trait]
pub trait EffectQueue: Send + Sync {
    /// Record an effect for later dispatch
    async fn enqueue(&self, effect: PendingEffect) -> Result<(), QueueError>;

    /// Claim the oldest pending effect, counting the attempt
    async fn claim_next(&self) -> Result<Option<PendingEffect>, QueueError>;

    /// Mark a claimed effect successfully dispatched
    async fn mark_dispatched(&self, effect_id: Uuid) -> Result<(), QueueError>;

    /// Return a claimed effect to the queue after a failed attempt
    async fn requeue(&self, effect_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// Take an effect out of rotation after its attempts are exhausted
    async fn mark_failed(&self, effect_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// All effects currently marked failed
    async fn list_failed(&self) -> Result<Vec<PendingEffect>, QueueError>;

    /// Put a failed effect back in rotation with a fresh attempt budget
    async fn retry_failed(&self, effect_id: Uuid) -> Result<(), QueueError>;
}

/// In-memory effect queue
pub struct MemoryEffectQueue {
    entries: Arc<RwLock<Vec<PendingEffect>>>,
}

impl MemoryEffectQueue {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Every entry ever enqueued, in order
    pub async fn entries(&self) -> Vec<PendingEffect> {
        self.entries.read().await.clone()
    }
}

impl Default for MemoryEffectQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EffectQueue for MemoryEffectQueue {
    async fn enqueue(&self, effect: PendingEffect) -> Result<(), QueueError> {
        self.entries.write().await.push(effect);
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<PendingEffect>, QueueError> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.status == EffectStatus::Pending)
        else {
            return Ok(None);
        };

        entry.attempts += 1;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn mark_dispatched(&self, effect_id: Uuid) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.effect_id == effect_id)
            .ok_or(QueueError::NotFound(effect_id))?;

        entry.status = EffectStatus::Dispatched;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn requeue(&self, effect_id: Uuid, error: &str) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.effect_id == effect_id)
            .ok_or(QueueError::NotFound(effect_id))?;

        entry.status = EffectStatus::Pending;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, effect_id: Uuid, error: &str) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.effect_id == effect_id)
            .ok_or(QueueError::NotFound(effect_id))?;

        entry.status = EffectStatus::Failed;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list_failed(&self) -> Result<Vec<PendingEffect>, QueueError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.status == EffectStatus::Failed)
            .cloned()
            .collect())
    }

    async fn retry_failed(&self, effect_id: Uuid) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.effect_id == effect_id)
            .ok_or(QueueError::NotFound(effect_id))?;

        if entry.status != EffectStatus::Failed {
            return Err(QueueError::NotFailed(effect_id));
        }

        entry.status = EffectStatus::Pending;
        entry.attempts = 0;
        entry.updated_at = Utc::now();
        Ok(())
    }
}

/// Routes one effect to the sink that handles it
#[derive(Clone)]
pub struct EffectDispatcher {
    ledger: Arc<dyn LedgerSink>,
    links: Arc<dyn LinkedDocumentSink>,
    notify: Arc<dyn NotificationSink>,
}

impl EffectDispatcher {
    pub fn new(
        ledger: Arc<dyn LedgerSink>,
        links: Arc<dyn LinkedDocumentSink>,
        notify: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            ledger,
            links,
            notify,
        }
    }

    /// Dispatch one effect for a document
    pub async fn dispatch(
        &self,
        doc: &Document,
        actor: Uuid,
        comment: Option<String>,
        effect: SideEffectDef,
    ) -> Result<(), SinkError> {
        match effect {
            SideEffectDef::PostLedger => {
                self.ledger
                    .post(&LedgerEntry::from_document(doc, actor, false))
                    .await
            }
            SideEffectDef::ReverseLedger => {
                self.ledger
                    .post(&LedgerEntry::from_document(doc, actor, true))
                    .await
            }
            SideEffectDef::SyncLinkedDocuments => self.links.sync(doc).await,
            SideEffectDef::Notify => {
                self.notify
                    .dispatch(&Notification::from_document(doc, actor, comment))
                    .await
            }
        }
    }
}

/// Worker that drains the effect queue
pub struct EffectWorker {
    queue: Arc<dyn EffectQueue>,
    store: Arc<dyn DocumentStore>,
    dispatcher: EffectDispatcher,
}

impl EffectWorker {
    pub fn new(
        queue: Arc<dyn EffectQueue>,
        store: Arc<dyn DocumentStore>,
        dispatcher: EffectDispatcher,
    ) -> Self {
        Self {
            queue,
            store,
            dispatcher,
        }
    }

    /// Start the worker loop (blocks until shutdown signal)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Effect worker started");

        loop {
            // Check for shutdown
            if *shutdown.borrow() {
                info!("Effect worker shutting down");
                break;
            }

            match self.process_one().await {
                Ok(true) => {
                    // Dispatched something, immediately check for more
                    continue;
                }
                Ok(false) => {
                    // Queue empty, wait before polling again
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("Effect worker shutting down");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(?e, "Error processing effect queue");
                    tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                }
            }
        }
    }

    /// Process one effect from the queue
    /// Returns Ok(true) if an effect was claimed, Ok(false) if queue empty
    async fn process_one(&self) -> Result<bool, QueueError> {
        let Some(effect) = self.queue.claim_next().await? else {
            return Ok(false);
        };

        debug!(
            effect_id = %effect.effect_id,
            document_id = %effect.document_id,
            effect = %effect.effect,
            attempt = effect.attempts,
            "Dispatching pending effect"
        );

        // The document is re-loaded so the effect sees the committed state,
        // not a stale snapshot from enqueue time
        let outcome = match self.store.load(effect.document_id).await {
            Ok(doc) => self
                .dispatcher
                .dispatch(&doc, effect.actor, effect.comment.clone(), effect.effect)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => {
                self.queue.mark_dispatched(effect.effect_id).await?;
            }
            Err(detail) if effect.attempts < MAX_ATTEMPTS => {
                warn!(
                    effect_id = %effect.effect_id,
                    attempt = effect.attempts,
                    error = %detail,
                    "Effect dispatch failed, requeuing"
                );
                self.queue.requeue(effect.effect_id, &detail).await?;
            }
            Err(detail) => {
                error!(
                    effect_id = %effect.effect_id,
                    error = %detail,
                    "Effect dispatch failed after {} attempts, marking failed",
                    effect.attempts
                );
                self.queue.mark_failed(effect.effect_id, &detail).await?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{MemoryLedgerSink, MemoryLinkedDocumentSink, MemoryNotificationSink};
    use crate::store::MemoryDocumentStore;

    fn sample_doc() -> Document {
        Document::new("sales_invoice", "approved", Uuid::new_v4(), "acme", "USD")
    }

    struct Sinks {
        ledger: Arc<MemoryLedgerSink>,
        links: Arc<MemoryLinkedDocumentSink>,
        notify: Arc<MemoryNotificationSink>,
    }

    fn memory_sinks() -> (Sinks, EffectDispatcher) {
        let sinks = Sinks {
            ledger: Arc::new(MemoryLedgerSink::new()),
            links: Arc::new(MemoryLinkedDocumentSink::new()),
            notify: Arc::new(MemoryNotificationSink::new()),
        };
        let dispatcher = EffectDispatcher::new(
            sinks.ledger.clone(),
            sinks.links.clone(),
            sinks.notify.clone(),
        );
        (sinks, dispatcher)
    }

    #[test]
    fn test_effect_status_round_trip() {
        for status in [
            EffectStatus::Pending,
            EffectStatus::Dispatched,
            EffectStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<EffectStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<EffectStatus>().is_err());
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_counts_attempts() {
        let queue = MemoryEffectQueue::new();
        let actor = Uuid::new_v4();
        let first = PendingEffect::new(Uuid::new_v4(), SideEffectDef::PostLedger, actor, None);
        let second = PendingEffect::new(Uuid::new_v4(), SideEffectDef::Notify, actor, None);

        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second).await.unwrap();

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.effect_id, first.effect_id);
        assert_eq!(claimed.attempts, 1);

        queue.mark_dispatched(claimed.effect_id).await.unwrap();

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.effect, SideEffectDef::Notify);
        queue.mark_dispatched(claimed.effect_id).await.unwrap();

        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_failed_resets_attempt_budget() {
        let queue = MemoryEffectQueue::new();
        let effect =
            PendingEffect::new(Uuid::new_v4(), SideEffectDef::Notify, Uuid::new_v4(), None);
        let effect_id = effect.effect_id;
        queue.enqueue(effect).await.unwrap();

        queue.claim_next().await.unwrap().unwrap();
        queue.mark_failed(effect_id, "sink offline").await.unwrap();

        let failed = queue.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("sink offline"));

        queue.retry_failed(effect_id).await.unwrap();
        assert!(queue.list_failed().await.unwrap().is_empty());

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.effect_id, effect_id);
        assert_eq!(claimed.attempts, 1);

        // Only a failed effect can be re-driven
        let err = queue.retry_failed(effect_id).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFailed(_)));
    }

    #[tokio::test]
    async fn test_dispatcher_routes_by_effect() {
        let (sinks, dispatcher) = memory_sinks();
        let doc = sample_doc();
        let actor = Uuid::new_v4();

        dispatcher
            .dispatch(&doc, actor, None, SideEffectDef::PostLedger)
            .await
            .unwrap();
        dispatcher
            .dispatch(&doc, actor, None, SideEffectDef::ReverseLedger)
            .await
            .unwrap();
        dispatcher
            .dispatch(&doc, actor, Some("done".to_string()), SideEffectDef::Notify)
            .await
            .unwrap();
        dispatcher
            .dispatch(&doc, actor, None, SideEffectDef::SyncLinkedDocuments)
            .await
            .unwrap();

        let entries = sinks.ledger.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].reversal);
        assert!(entries[1].reversal);
        assert_eq!(sinks.notify.notifications().await[0].comment.as_deref(), Some("done"));
        assert_eq!(sinks.links.synced().await.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_dispatches_queued_effects() {
        let (sinks, dispatcher) = memory_sinks();
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = Arc::new(MemoryEffectQueue::new());

        let doc = sample_doc();
        store.save_atomic(&doc, 0).await.unwrap();

        let actor = Uuid::new_v4();
        queue
            .enqueue(PendingEffect::new(
                doc.document_id,
                SideEffectDef::PostLedger,
                actor,
                None,
            ))
            .await
            .unwrap();
        queue
            .enqueue(PendingEffect::new(
                doc.document_id,
                SideEffectDef::Notify,
                actor,
                None,
            ))
            .await
            .unwrap();

        let worker = EffectWorker::new(queue.clone(), store, dispatcher);
        assert!(worker.process_one().await.unwrap());
        assert!(worker.process_one().await.unwrap());
        assert!(!worker.process_one().await.unwrap());

        assert_eq!(sinks.ledger.entries().await.len(), 1);
        assert_eq!(sinks.notify.notifications().await.len(), 1);
        assert!(queue
            .entries()
            .await
            .iter()
            .all(|e| e.status == EffectStatus::Dispatched));
    }

    #[tokio::test]
    async fn test_worker_dead_letters_after_bounded_retries() {
        struct FailingLedger;

        #[async_trait]
        impl LedgerSink for FailingLedger {
            async fn post(&self, _entry: &LedgerEntry) -> Result<(), SinkError> {
                Err(SinkError::Unavailable("ledger offline".to_string()))
            }
        }

        let dispatcher = EffectDispatcher::new(
            Arc::new(FailingLedger),
            Arc::new(MemoryLinkedDocumentSink::new()),
            Arc::new(MemoryNotificationSink::new()),
        );
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = Arc::new(MemoryEffectQueue::new());

        let doc = sample_doc();
        store.save_atomic(&doc, 0).await.unwrap();
        queue
            .enqueue(PendingEffect::new(
                doc.document_id,
                SideEffectDef::PostLedger,
                Uuid::new_v4(),
                None,
            ))
            .await
            .unwrap();

        let worker = EffectWorker::new(queue.clone(), store, dispatcher);
        for _ in 0..MAX_ATTEMPTS {
            assert!(worker.process_one().await.unwrap());
        }
        // Attempts exhausted; nothing pending remains
        assert!(!worker.process_one().await.unwrap());

        let failed = queue.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, MAX_ATTEMPTS);
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("ledger offline"));
    }
}
