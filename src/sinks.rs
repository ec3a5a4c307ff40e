//! Side Effect Sinks
//!
//! Targets for post-commit side effects: ledger posting, linked document
//! sync, and notifications. Each is a trait so production can wire real
//! integrations while tests swap in the in-memory ones here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::Document;

/// Error type for side effect sinks
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected request: {0}")]
    Rejected(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A ledger posting derived from a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub document_id: Uuid,
    pub doc_type: String,
    pub company: String,
    pub currency: String,
    /// Rounded document total in document currency
    pub amount: Decimal,
    /// Unrounded total in company base currency
    pub base_amount: Decimal,
    pub posted_by: Uuid,
    pub posted_at: DateTime<Utc>,
    /// True when this entry backs out an earlier posting
    pub reversal: bool,
}

impl LedgerEntry {
    pub fn from_document(doc: &Document, posted_by: Uuid, reversal: bool) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            document_id: doc.document_id,
            doc_type: doc.doc_type.clone(),
            company: doc.company.clone(),
            currency: doc.currency.clone(),
            amount: doc.totals().rounded_total,
            base_amount: doc.totals().base_grand_total,
            posted_by,
            posted_at: Utc::now(),
            reversal,
        }
    }
}

/// A state change announcement for interested parties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub document_id: Uuid,
    pub doc_type: String,
    pub new_state: String,
    pub actor: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Notification {
    pub fn from_document(doc: &Document, actor: Uuid, comment: Option<String>) -> Self {
        Self {
            document_id: doc.document_id,
            doc_type: doc.doc_type.clone(),
            new_state: doc.current_state.clone(),
            actor,
            occurred_at: Utc::now(),
            comment,
        }
    }
}

/// Posts entries to a ledger
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn post(&self, entry: &LedgerEntry) -> Result<(), SinkError>;
}

/// Propagates state to documents linked to the one that moved
#[async_trait]
pub trait LinkedDocumentSink: Send + Sync {
    async fn sync(&self, doc: &Document) -> Result<(), SinkError>;
}

/// Delivers state change notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// In-memory ledger sink
pub struct MemoryLedgerSink {
    entries: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl MemoryLedgerSink {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for MemoryLedgerSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerSink for MemoryLedgerSink {
    async fn post(&self, entry: &LedgerEntry) -> Result<(), SinkError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

/// In-memory linked document sink
pub struct MemoryLinkedDocumentSink {
    synced: Arc<RwLock<Vec<Document>>>,
}

impl MemoryLinkedDocumentSink {
    pub fn new() -> Self {
        Self {
            synced: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Documents passed to `sync`, in order
    pub async fn synced(&self) -> Vec<Document> {
        self.synced.read().await.clone()
    }
}

impl Default for MemoryLinkedDocumentSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkedDocumentSink for MemoryLinkedDocumentSink {
    async fn sync(&self, doc: &Document) -> Result<(), SinkError> {
        self.synced.write().await.push(doc.clone());
        Ok(())
    }
}

/// In-memory notification sink
pub struct MemoryNotificationSink {
    notifications: Arc<RwLock<Vec<Notification>>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }
}

impl Default for MemoryNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn dispatch(&self, notification: &Notification) -> Result<(), SinkError> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }
}
