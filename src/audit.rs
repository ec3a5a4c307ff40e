//! Audit Trail
//!
//! Append-only record of executed transitions, written after the document
//! save commits. An append failure never rolls the transition back; the
//! executor reports it in the receipt instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::Document;

/// Error type for audit sinks
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit storage error: {0}")]
    Storage(String),
}

/// One executed transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub document_id: Uuid,
    pub doc_type: String,
    pub from_state: String,
    pub to_state: String,
    pub action: String,
    pub actor: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl AuditRecord {
    /// Build a record from a document the transition was already applied to
    pub fn new(
        doc: &Document,
        from_state: impl Into<String>,
        action: impl Into<String>,
        actor: Uuid,
        comment: Option<String>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            document_id: doc.document_id,
            doc_type: doc.doc_type.clone(),
            from_state: from_state.into(),
            to_state: doc.current_state.clone(),
            action: action.into(),
            actor,
            occurred_at: Utc::now(),
            comment,
        }
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// In-memory audit sink
pub struct MemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// All records appended so far, in order
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    /// Records for one document, in order
    pub async fn records_for(&self, document_id: Uuid) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records.write().await.push(record);
        Ok(())
    }
}
