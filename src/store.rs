//! Document Store Abstraction
//!
//! Abstract load/save/lock of documents. Implementations can target a
//! database; the in-memory store here backs tests and embedded use.
//! Saves are optimistic (expected-version check) and locks carry a TTL so
//! a crashed holder cannot wedge a document forever.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::Document;
use crate::error::EngineError;

/// Error type for document store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(Uuid),

    #[error("version conflict on document {document_id}: expected {expected}, found {actual}")]
    VersionConflict {
        document_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("document {0} is locked")]
    Busy(Uuid),

    #[error("lock token is stale or already released")]
    StaleLock,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(document_id) => EngineError::NotFound { document_id },
            StoreError::VersionConflict {
                document_id,
                expected,
                actual,
            } => EngineError::VersionConflict {
                document_id,
                expected,
                actual,
            },
            StoreError::Busy(document_id) => EngineError::Busy { document_id },
            StoreError::StaleLock | StoreError::Storage(_) => EngineError::Storage {
                message: err.to_string(),
            },
        }
    }
}

/// Proof of an acquired per-document lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub document_id: Uuid,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Abstract document repository
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document by id
    async fn load(&self, document_id: Uuid) -> Result<Document, StoreError>;

    /// Persist if the stored version still equals `expected_version`
    ///
    /// Returns the new version. An `expected_version` of 0 creates the
    /// document if it does not exist yet.
    async fn save_atomic(&self, doc: &Document, expected_version: u64) -> Result<u64, StoreError>;

    /// Acquire an exclusive per-document lock for at most `ttl`
    async fn lock(&self, document_id: Uuid, ttl: Duration) -> Result<LockToken, StoreError>;

    /// Release a lock acquired with `lock`
    async fn unlock(&self, token: &LockToken) -> Result<(), StoreError>;
}

/// In-memory document store
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<HashMap<Uuid, Document>>>,
    locks: Arc<RwLock<HashMap<Uuid, LockToken>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self, document_id: Uuid) -> Result<Document, StoreError> {
        let documents = self.documents.read().await;
        documents
            .get(&document_id)
            .cloned()
            .ok_or(StoreError::NotFound(document_id))
    }

    async fn save_atomic(&self, doc: &Document, expected_version: u64) -> Result<u64, StoreError> {
        let mut documents = self.documents.write().await;

        let actual = match documents.get(&doc.document_id) {
            Some(stored) => stored.version,
            None if expected_version == 0 => 0,
            None => return Err(StoreError::NotFound(doc.document_id)),
        };

        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                document_id: doc.document_id,
                expected: expected_version,
                actual,
            });
        }

        let mut stored = doc.clone();
        stored.version = expected_version + 1;
        let new_version = stored.version;
        documents.insert(doc.document_id, stored);

        Ok(new_version)
    }

    async fn lock(&self, document_id: Uuid, ttl: Duration) -> Result<LockToken, StoreError> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();

        // Expired locks are stolen, not honored
        if let Some(existing) = locks.get(&document_id) {
            if existing.expires_at > now {
                return Err(StoreError::Busy(document_id));
            }
        }

        let token = LockToken {
            document_id,
            token: Uuid::new_v4(),
            expires_at: now + ttl,
        };
        locks.insert(document_id, token.clone());
        Ok(token)
    }

    async fn unlock(&self, token: &LockToken) -> Result<(), StoreError> {
        let mut locks = self.locks.write().await;
        match locks.get(&token.document_id) {
            Some(held) if held.token == token.token => {
                locks.remove(&token.document_id);
                Ok(())
            }
            _ => Err(StoreError::StaleLock),
        }
    }
}
