//! Docflow - Document Lifecycle Engine
//!
//! Business documents (invoices, orders, notes) move through YAML-defined
//! state graphs. Every change of state flows through one call chain:
//! Recalculate Totals -> State Machine -> Approval Policy -> Atomic Save ->
//! Side Effects -> Audit.
//!
//! Amounts are exact decimals; totals are computed fields that only the
//! calculator writes. Approval routing picks a tier by amount range and
//! refuses self-approval unless a transition explicitly allows it. Storage,
//! sinks, and audit are async traits with in-memory implementations for
//! embedding and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docflow::{
//!     Actor, ConfigLoader, EffectDispatcher, MemoryAuditSink, MemoryDocumentStore,
//!     MemoryLedgerSink, MemoryLinkedDocumentSink, MemoryNotificationSink, Role,
//!     SnapshotProvider, TransitionExecutor,
//! };
//!
//! # async fn run() -> Result<(), docflow::EngineError> {
//! let snapshot = ConfigLoader::load_from_dir(std::path::Path::new("config/doc_types"))?;
//! let provider = Arc::new(SnapshotProvider::new(snapshot));
//!
//! let executor = TransitionExecutor::new(
//!     Arc::new(MemoryDocumentStore::new()),
//!     provider,
//!     EffectDispatcher::new(
//!         Arc::new(MemoryLedgerSink::new()),
//!         Arc::new(MemoryLinkedDocumentSink::new()),
//!         Arc::new(MemoryNotificationSink::new()),
//!     ),
//!     Arc::new(MemoryAuditSink::new()),
//! );
//!
//! let actor = Actor::new(uuid::Uuid::new_v4(), "pat").with_role(Role::Clerk);
//! let document_id = uuid::Uuid::new_v4();
//! let receipt = executor
//!     .execute(document_id, "submit_for_approval", &actor, None)
//!     .await?;
//! println!("now in {}", receipt.to_state);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Domain model
pub mod actor;
pub mod document;

// Amount calculation
pub mod calculator;

// Workflow definitions and the pure state machine
pub mod definition;
pub mod machine;

// Approval policy
pub mod approval;

// Configuration loading and snapshots
pub mod config;

// Persistence, audit, and side effect sinks
pub mod audit;
pub mod sinks;
pub mod store;

// Post-commit side effect queue and worker
pub mod effects;

// Transition execution
pub mod executor;

// Public re-exports for the main call chain
pub use actor::{Actor, Role};
pub use calculator::{recalculate, CalculationPolicy};
pub use document::{Document, DocumentLink, DocumentTotals, LineItem, StateChange};
pub use error::{EngineError, EngineResult, ErrorKind, ValidationError, ValidationResult};

pub use approval::{ApprovalLevel, ApprovalRules};
pub use definition::{GuardCondition, StateDef, TransitionDef, WorkflowDefinition};
pub use machine::GuardStatus;

pub use config::{ConfigLoader, ConfigProvider, ConfigSnapshot, DocTypeConfig, SnapshotProvider};

// Adapter traits and their in-memory implementations
pub use audit::{AuditError, AuditRecord, AuditSink, MemoryAuditSink};
pub use sinks::{
    LedgerEntry, LedgerSink, LinkedDocumentSink, MemoryLedgerSink, MemoryLinkedDocumentSink,
    MemoryNotificationSink, Notification, NotificationSink, SinkError,
};
pub use store::{DocumentStore, LockToken, MemoryDocumentStore, StoreError};

pub use effects::{
    EffectDispatcher, EffectQueue, EffectStatus, EffectWorker, MemoryEffectQueue, PendingEffect,
    QueueError, SideEffectDef,
};
pub use executor::{
    AvailableTransition, DocumentStatus, EffectOutcome, EffectReport, TransitionExecutor,
    TransitionReceipt,
};
