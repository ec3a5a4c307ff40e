//! Transition Executor
//!
//! Drives a document through one transition end to end: lock, load,
//! recalculate, check the state machine and approval policy, persist, then
//! side effects and audit. Everything before the save mutates nothing and
//! is safe to retry; after the save the state change stands and any
//! effect or audit failure is reported in the receipt instead of rolled
//! back.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::audit::{AuditRecord, AuditSink};
use crate::calculator;
use crate::config::{ConfigProvider, ConfigSnapshot, DocTypeConfig};
use crate::definition::TransitionDef;
use crate::document::{Document, StateChange};
use crate::effects::{EffectDispatcher, EffectQueue, PendingEffect, SideEffectDef};
use crate::error::{EngineError, EngineResult};
use crate::machine::{self, GuardStatus};
use crate::store::DocumentStore;

/// How long a transition may hold a document lock
const LOCK_TTL_SECS: i64 = 30;

/// Executes transitions against a document store
pub struct TransitionExecutor {
    store: Arc<dyn DocumentStore>,
    config: Arc<dyn ConfigProvider>,
    dispatcher: EffectDispatcher,
    audit: Arc<dyn AuditSink>,
    queue: Option<Arc<dyn EffectQueue>>,
}

impl TransitionExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: Arc<dyn ConfigProvider>,
        dispatcher: EffectDispatcher,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            config,
            dispatcher,
            audit,
            queue: None,
        }
    }

    /// Enqueue post-commit effects for a worker instead of dispatching inline
    pub fn with_effect_queue(mut self, queue: Arc<dyn EffectQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Execute one transition
    ///
    /// Validation failures return the error with the document untouched. A
    /// failure after the save is reported through the receipt; the new
    /// state is never rolled back.
    pub async fn execute(
        &self,
        document_id: Uuid,
        action: &str,
        actor: &Actor,
        comment: Option<String>,
    ) -> EngineResult<TransitionReceipt> {
        debug!(%document_id, %action, actor = %actor.name, "Transition requested");

        let snapshot = self.config.snapshot().await;

        let token = self
            .store
            .lock(document_id, chrono::Duration::seconds(LOCK_TTL_SECS))
            .await?;

        let result = self
            .execute_locked(&snapshot, document_id, action, actor, comment)
            .await;

        // The lock is released on every path, including validation failures
        if let Err(e) = self.store.unlock(&token).await {
            warn!(%document_id, error = %e, "Failed to release document lock");
        }

        result
    }

    async fn execute_locked(
        &self,
        snapshot: &ConfigSnapshot,
        document_id: Uuid,
        action: &str,
        actor: &Actor,
        comment: Option<String>,
    ) -> EngineResult<TransitionReceipt> {
        let mut doc = self.store.load(document_id).await?;
        let config = snapshot.doc_type(&doc.doc_type)?;

        // Totals feed guards and approval routing, so a stale document is
        // recomputed before any decision is made on it
        if doc.totals_stale {
            calculator::recalculate(&mut doc, &config.calculation)?;
        }

        let transition = machine::apply(&config.workflow, &config.approval, &doc, action, actor)?;

        if transition.approval {
            self.check_approval(config, &doc, transition, actor)?;
        }

        let from_state = doc.current_state.clone();
        let expected_version = doc.version;
        doc.transition_to(
            transition.to.clone(),
            action,
            actor.actor_id,
            comment.clone(),
        );

        // Commit point
        let new_version = self.store.save_atomic(&doc, expected_version).await?;
        doc.version = new_version;

        info!(
            %document_id,
            %action,
            from = %from_state,
            to = %doc.current_state,
            version = new_version,
            "Transition committed"
        );

        let on_enter = config
            .workflow
            .state(&doc.current_state)
            .map(|s| s.on_enter.clone())
            .unwrap_or_default();

        let effects = self.run_effects(&on_enter, &doc, actor, &comment).await;
        let audit_id = self.append_audit(&doc, &from_state, action, actor, comment).await;

        Ok(TransitionReceipt {
            document_id,
            from_state,
            to_state: doc.current_state.clone(),
            action: action.to_string(),
            new_version,
            audit_id,
            effects,
        })
    }

    /// Resolve the approval level for the document amount and check the actor
    fn check_approval(
        &self,
        config: &DocTypeConfig,
        doc: &Document,
        transition: &TransitionDef,
        actor: &Actor,
    ) -> EngineResult<()> {
        let amount = doc.totals().grand_total;
        let level = config.approval.resolve_level(amount).ok_or_else(|| {
            EngineError::configuration(format!(
                "no approval level covers amount {} for document type '{}'",
                amount, config.doc_type
            ))
        })?;

        let allow_self = transition
            .allow_self_approval
            .unwrap_or(level.allow_self_approval);

        if !level.can_act(actor, doc, allow_self) {
            // With self-approval forced on, can_act reduces to the
            // identity/role match, telling the two refusals apart
            let reason = if level.can_act(actor, doc, true) {
                "self-approval is not allowed for this transition".to_string()
            } else {
                match level.role {
                    Some(role) => format!("approval for this amount requires role {role}"),
                    None => "approval for this amount requires a designated approver".to_string(),
                }
            };

            return Err(EngineError::Unauthorized {
                actor: actor.name.clone(),
                action: transition.action.clone(),
                reason,
            });
        }

        Ok(())
    }

    async fn run_effects(
        &self,
        on_enter: &[SideEffectDef],
        doc: &Document,
        actor: &Actor,
        comment: &Option<String>,
    ) -> Vec<EffectReport> {
        let mut reports = Vec::with_capacity(on_enter.len());

        for &effect in on_enter {
            let outcome = if let Some(queue) = &self.queue {
                let pending =
                    PendingEffect::new(doc.document_id, effect, actor.actor_id, comment.clone());
                let effect_id = pending.effect_id;
                match queue.enqueue(pending).await {
                    Ok(()) => EffectOutcome::Queued { effect_id },
                    Err(e) => {
                        error!(
                            document_id = %doc.document_id,
                            effect = %effect,
                            error = %e,
                            "Failed to enqueue side effect"
                        );
                        EffectOutcome::Failed {
                            detail: e.to_string(),
                        }
                    }
                }
            } else {
                match self
                    .dispatcher
                    .dispatch(doc, actor.actor_id, comment.clone(), effect)
                    .await
                {
                    Ok(()) => EffectOutcome::Dispatched,
                    Err(e) => {
                        warn!(
                            document_id = %doc.document_id,
                            effect = %effect,
                            error = %e,
                            "Side effect failed"
                        );
                        EffectOutcome::Failed {
                            detail: e.to_string(),
                        }
                    }
                }
            };

            reports.push(EffectReport { effect, outcome });
        }

        reports
    }

    async fn append_audit(
        &self,
        doc: &Document,
        from_state: &str,
        action: &str,
        actor: &Actor,
        comment: Option<String>,
    ) -> Option<Uuid> {
        let record = AuditRecord::new(doc, from_state, action, actor.actor_id, comment);
        let audit_id = record.audit_id;

        match self.audit.append(record).await {
            Ok(()) => Some(audit_id),
            Err(e) => {
                error!(
                    document_id = %doc.document_id,
                    error = %e,
                    "Failed to append audit record"
                );
                None
            }
        }
    }

    /// Read-only view of a document and what the actor could do next
    ///
    /// Guards are evaluated against the totals as persisted; a document
    /// with stale totals may preview differently than it executes, since
    /// execution recomputes first.
    pub async fn status(&self, document_id: Uuid, actor: &Actor) -> EngineResult<DocumentStatus> {
        let snapshot = self.config.snapshot().await;
        let doc = self.store.load(document_id).await?;
        let config = snapshot.doc_type(&doc.doc_type)?;
        let def = &config.workflow;

        let state_def = def.state(&doc.current_state);

        let available_transitions = def
            .transitions_from(&doc.current_state)
            .into_iter()
            .map(|t| AvailableTransition {
                action: t.action.clone(),
                to_state: t.to.clone(),
                description: t.description.clone(),
                allowed_for_actor: actor.has_any_role(&t.roles),
                requires_approval: t.approval,
                guard_status: machine::guard_status(t, &doc, &config.approval),
            })
            .collect();

        Ok(DocumentStatus {
            document_id: doc.document_id,
            doc_type: doc.doc_type.clone(),
            current_state: doc.current_state.clone(),
            state_description: state_def.map(|s| s.description.clone()),
            is_terminal: state_def.map(|s| s.terminal).unwrap_or(false),
            editable: machine::can_edit(def, &doc.current_state, actor),
            totals_stale: doc.totals_stale,
            version: doc.version,
            available_transitions,
            history: doc.history.clone(),
        })
    }
}

/// What happened during one executed transition
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReceipt {
    pub document_id: Uuid,
    pub from_state: String,
    pub to_state: String,
    pub action: String,
    pub new_version: u64,
    /// None when the audit append failed after the commit
    pub audit_id: Option<Uuid>,
    pub effects: Vec<EffectReport>,
}

impl TransitionReceipt {
    /// True when the state change committed but something after it did not
    ///
    /// Queued effects are deferred by design and do not make a receipt
    /// partial.
    pub fn is_partial(&self) -> bool {
        self.audit_id.is_none()
            || self
                .effects
                .iter()
                .any(|e| matches!(e.outcome, EffectOutcome::Failed { .. }))
    }
}

/// Outcome of one post-commit side effect
#[derive(Debug, Clone, Serialize)]
pub struct EffectReport {
    pub effect: SideEffectDef,
    pub outcome: EffectOutcome,
}

/// How a side effect left the executor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EffectOutcome {
    /// Dispatched inline, sink accepted it
    Dispatched,
    /// Recorded for the effect worker
    Queued { effect_id: Uuid },
    /// Inline dispatch or enqueue failed; candidate for re-drive
    Failed { detail: String },
}

/// Read-only document status for callers and UIs
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub document_id: Uuid,
    pub doc_type: String,
    pub current_state: String,
    pub state_description: Option<String>,
    pub is_terminal: bool,
    /// Whether this actor may edit the document in its current state
    pub editable: bool,
    pub totals_stale: bool,
    pub version: u64,
    pub available_transitions: Vec<AvailableTransition>,
    pub history: Vec<StateChange>,
}

/// One transition the current state offers, annotated for the asking actor
#[derive(Debug, Clone, Serialize)]
pub struct AvailableTransition {
    pub action: String,
    pub to_state: String,
    pub description: Option<String>,
    pub allowed_for_actor: bool,
    pub requires_approval: bool,
    pub guard_status: GuardStatus,
}
