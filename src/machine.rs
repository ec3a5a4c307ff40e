//! Workflow State Machine
//!
//! Pure transition checks: terminal, (state, action) lookup, role
//! predicate, guard. Never mutates the document; mutation and side
//! effects belong to the executor, which keeps these checks independently
//! testable.

use serde::Serialize;

use crate::actor::{Actor, Role};
use crate::approval::ApprovalRules;
use crate::definition::{TransitionDef, WorkflowDefinition};
use crate::document::Document;
use crate::error::{EngineError, EngineResult};

/// Resolve the transition for (current state, action) and check it
///
/// Check order: the state must exist in the definition, must not be
/// terminal, the action must be defined from it, the actor must hold an
/// allowed role, and the guard (if any) must pass. Returns the matched
/// transition; the caller applies it.
pub fn apply<'a>(
    def: &'a WorkflowDefinition,
    rules: &ApprovalRules,
    doc: &Document,
    action: &str,
    actor: &Actor,
) -> EngineResult<&'a TransitionDef> {
    let state = doc.current_state.as_str();

    let state_def = def.state(state).ok_or_else(|| {
        EngineError::configuration(format!(
            "document {} is in state '{}' which is not in the '{}' workflow",
            doc.document_id, state, doc.doc_type
        ))
    })?;

    if state_def.terminal {
        return Err(EngineError::TerminalState {
            state: state.to_string(),
        });
    }

    let transition =
        def.transition_for(state, action)
            .ok_or_else(|| EngineError::InvalidTransition {
                state: state.to_string(),
                action: action.to_string(),
            })?;

    if !actor.has_any_role(&transition.roles) {
        let allowed = transition
            .roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(EngineError::Unauthorized {
            actor: actor.name.clone(),
            action: action.to_string(),
            reason: format!("requires one of roles [{}]", allowed),
        });
    }

    if let Some(guard) = &transition.guard {
        if !guard.evaluate(doc, rules) {
            return Err(EngineError::GuardNotSatisfied {
                condition: guard.description(),
            });
        }
    }

    Ok(transition)
}

/// Guard outcome for a transition preview
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum GuardStatus {
    Passed,
    Blocked { condition: String },
    NoGuard,
}

/// Evaluate a transition's guard without attempting the transition
pub fn guard_status(
    transition: &TransitionDef,
    doc: &Document,
    rules: &ApprovalRules,
) -> GuardStatus {
    match &transition.guard {
        None => GuardStatus::NoGuard,
        Some(g) if g.evaluate(doc, rules) => GuardStatus::Passed,
        Some(g) => GuardStatus::Blocked {
            condition: g.description(),
        },
    }
}

/// Whether the actor may edit a document resting in this state
pub fn can_edit(def: &WorkflowDefinition, state: &str, actor: &Actor) -> bool {
    match def.state(state).and_then(|s| s.editable_by) {
        Some(role) => actor.has_role(role),
        None => true,
    }
}
