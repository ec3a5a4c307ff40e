//! Workflow Definition Types and YAML Loading
//!
//! Workflows are defined per document type in YAML and validated at load.
//! Validation also builds the (state, action) lookup table the machine
//! dispatches on, so the legal-transition set is explicit data rather than
//! code.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::actor::Role;
use crate::approval::ApprovalRules;
use crate::document::Document;
use crate::effects::SideEffectDef;
use crate::error::{EngineError, EngineResult};

/// A complete workflow definition for one document type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Version number
    #[serde(default = "default_version")]
    pub version: u32,
    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// State definitions
    pub states: HashMap<String, StateDef>,

    /// Valid transitions between states
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,

    /// Lookup table state -> action -> transition, built by `validate`
    #[serde(skip)]
    index: HashMap<String, HashMap<String, usize>>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Parse a definition from YAML and validate it
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        let mut def: WorkflowDefinition = serde_yaml::from_str(yaml).map_err(|e| {
            EngineError::configuration(format!("invalid workflow definition: {}", e))
        })?;
        def.validate()?;
        Ok(def)
    }

    /// Validate graph integrity and build the (state, action) lookup table
    ///
    /// Checks: every transition endpoint exists, at least one initial and
    /// one terminal state, terminal states have no outgoing transitions,
    /// and no duplicate (state, action) pair.
    pub fn validate(&mut self) -> EngineResult<()> {
        if !self.states.values().any(|s| s.initial) {
            return Err(EngineError::configuration("workflow has no initial state"));
        }
        if !self.states.values().any(|s| s.terminal) {
            return Err(EngineError::configuration("workflow has no terminal state"));
        }

        let mut index: HashMap<String, HashMap<String, usize>> = HashMap::new();

        for (pos, t) in self.transitions.iter().enumerate() {
            let from = self.states.get(&t.from).ok_or_else(|| {
                EngineError::configuration(format!(
                    "transition '{}' starts at unknown state '{}'",
                    t.action, t.from
                ))
            })?;
            if !self.states.contains_key(&t.to) {
                return Err(EngineError::configuration(format!(
                    "transition '{}' targets unknown state '{}'",
                    t.action, t.to
                )));
            }
            if from.terminal {
                return Err(EngineError::configuration(format!(
                    "terminal state '{}' has outgoing transition '{}'",
                    t.from, t.action
                )));
            }

            let duplicate = index
                .entry(t.from.clone())
                .or_default()
                .insert(t.action.clone(), pos);
            if duplicate.is_some() {
                return Err(EngineError::configuration(format!(
                    "duplicate transition for action '{}' from state '{}'",
                    t.action, t.from
                )));
            }
        }

        self.index = index;
        Ok(())
    }

    /// Get the initial state for this workflow
    pub fn initial_state(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, s)| s.initial)
            .map(|(name, _)| name.as_str())
    }

    /// Get terminal states
    pub fn terminal_states(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| s.terminal)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Look up a state definition
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.get(name)
    }

    /// Whether the named state is terminal
    pub fn is_terminal(&self, state: &str) -> bool {
        self.states.get(state).map(|s| s.terminal).unwrap_or(false)
    }

    /// Get transitions from a specific state
    pub fn transitions_from(&self, state: &str) -> Vec<&TransitionDef> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .collect()
    }

    /// Look up the transition for (state, action) in the table
    pub fn transition_for(&self, state: &str, action: &str) -> Option<&TransitionDef> {
        self.index
            .get(state)
            .and_then(|actions| actions.get(action))
            .map(|pos| &self.transitions[*pos])
    }
}

/// State definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Is this the initial state?
    #[serde(default)]
    pub initial: bool,
    /// Is this a terminal state?
    #[serde(default)]
    pub terminal: bool,
    /// Role allowed to edit the document while it rests in this state
    #[serde(default)]
    pub editable_by: Option<Role>,
    /// Side effects fired on entering this state
    #[serde(default)]
    pub on_enter: Vec<SideEffectDef>,
}

/// Transition definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Source state
    pub from: String,
    /// Target state
    pub to: String,
    /// Action name that requests this transition
    pub action: String,
    /// Roles allowed to perform the action (empty = any actor)
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Guard condition that must hold on the document
    #[serde(default)]
    pub guard: Option<GuardCondition>,
    /// Is this an approval action (runs the approval policy)?
    #[serde(default)]
    pub approval: bool,
    /// Per-transition override of the level's self-approval default
    #[serde(default)]
    pub allow_self_approval: Option<bool>,
    /// Description of this transition
    #[serde(default)]
    pub description: Option<String>,
}

/// Pure guard predicates over a document
///
/// Closed set so workflows stay data-driven without arbitrary code hooks;
/// each variant carries a description used in `GuardNotSatisfied` errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardCondition {
    /// grand_total must be > 0
    GrandTotalPositive,
    /// Document must have at least one line item
    HasLineItems,
    /// grand_total must not exceed the limit
    AmountAtMost { limit: Decimal },
    /// Document must require approval per the approval rules
    RequiresApproval,
    /// Document must not require approval per the approval rules
    ApprovalNotRequired,
    /// Document must link at least one related document
    HasLinkedDocuments,
}

impl GuardCondition {
    /// Evaluate against a document; pure, no side effects
    pub fn evaluate(&self, doc: &Document, rules: &ApprovalRules) -> bool {
        match self {
            Self::GrandTotalPositive => doc.totals().grand_total > Decimal::ZERO,
            Self::HasLineItems => !doc.line_items.is_empty(),
            Self::AmountAtMost { limit } => doc.totals().grand_total <= *limit,
            Self::RequiresApproval => rules.requires_approval(doc),
            Self::ApprovalNotRequired => !rules.requires_approval(doc),
            Self::HasLinkedDocuments => !doc.links.is_empty(),
        }
    }

    /// Human-readable description of the condition
    pub fn description(&self) -> String {
        match self {
            Self::GrandTotalPositive => "grand_total > 0".to_string(),
            Self::HasLineItems => "document has at least one line item".to_string(),
            Self::AmountAtMost { limit } => format!("grand_total <= {}", limit),
            Self::RequiresApproval => "document requires approval".to_string(),
            Self::ApprovalNotRequired => "document does not require approval".to_string(),
            Self::HasLinkedDocuments => "document links at least one related document".to_string(),
        }
    }
}
