//! Approval Policy
//!
//! Amount-range approval tiers per document type. The required level is
//! looked up by grand_total at the moment an approval transition is
//! attempted, never cached, since edits before approval can change the
//! amount. A gap in the configured ranges is a configuration error
//! surfaced to the operator, not a user error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::{Actor, Role};
use crate::document::Document;
use crate::error::{EngineError, EngineResult};

/// One approval tier, keyed by the amount range [min, max)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalLevel {
    /// Inclusive lower bound of the amount range
    pub min: Decimal,
    /// Exclusive upper bound; None means unbounded (last level only)
    #[serde(default)]
    pub max: Option<Decimal>,
    /// Role that may approve at this level
    #[serde(default)]
    pub role: Option<Role>,
    /// Explicit approver identity (instead of, or as well as, a role)
    #[serde(default)]
    pub approver: Option<Uuid>,
    /// Default self-approval behavior; transitions may override
    #[serde(default)]
    pub allow_self_approval: bool,
}

impl ApprovalLevel {
    /// Whether this level's [min, max) range contains the amount
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && self.max.map(|m| amount < m).unwrap_or(true)
    }

    /// Whether the actor may approve at this level for this document
    ///
    /// True only if the actor's identity or role matches the level AND the
    /// actor is not approving their own document, unless self-approval is
    /// explicitly allowed.
    pub fn can_act(&self, actor: &Actor, doc: &Document, allow_self_approval: bool) -> bool {
        let matches_level = self.approver.map(|a| a == actor.actor_id).unwrap_or(false)
            || self.role.map(|r| actor.has_role(r)).unwrap_or(false);

        if !matches_level {
            return false;
        }

        allow_self_approval || actor.actor_id != doc.owner
    }
}

/// Approval configuration for one document type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalRules {
    /// Documents with grand_total above this require approval
    #[serde(default)]
    pub threshold: Decimal,
    /// Counterparties that force approval regardless of amount
    #[serde(default)]
    pub flagged_counterparties: Vec<String>,
    /// Approval tiers, ascending by range
    #[serde(default)]
    pub levels: Vec<ApprovalLevel>,
}

impl ApprovalRules {
    /// Whether the document needs approval at all
    pub fn requires_approval(&self, doc: &Document) -> bool {
        if doc.totals().grand_total > self.threshold {
            return true;
        }

        doc.counterparty
            .as_deref()
            .map(|c| self.flagged_counterparties.iter().any(|f| f == c))
            .unwrap_or(false)
    }

    /// First level whose range contains the amount, scanning ascending
    pub fn resolve_level(&self, amount: Decimal) -> Option<&ApprovalLevel> {
        self.levels.iter().find(|l| l.contains(amount))
    }

    /// Sort levels by range and check them for integrity
    ///
    /// Ranges must not overlap; only the last level may be unbounded; every
    /// level must name a role or an explicit approver. Gaps are permitted
    /// here and surface as a configuration error when an amount falls into
    /// one at approval time.
    pub fn validate(&mut self) -> EngineResult<()> {
        self.levels.sort_by(|a, b| a.min.cmp(&b.min));

        for (idx, level) in self.levels.iter().enumerate() {
            if level.role.is_none() && level.approver.is_none() {
                return Err(EngineError::configuration(format!(
                    "approval level {} names neither a role nor an approver",
                    idx + 1
                )));
            }

            if let Some(max) = level.max {
                if max <= level.min {
                    return Err(EngineError::configuration(format!(
                        "approval level {} has empty range [{}, {})",
                        idx + 1,
                        level.min,
                        max
                    )));
                }
            } else if idx + 1 != self.levels.len() {
                return Err(EngineError::configuration(format!(
                    "approval level {} is unbounded but not last",
                    idx + 1
                )));
            }

            if let Some(next) = self.levels.get(idx + 1) {
                // max is Some here, the unbounded check above ran first
                if level.max.map(|m| m > next.min).unwrap_or(true) {
                    return Err(EngineError::configuration(format!(
                        "approval levels {} and {} overlap",
                        idx + 1,
                        idx + 2
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_total(grand_total: Decimal) -> Document {
        let mut doc = Document::new("sales_invoice", "draft", Uuid::new_v4(), "acme", "USD");
        doc.totals.grand_total = grand_total;
        doc.totals_stale = false;
        doc
    }

    fn level(min: i64, max: Option<i64>, role: Role) -> ApprovalLevel {
        ApprovalLevel {
            min: Decimal::from(min),
            max: max.map(Decimal::from),
            role: Some(role),
            approver: None,
            allow_self_approval: false,
        }
    }

    #[test]
    fn test_requires_approval_by_threshold() {
        let rules = ApprovalRules {
            threshold: Decimal::from(500),
            ..Default::default()
        };

        assert!(rules.requires_approval(&doc_with_total(Decimal::from(715))));
        assert!(!rules.requires_approval(&doc_with_total(Decimal::from(500))));
        assert!(!rules.requires_approval(&doc_with_total(Decimal::from(100))));
    }

    #[test]
    fn test_flagged_counterparty_forces_approval() {
        let rules = ApprovalRules {
            threshold: Decimal::from(1_000_000),
            flagged_counterparties: vec!["globex".to_string()],
            ..Default::default()
        };

        let doc = doc_with_total(Decimal::from(10)).with_counterparty("globex");
        assert!(rules.requires_approval(&doc));

        let doc = doc_with_total(Decimal::from(10)).with_counterparty("initech");
        assert!(!rules.requires_approval(&doc));
    }

    #[test]
    fn test_resolve_level_scans_ascending_half_open() {
        let rules = ApprovalRules {
            levels: vec![
                level(0, Some(1000), Role::Supervisor),
                level(1000, Some(10000), Role::Manager),
                level(10000, None, Role::Director),
            ],
            ..Default::default()
        };

        assert_eq!(
            rules.resolve_level(Decimal::from(715)).unwrap().role,
            Some(Role::Supervisor)
        );
        // Upper bound is exclusive: 1000 falls into the next level
        assert_eq!(
            rules.resolve_level(Decimal::from(1000)).unwrap().role,
            Some(Role::Manager)
        );
        assert_eq!(
            rules.resolve_level(Decimal::from(250_000)).unwrap().role,
            Some(Role::Director)
        );
    }

    #[test]
    fn test_resolve_level_gap_returns_none() {
        let rules = ApprovalRules {
            levels: vec![
                level(0, Some(1000), Role::Supervisor),
                level(5000, None, Role::Director),
            ],
            ..Default::default()
        };

        assert!(rules.resolve_level(Decimal::from(2500)).is_none());
    }

    #[test]
    fn test_validate_sorts_and_rejects_overlap() {
        let mut rules = ApprovalRules {
            levels: vec![
                level(1000, None, Role::Director),
                level(0, Some(1000), Role::Supervisor),
            ],
            ..Default::default()
        };
        rules.validate().unwrap();
        assert_eq!(rules.levels[0].min, Decimal::ZERO);

        let mut overlapping = ApprovalRules {
            levels: vec![
                level(0, Some(1500), Role::Supervisor),
                level(1000, None, Role::Director),
            ],
            ..Default::default()
        };
        let err = overlapping.validate().unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_validate_rejects_unbounded_middle_level() {
        let mut rules = ApprovalRules {
            levels: vec![level(0, None, Role::Supervisor), level(1000, None, Role::Director)],
            ..Default::default()
        };
        let err = rules.validate().unwrap_err();
        assert!(err.to_string().contains("unbounded"));
    }

    #[test]
    fn test_validate_requires_role_or_approver() {
        let mut rules = ApprovalRules {
            levels: vec![ApprovalLevel {
                min: Decimal::ZERO,
                max: None,
                role: None,
                approver: None,
                allow_self_approval: false,
            }],
            ..Default::default()
        };
        let err = rules.validate().unwrap_err();
        assert!(err.to_string().contains("neither a role nor an approver"));
    }

    #[test]
    fn test_can_act_blocks_self_approval() {
        let owner = Uuid::new_v4();
        let mut doc = doc_with_total(Decimal::from(715));
        doc.owner = owner;

        let lvl = level(0, None, Role::Manager);

        let self_approver = Actor::new(owner, "owner").with_role(Role::Manager);
        assert!(!lvl.can_act(&self_approver, &doc, false));
        // Explicit override allows it
        assert!(lvl.can_act(&self_approver, &doc, true));

        let other = Actor::new(Uuid::new_v4(), "boss").with_role(Role::Manager);
        assert!(lvl.can_act(&other, &doc, false));
    }

    #[test]
    fn test_can_act_matches_identity_or_role() {
        let named = Uuid::new_v4();
        let doc = doc_with_total(Decimal::from(715));

        let lvl = ApprovalLevel {
            min: Decimal::ZERO,
            max: None,
            role: None,
            approver: Some(named),
            allow_self_approval: false,
        };

        assert!(lvl.can_act(&Actor::new(named, "named"), &doc, false));
        assert!(!lvl.can_act(
            &Actor::new(Uuid::new_v4(), "somebody").with_role(Role::Director),
            &doc,
            false
        ));
    }
}
