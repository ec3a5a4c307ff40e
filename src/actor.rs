//! Actors and Roles
//!
//! Roles are a closed enumeration resolved once per actor per request;
//! the engine never compares role strings at runtime. `FromStr` exists
//! for the configuration boundary only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles recognized by workflow and approval configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Clerk,
    Accountant,
    Supervisor,
    Manager,
    Director,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clerk => "clerk",
            Self::Accountant => "accountant",
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
            Self::Director => "director",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clerk" => Ok(Self::Clerk),
            "accountant" => Ok(Self::Accountant),
            "supervisor" => Ok(Self::Supervisor),
            "manager" => Ok(Self::Manager),
            "director" => Ok(Self::Director),
            "system" => Ok(Self::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// An authenticated actor with their resolved role set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// Stable actor identity
    pub actor_id: Uuid,
    /// Display name (e.g. login or email)
    pub name: String,
    /// Roles held by this actor, resolved before the request
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(actor_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            actor_id,
            name: name.into(),
            roles: Vec::new(),
        }
    }

    /// Add a role
    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Check against a transition's allowed-role list (empty list = any actor)
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.is_empty() || roles.iter().any(|r| self.has_role(*r))
    }
}
