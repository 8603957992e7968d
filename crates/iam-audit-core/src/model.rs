//! Records fetched from the Identity API.
//!
//! These are the raw inputs of an analysis run. Parsed views
//! ([`crate::parser::ParsedStatement`], [`crate::parser::DynamicGroupRule`])
//! are derived from them and never written back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::DynamicGroupRule;

/// Domain name used for dynamic groups that live outside an identity domain.
pub const DEFAULT_DOMAIN: &str = "Default";

// =============================================================================
// Compartments
// =============================================================================

/// Lifecycle state reported for a compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleState {
    Creating,
    Active,
    Inactive,
    Deleting,
    Deleted,
    Failed,
    /// A state this tool does not know about, kept verbatim.
    Unknown(String),
}

impl LifecycleState {
    /// Wire representation of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
            Self::Failed => "FAILED",
            Self::Unknown(s) => s,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<String> for LifecycleState {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "INACTIVE" => Self::Inactive,
            "DELETING" => Self::Deleting,
            "DELETED" => Self::Deleted,
            "FAILED" => Self::Failed,
            _ => Self::Unknown(s),
        }
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compartment in the tenancy tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compartment {
    /// Compartment OCID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parent compartment OCID; `None` only for the tenancy root.
    pub parent_id: Option<String>,
    pub lifecycle_state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Compartment {
    /// Create an active compartment record.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
            lifecycle_state: LifecycleState::Active,
            description: None,
        }
    }
}

// =============================================================================
// Policies
// =============================================================================

/// A policy as returned by the API, before its statements are parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPolicy {
    pub policy_id: String,
    pub policy_name: String,
    /// Compartment the policy is attached to.
    pub compartment_id: String,
    /// Statement texts in source order.
    pub statement_texts: Vec<String>,
}

// =============================================================================
// Dynamic Groups
// =============================================================================

/// A dynamic group and its parsed matching rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGroup {
    pub name: String,
    pub ocid: String,
    #[serde(default)]
    pub description: String,
    /// Identity domain the group belongs to.
    pub domain: String,
    /// The matching rule as written.
    pub matching_rule: String,
    /// One entry per clause of `matching_rule`.
    #[serde(default)]
    pub matching_rules: Vec<DynamicGroupRule>,
}

// =============================================================================
// Resource Kinds
// =============================================================================

/// The kinds of collection fetched per compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Compartments,
    Policies,
    DynamicGroups,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compartments => "compartments",
            Self::Policies => "policies",
            Self::DynamicGroups => "dynamic-groups",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_state_roundtrip_known() {
        let state = LifecycleState::from("active".to_string());
        assert_eq!(state, LifecycleState::Active);
        assert_eq!(String::from(state), "ACTIVE");
    }

    #[test]
    fn test_lifecycle_state_keeps_unknown_verbatim() {
        let state = LifecycleState::from("MIGRATING".to_string());
        assert_eq!(state, LifecycleState::Unknown("MIGRATING".to_string()));
        assert!(!state.is_active());
    }

    #[test]
    fn test_compartment_serde() {
        let c = Compartment::new("ocid1.compartment.oc1..b", "Prod", Some("ocid1.tenancy.oc1..a"));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["lifecycle_state"], "ACTIVE");
        let back: Compartment = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
