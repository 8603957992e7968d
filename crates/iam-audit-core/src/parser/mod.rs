//! Policy statement and dynamic-group rule parsing.
//!
//! Statements are semi-structured English. This module turns them into typed
//! records with a small tokenizer and recursive-descent parser:
//!
//! ```text
//! statement  = allow / endorse / admit / define
//! grant      = ("allow" / "endorse" / "admit") subjects ["of" "tenancy" name]
//!              "to" action "in" location ["where" condition]
//! define     = "define" ("tenancy" / "group" / "dynamic-group") name "as" ocid
//! subjects   = subject ("," subject)*
//! subject    = "any-user" / "any-group"
//!            / ("group" / "dynamic-group" / "service") ["id"] name
//! action     = verb resource-type / "{" permission ("," permission)* "}"
//! location   = "tenancy" [name] / "any-tenancy" / "compartment" ["id"] name
//! ```
//!
//! Keywords are case-insensitive. The `where` clause is kept verbatim.
//!
//! # Best effort
//!
//! Parsing never aborts a run. [`parse_statement`] returns a tagged result,
//! and the failure side still carries every field recognised before the
//! problem ([`ParseFailure::partial`]). [`ParsedStatement::from_policy`]
//! folds both sides into one record with an optional `parse_warning`, so a
//! malformed statement is reported rather than dropped.
//!
//! # Example
//!
//! ```
//! use iam_audit_core::index::CompartmentIndex;
//! use iam_audit_core::model::Compartment;
//! use iam_audit_core::parser::parse_statement;
//!
//! let index = CompartmentIndex::build("t", vec![Compartment::new("t", "acme", None)]).unwrap();
//! let fields = parse_statement("Allow group Admins to manage all-resources in tenancy", &index)
//!     .unwrap();
//!
//! assert_eq!(fields.subject().as_deref(), Some("Admins"));
//! assert_eq!(fields.verb.as_deref(), Some("manage"));
//! assert_eq!(fields.location.as_deref(), Some("acme"));
//! assert!(fields.condition.is_none());
//! ```

mod rule;
mod statement;
pub(crate) mod tokenizer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::index::CompartmentIndex;
use crate::model::RawPolicy;

pub use rule::{DynamicGroupRule, parse_matching_rule};
pub use statement::parse_statement;

// =============================================================================
// Errors
// =============================================================================

/// Why a statement or rule could not be fully parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum ParseError {
    #[error("Empty statement")]
    Empty,

    /// The statement does not start with allow/endorse/admit/define.
    #[error("Unknown statement keyword '{keyword}'")]
    UnknownStatement { keyword: String },

    /// The verb is not one of inspect/read/use/manage.
    #[error("Unknown verb '{verb}'")]
    UnknownVerb { verb: String },

    /// The subject clause does not name a group, dynamic group or user set.
    #[error("Unknown subject type '{subject}'")]
    UnknownSubject { subject: String },

    #[error("Expected {expected} at offset {offset}, found {found}")]
    Expected {
        expected: String,
        found: String,
        offset: usize,
    },

    #[error("Unterminated quoted name starting at offset {offset}")]
    UnterminatedQuote { offset: usize },

    #[error("Unexpected {found} at offset {offset}")]
    TrailingInput { found: String, offset: usize },
}

/// A failed parse together with whatever was recognised before the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub error: ParseError,
    pub partial: StatementFields,
}

// =============================================================================
// Statement Vocabulary
// =============================================================================

/// Leading keyword of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Allow,
    Endorse,
    Admit,
    Define,
}

impl StatementKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Endorse => "endorse",
            Self::Admit => "admit",
            Self::Define => "define",
        }
    }
}

impl FromStr for StatementKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "endorse" => Ok(Self::Endorse),
            "admit" => Ok(Self::Admit),
            "define" => Ok(Self::Define),
            _ => Err(ParseError::UnknownStatement {
                keyword: s.to_string(),
            }),
        }
    }
}

/// The fixed verb vocabulary, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Inspect,
    Read,
    Use,
    Manage,
}

impl Verb {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Read => "read",
            Self::Use => "use",
            Self::Manage => "manage",
        }
    }
}

impl FromStr for Verb {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inspect" => Ok(Self::Inspect),
            "read" => Ok(Self::Read),
            "use" => Ok(Self::Use),
            "manage" => Ok(Self::Manage),
            _ => Err(ParseError::UnknownVerb {
                verb: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subject clause names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubjectKind {
    Group,
    DynamicGroup,
    Service,
    AnyUser,
    AnyGroup,
    /// Alias target of a `define tenancy` statement.
    Tenancy,
}

/// One entry of a subject clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    /// Group name, OCID (when `by_id`), or the keyword for any-user/any-group.
    pub name: String,
    /// Written as `group id <ocid>`.
    #[serde(default)]
    pub by_id: bool,
}

// =============================================================================
// Parsed Fields
// =============================================================================

/// Fields recognised in one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementFields {
    pub kind: Option<StatementKind>,
    pub subjects: Vec<Subject>,
    /// `of tenancy <name>` on admit statements.
    pub subject_tenancy: Option<String>,
    /// Canonical verb, or the raw token when it is not in the vocabulary.
    pub verb: Option<String>,
    /// Permission names for the `{PERM_A, PERM_B}` form.
    pub permissions: Vec<String>,
    pub resource_type: Option<String>,
    /// Compartment name, the root name for `tenancy`, or `any`.
    pub location: Option<String>,
    /// Text after `where`, verbatim. `Some("")` when the clause is empty.
    pub condition: Option<String>,
    /// Target OCID of a `define` statement.
    pub defined_ocid: Option<String>,
}

impl StatementFields {
    /// Subject names joined with `", "`.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        if self.subjects.is_empty() {
            return None;
        }
        Some(
            self.subjects
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

// =============================================================================
// Parsed Statement
// =============================================================================

/// A policy statement located in the compartment tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub policy_name: String,
    pub policy_id: String,
    pub compartment_id: String,
    pub compartment_name: String,
    /// Compartment names from the root down to the policy's compartment.
    pub compartment_hierarchy_path: Vec<String>,
    pub raw_text: String,
    pub kind: Option<StatementKind>,
    pub subjects: Vec<Subject>,
    pub subject: Option<String>,
    pub subject_tenancy: Option<String>,
    pub verb: Option<String>,
    pub permissions: Vec<String>,
    pub resource_type: Option<String>,
    pub location: Option<String>,
    pub condition: Option<String>,
    pub defined_ocid: Option<String>,
    pub parse_warning: Option<ParseError>,
}

impl ParsedStatement {
    /// Parse every statement of a policy, preserving source order.
    #[must_use]
    pub fn from_policy(policy: &RawPolicy, index: &CompartmentIndex) -> Vec<Self> {
        let compartment_name = index
            .name_of(&policy.compartment_id)
            .unwrap_or_default()
            .to_string();
        let path = index
            .path_of(&policy.compartment_id)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        policy
            .statement_texts
            .iter()
            .map(|text| {
                let (fields, parse_warning) = match parse_statement(text, index) {
                    Ok(fields) => (fields, None),
                    Err(ParseFailure { error, partial }) => (partial, Some(error)),
                };
                Self {
                    policy_name: policy.policy_name.clone(),
                    policy_id: policy.policy_id.clone(),
                    compartment_id: policy.compartment_id.clone(),
                    compartment_name: compartment_name.clone(),
                    compartment_hierarchy_path: path.clone(),
                    raw_text: text.clone(),
                    subject: fields.subject(),
                    kind: fields.kind,
                    subjects: fields.subjects,
                    subject_tenancy: fields.subject_tenancy,
                    verb: fields.verb,
                    permissions: fields.permissions,
                    resource_type: fields.resource_type,
                    location: fields.location,
                    condition: fields.condition,
                    defined_ocid: fields.defined_ocid,
                    parse_warning,
                }
            })
            .collect()
    }

    /// The verb as a vocabulary member, if it is one.
    #[must_use]
    pub fn verb_kind(&self) -> Option<Verb> {
        self.verb.as_deref().and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn has_warning(&self) -> bool {
        self.parse_warning.is_some()
    }

    /// Hierarchy path rendered as `root/child/leaf`.
    #[must_use]
    pub fn hierarchy_display(&self) -> String {
        self.compartment_hierarchy_path.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Compartment;

    fn index() -> CompartmentIndex {
        CompartmentIndex::build(
            "t",
            vec![
                Compartment::new("t", "acme", None),
                Compartment::new("p", "Prod", Some("t")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_verb_from_str_ignores_case() {
        assert_eq!("MANAGE".parse::<Verb>().unwrap(), Verb::Manage);
        assert!(Verb::Inspect < Verb::Manage);
        assert_eq!(
            "own".parse::<Verb>(),
            Err(ParseError::UnknownVerb {
                verb: "own".to_string()
            })
        );
    }

    #[test]
    fn test_from_policy_keeps_order_and_location() {
        let policy = RawPolicy {
            policy_id: "ocid1.policy.oc1..x".to_string(),
            policy_name: "prod-admins".to_string(),
            compartment_id: "p".to_string(),
            statement_texts: vec![
                "Allow group Admins to manage all-resources in compartment Prod".to_string(),
                "Allow group Ops to read logs in compartment Prod".to_string(),
            ],
        };

        let statements = ParsedStatement::from_policy(&policy, &index());
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].subject.as_deref(), Some("Admins"));
        assert_eq!(statements[1].subject.as_deref(), Some("Ops"));
        assert_eq!(statements[1].compartment_name, "Prod");
        assert_eq!(statements[1].compartment_hierarchy_path, ["acme", "Prod"]);
        assert_eq!(statements[1].hierarchy_display(), "acme/Prod");
        assert!(!statements[0].has_warning());
    }

    #[test]
    fn test_from_policy_retains_malformed_statement() {
        let policy = RawPolicy {
            policy_id: "ocid1.policy.oc1..y".to_string(),
            policy_name: "broken".to_string(),
            compartment_id: "t".to_string(),
            statement_texts: vec![
                "Allow group Admins to own all-resources in tenancy".to_string(),
                "Permit everyone everything".to_string(),
            ],
        };

        let statements = ParsedStatement::from_policy(&policy, &index());
        assert_eq!(statements.len(), 2);

        let unknown_verb = &statements[0];
        assert_eq!(unknown_verb.verb.as_deref(), Some("own"));
        assert_eq!(unknown_verb.resource_type.as_deref(), Some("all-resources"));
        assert_eq!(unknown_verb.location.as_deref(), Some("acme"));
        assert!(unknown_verb.verb_kind().is_none());
        assert!(matches!(
            unknown_verb.parse_warning,
            Some(ParseError::UnknownVerb { .. })
        ));

        let garbage = &statements[1];
        assert!(garbage.subject.is_none());
        assert!(garbage.verb.is_none());
        assert!(matches!(
            garbage.parse_warning,
            Some(ParseError::UnknownStatement { .. })
        ));
    }

    #[test]
    fn test_parse_error_serializes_with_code() {
        let json = serde_json::to_value(ParseError::UnknownVerb {
            verb: "own".to_string(),
        })
        .unwrap();
        assert_eq!(json["code"], "unknown-verb");
        assert_eq!(json["verb"], "own");
    }
}
