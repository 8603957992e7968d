//! Composable predicates over parsed statements and dynamic groups.
//!
//! Every field of [`PolicyFilter`] and [`DynamicGroupFilter`] is optional.
//! A `None` or blank value does not constrain anything; any other value is a
//! case-insensitive substring test against its field, and all active
//! predicates must hold. Filtering is stable: output keeps input order.
//!
//! The hierarchy predicate is the exception. Its value names a compartment
//! (by OCID or by name, case-insensitively) and keeps statements attached at
//! or below it. A value that names no known compartment matches nothing.

use serde::{Deserialize, Serialize};

use crate::index::CompartmentIndex;
use crate::model::DynamicGroup;
use crate::parser::{DynamicGroupRule, ParsedStatement};

/// Lowercased needle for an active predicate, `None` for a no-op.
fn needle(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

fn contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

// =============================================================================
// Policy Statements
// =============================================================================

/// Predicates over [`ParsedStatement`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFilter {
    /// Subject names, e.g. a group.
    pub subject: Option<String>,
    pub verb: Option<String>,
    /// Resource type, or any permission of a `{PERM, ...}` statement.
    pub resource: Option<String>,
    /// Location as written or resolved (compartment name, `any`).
    pub location: Option<String>,
    /// Compartment OCID or name; keeps its subtree.
    pub hierarchy: Option<String>,
    /// Text of the `where` clause.
    pub condition: Option<String>,
    /// Anything in the statement text.
    pub text: Option<String>,
    pub policy_name: Option<String>,
}

/// Compiled form of [`PolicyFilter`] for one index.
struct PolicyMatcher<'i> {
    subject: Option<String>,
    verb: Option<String>,
    resource: Option<String>,
    location: Option<String>,
    condition: Option<String>,
    text: Option<String>,
    policy_name: Option<String>,
    /// `Some(ids)` when a hierarchy predicate is active.
    anchors: Option<Vec<&'i str>>,
    index: &'i CompartmentIndex,
}

impl PolicyFilter {
    /// Whether no predicate is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [
            &self.subject,
            &self.verb,
            &self.resource,
            &self.location,
            &self.hierarchy,
            &self.condition,
            &self.text,
            &self.policy_name,
        ]
        .into_iter()
        .all(|v| needle(v).is_none())
    }

    /// Statements satisfying every active predicate, in input order.
    pub fn apply<'a>(
        &self,
        statements: &'a [ParsedStatement],
        index: &CompartmentIndex,
    ) -> Vec<&'a ParsedStatement> {
        let matcher = self.compile(index);
        statements.iter().filter(|s| matcher.matches(s)).collect()
    }

    /// Test a single statement.
    #[must_use]
    pub fn matches(&self, statement: &ParsedStatement, index: &CompartmentIndex) -> bool {
        self.compile(index).matches(statement)
    }

    fn compile<'i>(&self, index: &'i CompartmentIndex) -> PolicyMatcher<'i> {
        let anchors = self
            .hierarchy
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| index.resolve(h));

        PolicyMatcher {
            subject: needle(&self.subject),
            verb: needle(&self.verb),
            resource: needle(&self.resource),
            location: needle(&self.location),
            condition: needle(&self.condition),
            text: needle(&self.text),
            policy_name: needle(&self.policy_name),
            anchors,
            index,
        }
    }
}

impl PolicyMatcher<'_> {
    fn matches(&self, s: &ParsedStatement) -> bool {
        if let Some(n) = &self.subject
            && !contains(s.subject.as_deref(), n)
        {
            return false;
        }
        if let Some(n) = &self.verb
            && !contains(s.verb.as_deref(), n)
        {
            return false;
        }
        if let Some(n) = &self.resource
            && !contains(s.resource_type.as_deref(), n)
            && !s.permissions.iter().any(|p| contains(Some(p), n))
        {
            return false;
        }
        if let Some(n) = &self.location
            && !contains(s.location.as_deref(), n)
        {
            return false;
        }
        if let Some(n) = &self.condition
            && !contains(s.condition.as_deref(), n)
        {
            return false;
        }
        if let Some(n) = &self.text
            && !contains(Some(&s.raw_text), n)
        {
            return false;
        }
        if let Some(n) = &self.policy_name
            && !contains(Some(&s.policy_name), n)
        {
            return false;
        }
        if let Some(anchors) = &self.anchors
            && !anchors
                .iter()
                .any(|a| self.index.is_descendant_or_self(&s.compartment_id, a))
        {
            return false;
        }
        true
    }
}

// =============================================================================
// Dynamic Groups
// =============================================================================

/// Predicates over [`DynamicGroup`]s.
///
/// `name` and `domain` test the group itself. `rule_type` and `ocid` test its
/// parsed rules, and a single rule has to satisfy both when both are given.
/// A rule kept with a parse warning is tested on its raw text instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGroupFilter {
    pub name: Option<String>,
    pub domain: Option<String>,
    /// Attribute path or resource type of a rule, e.g. `fnfunc`.
    pub rule_type: Option<String>,
    /// OCID referenced by a rule.
    pub ocid: Option<String>,
}

impl DynamicGroupFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.name, &self.domain, &self.rule_type, &self.ocid]
            .into_iter()
            .all(|v| needle(v).is_none())
    }

    /// Groups satisfying every active predicate, in input order.
    pub fn apply<'a>(&self, groups: &'a [DynamicGroup]) -> Vec<&'a DynamicGroup> {
        let name = needle(&self.name);
        let domain = needle(&self.domain);
        let rule_type = needle(&self.rule_type);
        let ocid = needle(&self.ocid);

        // A rule that did not parse has no fields; its text stands in for them.
        let rule_matches = |rule: &DynamicGroupRule| {
            let unparsed = rule.parse_warning.is_some();
            let raw = |n: &str| unparsed && contains(Some(&rule.rule_text), n);
            rule_type.as_deref().is_none_or(|n| {
                contains(rule.rule_type.as_deref(), n)
                    || contains(rule.resource_type.as_deref(), n)
                    || raw(n)
            }) && ocid
                .as_deref()
                .is_none_or(|n| contains(rule.referenced_ocid.as_deref(), n) || raw(n))
        };
        let check_rules = rule_type.is_some() || ocid.is_some();

        groups
            .iter()
            .filter(|g| name.as_deref().is_none_or(|n| contains(Some(&g.name), n)))
            .filter(|g| domain.as_deref().is_none_or(|n| contains(Some(&g.domain), n)))
            .filter(|g| !check_rules || g.matching_rules.iter().any(rule_matches))
            .collect()
    }
}
