//! Flat rows and JSON export documents.
//!
//! Rows are what the CLI prints. Export documents wrap the rows with a
//! `save-date` and the filter values that produced them, and are written to
//! files named after the tenancy:
//!
//! - `policyoutput-<tenancy>.json`
//! - `dynamicgroupoutput-<tenancy>.json`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuditError;
use crate::filter::{DynamicGroupFilter, PolicyFilter};
use crate::model::DynamicGroup;
use crate::parser::ParsedStatement;

// =============================================================================
// Rows
// =============================================================================

/// One policy statement as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRow {
    #[serde(rename = "policy-name")]
    pub policy_name: String,
    #[serde(rename = "policy-ocid")]
    pub policy_ocid: String,
    #[serde(rename = "policy-compartment")]
    pub compartment_name: String,
    /// Hierarchy path as `root/child/leaf`.
    #[serde(rename = "policy-comp-hierarchy")]
    pub hierarchy_path: String,
    #[serde(rename = "policy-statement")]
    pub statement: String,
}

impl From<&ParsedStatement> for PolicyRow {
    fn from(s: &ParsedStatement) -> Self {
        Self {
            policy_name: s.policy_name.clone(),
            policy_ocid: s.policy_id.clone(),
            compartment_name: s.compartment_name.clone(),
            hierarchy_path: s.hierarchy_display(),
            statement: s.raw_text.clone(),
        }
    }
}

/// One dynamic group as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGroupRow {
    #[serde(rename = "dynamic-group-domain")]
    pub domain: String,
    #[serde(rename = "dynamic-group-name")]
    pub name: String,
    #[serde(rename = "dynamic-group-ocid")]
    pub ocid: String,
    /// The matching rule as written.
    #[serde(rename = "dynamic-group-rules")]
    pub rules: String,
}

impl From<&DynamicGroup> for DynamicGroupRow {
    fn from(g: &DynamicGroup) -> Self {
        Self {
            domain: g.domain.clone(),
            name: g.name.clone(),
            ocid: g.ocid.clone(),
            rules: g.matching_rule.clone(),
        }
    }
}

// =============================================================================
// Export Documents
// =============================================================================

/// Saved result of a policy query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyExport {
    #[serde(with = "time::serde::rfc3339")]
    pub save_date: OffsetDateTime,
    pub subject_filter: Option<String>,
    pub verb_filter: Option<String>,
    pub resource_filter: Option<String>,
    pub location_filter: Option<String>,
    pub hierarchy_filter: Option<String>,
    pub condition_filter: Option<String>,
    pub text_filter: Option<String>,
    pub policy_name_filter: Option<String>,
    pub filtered_policy_statements: Vec<PolicyRow>,
}

impl PolicyExport {
    pub fn new(filter: &PolicyFilter, rows: Vec<PolicyRow>) -> Self {
        Self {
            save_date: OffsetDateTime::now_utc(),
            subject_filter: filter.subject.clone(),
            verb_filter: filter.verb.clone(),
            resource_filter: filter.resource.clone(),
            location_filter: filter.location.clone(),
            hierarchy_filter: filter.hierarchy.clone(),
            condition_filter: filter.condition.clone(),
            text_filter: filter.text.clone(),
            policy_name_filter: filter.policy_name.clone(),
            filtered_policy_statements: rows,
        }
    }

    #[must_use]
    pub fn file_name(tenancy_id: &str) -> String {
        format!("policyoutput-{tenancy_id}.json")
    }
}

/// Saved result of a dynamic-group query. Echoes every filter that was
/// applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DynamicGroupExport {
    #[serde(with = "time::serde::rfc3339")]
    pub save_date: OffsetDateTime,
    pub domain_filter: Option<String>,
    pub name_filter: Option<String>,
    pub ocid_filter: Option<String>,
    pub type_filter: Option<String>,
    pub filtered_dynamic_groups: Vec<DynamicGroupRow>,
}

impl DynamicGroupExport {
    pub fn new(filter: &DynamicGroupFilter, rows: Vec<DynamicGroupRow>) -> Self {
        Self {
            save_date: OffsetDateTime::now_utc(),
            domain_filter: filter.domain.clone(),
            name_filter: filter.name.clone(),
            ocid_filter: filter.ocid.clone(),
            type_filter: filter.rule_type.clone(),
            filtered_dynamic_groups: rows,
        }
    }

    #[must_use]
    pub fn file_name(tenancy_id: &str) -> String {
        format!("dynamicgroupoutput-{tenancy_id}.json")
    }
}

/// Write `document` as pretty JSON to `dir/file_name`, returning the path.
pub fn write_json<T: Serialize>(
    dir: &Path,
    file_name: &str,
    document: &T,
) -> Result<PathBuf, AuditError> {
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| AuditError::internal(format!("Failed to serialize export: {e}")))?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_matching_rule;

    #[test]
    fn test_file_names() {
        assert_eq!(
            PolicyExport::file_name("ocid1.tenancy.oc1..t"),
            "policyoutput-ocid1.tenancy.oc1..t.json"
        );
        assert_eq!(
            DynamicGroupExport::file_name("ocid1.tenancy.oc1..t"),
            "dynamicgroupoutput-ocid1.tenancy.oc1..t.json"
        );
    }

    #[test]
    fn test_policy_export_keys() {
        let filter = PolicyFilter {
            verb: Some("manage".to_string()),
            ..Default::default()
        };
        let row = PolicyRow {
            policy_name: "admins".to_string(),
            policy_ocid: "ocid1.policy.oc1..p".to_string(),
            compartment_name: "acme".to_string(),
            hierarchy_path: "acme".to_string(),
            statement: "Allow group Admins to manage all-resources in tenancy".to_string(),
        };
        let json = serde_json::to_value(PolicyExport::new(&filter, vec![row])).unwrap();

        assert!(json["save-date"].is_string());
        assert_eq!(json["verb-filter"], "manage");
        assert!(json["subject-filter"].is_null());
        let first = &json["filtered-policy-statements"][0];
        assert_eq!(first["policy-name"], "admins");
        assert_eq!(first["policy-comp-hierarchy"], "acme");
    }

    #[test]
    fn test_dynamic_group_export_echoes_all_filters() {
        let filter = DynamicGroupFilter {
            name: Some("fn".to_string()),
            domain: Some("Default".to_string()),
            rule_type: Some("fnfunc".to_string()),
            ocid: Some("ocid1.compartment".to_string()),
        };
        let rule = "resource.type = 'fnfunc'";
        let group = DynamicGroup {
            name: "fn".to_string(),
            ocid: "ocid1.dynamicgroup.oc1..fn".to_string(),
            description: String::new(),
            domain: "Default".to_string(),
            matching_rule: rule.to_string(),
            matching_rules: parse_matching_rule(rule, "Default"),
        };
        let export = DynamicGroupExport::new(&filter, vec![DynamicGroupRow::from(&group)]);
        let json = serde_json::to_value(&export).unwrap();

        assert_eq!(json["domain-filter"], "Default");
        assert_eq!(json["ocid-filter"], "ocid1.compartment");
        assert_eq!(json["type-filter"], "fnfunc");
        assert_eq!(
            json["filtered-dynamic-groups"][0]["dynamic-group-rules"],
            rule
        );
    }

    #[test]
    fn test_write_json_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let export = DynamicGroupExport::new(&DynamicGroupFilter::default(), Vec::new());

        let path = write_json(&out, &DynamicGroupExport::file_name("t"), &export).unwrap();
        let back: DynamicGroupExport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.filtered_dynamic_groups, Vec::new());
    }
}
