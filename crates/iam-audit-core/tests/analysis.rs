//! End-to-end runs of the analysis facades against an in-memory tenancy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use iam_audit_core::analysis::{
    AnalysisOptions, DynamicGroupAnalysis, PolicyAnalysis, connect_client,
};
use iam_audit_core::cache::FileCache;
use iam_audit_core::client::{AuthMode, IdentityClient, Session, SessionProvider};
use iam_audit_core::events::{AuditEvent, EventSink};
use iam_audit_core::fetch::{FetchConfig, RetryPolicy};
use iam_audit_core::model::{Compartment, DynamicGroup, RawPolicy, ResourceKind};
use iam_audit_core::parser::parse_matching_rule;
use iam_audit_core::{AuditError, DynamicGroupFilter, FetchError, PolicyFilter};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct Tenancy {
    compartments: Vec<Compartment>,
    policies: HashMap<String, Vec<RawPolicy>>,
    groups: Vec<DynamicGroup>,
    broken_policies: Vec<String>,
}

#[async_trait]
impl IdentityClient for Tenancy {
    async fn get_compartment(&self, id: &str) -> Result<Compartment, FetchError> {
        self.compartments
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| FetchError::Rejected {
                status: 404,
                message: "NotAuthorizedOrNotFound".to_string(),
            })
    }

    async fn list_compartments(
        &self,
        parent: &str,
        _recursive: bool,
    ) -> Result<Vec<Compartment>, FetchError> {
        Ok(self
            .compartments
            .iter()
            .filter(|c| c.parent_id.as_deref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn list_policies(&self, id: &str) -> Result<Vec<RawPolicy>, FetchError> {
        if self.broken_policies.iter().any(|b| b == id) {
            return Err(FetchError::transient("HTTP 503 Service Unavailable"));
        }
        Ok(self.policies.get(id).cloned().unwrap_or_default())
    }

    async fn list_dynamic_groups(&self, _tenancy: &str) -> Result<Vec<DynamicGroup>, FetchError> {
        Ok(self.groups.clone())
    }
}

fn policy(compartment_id: &str, name: &str, statements: &[&str]) -> RawPolicy {
    RawPolicy {
        policy_id: format!("ocid1.policy.oc1..{name}"),
        policy_name: name.to_string(),
        compartment_id: compartment_id.to_string(),
        statement_texts: statements.iter().map(|s| s.to_string()).collect(),
    }
}

fn group(name: &str, rule: &str) -> DynamicGroup {
    DynamicGroup {
        name: name.to_string(),
        ocid: format!("ocid1.dynamicgroup.oc1..{name}"),
        description: String::new(),
        domain: "Default".to_string(),
        matching_rule: rule.to_string(),
        matching_rules: parse_matching_rule(rule, "Default"),
    }
}

/// acme -> Prod -> Prod-Net, acme -> Dev
fn tenancy() -> Tenancy {
    let mut policies = HashMap::new();
    policies.insert(
        "t".to_string(),
        vec![policy(
            "t",
            "tenancy-admins",
            &[
                "Allow group Administrators to manage all-resources in tenancy",
                "Allow group Auditors to inspect all-resources in tenancy",
            ],
        )],
    );
    policies.insert(
        "prod".to_string(),
        vec![policy(
            "prod",
            "prod-ops",
            &[
                "Allow group ProdOps to use instance-family in compartment Prod",
                "Allow group ProdOps to administer everything",
            ],
        )],
    );
    policies.insert(
        "net".to_string(),
        vec![policy(
            "net",
            "net-admins",
            &["Allow group NetAdmins to manage virtual-network-family in compartment Prod-Net where request.region = 'iad'"],
        )],
    );
    policies.insert(
        "dev".to_string(),
        vec![policy(
            "dev",
            "dev-users",
            &["Allow group Developers to manage all-resources in compartment Dev"],
        )],
    );

    Tenancy {
        compartments: vec![
            Compartment::new("t", "acme", None),
            Compartment::new("prod", "Prod", Some("t")),
            Compartment::new("net", "Prod-Net", Some("prod")),
            Compartment::new("dev", "Dev", Some("t")),
        ],
        policies,
        groups: vec![
            group("fn-prod", "ALL {resource.type = 'fnfunc', resource.compartment.id = 'ocid1.compartment.oc1..prod'}"),
            group("dev-hosts", "instance.compartment.id = 'ocid1.compartment.oc1..dev'"),
            group("broken", "ANY {instance.id = "),
        ],
        broken_policies: Vec::new(),
    }
}

fn options() -> AnalysisOptions {
    AnalysisOptions {
        fetch: FetchConfig {
            max_workers: 2,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
            ..FetchConfig::default()
        },
        ..AnalysisOptions::default()
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<AuditEvent>>);

impl EventSink for Recorder {
    fn emit(&self, event: &AuditEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// Policies
// ============================================================================

#[tokio::test]
async fn test_load_policies_parses_every_statement() {
    let analysis = PolicyAnalysis::new(Arc::new(tenancy()), "t", options());
    let inventory = analysis.load_policies().await.unwrap();

    assert_eq!(inventory.statements.len(), 6);
    assert_eq!(inventory.summary.compartments_loaded, 4);
    assert_eq!(inventory.summary.statements, 6);
    assert_eq!(inventory.summary.parse_warnings, 1);
    assert!(inventory.summary.is_complete());

    let admins = inventory
        .statements
        .iter()
        .find(|s| s.raw_text.starts_with("Allow group Administrators"))
        .unwrap();
    assert_eq!(admins.subject.as_deref(), Some("Administrators"));
    assert_eq!(admins.verb.as_deref(), Some("manage"));
    assert_eq!(admins.resource_type.as_deref(), Some("all-resources"));
    assert_eq!(admins.location.as_deref(), Some("acme"));
    assert!(admins.condition.is_none());

    let net = inventory
        .statements
        .iter()
        .find(|s| s.compartment_id == "net")
        .unwrap();
    assert_eq!(net.compartment_hierarchy_path, ["acme", "Prod", "Prod-Net"]);
    assert_eq!(net.condition.as_deref(), Some("request.region = 'iad'"));
}

#[tokio::test]
async fn test_hierarchy_filter_on_inventory() {
    let analysis = PolicyAnalysis::new(Arc::new(tenancy()), "t", options());
    let inventory = analysis.load_policies().await.unwrap();

    let prod = PolicyFilter {
        hierarchy: Some("prod".to_string()),
        ..Default::default()
    };
    let mut names: Vec<String> = inventory
        .rows(&prod)
        .into_iter()
        .map(|r| r.policy_name)
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(names, ["net-admins", "prod-ops"]);

    let everything = PolicyFilter {
        hierarchy: Some("acme".to_string()),
        ..Default::default()
    };
    assert_eq!(inventory.filter(&everything).len(), 6);
}

#[tokio::test]
async fn test_malformed_statement_is_reported_not_dropped() {
    let sink = Arc::new(Recorder::default());
    let options = AnalysisOptions {
        sink: sink.clone(),
        ..options()
    };
    let inventory = PolicyAnalysis::new(Arc::new(tenancy()), "t", options)
        .load_policies()
        .await
        .unwrap();

    let rows = inventory.rows(&PolicyFilter {
        text: Some("administer everything".to_string()),
        ..Default::default()
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hierarchy_path, "acme/Prod");

    let warnings = sink
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, AuditEvent::ParseWarning { .. }))
        .count();
    assert_eq!(warnings, 1);

    let loaded: Vec<AuditEvent> = sink
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, AuditEvent::PoliciesLoaded { .. }))
        .cloned()
        .collect();
    assert_eq!(
        loaded,
        [AuditEvent::PoliciesLoaded {
            compartments: 4,
            statements: 6,
            parse_warnings: 1,
            failures: 0,
        }]
    );
}

#[tokio::test]
async fn test_partial_failure_keeps_other_compartments() {
    let mut tenancy = tenancy();
    tenancy.broken_policies.push("dev".to_string());

    let inventory = PolicyAnalysis::new(Arc::new(tenancy), "t", options())
        .load_policies()
        .await
        .unwrap();

    assert_eq!(inventory.statements.len(), 5);
    assert!(!inventory.statements.iter().any(|s| s.compartment_id == "dev"));
    assert!(!inventory.summary.is_complete());

    let failure = &inventory.summary.failures[0];
    assert_eq!(failure.compartment_name, "Dev");
    assert_eq!(failure.resource_kind, ResourceKind::Policies);
    assert_eq!(failure.attempts, 2);
}

#[tokio::test]
async fn test_file_cache_serves_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(FileCache::new(dir.path()));

    let first = AnalysisOptions {
        cache: Some(cache.clone()),
        ..options()
    };
    PolicyAnalysis::new(Arc::new(tenancy()), "t", first)
        .load_policies()
        .await
        .unwrap();

    // Second run against an empty tenancy: everything below the root must
    // come from the cache.
    let mut empty = tenancy();
    empty.policies.clear();
    let mut second = options();
    second.fetch.use_cache = true;
    second.cache = Some(cache);

    let inventory = PolicyAnalysis::new(Arc::new(empty), "t", second)
        .load_policies()
        .await
        .unwrap();
    assert_eq!(inventory.statements.len(), 6);
    assert_eq!(inventory.summary.cache.hits, 8);
    assert_eq!(inventory.summary.cache.misses, 0);
}

#[tokio::test]
async fn test_unknown_root_is_fatal() {
    let err = PolicyAnalysis::new(Arc::new(tenancy()), "missing", options())
        .load_policies()
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::InvalidRoot { .. }));
}

#[test]
fn test_connect_propagates_session_failure() {
    struct Refusing;

    impl SessionProvider for Refusing {
        fn establish_session(&self, _mode: &AuthMode) -> Result<Session, AuditError> {
            Err(AuditError::auth("no credentials"))
        }
    }

    let result = PolicyAnalysis::connect(&Refusing, &AuthMode::InstancePrincipal, options());
    assert!(matches!(result, Err(AuditError::Auth { .. })));
}

struct FixedSession;

impl SessionProvider for FixedSession {
    fn establish_session(&self, _mode: &AuthMode) -> Result<Session, AuditError> {
        Ok(Session {
            tenancy_id: "ocid1.tenancy.oc1..t".to_string(),
            region: "eu-frankfurt-1".to_string(),
            user_id: "ocid1.user.oc1..u".to_string(),
            fingerprint: "aa:bb".to_string(),
            private_key_pem: include_str!("fixtures/test_key.pem").to_string(),
            key_file: None,
        })
    }
}

#[test]
fn test_connect_reports_session_through_sink() {
    let sink = Arc::new(Recorder::default());
    let options = AnalysisOptions {
        sink: sink.clone(),
        ..options()
    };
    let analysis = PolicyAnalysis::connect(&FixedSession, &AuthMode::default(), options).unwrap();
    assert_eq!(analysis.tenancy_id(), "ocid1.tenancy.oc1..t");

    let events = sink.0.lock().unwrap().clone();
    assert_eq!(
        events,
        [AuditEvent::SessionConnected {
            tenancy_id: "ocid1.tenancy.oc1..t".to_string(),
            region: "eu-frankfurt-1".to_string(),
        }]
    );
}

#[test]
fn test_one_session_serves_both_analyses() {
    let sink = Arc::new(Recorder::default());
    let options = AnalysisOptions {
        sink: sink.clone(),
        ..options()
    };
    let (client, tenancy_id) =
        connect_client(&FixedSession, &AuthMode::default(), &options.sink).unwrap();
    let policies = PolicyAnalysis::new(client.clone(), tenancy_id.clone(), options.clone());
    let groups = DynamicGroupAnalysis::new(client, tenancy_id, options);

    assert_eq!(policies.tenancy_id(), groups.tenancy_id());
    let sessions = sink
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, AuditEvent::SessionConnected { .. }))
        .count();
    assert_eq!(sessions, 1);
}

// ============================================================================
// Dynamic Groups
// ============================================================================

#[tokio::test]
async fn test_dynamic_groups_filter_and_export() {
    let sink = Arc::new(Recorder::default());
    let options = AnalysisOptions {
        sink: sink.clone(),
        ..options()
    };
    let inventory = DynamicGroupAnalysis::new(Arc::new(tenancy()), "t", options)
        .load_dynamic_groups()
        .await
        .unwrap();

    assert_eq!(inventory.groups.len(), 3);
    assert_eq!(inventory.summary.parse_warnings, 1);
    assert!(sink.0.lock().unwrap().contains(&AuditEvent::DynamicGroupsLoaded {
        groups: 3,
        parse_warnings: 1,
        failures: 0,
    }));

    let filter = DynamicGroupFilter {
        ocid: Some("compartment.oc1..prod".to_string()),
        ..Default::default()
    };
    let export = inventory.export(&filter);
    assert_eq!(export.ocid_filter.as_deref(), Some("compartment.oc1..prod"));
    assert_eq!(export.filtered_dynamic_groups.len(), 1);
    assert_eq!(export.filtered_dynamic_groups[0].name, "fn-prod");
}
