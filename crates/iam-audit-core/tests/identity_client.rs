//! HTTP behaviour of the signed Identity client against a mock endpoint.

use std::time::Duration;

use iam_audit_core::FetchError;
use iam_audit_core::client::{IdentityClient, OciIdentityClient, Session};
use iam_audit_core::model::LifecycleState;
use serde_json::json;
use wiremock::matchers::{header_exists, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = include_str!("fixtures/test_key.pem");
const TENANCY: &str = "ocid1.tenancy.oc1..t";

fn session() -> Session {
    Session {
        tenancy_id: TENANCY.to_string(),
        region: "us-ashburn-1".to_string(),
        user_id: "ocid1.user.oc1..u".to_string(),
        fingerprint: "aa:bb".to_string(),
        private_key_pem: KEY.to_string(),
        key_file: None,
    }
}

async fn client(server: &MockServer) -> OciIdentityClient {
    OciIdentityClient::with_endpoint(&session(), &server.uri(), Duration::from_secs(5)).unwrap()
}

// ============================================================================
// Collections
// ============================================================================

#[tokio::test]
async fn test_list_policies_follows_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/20160918/policies"))
        .and(query_param("compartmentId", TENANCY))
        .and(query_param_is_missing("page"))
        .and(header_exists("authorization"))
        .and(header_exists("date"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("opc-next-page", "p2")
                .set_body_json(json!([{
                    "id": "ocid1.policy.oc1..a",
                    "name": "admins",
                    "compartmentId": TENANCY,
                    "statements": ["Allow group Admins to manage all-resources in tenancy"]
                }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/20160918/policies"))
        .and(query_param("page", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "ocid1.policy.oc1..b",
            "name": "auditors",
            "compartmentId": TENANCY,
            "statements": []
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let policies = client(&server).await.list_policies(TENANCY).await.unwrap();
    let names: Vec<&str> = policies.iter().map(|p| p.policy_name.as_str()).collect();
    assert_eq!(names, ["admins", "auditors"]);
    assert_eq!(policies[0].statement_texts.len(), 1);
}

#[tokio::test]
async fn test_get_compartment_maps_wire_fields() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/20160918/compartments/ocid1.compartment.oc1..prod"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ocid1.compartment.oc1..prod",
            "name": "Prod",
            "compartmentId": TENANCY,
            "lifecycleState": "DELETED",
            "description": ""
        })))
        .mount(&server)
        .await;

    let compartment = client(&server)
        .await
        .get_compartment("ocid1.compartment.oc1..prod")
        .await
        .unwrap();
    assert_eq!(compartment.parent_id.as_deref(), Some(TENANCY));
    assert_eq!(compartment.lifecycle_state, LifecycleState::Deleted);
    assert!(compartment.description.is_none());
}

#[tokio::test]
async fn test_dynamic_groups_carry_parsed_rules() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/20160918/dynamicGroups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "ocid1.dynamicgroup.oc1..fn",
            "name": "functions",
            "matchingRule": "ALL {resource.type = 'fnfunc', resource.compartment.id = 'ocid1.compartment.oc1..prod'}"
        }])))
        .mount(&server)
        .await;

    let groups = client(&server)
        .await
        .list_dynamic_groups(TENANCY)
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].domain, "Default");
    assert_eq!(groups[0].matching_rules.len(), 2);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_unauthorized_is_unauthenticated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "NotAuthenticated",
            "message": "The required information to complete authentication was not provided."
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .list_policies(TENANCY)
        .await
        .unwrap_err();
    match err {
        FetchError::Unauthenticated { message } => assert!(message.starts_with("NotAuthenticated")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_throttle_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .list_compartments(TENANCY, true)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        FetchError::Transient {
            retry_after: Some(d),
            ..
        } if d == Duration::from_secs(3)
    ));
}

#[tokio::test]
async fn test_not_found_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .get_compartment("ocid1.compartment.oc1..gone")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Rejected { status: 404, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .list_policies(TENANCY)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode { .. }));
}
