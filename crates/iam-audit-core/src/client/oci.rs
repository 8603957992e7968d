//! [`IdentityClient`] over the OCI Identity REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, DATE, HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use url::Url;

use crate::error::{AuditError, FetchError};
use crate::model::{Compartment, DEFAULT_DOMAIN, DynamicGroup, LifecycleState, RawPolicy};
use crate::parser::parse_matching_rule;

use super::signer::{RequestSigner, http_date};
use super::{IdentityClient, Session};

const API_VERSION: &str = "20160918";
const PAGE_HEADER: &str = "opc-next-page";
const REQUEST_ID_HEADER: &str = "opc-request-id";
const PAGE_LIMIT: &str = "1000";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompartmentWire {
    id: String,
    name: String,
    #[serde(default)]
    compartment_id: Option<String>,
    lifecycle_state: String,
    #[serde(default)]
    description: Option<String>,
}

impl From<CompartmentWire> for Compartment {
    fn from(wire: CompartmentWire) -> Self {
        // The tenancy reports itself (or nothing) as its own parent.
        let parent_id = wire.compartment_id.filter(|p| *p != wire.id);
        Self {
            id: wire.id,
            name: wire.name,
            parent_id,
            lifecycle_state: LifecycleState::from(wire.lifecycle_state),
            description: wire.description.filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyWire {
    id: String,
    name: String,
    compartment_id: String,
    #[serde(default)]
    statements: Vec<String>,
}

impl From<PolicyWire> for RawPolicy {
    fn from(wire: PolicyWire) -> Self {
        Self {
            policy_id: wire.id,
            policy_name: wire.name,
            compartment_id: wire.compartment_id,
            statement_texts: wire.statements,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DynamicGroupWire {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    matching_rule: String,
}

impl From<DynamicGroupWire> for DynamicGroup {
    fn from(wire: DynamicGroupWire) -> Self {
        let matching_rules = parse_matching_rule(&wire.matching_rule, DEFAULT_DOMAIN);
        Self {
            name: wire.name,
            ocid: wire.id,
            description: wire.description.unwrap_or_default(),
            domain: DEFAULT_DOMAIN.to_string(),
            matching_rule: wire.matching_rule,
            matching_rules,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

// =============================================================================
// Client
// =============================================================================

/// Signed HTTP client for one region's Identity endpoint.
#[derive(Debug, Clone)]
pub struct OciIdentityClient {
    http: reqwest::Client,
    base_url: Url,
    host: String,
    signer: RequestSigner,
}

impl OciIdentityClient {
    pub fn new(session: &Session) -> Result<Self, AuditError> {
        Self::with_timeout(session, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(session: &Session, timeout: Duration) -> Result<Self, AuditError> {
        let endpoint = format!("https://identity.{}.oci.oraclecloud.com", session.region);
        Self::with_endpoint(session, &endpoint, timeout)
    }

    /// Client against an explicit endpoint, e.g. a realm-specific domain.
    pub fn with_endpoint(
        session: &Session,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, AuditError> {
        let base_url = Url::parse(endpoint.trim_end_matches('/')).map_err(|e| {
            AuditError::configuration(format!("Invalid Identity endpoint '{endpoint}': {e}"))
        })?;
        let host = match (base_url.host_str(), base_url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(AuditError::configuration(format!(
                    "Identity endpoint '{endpoint}' has no host"
                )));
            }
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("iam-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuditError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            host,
            signer: RequestSigner::from_session(session)?,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(&format!("{API_VERSION}/{path}"));
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn get(&self, url: &Url) -> Result<(String, HeaderMap), FetchError> {
        let target = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        };
        let date = http_date(OffsetDateTime::now_utc());
        let authorization = self.signer.authorization(&target, &self.host, &date);

        let resp = self
            .http
            .get(url.clone())
            .header(DATE, &date)
            .header(AUTHORIZATION, authorization)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            tracing::debug!(
                status = status.as_u16(),
                request_id = headers
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-"),
                url = %url,
                "Identity API request failed"
            );
            return Err(classify(status, &body, retry_after(&headers)));
        }
        Ok((body, headers))
    }

    async fn get_one<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let (body, _) = self.get(&url).await?;
        decode(&body)
    }

    /// Follow `opc-next-page` until the collection is exhausted.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, FetchError> {
        let mut items = Vec::new();
        let mut page: Option<String> = None;

        loop {
            let mut params = query.to_vec();
            params.push(("limit", PAGE_LIMIT));
            if let Some(token) = page.as_deref() {
                params.push(("page", token));
            }
            let url = self.url(path, &params);
            let (body, headers) = self.get(&url).await?;
            let batch: Vec<T> = decode(&body)?;
            items.extend(batch);

            page = headers
                .get(PAGE_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            if page.is_none() {
                return Ok(items);
            }
        }
    }
}

#[async_trait]
impl IdentityClient for OciIdentityClient {
    async fn get_compartment(&self, compartment_id: &str) -> Result<Compartment, FetchError> {
        let wire: CompartmentWire = self
            .get_one(self.url(&format!("compartments/{compartment_id}"), &[]))
            .await?;
        Ok(wire.into())
    }

    async fn list_compartments(
        &self,
        parent_id: &str,
        recursive: bool,
    ) -> Result<Vec<Compartment>, FetchError> {
        let mut query = vec![("compartmentId", parent_id)];
        if recursive {
            query.push(("compartmentIdInSubtree", "true"));
            query.push(("accessLevel", "ANY"));
        }
        let wires: Vec<CompartmentWire> = self.list_all("compartments", &query).await?;
        Ok(wires.into_iter().map(Compartment::from).collect())
    }

    async fn list_policies(&self, compartment_id: &str) -> Result<Vec<RawPolicy>, FetchError> {
        let wires: Vec<PolicyWire> = self
            .list_all("policies", &[("compartmentId", compartment_id)])
            .await?;
        Ok(wires.into_iter().map(RawPolicy::from).collect())
    }

    async fn list_dynamic_groups(
        &self,
        tenancy_id: &str,
    ) -> Result<Vec<DynamicGroup>, FetchError> {
        let wires: Vec<DynamicGroupWire> = self
            .list_all("dynamicGroups", &[("compartmentId", tenancy_id)])
            .await?;
        Ok(wires.into_iter().map(DynamicGroup::from).collect())
    }
}

// =============================================================================
// Response Handling
// =============================================================================

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Decode {
        message: e.to_string(),
    })
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        return FetchError::Decode {
            message: e.to_string(),
        };
    }
    // Timeouts, refused and reset connections are all worth another try.
    FetchError::transient(e.to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success response onto the retry taxonomy.
fn classify(status: StatusCode, body: &str, retry_after: Option<Duration>) -> FetchError {
    let message = match serde_json::from_str::<ServiceError>(body) {
        Ok(err) if !err.code.is_empty() => format!("{}: {}", err.code, err.message),
        _ if body.is_empty() => status.to_string(),
        _ => body.chars().take(200).collect(),
    };

    match status {
        StatusCode::UNAUTHORIZED => FetchError::Unauthenticated { message },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => FetchError::Transient {
            message,
            retry_after,
        },
        s if s.is_server_error() => FetchError::Transient {
            message,
            retry_after,
        },
        s => FetchError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    const KEY: &str = include_str!("../../tests/fixtures/test_key.pem");

    fn session() -> Session {
        Session {
            tenancy_id: "ocid1.tenancy.oc1..t".to_string(),
            region: "us-phoenix-1".to_string(),
            user_id: "ocid1.user.oc1..u".to_string(),
            fingerprint: "aa".to_string(),
            private_key_pem: KEY.to_string(),
            key_file: None,
        }
    }

    // ------------------------------------------------------------------------
    // Status classification
    // ------------------------------------------------------------------------

    #[test]
    fn test_classify_unauthorized_is_fatal() {
        let err = classify(
            StatusCode::UNAUTHORIZED,
            r#"{"code":"NotAuthenticated","message":"bad key"}"#,
            None,
        );
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Unauthenticated: NotAuthenticated: bad key");
    }

    #[test]
    fn test_classify_throttle_and_server_errors_retry() {
        let throttled = classify(
            StatusCode::TOO_MANY_REQUESTS,
            "",
            Some(Duration::from_secs(2)),
        );
        assert!(matches!(
            throttled,
            FetchError::Transient {
                retry_after: Some(d),
                ..
            } if d == Duration::from_secs(2)
        ));
        assert!(classify(StatusCode::BAD_GATEWAY, "oops", None).is_retryable());
    }

    #[test]
    fn test_classify_not_found_is_rejected() {
        let err = classify(
            StatusCode::NOT_FOUND,
            r#"{"code":"NotAuthorizedOrNotFound","message":"nope"}"#,
            None,
        );
        assert!(matches!(err, FetchError::Rejected { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }

    // ------------------------------------------------------------------------
    // Wire conversion
    // ------------------------------------------------------------------------

    #[test]
    fn test_compartment_wire_root_has_no_parent() {
        let root: CompartmentWire = serde_json::from_str(
            r#"{"id":"t","name":"acme","compartmentId":"t","lifecycleState":"ACTIVE","description":""}"#,
        )
        .unwrap();
        let root = Compartment::from(root);
        assert!(root.parent_id.is_none());
        assert!(root.description.is_none());

        let child: CompartmentWire = serde_json::from_str(
            r#"{"id":"c","name":"Prod","compartmentId":"t","lifecycleState":"INACTIVE"}"#,
        )
        .unwrap();
        let child = Compartment::from(child);
        assert_eq!(child.parent_id.as_deref(), Some("t"));
        assert_eq!(child.lifecycle_state, LifecycleState::Inactive);
    }

    #[test]
    fn test_policy_wire_keeps_statement_order() {
        let wire: PolicyWire = serde_json::from_str(
            r#"{"id":"p","name":"n","compartmentId":"c","statements":["b","a"],"timeCreated":"x"}"#,
        )
        .unwrap();
        assert_eq!(RawPolicy::from(wire).statement_texts, ["b", "a"]);
    }

    #[test]
    fn test_dynamic_group_wire_parses_rules() {
        let wire: DynamicGroupWire = serde_json::from_str(
            r#"{"id":"dg","name":"fn-dg","matchingRule":"ALL {resource.type = 'fnfunc', resource.compartment.id = 'ocid1.compartment.oc1..x'}"}"#,
        )
        .unwrap();
        let group = DynamicGroup::from(wire);
        assert_eq!(group.domain, DEFAULT_DOMAIN);
        assert_eq!(group.matching_rules.len(), 2);
        assert_eq!(
            group.matching_rules[1].referenced_ocid.as_deref(),
            Some("ocid1.compartment.oc1..x")
        );
    }

    // ------------------------------------------------------------------------
    // URLs
    // ------------------------------------------------------------------------

    #[test]
    fn test_url_building() {
        let client = OciIdentityClient::new(&session()).unwrap();
        assert_eq!(client.host, "identity.us-phoenix-1.oci.oraclecloud.com");

        let url = client.url("policies", &[("compartmentId", "ocid1.compartment.oc1..a")]);
        assert_eq!(
            url.as_str(),
            "https://identity.us-phoenix-1.oci.oraclecloud.com/20160918/policies?compartmentId=ocid1.compartment.oc1..a"
        );
    }

    #[test]
    fn test_endpoint_with_port() {
        let client =
            OciIdentityClient::with_endpoint(&session(), "http://127.0.0.1:8080/", DEFAULT_TIMEOUT)
                .unwrap();
        assert_eq!(client.host, "127.0.0.1:8080");
    }
}
