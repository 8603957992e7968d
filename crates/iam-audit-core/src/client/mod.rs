//! Access to the Identity API.
//!
//! The rest of the crate only sees two seams:
//!
//! - [`SessionProvider`] turns an [`AuthMode`] into a signed-in [`Session`]
//! - [`IdentityClient`] lists compartments, policies and dynamic groups
//!
//! [`OciConfigProvider`] and [`OciIdentityClient`] are the production
//! implementations; tests substitute their own.

mod config_file;
mod oci;
mod signer;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AuditError, FetchError};
use crate::model::{Compartment, DynamicGroup, RawPolicy};

pub use config_file::{OciConfigFile, OciConfigProvider, OciProfile};
pub use oci::OciIdentityClient;
pub use signer::RequestSigner;

// =============================================================================
// Sessions
// =============================================================================

/// How credentials are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// A named profile from the OCI config file.
    Profile(String),
    /// The instance principal of the host the tool runs on.
    InstancePrincipal,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::Profile(config_file::DEFAULT_PROFILE.to_string())
    }
}

/// Credentials for signing Identity API requests.
#[derive(Clone)]
pub struct Session {
    pub tenancy_id: String,
    pub region: String,
    pub user_id: String,
    pub fingerprint: String,
    /// PEM-encoded RSA private key.
    pub private_key_pem: String,
    /// Where the key was read from, for error messages.
    pub key_file: Option<PathBuf>,
}

impl Session {
    /// `keyId` value of the signature header.
    #[must_use]
    pub fn key_id(&self) -> String {
        format!("{}/{}/{}", self.tenancy_id, self.user_id, self.fingerprint)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tenancy_id", &self.tenancy_id)
            .field("region", &self.region)
            .field("user_id", &self.user_id)
            .field("fingerprint", &self.fingerprint)
            .field("private_key_pem", &"<redacted>")
            .field("key_file", &self.key_file)
            .finish()
    }
}

/// Establishes sessions. Failure here is fatal for the run.
pub trait SessionProvider: Send + Sync {
    fn establish_session(&self, mode: &AuthMode) -> Result<Session, AuditError>;
}

// =============================================================================
// Identity API
// =============================================================================

/// Read-only view of the Identity API.
///
/// Every method returns the complete collection (pagination is the
/// implementation's concern) in the order the service reports it.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Fetch one compartment; used for the tenancy root.
    async fn get_compartment(&self, compartment_id: &str) -> Result<Compartment, FetchError>;

    /// Children of `parent_id`, or its whole subtree when `recursive`.
    async fn list_compartments(
        &self,
        parent_id: &str,
        recursive: bool,
    ) -> Result<Vec<Compartment>, FetchError>;

    async fn list_policies(&self, compartment_id: &str) -> Result<Vec<RawPolicy>, FetchError>;

    async fn list_dynamic_groups(&self, tenancy_id: &str)
    -> Result<Vec<DynamicGroup>, FetchError>;
}

/// Shared client handle.
pub type DynClient = Arc<dyn IdentityClient>;
