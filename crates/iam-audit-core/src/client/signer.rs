//! HTTP request signing for the OCI REST API.
//!
//! OCI uses draft-cavage HTTP signatures with RSA-SHA256. For GET requests the
//! signed headers are `(request-target)`, `date` and `host`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::AuditError;

use super::Session;

const SIGNED_HEADERS: &str = "(request-target) date host";

/// Signs requests on behalf of one session.
#[derive(Clone)]
pub struct RequestSigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Load the session's private key. Both PKCS#8 and PKCS#1 PEM are accepted.
    pub fn from_session(session: &Session) -> Result<Self, AuditError> {
        let pem = session.private_key_pem.trim();
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| {
                let source = session
                    .key_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "session key".to_string());
                AuditError::auth(format!("Cannot decode private key from {source}: {e}"))
            })?;

        Ok(Self {
            key_id: session.key_id(),
            signing_key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Value for the `Authorization` header of a GET request.
    ///
    /// `path_and_query` is the request target exactly as sent, e.g.
    /// `/20160918/policies?compartmentId=ocid1...`.
    #[must_use]
    pub fn authorization(&self, path_and_query: &str, host: &str, date: &str) -> String {
        let signing_string = signing_string(path_and_query, host, date);
        let signature = self.signing_key.sign(signing_string.as_bytes());
        format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{SIGNED_HEADERS}\",signature=\"{}\"",
            self.key_id,
            STANDARD.encode(signature.to_bytes())
        )
    }
}

fn signing_string(path_and_query: &str, host: &str, date: &str) -> String {
    format!("(request-target): get {path_and_query}\ndate: {date}\nhost: {host}")
}

/// RFC 1123 date as required by the `date` header.
pub(crate) fn http_date(now: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    now.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}
