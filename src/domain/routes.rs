//! Routing table entry types
//!
//! A `BackendRoute` maps a client-visible logical model name to the concrete
//! backend that serves it. Routes are managed through the `RouteStore`
//! interface and read by the resolver through an immutable snapshot.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Client-visible logical model name used to select a route
///
/// Limited to 256 characters. Allows the characters seen in real model
/// identifiers (`gpt-4o`, `claude-3.5`, `org/model:tag`). Lookup is
/// exact-match and case-sensitive.
#[nutype(
    validate(
        not_empty,
        len_char_max = 256,
        regex = r"^[a-zA-Z0-9][a-zA-Z0-9:._/-]*$"
    ),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct ProxyModelName(String);

/// Absolute HTTP(S) endpoint of a backend
///
/// A URL that already carries a path (for example
/// `https://api.example.com/v1/chat/completions`) is used as-is; a bare
/// origin has the inbound request path appended at resolution time.
#[nutype(
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct BackendUrl(String);

/// Model identifier sent to the backend in place of the proxy model name
#[nutype(
    validate(not_empty, len_char_max = 256),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct BackendModelName(String);

/// Secret credential for a backend
///
/// The plaintext value is only ever written into the outbound Authorization
/// header. Debug output renders a SHA-256 fingerprint so keys cannot leak
/// through logs or error messages.
#[nutype(
    validate(not_empty),
    derive(Clone, PartialEq, Eq, Deserialize, Serialize, AsRef)
)]
pub struct BackendKey(String);

impl BackendKey {
    /// Short hex fingerprint of the key for logs and Debug output
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.as_ref().as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendKey(sha256:{})", self.fingerprint())
    }
}

/// One entry of the routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRoute {
    pub proxy_model_name: ProxyModelName,
    pub backend_url: BackendUrl,
    pub backend_model_name: BackendModelName,
    /// Credential sent as `Authorization: Bearer <key>`; when absent, the
    /// client's own Authorization header is passed through instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_api_key: Option<BackendKey>,
    /// Skip TLS certificate verification for this backend
    #[serde(default)]
    pub ignore_tls_verify: bool,
}
