//! Exchange transcript types
//!
//! A `ProxyExchange` is the stored record of one request/response pair that
//! passed through the proxy: the request as forwarded, every response chunk
//! in arrival order, and the reconstructed response once the exchange is
//! finalized.

use crate::domain::routes::{BackendModelName, BackendUrl, ProxyModelName};
use chrono::{DateTime, Utc};
use derive_more::Display;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a recorded exchange
///
/// UUIDv7 so identifiers sort by creation time.
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |id: &Uuid| id.get_version_num() == 7),
)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Create a new ExchangeId with a v7 UUID
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("now_v7 always produces a v7 UUID")
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// Created, response still being collected
    #[display("pending")]
    Pending,
    /// Response fully relayed and reconstructed
    #[display("completed")]
    Completed,
    /// Terminated without a complete response
    #[display("failed")]
    Failed,
}

/// Why a failed exchange failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Connection to the backend could not be established
    #[display("backend-unreachable")]
    BackendUnreachable,
    /// Backend exceeded the connect or read deadline
    #[display("backend-timeout")]
    BackendTimeout,
    /// Backend responded with something the proxy could not interpret
    #[display("backend-protocol")]
    BackendProtocol,
    /// Client went away before the response finished
    #[display("client-aborted")]
    ClientAborted,
}

/// Failure details attached to a failed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// One response chunk in arrival order
///
/// For streaming exchanges each chunk is one SSE data payload (the `[DONE]`
/// sentinel is relayed to the client but never stored). For non-streaming
/// exchanges there is a single chunk holding the whole body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeChunk {
    /// Zero-based position in arrival order
    pub seq: u64,
    /// Raw payload bytes as received from the backend
    pub data: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Stored record of one proxied request/response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyExchange {
    pub id: ExchangeId,
    /// Model name the client asked for
    pub proxy_model_name: ProxyModelName,
    /// Model name actually sent to the backend
    pub backend_model_name: BackendModelName,
    pub backend_url: BackendUrl,
    /// Request body as forwarded, after model substitution
    pub request_payload: Value,
    /// Request headers as forwarded (Authorization redacted unless
    /// configured otherwise)
    pub request_headers: Vec<(String, String)>,
    pub is_streaming: bool,
    pub status: ExchangeStatus,
    /// HTTP status returned by the backend, once known
    pub status_code: Option<u16>,
    /// Backend response headers as observed, recorded at finalization
    pub response_headers: Vec<(String, String)>,
    /// Response chunks in arrival order, append-only
    pub response_chunks: Vec<ExchangeChunk>,
    /// Single response document assembled at finalization
    pub reconstructed_response: Option<Value>,
    pub failure: Option<ExchangeFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProxyExchange {
    /// Create a pending exchange with no chunks yet
    pub fn pending(
        id: ExchangeId,
        proxy_model_name: ProxyModelName,
        backend_model_name: BackendModelName,
        backend_url: BackendUrl,
        request_payload: Value,
        request_headers: Vec<(String, String)>,
        is_streaming: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            proxy_model_name,
            backend_model_name,
            backend_url,
            request_payload,
            request_headers,
            is_streaming,
            status: ExchangeStatus::Pending,
            status_code: None,
            response_headers: Vec::new(),
            response_chunks: Vec::new(),
            reconstructed_response: None,
            failure: None,
            started_at,
            completed_at: None,
        }
    }

    /// Whether the exchange has reached a terminal state
    pub fn is_finalized(&self) -> bool {
        matches!(
            self.status,
            ExchangeStatus::Completed | ExchangeStatus::Failed
        )
    }
}
