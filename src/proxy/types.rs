//! Type definitions for the proxy module

use nutype::nutype;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use crate::recorder::types::RingBufferConfig;

/// Maximum size for inbound HTTP request bodies in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct RequestSizeLimit(usize);

/// Request ID for correlating log lines with responses
#[nutype(
    derive(Clone, Copy, Debug, Display, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |id: &Uuid| id.get_version_num() == 7),
)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new RequestId with a v7 UUID
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("now_v7 always produces a v7 UUID")
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Proxy configuration
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Maximum inbound request body size in bytes
    pub max_request_size: RequestSizeLimit,
    /// Deadline for establishing the backend connection and receiving
    /// response headers
    pub connect_timeout: Duration,
    /// Deadline between consecutive backend body chunks
    pub read_timeout: Duration,
    /// How long to keep draining backend data after the client went away
    pub drain_timeout: Duration,
    /// Store client Authorization values verbatim instead of redacting them
    pub store_authorization_headers: bool,
    /// Ring buffer between the request path and the recorder
    pub ring_buffer: RingBufferConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_request_size: RequestSizeLimit::try_new(10 * 1024 * 1024).expect("10MB is valid"), // 10MB
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            drain_timeout: Duration::from_secs(5),
            store_authorization_headers: false,
            ring_buffer: RingBufferConfig::default(),
        }
    }
}

/// Errors surfaced on the forwarding path
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Proxy model '{0}' not found")]
    RouteNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request too large (max: {max_size} bytes)")]
    RequestTooLarge { max_size: RequestSizeLimit },

    #[error("Could not connect to backend {0}")]
    BackendUnreachable(String),

    #[error("Backend timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
