//! OpenAI-compatible proxy surface
//!
//! Implements the request path: resolve the proxy model name against the
//! routing table, forward to the matched backend, relay the response and
//! feed the transcript recorder on the way through.

pub mod error_response;
pub mod forwarder;
pub mod headers;
pub mod middleware;
pub mod middleware_stack;
pub mod resolver;
pub mod service;
pub mod sse;
pub mod types;

pub use forwarder::ForwardingEngine;
pub use resolver::{RequestResolver, ResolvedCall};
pub use service::ProxyService;
pub use types::{ProxyConfig, ProxyError, ProxyResult};
