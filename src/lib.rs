//! Tapwire - a recording reverse proxy for OpenAI-compatible chat APIs
//!
//! Clients call one stable endpoint with a logical model name; the proxy
//! resolves it against a routing table, forwards the call to the matched
//! backend and relays the response, streamed or buffered. Every exchange
//! is captured off the request path and persisted as a queryable
//! transcript.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod proxy;
pub mod recorder;
pub mod routing;

pub use application::Application;
pub use error::{Error, Result};
