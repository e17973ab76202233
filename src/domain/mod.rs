//! Domain types for Tapwire
//!
//! This module contains the core domain types of the proxy: routing table
//! entries, recorded exchanges, and the chat-completions wire views used
//! to reconstruct streamed responses.

pub mod chat;
pub mod exchange;
pub mod routes;

pub use exchange::*;
pub use routes::*;
