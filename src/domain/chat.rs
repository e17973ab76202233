//! Chat-completions wire types
//!
//! Deliberately lenient views of the OpenAI chat-completions stream format,
//! used when reassembling a stored transcript into a single response
//! document. Every field is optional or defaulted so that chunks from
//! backends with vendor extensions still parse; unknown fields are ignored.

use serde::Deserialize;

/// One `data:` payload of a streaming chat completion
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Usually only present on the final chunk, when the client opted in
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One choice within a stream chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: MessageDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message content carried by one chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text emitted by backends that expose chain-of-thought
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// Token accounting reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}
