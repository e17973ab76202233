//! Reconstruction of streamed responses
//!
//! Folds the stored SSE frame payloads of one exchange back into a single
//! chat-completion document, the response a non-streaming call would have
//! returned. Deterministic over the same chunk sequence.
//!
//! Merge rules: `content` and `reasoning_content` fragments concatenate in
//! arrival order; the first frame carrying a role sets the role; the last
//! non-null `finish_reason` wins; usage numbers are copied from the frame
//! that carries them; `id`, `model`, `created` and `system_fingerprint`
//! come from the first frame carrying each.

use crate::domain::chat::{StreamChunk, Usage};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Accumulates stream chunks into one reconstructed response
#[derive(Debug, Default)]
pub struct StreamReassembler {
    id: Option<String>,
    created: Option<i64>,
    model: Option<String>,
    system_fingerprint: Option<String>,
    role: Option<String>,
    content: String,
    reasoning_content: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    skipped_frames: u64,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one frame payload
    ///
    /// Payloads that do not parse as a chunk are counted and skipped; they
    /// stay available verbatim in the stored chunk sequence.
    pub fn absorb(&mut self, payload: &[u8]) {
        let chunk: StreamChunk = match serde_json::from_slice(payload) {
            Ok(chunk) => chunk,
            Err(error) => {
                self.skipped_frames += 1;
                debug!(%error, "Skipping unparseable frame during reconstruction");
                return;
            }
        };

        if self.id.is_none() {
            self.id = chunk.id;
        }
        if self.created.is_none() {
            self.created = chunk.created;
        }
        if self.model.is_none() {
            self.model = chunk.model;
        }
        if self.system_fingerprint.is_none() {
            self.system_fingerprint = chunk.system_fingerprint;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        if let Some(choice) = chunk.choices.iter().find(|c| c.index == 0) {
            if self.role.is_none() {
                self.role = choice.delta.role.clone();
            }
            if let Some(ref content) = choice.delta.content {
                self.content.push_str(content);
            }
            if let Some(ref reasoning) = choice.delta.reasoning_content {
                self.reasoning_content.push_str(reasoning);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason.clone();
            }
        }
    }

    /// Number of payloads that failed to parse
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Build the reconstructed chat-completion document
    pub fn finish(self) -> Value {
        let mut message = Map::new();
        message.insert(
            "role".to_string(),
            json!(self.role.unwrap_or_else(|| "assistant".to_string())),
        );
        message.insert("content".to_string(), json!(self.content));
        if !self.reasoning_content.is_empty() {
            message.insert("reasoning_content".to_string(), json!(self.reasoning_content));
        }

        let mut root = Map::new();
        if let Some(id) = self.id {
            root.insert("id".to_string(), json!(id));
        }
        root.insert("object".to_string(), json!("chat.completion"));
        if let Some(created) = self.created {
            root.insert("created".to_string(), json!(created));
        }
        if let Some(model) = self.model {
            root.insert("model".to_string(), json!(model));
        }
        if let Some(fingerprint) = self.system_fingerprint {
            root.insert("system_fingerprint".to_string(), json!(fingerprint));
        }
        root.insert(
            "choices".to_string(),
            json!([{
                "index": 0,
                "message": Value::Object(message),
                "finish_reason": self.finish_reason,
            }]),
        );
        if let Some(usage) = self.usage {
            root.insert(
                "usage".to_string(),
                json!({
                    "prompt_tokens": usage.prompt_tokens,
                    "completion_tokens": usage.completion_tokens,
                    "total_tokens": usage.total_tokens,
                }),
            );
        }

        Value::Object(root)
    }
}
