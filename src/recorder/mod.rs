//! Transcript recording pipeline
//!
//! The request path emits events through [`tap::ExchangeTap`] into a
//! lock-free ring buffer; [`worker::TranscriptProcessor`] drains the buffer
//! in the background, reconstructs streamed responses and persists
//! exchanges through an [`store::ExchangeStore`]. Storage latency and
//! storage failures stay on this side of the buffer.

pub mod reassembly;
pub mod ring_buffer;
pub mod store;
pub mod tap;
pub mod types;
pub mod worker;

pub use reassembly::StreamReassembler;
pub use ring_buffer::{RingBuffer, RingBufferStats};
pub use store::{
    ExchangeFilter, ExchangeOutcome, ExchangeStore, ExchangeStoreError, MemoryExchangeStore,
};
pub use tap::ExchangeTap;
pub use types::{ExchangeContext, RingBufferConfig, TranscriptEvent, TranscriptEventType};
pub use worker::TranscriptProcessor;
