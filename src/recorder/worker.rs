//! Background processor draining transcript events into the exchange store
//!
//! Single consumer of the ring buffer. Applies events to the store in
//! arrival order and keeps per-exchange reconstruction state between the
//! start of an exchange and its terminal event. Store failures are logged
//! and never propagate; the request path has already moved on.

use crate::domain::exchange::{ExchangeId, ProxyExchange};
use crate::recorder::reassembly::StreamReassembler;
use crate::recorder::ring_buffer::RingBuffer;
use crate::recorder::store::{ExchangeOutcome, ExchangeStore, ExchangeStoreError};
use crate::recorder::types::{TranscriptEvent, TranscriptEventType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-exchange reconstruction state held between events
struct InFlightExchange {
    is_streaming: bool,
    reassembler: StreamReassembler,
    raw_body: Vec<u8>,
}

impl InFlightExchange {
    fn new(is_streaming: bool) -> Self {
        Self {
            is_streaming,
            reassembler: StreamReassembler::new(),
            raw_body: Vec::new(),
        }
    }

    fn absorb(&mut self, data: &[u8]) {
        if self.is_streaming {
            self.reassembler.absorb(data);
        } else {
            self.raw_body.extend_from_slice(data);
        }
    }

    fn reconstruct(self) -> Option<Value> {
        if self.is_streaming {
            Some(self.reassembler.finish())
        } else {
            serde_json::from_slice(&self.raw_body).ok()
        }
    }
}

/// Accumulator for one fragmented event
#[derive(Default)]
struct FragmentBuffer {
    next_seq: u32,
    bytes: Vec<u8>,
}

/// Transcript processor that reads from the ring buffer
pub struct TranscriptProcessor {
    ring_buffer: Arc<RingBuffer>,
    store: Arc<dyn ExchangeStore>,
    in_flight: HashMap<ExchangeId, InFlightExchange>,
    fragments: HashMap<ExchangeId, FragmentBuffer>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl TranscriptProcessor {
    /// Create a new transcript processor
    pub fn new(
        ring_buffer: Arc<RingBuffer>,
        store: Arc<dyn ExchangeStore>,
    ) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = Self {
            ring_buffer,
            store,
            in_flight: HashMap::new(),
            fragments: HashMap::new(),
            shutdown_rx,
        };

        (processor, shutdown_tx)
    }

    /// Run the transcript processor
    pub async fn run(mut self) {
        info!("Transcript processor started");

        loop {
            // Check for shutdown signal
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Transcript processor shutting down");
                break;
            }

            if self.process_next_event().await {
                continue;
            }
            // No events available, sleep briefly
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }

        info!("Transcript processor stopped");
    }

    /// Process the next event from the ring buffer
    ///
    /// Returns whether an event was consumed. Store errors are logged here
    /// and never stop the loop.
    async fn process_next_event(&mut self) -> bool {
        let Some((exchange_id, data)) = self.ring_buffer.read() else {
            return false;
        };

        debug!(%exchange_id, "Processing transcript event");
        match serde_json::from_slice::<TranscriptEvent>(&data) {
            Ok(event) => {
                if let Some(event) = self.reassemble(event) {
                    self.handle_event(event).await;
                }
            }
            Err(e) => warn!(%exchange_id, error = %e, "Failed to deserialize transcript event"),
        }
        true
    }

    /// Pass whole events through; buffer fragment pieces until the last
    /// one arrives and the original event parses back out
    fn reassemble(&mut self, event: TranscriptEvent) -> Option<TranscriptEvent> {
        let exchange_id = event.exchange_id;
        let TranscriptEventType::Fragment { seq, last, data } = event.event_type else {
            return Some(event);
        };

        let buffer = self.fragments.entry(exchange_id).or_default();
        if seq == 0 {
            buffer.next_seq = 0;
            buffer.bytes.clear();
        }
        if seq != buffer.next_seq {
            // A piece was lost to buffer overflow; the event cannot be
            // restored
            warn!(%exchange_id, seq, expected = buffer.next_seq, "Dropping fragmented event with missing piece");
            self.fragments.remove(&exchange_id);
            return None;
        }
        buffer.next_seq += 1;
        buffer.bytes.extend_from_slice(&data);

        if !last {
            return None;
        }
        let assembled = self.fragments.remove(&exchange_id)?;
        match serde_json::from_slice(&assembled.bytes) {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(%exchange_id, error = %e, "Reassembled event did not parse; dropping");
                None
            }
        }
    }

    async fn handle_event(&mut self, event: TranscriptEvent) {
        let exchange_id = event.exchange_id;

        match event.event_type {
            TranscriptEventType::Started { context } => {
                self.in_flight
                    .insert(exchange_id, InFlightExchange::new(context.is_streaming));

                let pending = ProxyExchange::pending(
                    exchange_id,
                    context.proxy_model_name,
                    context.backend_model_name,
                    context.backend_url,
                    context.request_payload,
                    context.request_headers,
                    context.is_streaming,
                    event.timestamp,
                );
                if let Err(e) = self.store.create_exchange(pending).await {
                    error!(%exchange_id, error = %e, "Failed to create exchange record");
                }
            }
            TranscriptEventType::Chunk { data } => {
                match self.in_flight.get_mut(&exchange_id) {
                    Some(state) => state.absorb(&data),
                    None => warn!(
                        %exchange_id,
                        "Chunk for unknown exchange; earlier events may have been dropped"
                    ),
                }
                if let Err(e) = self
                    .store
                    .append_chunk(exchange_id, data, event.timestamp)
                    .await
                {
                    error!(%exchange_id, error = %e, "Failed to append chunk");
                }
            }
            TranscriptEventType::Completed {
                status_code,
                response_headers,
            } => {
                let reconstructed = match self.in_flight.remove(&exchange_id) {
                    Some(state) => {
                        let reconstructed = state.reconstruct();
                        if reconstructed.is_none() {
                            warn!(
                                %exchange_id,
                                "Completed exchange body did not parse; stored without reconstruction"
                            );
                        }
                        reconstructed
                    }
                    None => {
                        warn!(
                            %exchange_id,
                            "Completion for unknown exchange; earlier events may have been dropped"
                        );
                        None
                    }
                };

                self.finalize(
                    exchange_id,
                    ExchangeOutcome::Completed {
                        status_code,
                        response_headers,
                        reconstructed_response: reconstructed,
                        completed_at: event.timestamp,
                    },
                )
                .await;
            }
            TranscriptEventType::Failed {
                kind,
                detail,
                status_code,
                response_headers,
            } => {
                self.in_flight.remove(&exchange_id);
                self.finalize(
                    exchange_id,
                    ExchangeOutcome::Failed {
                        kind,
                        detail,
                        status_code,
                        response_headers,
                        completed_at: event.timestamp,
                    },
                )
                .await;
            }
            // Fragments never reach here; reassemble() consumed them
            TranscriptEventType::Fragment { .. } => {
                warn!(%exchange_id, "Unexpected nested fragment event; dropping");
            }
        }
    }

    async fn finalize(&self, exchange_id: ExchangeId, outcome: ExchangeOutcome) {
        match self.store.finalize(exchange_id, outcome).await {
            Ok(()) => {}
            Err(ExchangeStoreError::AlreadyFinalized(_)) => {
                error!(%exchange_id, "Duplicate finalize rejected: exchange already finalized");
            }
            Err(e) => error!(%exchange_id, error = %e, "Failed to finalize exchange"),
        }
    }
}
