//! Incremental SSE frame parser
//!
//! Splits a server-sent-events byte stream into data frame payloads as the
//! bytes arrive, without ever buffering the whole stream. Network chunk
//! boundaries carry no meaning here: a frame may span several chunks and a
//! chunk may carry several frames.
//!
//! The parser is an explicit state machine. It rests between frames, moves
//! to `Accumulating` once a `data:` line of the current frame has been
//! collected, emits the frame on the blank delimiter line, and enters a
//! terminal state when the `[DONE]` sentinel arrives. Everything after the
//! sentinel is ignored.

use std::str;

/// One parsed item of the SSE stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Complete data frame payload, `data:` prefixes stripped and
    /// multi-line payloads joined with `\n`
    Frame(Vec<u8>),
    /// The `data: [DONE]` sentinel
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ParserState {
    /// Between frames, nothing collected
    #[default]
    AwaitingFrame,
    /// At least one data line of the current frame collected
    Accumulating,
    /// Sentinel seen, stream over
    Done,
}

/// Incremental parser over a single SSE stream
#[derive(Debug, Default)]
pub struct SseFrameParser {
    state: ParserState,
    /// Bytes of a line whose terminator has not arrived yet
    partial_line: Vec<u8>,
    /// Data lines of the frame currently being accumulated
    data_lines: Vec<Vec<u8>>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed arriving bytes, returning every event they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.state == ParserState::Done {
            return events;
        }

        self.partial_line.extend_from_slice(bytes);
        while let Some(newline_at) = self.partial_line.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial_line.drain(..=newline_at).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line, &mut events);
            if self.state == ParserState::Done {
                self.partial_line.clear();
                break;
            }
        }
        events
    }

    /// Whether the `[DONE]` sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.state == ParserState::Done
    }

    /// Whether a frame was started but its blank delimiter never arrived
    pub fn has_unterminated_frame(&self) -> bool {
        self.state == ParserState::Accumulating || !self.partial_line.is_empty()
    }

    fn process_line(&mut self, line: &[u8], events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch_frame(events);
            return;
        }
        // Comment line, commonly used as a keep-alive
        if line[0] == b':' {
            return;
        }
        if let Some(rest) = line.strip_prefix(b"data:") {
            let payload = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(payload.to_vec());
            self.state = ParserState::Accumulating;
        }
        // Other fields (event:, id:, retry:) carry nothing we relay separately
    }

    fn dispatch_frame(&mut self, events: &mut Vec<SseEvent>) {
        if self.data_lines.is_empty() {
            // Blank line with no data collected, e.g. between keep-alives
            return;
        }
        let payload = self.data_lines.join(&b'\n');
        self.data_lines.clear();

        if is_done_sentinel(&payload) {
            self.state = ParserState::Done;
            events.push(SseEvent::Done);
        } else {
            self.state = ParserState::AwaitingFrame;
            events.push(SseEvent::Frame(payload));
        }
    }
}

fn is_done_sentinel(payload: &[u8]) -> bool {
    matches!(str::from_utf8(payload).map(str::trim), Ok("[DONE]"))
}
