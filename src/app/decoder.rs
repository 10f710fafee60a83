//! Incremental decoder for the line-oriented event stream
//!
//! The scoring service answers with `event:` / `data:` lines grouped into
//! frames terminated by a blank line. Chunks arrive at arbitrary byte
//! boundaries, so the decoder buffers raw bytes and only splits on newline
//! bytes it has actually received. A multi-byte UTF-8 sequence split across
//! two chunks is therefore never decoded half-way.
//!
//! # Examples
//!
//! ```rust
//! use evalstream::app::{EventKind, FrameDecoder};
//!
//! let mut decoder = FrameDecoder::new();
//! assert!(decoder.feed(b"data: {\"id\":\"a\"").is_empty());
//!
//! let events = decoder.feed(b"}\n\nevent: end\n\n");
//! assert_eq!(events.len(), 2);
//! assert_eq!(events[0].kind, EventKind::Result);
//! assert_eq!(events[1].kind, EventKind::End);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::models::{EventKind, WireEvent};
use crate::constants::wire;

/// Counters describing what the decoder has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    /// Complete lines processed
    pub lines: u64,
    /// Events emitted
    pub events: u64,
    /// Data lines dropped because their JSON did not parse
    pub malformed_lines: u64,
    /// Frames dropped because they named an unknown event
    pub unknown_events: u64,
}

/// Event name announced by the current frame
#[derive(Debug, Clone, PartialEq)]
enum PendingKind {
    Known(EventKind),
    Unknown(String),
}

/// Stateful chunk-to-event decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received after the last newline
    buffer: Vec<u8>,
    /// Kind named by an `event:` line in the current frame
    pending_kind: Option<PendingKind>,
    /// Whether the current frame already produced an event
    frame_emitted: bool,
    /// Whether the current frame had a data line, decoded or not
    data_seen: bool,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned();
            consumed = end + 1;
            self.process_line(&line, &mut events);
        }
        self.buffer.drain(..consumed);

        events
    }

    /// Flush at end of stream
    ///
    /// A trailing fragment without its newline is treated as a final line,
    /// and a named event whose frame was never terminated still fires.
    pub fn finish(&mut self) -> Vec<WireEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.process_line(&line, &mut events);
        }
        self.end_frame(&mut events);
        events
    }

    /// Drop all partial state, e.g. before reading a new connection
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_kind = None;
        self.frame_emitted = false;
        self.data_seen = false;
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes held back waiting for a newline
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, raw: &str, events: &mut Vec<WireEvent>) {
        self.stats.lines += 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if line.trim().is_empty() {
            self.end_frame(events);
            return;
        }

        if line.starts_with(wire::COMMENT_PREFIX) {
            return;
        }

        if let Some(name) = field_value(line, wire::EVENT_PREFIX) {
            self.pending_kind = Some(match EventKind::from_event_name(name) {
                Some(kind) => PendingKind::Known(kind),
                None => PendingKind::Unknown(name.to_string()),
            });
            return;
        }

        if let Some(data) = field_value(line, wire::DATA_PREFIX) {
            self.process_data(data, events);
            return;
        }

        // `id:`, `retry:` and anything else carry nothing we use
        debug!("Ignoring stream line: {}", line);
    }

    fn process_data(&mut self, data: &str, events: &mut Vec<WireEvent>) {
        self.data_seen = true;
        let payload: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                self.stats.malformed_lines += 1;
                warn!("Dropping malformed data line ({}): {}", e, truncate(data, 120));
                return;
            }
        };

        let event = match &self.pending_kind {
            None => WireEvent::from_default_data(payload),
            Some(PendingKind::Known(kind)) => WireEvent::new(*kind, payload),
            Some(PendingKind::Unknown(name)) => {
                debug!("Dropping data for unknown event '{}'", name);
                self.frame_emitted = true;
                return;
            }
        };
        self.emit(event, events);
    }

    fn end_frame(&mut self, events: &mut Vec<WireEvent>) {
        match self.pending_kind.take() {
            Some(PendingKind::Known(kind)) if !self.frame_emitted => {
                if fires_without_body(kind, self.data_seen) {
                    self.emit(WireEvent::placeholder(kind), events);
                } else {
                    debug!("Dropped '{}' frame without a usable body", kind);
                }
            }
            Some(PendingKind::Unknown(name)) => {
                self.stats.unknown_events += 1;
                debug!("Skipped frame for unknown event '{}'", name);
            }
            _ => {}
        }
        self.frame_emitted = false;
        self.data_seen = false;
    }

    fn emit(&mut self, event: WireEvent, events: &mut Vec<WireEvent>) {
        self.frame_emitted = true;
        self.stats.events += 1;
        debug!("Decoded {} event", event.kind);
        events.push(event);
    }
}

/// Whether a named frame that produced no event still fires, with an empty
/// payload
///
/// Results need a body to be reconciled. A summary fires empty only when it
/// had no data line at all. Errors, ends and keepalives always fire.
fn fires_without_body(kind: EventKind, data_seen: bool) -> bool {
    match kind {
        EventKind::Result => false,
        EventKind::Summary => !data_seen,
        EventKind::Error | EventKind::End | EventKind::Keepalive => true,
    }
}

/// Value of a `name:` field, with the single optional leading space removed
fn field_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest).trim_end())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STREAM: &str = concat!(
        "data: {\"id\":\"a\",\"status\":\"ok\",\"score\":{\"total\":91.5}}\n\n",
        ": keep the proxy awake\n",
        "data: {\"type\":\"keepalive\"}\n\n",
        "data: {\"type\":\"result\",\"data\":{\"id\":\"b\",\"note\":\"héllo ✓\"}}\r\n\r\n",
        "data: {not json}\n\n",
        "event: summary\ndata: {\"summary\":{\"count\":2}}\n\n",
        "event: end\ndata: {}\n\n",
    );

    fn decode_whole(input: &[u8]) -> Vec<WireEvent> {
        let mut decoder = FrameDecoder::new();
        let mut events = decoder.feed(input);
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_decodes_mixed_stream() {
        let events = decode_whole(STREAM.as_bytes());
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Result,
                EventKind::Keepalive,
                EventKind::Result,
                EventKind::Summary,
                EventKind::End,
            ]
        );
        assert_eq!(events[2].payload, json!({"id": "b", "note": "héllo ✓"}));
        assert_eq!(events[3].payload, json!({"summary": {"count": 2}}));
    }

    /// Splitting the stream at every byte must not change the result
    #[test]
    fn test_byte_at_a_time_matches_one_shot() {
        let expected = decode_whole(STREAM.as_bytes());

        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in STREAM.as_bytes() {
            events.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        events.extend(decoder.finish());

        assert_eq!(events, expected);
    }

    #[test]
    fn test_every_two_way_split_matches_one_shot() {
        let bytes = STREAM.as_bytes();
        let expected = decode_whole(bytes);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut events = decoder.feed(&bytes[..split]);
            events.extend(decoder.feed(&bytes[split..]));
            events.extend(decoder.finish());
            assert_eq!(events, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_malformed_line_is_skipped_not_fatal() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"data: {\"id\":\n\ndata: {\"id\":\"ok\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["id"], "ok");
        assert_eq!(decoder.stats().malformed_lines, 1);
    }

    #[test]
    fn test_named_event_without_data_fires_placeholder() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"event: end\n\n");
        assert_eq!(events, vec![WireEvent::placeholder(EventKind::End)]);
    }

    #[test]
    fn test_named_event_with_malformed_data_still_fires() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"event: error\ndata: oops\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert_eq!(events[0].error_message(), wire::UNKNOWN_SERVER_ERROR);
    }

    #[test]
    fn test_named_result_with_malformed_data_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"event: result\ndata: {oops\n\nevent: message\n\n");
        assert!(events.is_empty());
        assert_eq!(decoder.stats().malformed_lines, 1);
        assert_eq!(decoder.stats().events, 0);

        // The following frame decodes normally
        let events = decoder.feed(b"event: result\ndata: {\"id\":\"a\"}\n\n");
        assert_eq!(events, vec![WireEvent::result(json!({"id": "a"}))]);
    }

    #[test]
    fn test_summary_placeholder_only_without_data_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"event: summary\ndata: [broken\n\n").is_empty());
        assert_eq!(
            decoder.feed(b"event: summary\n\n"),
            vec![WireEvent::placeholder(EventKind::Summary)]
        );
    }

    #[test]
    fn test_blank_line_resets_pending_kind() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"event: summary\ndata: {\"n\":1}\n\ndata: {\"id\":\"x\"}\n\n");
        assert_eq!(events[0].kind, EventKind::Summary);
        assert_eq!(events[1].kind, EventKind::Result);
    }

    #[test]
    fn test_unknown_event_frame_is_dropped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"event: progress\ndata: {\"pct\":50}\n\ndata: {\"id\":\"x\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["id"], "x");
        assert_eq!(decoder.stats().unknown_events, 1);
    }

    #[test]
    fn test_finish_flushes_unterminated_tail() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"event: end").is_empty());
        assert_eq!(decoder.buffered_len(), 10);
        assert_eq!(decoder.finish(), vec![WireEvent::placeholder(EventKind::End)]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_reset_discards_partial_state() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"event: error\ndata: {\"mess");
        decoder.reset();
        let events = decoder.feed(b"data: {\"id\":\"a\"}\n\n");
        assert_eq!(events, vec![WireEvent::result(json!({"id": "a"}))]);
    }

    #[test]
    fn test_data_without_space_after_colon() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"event:end\ndata:{}\n\n");
        assert_eq!(events, vec![WireEvent::placeholder(EventKind::End)]);
    }
}
