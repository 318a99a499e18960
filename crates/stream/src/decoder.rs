//! Line framing for `data: <json>` event streams.
//!
//! Transport chunks may split a record anywhere, including inside a
//! multi-byte UTF-8 sequence, so the decoder buffers raw bytes and only
//! decodes complete lines. The trailing partial line is kept until the
//! next chunk or until [`SseDecoder::finish`].

use crate::messages::{parse_event, StreamEvent};

/// Payload that ends normal chunk forwarding.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(StreamEvent),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental decoder for a `data:`-framed byte stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return every record it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        // The retained tail never holds a newline, so only new bytes are scanned.
        let Some(offset) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.buffer.extend_from_slice(chunk);
            return Vec::new();
        };
        let last_newline = self.buffer.len() + offset;
        self.buffer.extend_from_slice(chunk);
        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();

        complete
            .split(|&b| b == b'\n')
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    /// Flush a trailing record that was never newline-terminated.
    pub fn finish(&mut self) -> Option<Decoded> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    /// Number of `data:` records dropped as malformed so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Bytes held back waiting for the rest of a line.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Decoded> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = String::from_utf8_lossy(line);

        // Blank separators, comments and other SSE fields carry no event.
        let payload = line.strip_prefix("data:")?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            return Some(Decoded::Done);
        }

        match parse_event(payload) {
            Ok(event) => Some(Decoded::Event(event)),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, raw_line = %payload, "Skipping malformed stream record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SessionEvent;

    fn chunk(content: &str) -> Decoded {
        Decoded::Event(StreamEvent::Session(SessionEvent::Chunk {
            content: content.to_string(),
        }))
    }

    #[test]
    fn record_split_across_two_chunks_yields_one_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"chu").is_empty());
        assert!(decoder.pending_bytes() > 0);
        let decoded = decoder.push(b"nk\",\"content\":\"hi\"}\n\n");
        assert_eq!(decoded, vec![chunk("hi")]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn malformed_line_between_two_records_is_skipped() {
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push(
            b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n\
              data: {\"type\":\"chunk\",\"content\":\n\
              data: {\"type\":\"chunk\",\"content\":\"b\"}\n",
        );
        assert_eq!(decoded, vec![chunk("a"), chunk("b")]);
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        let decoded = decoder.push(
            b": keep-alive\nevent: message\nid: 4\n\ndata:{\"type\":\"chunk\",\"content\":\"x\"}\r\n",
        );
        assert_eq!(decoded, vec![chunk("x")]);
        assert_eq!(decoder.skipped(), 0);
    }

    #[test]
    fn long_record_in_small_pieces_then_next_record() {
        let content = "x".repeat(4096);
        let record = format!("data: {{\"type\":\"chunk\",\"content\":\"{content}\"}}\ndata: {{\"type\":\"chu");
        let mut decoder = SseDecoder::new();
        let mut decoded = Vec::new();
        for piece in record.as_bytes().chunks(7) {
            decoded.extend(decoder.push(piece));
        }
        assert_eq!(decoded, vec![chunk(&content)]);
        assert_eq!(decoder.pending_bytes(), "data: {\"type\":\"chu".len());

        let decoded = decoder.push(b"nk\",\"content\":\"y\"}\n");
        assert_eq!(decoded, vec![chunk("y")]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn done_sentinel_is_reported() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: [DONE]\n\n"), vec![Decoded::Done]);
    }

    #[test]
    fn utf8_split_mid_character_survives() {
        let record = "data: {\"type\":\"chunk\",\"content\":\"caf\u{e9} \u{1f600}\"}\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut decoded = Vec::new();
        // Deliver one byte at a time.
        for byte in record {
            decoded.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(decoded, vec![chunk("caf\u{e9} \u{1f600}")]);
    }

    #[test]
    fn finish_flushes_unterminated_record() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(b"data: {\"type\":\"complete\",\"result\":{}}")
            .is_empty());
        assert!(matches!(
            decoder.finish(),
            Some(Decoded::Event(StreamEvent::Session(SessionEvent::Complete { .. })))
        ));
        assert_eq!(decoder.finish(), None);
    }
}
