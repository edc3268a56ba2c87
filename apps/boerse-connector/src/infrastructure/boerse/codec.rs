//! Event Stream Codec
//!
//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks from the HTTP body; the decoder buffers
//! partial lines and emits a [`ServerEvent`] whenever a blank line ends an
//! event block.
//!
//! # Framing
//!
//! ```text
//! event: message          (optional, defaults to "message")
//! id: 42                  (optional, sticky across events)
//! retry: 5000             (optional, digits only)
//! : comment               (ignored)
//! data: {"bid": 1.0,      (repeatable, joined with "\n")
//! data:  "ask": 1.1}
//!                         (blank line dispatches)
//! ```
//!
//! Lines may end in CRLF, LF or a lone CR. Blocks without any `data` line
//! are dropped.

use crate::domain::stream::{MESSAGE_EVENT, ServerEvent};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Stateful `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    skip_line_feed: bool,
    started: bool,
    event_type: String,
    data: Vec<String>,
    has_data: bool,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    /// Create a decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and collect every event it completes.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);

        if !self.started {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.drain(..BOM.len());
            }
            self.started = true;
        }

        let mut events = Vec::new();
        let mut consumed = 0;

        while consumed < self.buffer.len() {
            if self.skip_line_feed {
                self.skip_line_feed = false;
                if self.buffer[consumed] == b'\n' {
                    consumed += 1;
                    continue;
                }
            }

            let Some(end) = self.buffer[consumed..]
                .iter()
                .position(|&b| b == b'\n' || b == b'\r')
            else {
                break;
            };

            let line_end = consumed + end;
            self.skip_line_feed = self.buffer[line_end] == b'\r';
            let line = String::from_utf8_lossy(&self.buffer[consumed..line_end]).into_owned();
            consumed = line_end + 1;

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.buffer.drain(..consumed);
        events
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => {
                self.data.push(value.to_string());
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                self.retry = value.parse().ok();
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event_type = std::mem::take(&mut self.event_type);
        let data = std::mem::take(&mut self.data);
        if !std::mem::take(&mut self.has_data) {
            return None;
        }

        Some(ServerEvent {
            event: if event_type.is_empty() {
                MESSAGE_EVENT.to_string()
            } else {
                event_type
            },
            data: data.join("\n"),
            id: self.last_id.clone(),
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<ServerEvent> {
        SseDecoder::new().decode(input)
    }

    #[test]
    fn decodes_single_message() {
        let events = decode_all(b"data: {\"a\":1}\n\n");
        assert_eq!(events, vec![ServerEvent::message("{\"a\":1}")]);
    }

    #[test]
    fn joins_multi_line_data() {
        let events = decode_all(b"data: first\ndata:second\n\n");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn reads_event_id_and_retry() {
        let events = decode_all(b"event: quote\nid: 7\nretry: 3000\ndata: x\n\n");
        assert_eq!(events[0].event, "quote");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].retry, Some(3000));
        assert!(!events[0].is_message());
    }

    #[test]
    fn id_is_sticky_and_event_type_is_not() {
        let events = decode_all(b"event: ping\nid: 1\ndata: a\n\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].id.as_deref(), Some("1"));
    }

    #[test]
    fn ignores_comments_and_blocks_without_data() {
        let events = decode_all(b": keep-alive\n\nevent: ping\n\ndata: x\n\n");
        assert_eq!(events, vec![ServerEvent::message("x")]);
    }

    #[test]
    fn accepts_crlf_and_cr_line_endings() {
        let events = decode_all(b"data: a\r\n\r\ndata: b\r\rdata: c\n\n");
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["a", "b", "c"]);
    }

    #[test]
    fn handles_chunks_split_anywhere() {
        let input = b"\xEF\xBB\xBFdata: {\"price\":\"12,3\xE2\x82\xAC\"}\r\n\r\ndata: 2\n\n";
        for split in 0..input.len() {
            let mut decoder = SseDecoder::new();
            let mut events = decoder.decode(&input[..split]);
            events.extend(decoder.decode(&input[split..]));
            let data: Vec<_> = events.iter().map(|e| e.data.clone()).collect();
            assert_eq!(
                data,
                vec!["{\"price\":\"12,3\u{20ac}\"}".to_string(), "2".to_string()],
                "split at {split}"
            );
        }
    }

    #[test]
    fn incomplete_event_is_held_back() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: partial\n").is_empty());
        assert_eq!(decoder.decode(b"\n"), vec![ServerEvent::message("partial")]);
    }

    #[test]
    fn field_without_colon_has_empty_value() {
        let events = decode_all(b"data\n\n");
        assert_eq!(events, vec![ServerEvent::message("")]);
    }

    #[test]
    fn invalid_retry_is_ignored() {
        let events = decode_all(b"retry: soon\ndata: x\n\n");
        assert_eq!(events[0].retry, None);
    }
}
