/// End-of-stream marker used by OpenAI-compatible streaming responses.
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental decoder for `text/event-stream` bodies.
///
/// Feed raw body bytes with [`push`](Self::push) and drain complete events
/// with [`next_event`](Self::next_event). Multi-line `data:` fields are
/// joined with newlines per the SSE specification; comment lines and
/// non-data fields are ignored. Events arriving split across chunk
/// boundaries are reassembled.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

/// One decoded event: the event name (if any) and the joined data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire. CRLF framing is normalized to LF;
    /// invalid UTF-8 is replaced, which only affects payload content that
    /// would fail JSON parsing anyway.
    pub fn push(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        if text.contains('\r') {
            self.buffer.push_str(&text.replace("\r\n", "\n"));
        } else {
            self.buffer.push_str(&text);
        }
    }

    /// Pop the next complete event, or `None` if more bytes are needed.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            // An event ends at a blank line.
            let boundary = self.buffer.find("\n\n")?;
            let raw: String = self.buffer.drain(..boundary + 2).collect();

            let mut event_name = None;
            let mut data_lines = Vec::new();
            for line in raw.lines() {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if line.starts_with(':') {
                    continue; // keepalive comment
                }
                if let Some(value) = line.strip_prefix("event:") {
                    event_name = Some(value.trim_start().to_owned());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data_lines.push(value.strip_prefix(' ').unwrap_or(value).to_owned());
                }
            }

            if data_lines.is_empty() {
                // Comment-only block (keepalive); keep scanning.
                continue;
            }
            return Some(SseEvent {
                event: event_name,
                data: data_lines.join("\n"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"x\":1}\n\n");
        let event = decoder.next_event().unwrap();
        assert_eq!(event.data, "{\"x\":1}");
        assert!(event.event.is_none());
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn reassembles_split_events() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"con");
        assert!(decoder.next_event().is_none());
        decoder.push(b"tent\":\"hi\"}\n\ndata: ");
        assert_eq!(decoder.next_event().unwrap().data, "{\"content\":\"hi\"}");
        assert!(decoder.next_event().is_none());
        decoder.push(b"[DONE]\n\n");
        assert_eq!(decoder.next_event().unwrap().data, DONE_MARKER);
    }

    #[test]
    fn skips_keepalive_comments() {
        let mut decoder = SseDecoder::new();
        decoder.push(b": ping\n\ndata: one\n\n");
        assert_eq!(decoder.next_event().unwrap().data, "one");
    }

    #[test]
    fn captures_event_name() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        let event = decoder.next_event().unwrap();
        assert_eq!(event.event.as_deref(), Some("message_start"));
    }

    #[test]
    fn joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(decoder.next_event().unwrap().data, "line1\nline2");
    }

    #[test]
    fn handles_crlf_framing() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: x\r\n\r\n");
        assert_eq!(decoder.next_event().unwrap().data, "x");
    }

    #[test]
    fn multiple_events_in_one_push() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: a\n\ndata: b\n\ndata: c\n\n");
        assert_eq!(decoder.next_event().unwrap().data, "a");
        assert_eq!(decoder.next_event().unwrap().data, "b");
        assert_eq!(decoder.next_event().unwrap().data, "c");
        assert!(decoder.next_event().is_none());
    }
}
