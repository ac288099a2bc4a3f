//! Incremental server-sent events decoder.
//!
//! Bytes arrive in arbitrary chunks; events are emitted once their blank-line
//! terminator has been seen. Both `\n` and `\r\n` line endings are accepted.

use agent_core::error::{AgentError, Result};

/// Largest event the decoder will hold while waiting for its terminator
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// One decoded event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Feed a chunk; returns every event completed by it
    ///
    /// Fails once the unterminated tail grows past the decoder's limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        // One byte back so a terminator split across chunks is still found
        let mut from = self.buffer.len().saturating_sub(1);
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_double_newline(&self.buffer[from..]) {
            let raw: Vec<u8> = self.buffer.drain(..from + pos + 2).collect();
            if let Some(event) = parse_event(&raw) {
                events.push(event);
            }
            from = 0;
        }

        if self.buffer.len() > self.limit {
            self.buffer.clear();
            return Err(AgentError::Delegation(format!(
                "event exceeds {} bytes without a terminator",
                self.limit
            )));
        }
        Ok(events)
    }

    /// Flush a trailing event that was not blank-line terminated
    pub fn finish(self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        parse_event(&self.buffer)
    }
}

/// Decode a complete body in one go
pub fn decode_all(body: &[u8]) -> Result<Vec<SseEvent>> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(body)?;
    events.extend(decoder.finish());
    Ok(events)
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_event(bytes: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(bytes);
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_double_newline() {
        assert_eq!(find_double_newline(b"data: x\n\nrest"), Some(7));
        assert_eq!(find_double_newline(b"data: x\n"), None);
    }

    #[test]
    fn test_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").unwrap().is_empty());
        let events = decoder.push(b" 1}\n\ndata: two\n\n").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\": 1}");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn test_crlf_and_multiline_data() {
        let events = decode_all(b"event: message\r\ndata: one\r\ndata: two\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn test_comments_and_dataless_events_skipped() {
        let events = decode_all(b": keep-alive\n\nevent: ping\n\ndata: last").unwrap();
        assert_eq!(events, vec![SseEvent { event: None, data: "last".into() }]);
    }

    #[test]
    fn test_terminator_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: one\r\n").unwrap().is_empty());
        assert!(decoder.push(b"\r").unwrap().is_empty());
        let events = decoder.push(b"\ndata: two\n").unwrap();
        assert_eq!(events, vec![SseEvent { event: None, data: "one".into() }]);
        let events = decoder.push(b"\n").unwrap();
        assert_eq!(events[0].data, "two");
    }

    #[test]
    fn test_unterminated_event_is_capped() {
        let mut decoder = SseDecoder::with_limit(64);
        let events = decoder.push(b"data: small\n\n").unwrap();
        assert_eq!(events.len(), 1);

        let filler = vec![b'x'; 40];
        decoder.push(b"data: ").unwrap();
        decoder.push(&filler).unwrap();
        let err = decoder.push(&filler).unwrap_err();
        assert!(matches!(err, AgentError::Delegation(ref m) if m.contains("64 bytes")));
    }

    #[test]
    fn test_many_small_chunks_keep_buffer_bounded() {
        let mut decoder = SseDecoder::with_limit(32);
        let mut seen = 0;
        for _ in 0..1000 {
            seen += decoder.push(b"data: tick\n\n").unwrap().len();
        }
        assert_eq!(seen, 1000);
    }
}
