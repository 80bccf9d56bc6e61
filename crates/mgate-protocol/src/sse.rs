use bytes::Bytes;

/// Terminal sentinel payload of an OpenAI-compatible completion stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Incremental decoder for the `data:`-only SSE framing used by
/// chat-completion streams.
///
/// Feed raw body chunks as they arrive; complete event payloads come back
/// in arrival order. `event:` fields and comment lines are ignored since
/// this framing never names events; multi-line data is joined with `\n`
/// per the SSE spec.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_payload(&mut payloads);
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            } else if line == "data" {
                self.data_lines.push(String::new());
            }
        }

        payloads
    }

    /// Drains whatever is still buffered at end-of-stream. Upstreams are
    /// not required to terminate the last event with a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            }
        }
        self.finish_payload(&mut payloads);
        payloads
    }

    fn finish_payload(&mut self, payloads: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        payloads.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

/// Encodes one payload as a downstream SSE frame.
pub fn encode_data(data: &str) -> Bytes {
    let mut out = String::with_capacity(data.len() + 16);
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_split_across_pushes() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: {\"id\":").is_empty());
        let payloads = parser.push_str("\"c1\"}\n\n");
        assert_eq!(payloads, vec![r#"{"id":"c1"}"#.to_string()]);
    }

    #[test]
    fn crlf_lines_and_comments() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str(": keep-alive\r\ndata: one\r\n\r\ndata: two\n\n");
        assert_eq!(payloads, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn done_sentinel_comes_through_as_payload() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str("data: [DONE]\n\n");
        assert_eq!(payloads, vec![DONE_PAYLOAD.to_string()]);
    }

    #[test]
    fn unterminated_trailing_event_is_drained_by_finish() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        assert_eq!(parser.finish(), vec!["tail".to_string()]);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str("data: a\ndata: b\n\n");
        assert_eq!(payloads, vec!["a\nb".to_string()]);
    }

    #[test]
    fn encode_round_trips_through_parser() {
        let frame = encode_data(r#"{"x":1}"#);
        let mut parser = SseParser::new();
        let payloads = parser.push_bytes(&frame);
        assert_eq!(payloads, vec![r#"{"x":1}"#.to_string()]);
        assert_eq!(&encode_done()[..], b"data: [DONE]\n\n");
    }
}
