//! Line-buffered SSE reader shared by the streaming adapters.
//!
//! Accumulates network chunks and yields complete `data:`/`event:` lines;
//! partial lines stay buffered until their terminator arrives.

/// One parsed SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `data: <payload>`
    Data(String),
    /// `event: <name>`
    Event(String),
}

#[derive(Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every complete line they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(end) = self.buffer.find('\n') {
            let line = self.buffer[..end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=end);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data: ") {
                lines.push(SseLine::Data(data.trim().to_string()));
            } else if let Some(data) = line.strip_prefix("data:") {
                lines.push(SseLine::Data(data.trim().to_string()));
            } else if let Some(event) = line.strip_prefix("event: ") {
                lines.push(SseLine::Event(event.trim().to_string()));
            } else if let Some(event) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(event.trim().to_string()));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_lines_parse() {
        let mut buf = SseLineBuffer::new();
        let lines = buf.push(b"data: {\"a\":1}\n\ndata: [DONE]\n");
        assert_eq!(
            lines,
            vec![
                SseLine::Data("{\"a\":1}".into()),
                SseLine::Data("[DONE]".into())
            ]
        );
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push(b"data: {\"par").is_empty());
        let lines = buf.push(b"tial\":true}\n");
        assert_eq!(lines, vec![SseLine::Data("{\"partial\":true}".into())]);
    }

    #[test]
    fn crlf_stripped() {
        let mut buf = SseLineBuffer::new();
        let lines = buf.push(b"data: x\r\n");
        assert_eq!(lines, vec![SseLine::Data("x".into())]);
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let mut buf = SseLineBuffer::new();
        let lines = buf.push(b": keep-alive\n\ndata: y\n");
        assert_eq!(lines, vec![SseLine::Data("y".into())]);
    }

    #[test]
    fn event_lines_parse() {
        let mut buf = SseLineBuffer::new();
        let lines = buf.push(b"event: message_stop\ndata: {}\n");
        assert_eq!(
            lines,
            vec![
                SseLine::Event("message_stop".into()),
                SseLine::Data("{}".into())
            ]
        );
    }
}
