/// Splits a byte stream into newline-terminated lines.
///
/// Bytes after the last newline stay buffered until more input arrives, so a
/// JSON message split across reads is only surfaced once it is complete.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, without the
    /// trailing `\n` / `\r\n`. Blank lines are skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Encode a serializable message as one line of JSON.
pub fn encode_line<T: serde::Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut encoded = serde_json::to_vec(message)?;
    encoded.push(b'\n');
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reassembles_lines_split_across_reads() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(br#"{"jsonrpc":"2.0","#).is_empty());
        assert!(decoder.buffered_len() > 0);
        let lines = decoder.push(b"\"id\":1,\"result\":{}}\n{\"a\"");
        assert_eq!(lines, vec![r#"{"jsonrpc":"2.0","id":1,"result":{}}"#]);
        let lines = decoder.push(b":1}\r\n\n");
        assert_eq!(lines, vec![r#"{"a":1}"#]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn clear_discards_partial_input() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"partial\":");
        decoder.clear();
        assert_eq!(decoder.push(b"{}\n"), vec!["{}"]);
    }

    #[test]
    fn encoded_messages_end_with_newline() {
        let line = encode_line(&json!({"x": "a\nb"})).expect("encode");
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(line.last(), Some(&b'\n'));
    }
}
