//! Incremental server-sent events parser.

/// One dispatched SSE message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none()
    }
}

/// Accepts raw body chunks and yields complete frames.
///
/// Lines end in `\n`, `\r\n` or a bare `\r`. Chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence or between `\r` and `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    buffer: String,
    current: SseFrame,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and return the frames it completed.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                // Invalid bytes will never become valid; keep the stream going.
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return self.push(&text);
            }
        };
        let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
        self.pending.drain(..valid);
        self.push(&text)
    }

    /// Feed a text chunk and return the frames it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(line) = self.next_line() {
            let line = line.as_str();

            if line.is_empty() {
                if !self.current.is_empty() {
                    frames.push(std::mem::take(&mut self.current));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => self.current.event = Some(value.to_string()),
                "data" => {
                    if !self.current.data.is_empty() {
                        self.current.data.push('\n');
                    }
                    self.current.data.push_str(value);
                }
                "id" => self.current.id = Some(value.to_string()),
                _ => {}
            }
        }

        frames
    }

    /// Take the next complete line off the buffer, without its terminator.
    ///
    /// A trailing `\r` is held back until the next chunk shows whether a
    /// `\n` follows it.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.find(['\r', '\n'])?;
        let end = if self.buffer.as_bytes()[pos] == b'\r' {
            match self.buffer.as_bytes().get(pos + 1) {
                Some(b'\n') => pos + 2,
                Some(_) => pos + 1,
                None => return None,
            }
        } else {
            pos + 1
        };
        let line = self.buffer[..pos].to_string();
        self.buffer.drain(..end);
        Some(line)
    }

    /// Flush a trailing frame when the body ends without a blank line.
    #[must_use]
    pub fn finish(mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&rest);
        }
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
            let mut frames = self.push("");
            if let Some(frame) = frames.pop() {
                return Some(frame);
            }
        }
        if self.current.is_empty() {
            None
        } else {
            Some(self.current)
        }
    }
}
