//! Framing for incremental response bodies.
//!
//! Cloud APIs stream server-sent events; the self-hosted daemon streams
//! newline-delimited JSON. Both are reduced to a sequence of JSON payload
//! strings here; interpreting the payloads is left to [`crate::parse`].

const MAX_BUFFER_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Sse,
    Ndjson,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("stream buffer exceeded {MAX_BUFFER_BYTES} bytes")]
    Overflow,
    #[error("stream contained invalid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
        }
    }

    /// Feed raw bytes and return every payload completed by them.
    ///
    /// The SSE `[DONE]` marker is passed through so callers can stop early.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_BUFFER_BYTES {
            return Err(FrameError::Overflow);
        }

        let mut out = vec![];
        while let Some(frame) = self.next_frame() {
            let frame = std::str::from_utf8(&frame).map_err(|_| FrameError::InvalidUtf8)?;
            if let Some(payload) = self.payload(frame) {
                out.push(payload);
            }
        }
        Ok(out)
    }

    /// Flush whatever is left once the body ends.
    pub fn finish(&mut self) -> Result<Vec<String>, FrameError> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = std::str::from_utf8(&rest).map_err(|_| FrameError::InvalidUtf8)?;
        Ok(self.payload(rest).into_iter().collect())
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let (pos, delim_len) = match self.framing {
            Framing::Sse => find_event_boundary(&self.buffer)?,
            Framing::Ndjson => (self.buffer.iter().position(|b| *b == b'\n')?, 1),
        };
        let frame = self.buffer[..pos].to_vec();
        self.buffer.drain(..pos + delim_len);
        Some(frame)
    }

    fn payload(&self, frame: &str) -> Option<String> {
        match self.framing {
            Framing::Sse => extract_sse_data(frame),
            Framing::Ndjson => {
                let line = frame.trim();
                (!line.is_empty()).then(|| line.to_string())
            }
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }
            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found && !data.is_empty() { Some(data) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_events_split_across_chunks() {
        let mut d = FrameDecoder::new(Framing::Sse);
        assert!(d.push(b"data: {\"a\":").unwrap().is_empty());
        let out = d.push(b"1}\n\nevent: ping\n\ndata: [DONE]\n\n").unwrap();
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn sse_accepts_crlf_delimiters() {
        let mut d = FrameDecoder::new(Framing::Sse);
        let out = d.push(b"data: x\r\n\r\n").unwrap();
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn ndjson_flushes_unterminated_last_line() {
        let mut d = FrameDecoder::new(Framing::Ndjson);
        let out = d.push(b"{\"n\":1}\n\n{\"n\":").unwrap();
        assert_eq!(out, vec!["{\"n\":1}".to_string()]);
        d.push(b"2}").unwrap();
        assert_eq!(d.finish().unwrap(), vec!["{\"n\":2}".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut d = FrameDecoder::new(Framing::Ndjson);
        assert_eq!(d.push(&[0xff, b'\n']), Err(FrameError::InvalidUtf8));
    }
}
