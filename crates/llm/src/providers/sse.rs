//! Incremental server-sent events decoding.
//!
//! Network chunks split frames (and UTF-8 sequences) at arbitrary points,
//! so bytes are buffered until a blank-line frame boundary is seen.

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined by `\n`
    pub data: String,
}

/// Buffers raw bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((idx, len)) = find_frame_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..idx + len).take(idx).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        parse_frame(&String::from_utf8_lossy(&rest))
    }
}

/// Earliest `\n\n` or `\r\n\r\n` and its length.
fn find_frame_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|idx| (idx, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|idx| (idx, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in raw.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: thread.message.delta\nda").is_empty());

        let frames = decoder.push(b"ta: {\"a\":1}\n\nevent: done\ndata: [DONE]\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: Some("thread.message.delta".to_string()),
                    data: "{\"a\":1}".to_string(),
                },
                SseFrame {
                    event: Some("done".to_string()),
                    data: "[DONE]".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\r\n\r\ndata: one\r\ndata: two\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let payload = "data: héllo\n\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&payload[..split]).is_empty());
        let frames = decoder.push(&payload[split..]);
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: done\ndata: [DONE]").is_empty());
        assert_eq!(decoder.finish().unwrap().data, "[DONE]");
        assert!(decoder.finish().is_none());
    }
}
