//! Markdown-link aware text delta buffering.
//!
//! Deltas arrive a few characters at a time, so a link would otherwise be
//! rendered while half written. From an opening `[` onwards, text is held
//! back until a later delta contains `)` or a space, then released in one
//! piece. This is a heuristic, not a markdown parser.

/// Held text is released unconditionally past this size.
pub const MAX_HELD_BYTES: usize = 256;

#[derive(Debug, Default)]
pub struct LinkBuffer {
    held: String,
}

impl LinkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns the text to forward now, if any.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        if delta.is_empty() {
            return None;
        }

        let holding = !self.held.is_empty();
        self.held.push_str(delta);

        if holding && !closes_link(delta) {
            if self.held.len() > MAX_HELD_BYTES {
                return self.flush();
            }
            return None;
        }

        let mut text = std::mem::take(&mut self.held);
        if let Some(start) = open_link_start(&text) {
            self.held = text.split_off(start);
            if self.held.len() > MAX_HELD_BYTES {
                text.push_str(&std::mem::take(&mut self.held));
            }
        }

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Release anything still held, e.g. at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.held.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.held))
        }
    }

    pub fn is_holding(&self) -> bool {
        !self.held.is_empty()
    }
}

fn closes_link(text: &str) -> bool {
    text.contains(')') || text.contains(' ')
}

/// Byte offset of a trailing `[` whose link has not been closed yet.
fn open_link_start(text: &str) -> Option<usize> {
    let start = text.rfind('[')?;
    if closes_link(&text[start..]) {
        None
    } else {
        Some(start)
    }
}
