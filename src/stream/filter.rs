//! Incremental reasoning-tag filter.
//!
//! Local reasoning models interleave `<think>…</think>` blocks with their
//! visible answer. This filter strips those blocks from a token stream while
//! staying correct under arbitrary chunk boundaries: a marker split across
//! chunks is held back until enough bytes arrive to classify it, so no
//! reasoning text leaks and no visible text is lost.

const OPEN_MARKER: &str = "<think>";
const CLOSE_MARKER: &str = "</think>";

#[derive(Debug, Default)]
pub struct ReasoningFilter {
    buffer: String,
    inside_reasoning: bool,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside_reasoning(&self) -> bool {
        self.inside_reasoning
    }

    /// Feed one chunk; returns the visible text it releases.
    pub fn push(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let mut visible = String::new();

        loop {
            if self.inside_reasoning {
                match self.buffer.find(CLOSE_MARKER) {
                    Some(start) => {
                        self.buffer.drain(..start + CLOSE_MARKER.len());
                        self.inside_reasoning = false;
                    }
                    None => {
                        // Drop consumed reasoning text but hold back any
                        // suffix that could still grow into the close marker.
                        let held = partial_marker_len(&self.buffer, CLOSE_MARKER);
                        self.buffer.drain(..self.buffer.len() - held);
                        break;
                    }
                }
            } else {
                match self.buffer.find(OPEN_MARKER) {
                    Some(start) => {
                        visible.push_str(&self.buffer[..start]);
                        self.buffer.drain(..start + OPEN_MARKER.len());
                        self.inside_reasoning = true;
                    }
                    None => {
                        let held = partial_marker_len(&self.buffer, OPEN_MARKER);
                        let release = self.buffer.len() - held;
                        visible.push_str(&self.buffer[..release]);
                        self.buffer.drain(..release);
                        break;
                    }
                }
            }
        }

        visible
    }

    /// Flush at end of stream.
    ///
    /// A held-back partial marker that never completed is ordinary text and
    /// is released; an unterminated reasoning block is discarded.
    pub fn finish(mut self) -> String {
        if self.inside_reasoning {
            String::new()
        } else {
            std::mem::take(&mut self.buffer)
        }
    }
}

/// Length of the longest proper suffix of `buffer` that is a prefix of
/// `marker`.
fn partial_marker_len(buffer: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(buffer.len());
    for len in (1..=max).rev() {
        if buffer.is_char_boundary(buffer.len() - len)
            && marker.starts_with(&buffer[buffer.len() - len..])
        {
            return len;
        }
    }
    0
}
