use memchr::memmem;

use super::DecodeEvent;

const DEFAULT_OPEN: &str = "<think>";
const DEFAULT_CLOSE: &str = "</think>";

/// Splits inline `<think>…</think>` spans out of answer tokens.
///
/// Text inside the markers is re-emitted as [`DecodeEvent::ReasoningToken`],
/// text outside as [`DecodeEvent::Token`]. Markers may be split across chunk
/// boundaries: a trailing fragment that could still grow into the awaited
/// marker is held back until the next token or the finish event.
#[derive(Debug, Clone)]
pub struct ThinkTagFilter {
    open: String,
    close: String,
    inside: bool,
    pending: String,
    visible: String,
}

impl Default for ThinkTagFilter {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN, DEFAULT_CLOSE)
    }
}

impl ThinkTagFilter {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
            inside: false,
            pending: String::new(),
            visible: String::new(),
        }
    }

    pub fn reset(&mut self) {
        self.inside = false;
        self.pending.clear();
        self.visible.clear();
    }

    #[must_use]
    pub fn is_reasoning(&self) -> bool {
        self.inside
    }

    /// Answer text seen so far with reasoning spans removed.
    #[must_use]
    pub fn visible_text(&self) -> &str {
        &self.visible
    }

    /// Route one decoder event through the filter.
    pub fn apply(&mut self, event: DecodeEvent, out: &mut Vec<DecodeEvent>) {
        match event {
            DecodeEvent::Token(text) => self.push_text(&text, out),
            DecodeEvent::Finish(_) => {
                self.flush(out);
                out.push(DecodeEvent::Finish(self.visible.clone()));
            }
            other => out.push(other),
        }
    }

    fn push_text(&mut self, text: &str, out: &mut Vec<DecodeEvent>) {
        self.pending.push_str(text);

        loop {
            let marker = if self.inside { &self.close } else { &self.open };
            if let Some(pos) = memmem::find(self.pending.as_bytes(), marker.as_bytes()) {
                let marker_len = marker.len();
                let before: String = self.pending[..pos].to_string();
                self.pending.drain(..pos + marker_len);
                self.emit(before, out);
                self.inside = !self.inside;
                continue;
            }

            let keep = partial_marker_suffix(&self.pending, marker);
            let ready_len = self.pending.len() - keep;
            if ready_len > 0 {
                let ready: String = self.pending.drain(..ready_len).collect();
                self.emit(ready, out);
            }
            break;
        }
    }

    fn flush(&mut self, out: &mut Vec<DecodeEvent>) {
        let rest = std::mem::take(&mut self.pending);
        self.emit(rest, out);
    }

    fn emit(&mut self, text: String, out: &mut Vec<DecodeEvent>) {
        if text.is_empty() {
            return;
        }
        if self.inside {
            out.push(DecodeEvent::ReasoningToken(text));
        } else {
            self.visible.push_str(&text);
            out.push(DecodeEvent::Token(text));
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_suffix(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&len| {
            let start = text.len() - len;
            text.is_char_boundary(start) && marker.as_bytes().starts_with(&text.as_bytes()[start..])
        })
        .unwrap_or(0)
}
