use memchr::memchr_iter;

/// Newline splitter for streamed text.
///
/// Holds back the trailing partial segment until a later chunk completes it.
/// A single trailing `\r` is stripped and whitespace-only lines are skipped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes currently held back waiting for a newline.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Append `chunk` and invoke `on_line` for every complete line.
    pub fn feed<F>(&mut self, chunk: &str, mut on_line: F)
    where
        F: FnMut(&str),
    {
        // The held-back segment never contains '\n', so only new bytes need scanning.
        let scan_from = self.buffer.len();
        self.buffer.push_str(chunk);

        let mut line_start = 0usize;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_from..]) {
            let line_end = scan_from + rel_pos;
            let mut line = &self.buffer[line_start..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            if !line.trim().is_empty() {
                on_line(line);
            }
            line_start = line_end + 1;
        }

        if line_start == self.buffer.len() {
            self.buffer.clear();
        } else if line_start > 0 {
            self.buffer.drain(..line_start);
        }
    }

    /// Take the unterminated trailing segment, if it holds anything but whitespace.
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        Some(rest.strip_suffix('\r').map(str::to_string).unwrap_or(rest))
    }
}
