/// Incremental UTF-8 decoder for chunked bodies.
///
/// A multi-byte sequence cut by a chunk boundary is held back until the next
/// chunk completes it. Invalid sequences decode to U+FFFD, matching the
/// lossy behavior of [`String::from_utf8_lossy`].
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    remainder: Vec<u8>,
}

impl Utf8Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.remainder.clear();
    }

    /// Decode `bytes`, returning all text that is complete so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        if self.remainder.is_empty() {
            return match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    let mut out = String::with_capacity(bytes.len());
                    let tail = decode_lossy_into(bytes, &mut out);
                    self.remainder.extend_from_slice(tail);
                    out
                }
            };
        }

        let mut joined = std::mem::take(&mut self.remainder);
        joined.extend_from_slice(bytes);
        let mut out = String::with_capacity(joined.len());
        let tail = decode_lossy_into(&joined, &mut out);
        self.remainder.extend_from_slice(tail);
        out
    }

    /// Flush at end of input. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.remainder.is_empty() {
            return String::new();
        }
        let rest = std::mem::take(&mut self.remainder);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Append the decodable prefix of `bytes` to `out` and return the incomplete
/// trailing sequence, if any.
fn decode_lossy_into<'a>(mut bytes: &'a [u8], out: &mut String) -> &'a [u8] {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                return &[];
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&bytes[..valid_up_to]) {
                    out.push_str(valid);
                }
                match err.error_len() {
                    Some(invalid_len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        bytes = &bytes[valid_up_to + invalid_len..];
                    }
                    None => return &bytes[valid_up_to..],
                }
            }
        }
    }
}
