use crate::error::ChatError;
use crate::protocol::{
    is_truthy, provider_error_message, DecodeEvent, DecoderCore, LineBuffer, ProviderKind,
    StreamDecoder,
};
use crate::util::{ndjson_payload, truncate_for_log};

use super::OllamaStreamRecord;

/// Decoder for Ollama newline-delimited JSON bodies.
#[derive(Debug, Default)]
pub struct OllamaDecoder {
    lines: LineBuffer,
    core: DecoderCore,
}

impl OllamaDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn handle_line(core: &mut DecoderCore, line: &str, out: &mut Vec<DecodeEvent>) {
    if core.is_finished() {
        return;
    }
    let Some(payload) = ndjson_payload(line) else {
        return;
    };
    let record: OllamaStreamRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(
                provider = "ollama",
                error = %err,
                line = truncate_for_log(payload, 200),
                "skipping malformed stream record"
            );
            return;
        }
    };

    core.begin(out);

    if let Some(error) = record.error.as_ref() {
        core.fail(ChatError::stream(provider_error_message(error)), out);
        return;
    }

    if let Some(thinking) = record.thinking {
        core.reasoning(thinking, out);
    }
    if let Some(response) = record.response {
        core.token(response, out);
    }
    if let Some(message) = record.message {
        if let Some(thinking) = message.thinking {
            core.reasoning(thinking, out);
        }
        if let Some(content) = message.content {
            core.token(content, out);
        }
        if !message.tool_calls.is_empty() {
            core.tool_fragments(message.tool_calls.into_iter().map(Into::into), out);
        }
    }

    if record.done.as_ref().is_some_and(is_truthy) {
        core.finish(out);
    }
}

impl StreamDecoder for OllamaDecoder {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn reset(&mut self) {
        self.lines.clear();
        self.core.reset();
    }

    fn feed(&mut self, chunk: &str, out: &mut Vec<DecodeEvent>) {
        let core = &mut self.core;
        self.lines.feed(chunk, |line| handle_line(core, line, out));
    }

    fn end_of_input(&mut self, out: &mut Vec<DecodeEvent>) {
        if let Some(line) = self.lines.take_remainder() {
            handle_line(&mut self.core, &line, out);
        }
    }

    fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    fn full_text(&self) -> &str {
        self.core.full_text()
    }
}
