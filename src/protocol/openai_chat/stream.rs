use crate::error::ChatError;
use crate::protocol::{
    provider_error_message, DecodeEvent, DecoderCore, LineBuffer, ProviderKind, StreamDecoder,
};
use crate::util::{sse_data_payload, truncate_for_log};

use super::{OpenAiDelta, OpenAiStreamChunk, DONE_MARKER};

/// Decoder for `OpenAI`-compatible `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct OpenAiDecoder {
    lines: LineBuffer,
    core: DecoderCore,
}

impl OpenAiDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn handle_line(core: &mut DecoderCore, line: &str, out: &mut Vec<DecodeEvent>) {
    if core.is_finished() {
        return;
    }
    let Some(payload) = sse_data_payload(line) else {
        return;
    };
    if payload == DONE_MARKER {
        core.begin(out);
        core.finish(out);
        return;
    }

    let chunk: OpenAiStreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => {
            tracing::warn!(
                provider = "openai",
                error = %err,
                line = truncate_for_log(payload, 200),
                "skipping malformed stream record"
            );
            return;
        }
    };

    core.begin(out);

    if let Some(error) = chunk.error.as_ref() {
        core.fail(ChatError::stream(provider_error_message(error)), out);
        return;
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return;
    };
    // One channel per record: content, then tool calls, then reasoning.
    match choice.delta {
        OpenAiDelta {
            content: Some(content),
            ..
        } if !content.is_empty() => core.token(content, out),
        OpenAiDelta {
            tool_calls: Some(tool_calls),
            ..
        } if !tool_calls.is_empty() => {
            core.tool_fragments(tool_calls.into_iter().map(Into::into), out);
        }
        OpenAiDelta {
            reasoning_content: Some(reasoning),
            ..
        } => core.reasoning(reasoning, out),
        _ => {}
    }
}

impl StreamDecoder for OpenAiDecoder {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
