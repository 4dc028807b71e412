use crate::error::ChatError;
use crate::protocol::{
    provider_error_message, DecodeEvent, DecoderCore, LineBuffer, ProviderKind, StreamDecoder,
    ToolCallFragment,
};
use crate::util::{ndjson_payload, truncate_for_log};

use super::{GeminiStreamRecord, FINISH_STOP};

/// Decoder for Gemini stream bodies.
///
/// Accepts one JSON record per line, with or without an SSE `data:` prefix
/// (`alt=sse`), as well as the pretty-printed JSON-array framing where records
/// are separated by `,` and wrapped in `[` `]` on their own lines.
#[derive(Debug, Default)]
pub struct GeminiDecoder {
    lines: LineBuffer,
    core: DecoderCore,
}

impl GeminiDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[inline]
fn strip_array_framing(payload: &str) -> &str {
    payload
        .trim_start_matches(['[', ','])
        .trim_end_matches([',', ']'])
        .trim()
}

fn handle_line(core: &mut DecoderCore, line: &str, out: &mut Vec<DecodeEvent>) {
    if core.is_finished() {
        return;
    }
    let Some(payload) = ndjson_payload(line).map(strip_array_framing) else {
        return;
    };
    if payload.is_empty() {
        return;
    }
    let record: GeminiStreamRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(
                provider = "gemini",
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

    let Some(candidate) = record.candidates.into_iter().next() else {
        return;
    };

    if let Some(content) = candidate.content {
        let mut calls: Vec<ToolCallFragment> = Vec::new();
        for part in content.parts {
            if let Some(call) = part.function_call {
                calls.push(call.into());
            } else if let Some(text) = part.text {
                if part.thought {
                    core.reasoning(text, out);
                } else {
                    core.token(text, out);
                }
            }
        }
        if !calls.is_empty() {
            core.tool_fragments(calls, out);
        }
    }

    if candidate.finish_reason.as_deref() == Some(FINISH_STOP) {
        core.finish(out);
    }
}

impl StreamDecoder for GeminiDecoder {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
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

#[cfg(test)]
mod tests {
    use super::*;

    fn text_line(text: &str, finish: Option<&str>) -> String {
        let finish = finish.map_or_else(String::new, |f| format!(",\"finishReason\":\"{f}\""));
        format!(
            "{{\"candidates\":[{{\"content\":{{\"role\":\"model\",\"parts\":[{{\"text\":\"{text}\"}}]}}{finish}}}]}}\n"
        )
    }

    #[test]
    fn test_text_then_stop() {
        let mut decoder = GeminiDecoder::new();
        let body = format!("{}{}", text_line("Hi ", None), text_line("there", Some("STOP")));
        let events = decoder.decode(&body);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Start,
                DecodeEvent::Token("Hi ".into()),
                DecodeEvent::Token("there".into()),
                DecodeEvent::Finish("Hi there".into()),
            ]
        );
    }

    #[test]
    fn test_other_finish_reasons_do_not_finish() {
        let mut decoder = GeminiDecoder::new();
        let _ = decoder.decode(&text_line("x", Some("MAX_TOKENS")));
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_function_call_synthesizes_tool_call() {
        let mut decoder = GeminiDecoder::new();
        let events = decoder.decode(
            "{\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"get_time\",\"args\":{\"tz\":\"UTC\"}}}]},\"finishReason\":\"STOP\"}]}\n",
        );
        assert_eq!(events.len(), 3);
        let DecodeEvent::ToolCalls(calls) = &events[1] else {
            panic!("expected tool calls, got {events:?}");
        };
        assert_eq!(calls[0].id.as_deref(), Some("get_time"));
        assert_eq!(calls[0].function.name, "get_time");
        assert_eq!(calls[0].function.arguments, "{\"tz\":\"UTC\"}");
        assert_eq!(events[2], DecodeEvent::Finish(String::new()));
    }

    #[test]
    fn test_thought_parts_are_reasoning() {
        let mut decoder = GeminiDecoder::new();
        let events = decoder.decode(
            "{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"mull\",\"thought\":true},{\"text\":\"answer\"}]}}]}\n",
        );
        assert_eq!(
            events,
            vec![
                DecodeEvent::Start,
                DecodeEvent::ReasoningToken("mull".into()),
                DecodeEvent::Token("answer".into()),
            ]
        );
    }

    #[test]
    fn test_sse_and_array_framing() {
        let mut decoder = GeminiDecoder::new();
        let sse = format!("data: {}", text_line("a", None));
        let array = format!("[{}{}]\n", text_line("b", None).trim_end(), ",");
        let mut events = decoder.decode(&sse);
        events.extend(decoder.decode(&array));
        events.extend(decoder.decode(&format!(",{}", text_line("c", Some("STOP")))));
        assert_eq!(events.last(), Some(&DecodeEvent::Finish("abc".into())));
    }

    #[test]
    fn test_error_record_is_fatal() {
        let mut decoder = GeminiDecoder::new();
        let events = decoder.decode("{\"error\":{\"code\":400,\"message\":\"API key not valid\"}}\n");
        assert_eq!(
            events,
            vec![
                DecodeEvent::Start,
                DecodeEvent::Error(ChatError::stream("API key not valid")),
            ]
        );
    }
}
