pub mod gemini;
mod line_buffer;
pub mod ollama;
pub mod openai_chat;
pub mod think_filter;
pub mod tool_calls;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::message::ToolCall;

pub use line_buffer::LineBuffer;
pub use think_filter::ThinkTagFilter;
pub use tool_calls::{ToolCallAccumulator, ToolCallFragment};

use gemini::stream::GeminiDecoder;
use ollama::stream::OllamaDecoder;
use openai_chat::stream::OpenAiDecoder;

/// Wire format spoken by the LLM backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Ollama,
    Gemini,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(ChatError::Config(format!("unknown provider '{other}'"))),
        }
    }
}

/// Semantic event decoded from a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Start,
    Token(String),
    ReasoningToken(String),
    /// The accumulated, index-merged tool call list after applying one record.
    ToolCalls(Vec<ToolCall>),
    /// Emitted exactly once per stream with the full accumulated answer text.
    Finish(String),
    Error(ChatError),
}

/// Incremental decoder contract shared by every provider variant.
///
/// Chunks may split records, lines and even UTF-8 characters' worth of text at
/// arbitrary points; decoders buffer internally and only act on complete lines.
pub trait StreamDecoder: Send {
    fn provider(&self) -> ProviderKind;

    /// Clear all per-stream state so the instance can decode a new stream.
    fn reset(&mut self);

    /// Feed one text chunk and append resulting events to `out`.
    fn feed(&mut self, chunk: &str, out: &mut Vec<DecodeEvent>);

    /// Process a trailing line that was never newline-terminated.
    fn end_of_input(&mut self, out: &mut Vec<DecodeEvent>);

    fn is_finished(&self) -> bool;

    fn full_text(&self) -> &str;

    fn decode(&mut self, chunk: &str) -> Vec<DecodeEvent> {
        let mut out = Vec::new();
        self.feed(chunk, &mut out);
        out
    }
}

/// Per-stream bookkeeping common to all decoders.
#[derive(Debug, Default)]
pub(crate) struct DecoderCore {
    full_text: String,
    tool_calls: ToolCallAccumulator,
    started: bool,
    finished: bool,
}

impl DecoderCore {
    pub(crate) fn reset(&mut self) {
        self.full_text.clear();
        self.tool_calls.clear();
        self.started = false;
        self.finished = false;
    }

    #[inline]
    pub(crate) fn begin(&mut self, out: &mut Vec<DecodeEvent>) {
        if !self.started {
            self.started = true;
            out.push(DecodeEvent::Start);
        }
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn full_text(&self) -> &str {
        &self.full_text
    }

    pub(crate) fn token(&mut self, text: String, out: &mut Vec<DecodeEvent>) {
        if text.is_empty() {
            return;
        }
        self.full_text.push_str(&text);
        out.push(DecodeEvent::Token(text));
    }

    pub(crate) fn reasoning(&mut self, text: String, out: &mut Vec<DecodeEvent>) {
        if text.is_empty() {
            return;
        }
        out.push(DecodeEvent::ReasoningToken(text));
    }

    pub(crate) fn tool_fragments<I>(&mut self, fragments: I, out: &mut Vec<DecodeEvent>)
    where
        I: IntoIterator<Item = ToolCallFragment>,
    {
        let mut merged_any = false;
        for fragment in fragments {
            self.tool_calls.merge(fragment);
            merged_any = true;
        }
        if merged_any {
            out.push(DecodeEvent::ToolCalls(self.tool_calls.calls().to_vec()));
        }
    }

    pub(crate) fn finish(&mut self, out: &mut Vec<DecodeEvent>) {
        if !self.finished {
            self.finished = true;
            out.push(DecodeEvent::Finish(self.full_text.clone()));
        }
    }

    /// Decoder-fatal condition: report once and stop processing the stream.
    pub(crate) fn fail(&mut self, err: ChatError, out: &mut Vec<DecodeEvent>) {
        if !self.finished {
            self.finished = true;
            out.push(DecodeEvent::Error(err));
        }
    }
}

/// Tagged decoder variant chosen by [`ProviderKind`].
#[derive(Debug)]
pub enum Decoder {
    OpenAi(OpenAiDecoder),
    Ollama(OllamaDecoder),
    Gemini(GeminiDecoder),
}

impl Decoder {
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::OpenAi => Decoder::OpenAi(OpenAiDecoder::new()),
            ProviderKind::Ollama => Decoder::Ollama(OllamaDecoder::new()),
            ProviderKind::Gemini => Decoder::Gemini(GeminiDecoder::new()),
        }
    }

    fn inner(&self) -> &dyn StreamDecoder {
        match self {
            Decoder::OpenAi(d) => d,
            Decoder::Ollama(d) => d,
            Decoder::Gemini(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn StreamDecoder {
        match self {
            Decoder::OpenAi(d) => d,
            Decoder::Ollama(d) => d,
            Decoder::Gemini(d) => d,
        }
    }
}

impl StreamDecoder for Decoder {
    fn provider(&self) -> ProviderKind {
        self.inner().provider()
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn feed(&mut self, chunk: &str, out: &mut Vec<DecodeEvent>) {
        self.inner_mut().feed(chunk, out);
    }

    fn end_of_input(&mut self, out: &mut Vec<DecodeEvent>) {
        self.inner_mut().end_of_input(out);
    }

    fn is_finished(&self) -> bool {
        self.inner().is_finished()
    }

    fn full_text(&self) -> &str {
        self.inner().full_text()
    }
}

/// A provider decoder optionally decorated with the think-tag filter.
#[derive(Debug)]
pub struct DecoderChain {
    decoder: Decoder,
    think: Option<ThinkTagFilter>,
    scratch: Vec<DecodeEvent>,
}

impl DecoderChain {
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            decoder: Decoder::new(provider),
            think: None,
            scratch: Vec::with_capacity(8),
        }
    }

    #[must_use]
    pub fn with_think_filter(mut self, filter: ThinkTagFilter) -> Self {
        self.think = Some(filter);
        self
    }

    #[must_use]
    pub fn has_think_filter(&self) -> bool {
        self.think.is_some()
    }

    fn route(&mut self, out: &mut Vec<DecodeEvent>) {
        if let Some(filter) = self.think.as_mut() {
            for event in self.scratch.drain(..) {
                filter.apply(event, out);
            }
        } else {
            out.append(&mut self.scratch);
        }
    }
}

impl StreamDecoder for DecoderChain {
    fn provider(&self) -> ProviderKind {
        self.decoder.provider()
    }

    fn reset(&mut self) {
        self.decoder.reset();
        if let Some(filter) = self.think.as_mut() {
            filter.reset();
        }
        self.scratch.clear();
    }

    fn feed(&mut self, chunk: &str, out: &mut Vec<DecodeEvent>) {
        self.decoder.feed(chunk, &mut self.scratch);
        self.route(out);
    }

    fn end_of_input(&mut self, out: &mut Vec<DecodeEvent>) {
        self.decoder.end_of_input(&mut self.scratch);
        self.route(out);
    }

    fn is_finished(&self) -> bool {
        self.decoder.is_finished()
    }

    fn full_text(&self) -> &str {
        match self.think.as_ref() {
            Some(filter) => filter.visible_text(),
            None => self.decoder.full_text(),
        }
    }
}

/// JavaScript-style truthiness for loosely typed flags such as Ollama's `done`.
pub(crate) fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Human-readable message from a provider `error` payload (string or object).
pub(crate) fn provider_error_message(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    }
}
