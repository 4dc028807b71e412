pub mod stream;

use serde::Deserialize;

use super::ToolCallFragment;

/// Literal payload that terminates an `OpenAI`-compatible SSE stream.
pub const DONE_MARKER: &str = "[DONE]";

/// One `data:` record of an `OpenAI`-compatible chat completion stream.
///
/// Every field is optional: compatible servers routinely omit `id`, `model`
/// or `choices` on keep-alive and usage-only records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    /// In-band failure reported with a 200 status.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
    /// DeepSeek-style reasoning channel.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// A tool call delta in streaming.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamToolCall {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAiStreamToolCallFunction>,
}

/// Function delta within a streaming tool call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiStreamToolCallFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

impl From<OpenAiStreamToolCall> for ToolCallFragment {
    fn from(call: OpenAiStreamToolCall) -> Self {
        let (name, arguments) = match call.function {
            Some(function) => (function.name, function.arguments),
            None => (None, None),
        };
        ToolCallFragment {
            index: call.index,
            id: call.id,
            kind: call.type_,
            name,
            arguments,
        }
    }
}
