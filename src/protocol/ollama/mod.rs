pub mod stream;

use serde::Deserialize;

use super::ToolCallFragment;

/// One NDJSON line from Ollama's `/api/generate` or `/api/chat` streams.
///
/// `generate` carries text in `response`; `chat` nests it under `message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaStreamRecord {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    /// Loosely typed: some proxies send `1` or `"true"`.
    #[serde(default)]
    pub done: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// Message body of an `/api/chat` stream record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaToolCall {
    #[serde(default)]
    pub function: OllamaToolCallFunction,
}

/// Ollama sends complete arguments as a JSON object, never in pieces.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaToolCallFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
}

impl From<OllamaToolCall> for ToolCallFragment {
    fn from(call: OllamaToolCall) -> Self {
        let arguments = call
            .function
            .arguments
            .map_or_else(|| "{}".to_string(), |args| args.to_string());
        ToolCallFragment {
            index: None,
            id: Some(call.function.name.clone()),
            kind: Some("function".to_string()),
            name: Some(call.function.name),
            arguments: Some(arguments),
        }
    }
}
