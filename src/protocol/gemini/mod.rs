pub mod stream;

use serde::Deserialize;

use super::ToolCallFragment;

/// `finishReason` value that ends a Gemini stream normally.
pub const FINISH_STOP: &str = "STOP";

/// One record of a Gemini `streamGenerateContent` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiStreamRecord {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// A candidate in the response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
}

/// A content message in Gemini format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A single part within a Gemini content message.
///
/// Parts are open-ended upstream, so this is a struct of optionals rather than
/// a closed enum; unknown part kinds decode to an empty part and are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(default)]
    pub text: Option<String>,
    /// Set on thought-summary parts when thinking output is enabled.
    #[serde(default)]
    pub thought: bool,
    #[serde(default)]
    pub function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiFunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

impl From<GeminiFunctionCall> for ToolCallFragment {
    fn from(call: GeminiFunctionCall) -> Self {
        let arguments = call
            .args
            .map_or_else(|| "{}".to_string(), |args| args.to_string());
        ToolCallFragment {
            index: None,
            id: Some(call.name.clone()),
            kind: Some("function".to_string()),
            name: Some(call.name),
            arguments: Some(arguments),
        }
    }
}
