use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::util::unix_now_millis;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// Lifecycle status of a message.
///
/// Transitions only move forward: `Pending -> Streaming -> {Complete | Error | Stopped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
    Error,
    Stopped,
}

impl MessageStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Complete | MessageStatus::Error | MessageStatus::Stopped
        )
    }
}

/// Function half of a tool call; `arguments` grows by concatenation while streaming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// A model-issued tool invocation, possibly still being assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub function: ToolCallFunction,
}

/// A file forwarded with a request as a multipart file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Unit of conversation content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub reasoning_content: String,
    pub status: MessageStatus,
    pub tool_calls: Vec<ToolCall>,
    pub attachments: Vec<Attachment>,
    pub created_at_ms: u64,
    pub retry_count: u32,
}

impl Message {
    /// A user message is complete the moment it is created.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let mut message = Self::with_role(Role::User, content.into());
        message.status = MessageStatus::Complete;
        message.attachments = attachments;
        message
    }

    /// An empty assistant message awaiting the first stream event.
    #[must_use]
    pub fn assistant_pending() -> Self {
        Self::with_role(Role::Assistant, String::new())
    }

    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            reasoning_content: String::new(),
            status: MessageStatus::Pending,
            tool_calls: Vec::new(),
            attachments: Vec::new(),
            created_at_ms: unix_now_millis(),
            retry_count: 0,
        }
    }

    /// Drop streamed output so a retried request starts from an empty body.
    pub fn clear_output(&mut self) {
        self.content.clear();
        self.reasoning_content.clear();
        self.tool_calls.clear();
    }
}
