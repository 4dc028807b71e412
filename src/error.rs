/// Error type shared by the decoder, transport, engine and session layers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Network error: {message}")]
    Network { status: Option<u16>, message: String },
    #[error("Request aborted: {0}")]
    Abort(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Session busy: {0}")]
    Busy(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Config error: {0}")]
    Config(String),
}

/// Stable machine-readable error code, one per [`ChatError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Network,
    Abort,
    Stream,
    Busy,
    InvalidRequest,
    Config,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Network => "NETWORK_ERROR",
            ErrorCode::Abort => "ABORT_ERROR",
            ErrorCode::Stream => "STREAM_ERROR",
            ErrorCode::Busy => "SESSION_BUSY",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::Config => "CONFIG_ERROR",
        }
    }
}

impl ChatError {
    pub fn network(message: impl Into<String>) -> Self {
        ChatError::Network {
            status: None,
            message: message.into(),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        ChatError::Abort(message.into())
    }

    pub fn stream(message: impl Into<String>) -> Self {
        ChatError::Stream(message.into())
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Network { .. } => ErrorCode::Network,
            ChatError::Abort(_) => ErrorCode::Abort,
            ChatError::Stream(_) => ErrorCode::Stream,
            ChatError::Busy(_) => ErrorCode::Busy,
            ChatError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ChatError::Config(_) => ErrorCode::Config,
        }
    }

    /// Only transport failures and non-2xx responses are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Network { .. })
    }

    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, ChatError::Abort(_))
    }

    /// Upstream HTTP status carried by a [`ChatError::Network`], if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Network { status, .. } => *status,
            _ => None,
        }
    }
}

/// Map a non-2xx upstream status to a retryable network error carrying the
/// status text.
#[must_use]
pub fn network_error_from_status(status: http::StatusCode) -> ChatError {
    let reason = status.canonical_reason().unwrap_or("Unknown Status");
    ChatError::Network {
        status: Some(status.as_u16()),
        message: format!("upstream returned {} {reason}", status.as_u16()),
    }
}
