mod pacing;

pub use pacing::{random_delay, sleep_cancellable};

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::message::{Message, MessageStatus, ToolCall};
use crate::observability::StreamStats;
use crate::protocol::{DecodeEvent, DecoderChain, ProviderKind, ThinkTagFilter};
use crate::session::SessionCore;
use crate::stream::{StreamPipeline, TRUNCATED_STREAM};
use crate::transport::{ChatApiClient, ChatPayload, RetryPolicy};

/// Lifecycle callbacks for the message owned by one engine.
///
/// Callbacks run while the engine holds its state lock, so they observe events
/// in strict order. They must not call back into the same engine.
pub trait MessageHandler: Send + Sync {
    /// Allocate the assistant message for a new top-level send.
    fn on_create(&self) -> Message {
        Message::assistant_pending()
    }

    fn on_token(&self, _message: &Message, _token: &str) {}

    fn on_reasoning_content(&self, _message: &Message, _text: &str) {}

    fn on_tool_call(&self, _message: &Message, _tool_calls: &[ToolCall]) {}

    /// A retryable failure is about to be retried; output has been cleared.
    fn on_retry(&self, _message: &Message, _error: &ChatError, _attempt: u32) {}

    fn on_complete(&self, _message: &Message) {}

    fn on_error(&self, _message: &Message, _error: &ChatError) {}

    fn on_stop(&self, _message: &Message) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl MessageHandler for NoopHandler {}

/// Result of one top-level [`ChatEngine::send_message`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Complete(Message),
    Failed { message: Message, error: ChatError },
    Stopped,
}

impl SendOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SendOutcome::Complete(_) => "complete",
            SendOutcome::Failed { .. } => "error",
            SendOutcome::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match self {
            SendOutcome::Complete(message) | SendOutcome::Failed { message, .. } => Some(message),
            SendOutcome::Stopped => None,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    current: Option<Message>,
    cancel: Option<CancellationToken>,
    retry_count: u32,
}

impl EngineState {
    fn reset(&mut self) {
        self.current = None;
        self.cancel = None;
        self.retry_count = 0;
    }
}

/// Armed for the lifetime of one send. Dropping it armed means the caller
/// dropped the send future, so the send is stopped.
struct SendGuard<'a> {
    engine: &'a ChatEngine,
    token: CancellationToken,
    armed: bool,
}

impl SendGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.abandon(&self.token);
        }
    }
}

enum Attempt {
    Complete(Message),
    Stopped,
    Failed(ChatError),
}

enum Recovery {
    Retry(Duration),
    Terminal(Message),
    Stopped,
}

/// Per-conversation state machine: `Idle -> Pending -> Streaming -> {Complete | Error | Stopped}`.
pub struct ChatEngine {
    config: ChatConfig,
    retry: RetryPolicy,
    provider: ProviderKind,
    api_client: Arc<ChatApiClient>,
    handler: Arc<dyn MessageHandler>,
    pipeline: tokio::sync::Mutex<StreamPipeline>,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine")
            .field("provider", &self.provider)
            .field("retry", &self.retry)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl ChatEngine {
    #[must_use]
    pub fn new(
        config: ChatConfig,
        provider: ProviderKind,
        api_client: Arc<ChatApiClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let mut decoder = DecoderChain::new(provider);
        if config.think_tags.enabled {
            decoder = decoder.with_think_filter(ThinkTagFilter::new(
                config.think_tags.open.clone(),
                config.think_tags.close.clone(),
            ));
        }
        Self {
            retry: RetryPolicy::from_config(&config),
            config,
            provider,
            api_client,
            handler,
            pipeline: tokio::sync::Mutex::new(StreamPipeline::new(decoder)),
            state: Mutex::new(EngineState::default()),
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Whether a message is currently pending or streaming.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Snapshot of the in-flight message.
    #[must_use]
    pub fn current_message(&self) -> Option<Message> {
        self.state.lock().current.clone()
    }

    /// Run one logical send to a terminal state, retrying retryable failures.
    ///
    /// Exactly one of `on_complete`, `on_error` or `on_stop` fires per call that
    /// returns `Ok`. Dropping the returned future mid-send stops the message
    /// and fires `on_stop`, leaving the engine idle.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Busy`] when a message is already in flight; no
    /// callback fires in that case.
    pub async fn send_message(&self, payload: ChatPayload) -> Result<SendOutcome, ChatError> {
        let token = self.begin()?;
        let guard = SendGuard {
            engine: self,
            token: token.clone(),
            armed: true,
        };
        let mut stats = StreamStats::new();
        let outcome = self.run(&payload, &token, &mut stats).await;
        guard.disarm();
        let final_text = outcome.message().map_or("", |m| m.content.as_str());
        stats.log_finished(self.provider, outcome.as_str(), final_text);
        Ok(outcome)
    }

    /// Stop the in-flight message. Returns `false` when idle.
    pub fn stop_stream(&self) -> bool {
        let mut state = self.state.lock();
        let Some(mut message) = state.current.take() else {
            return false;
        };
        message.status = MessageStatus::Stopped;
        self.handler.on_stop(&message);
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.retry_count = 0;
        tracing::debug!(message_id = %message.id, "chat stream stopped");
        true
    }

    /// Stop a send whose future was dropped before it reached a terminal state.
    fn abandon(&self, token: &CancellationToken) {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        token.cancel();
        let Some(mut message) = state.current.take() else {
            return;
        };
        state.reset();
        message.status = MessageStatus::Stopped;
        self.handler.on_stop(&message);
        tracing::debug!(message_id = %message.id, "chat send dropped before completion");
    }

    fn begin(&self) -> Result<CancellationToken, ChatError> {
        let mut state = self.state.lock();
        if state.current.is_some() {
            return Err(ChatError::Busy(
                "a response is already streaming for this conversation".to_string(),
            ));
        }
        let mut message = self.handler.on_create();
        message.status = MessageStatus::Pending;
        let token = CancellationToken::new();
        state.current = Some(message);
        state.cancel = Some(token.clone());
        state.retry_count = 0;
        Ok(token)
    }

    async fn run(
        &self,
        payload: &ChatPayload,
        token: &CancellationToken,
        stats: &mut StreamStats,
    ) -> SendOutcome {
        let mut pipeline = self.pipeline.lock().await;
        loop {
            let error = match self.attempt(payload, token, &mut pipeline, stats).await {
                Attempt::Complete(message) => return SendOutcome::Complete(message),
                Attempt::Stopped => return SendOutcome::Stopped,
                Attempt::Failed(error) => error,
            };
            if error.is_abort() {
                return SendOutcome::Stopped;
            }
            match self.recover(&error, token, stats) {
                Recovery::Retry(delay) => {
                    if sleep_cancellable(delay, token).await.is_err() {
                        return SendOutcome::Stopped;
                    }
                }
                Recovery::Terminal(message) => return SendOutcome::Failed { message, error },
                Recovery::Stopped => return SendOutcome::Stopped,
            }
        }
    }

    async fn attempt(
        &self,
        payload: &ChatPayload,
        token: &CancellationToken,
        pipeline: &mut StreamPipeline,
        stats: &mut StreamStats,
    ) -> Attempt {
        let response = match self.api_client.create_chat_stream(payload, token).await {
            Ok(response) => response,
            Err(error) => return Attempt::Failed(error),
        };

        let mut events = std::pin::pin!(pipeline.process(response));
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return Attempt::Stopped,
                next = events.next() => next,
            };
            let Some(event) = next else {
                return Attempt::Failed(ChatError::stream(TRUNCATED_STREAM));
            };

            let applied = match event {
                DecodeEvent::Start => {
                    tracing::debug!(provider = self.provider.as_str(), "chat stream started");
                    true
                }
                DecodeEvent::Token(text) => {
                    stats.record_token(&text);
                    if self.config.typing_effect {
                        self.type_out(&text, token).await
                    } else {
                        self.apply(token, |message, handler| {
                            message.status = MessageStatus::Streaming;
                            message.content.push_str(&text);
                            handler.on_token(message, &text);
                        })
                    }
                }
                DecodeEvent::ReasoningToken(text) => {
                    stats.record_reasoning(&text);
                    self.apply(token, |message, handler| {
                        message.status = MessageStatus::Streaming;
                        message.reasoning_content.push_str(&text);
                        message.content.clear();
                        handler.on_reasoning_content(message, &text);
                    })
                }
                DecodeEvent::ToolCalls(calls) => {
                    stats.record_tool_calls();
                    self.apply(token, |message, handler| {
                        message.tool_calls = calls;
                        handler.on_tool_call(message, &message.tool_calls);
                    })
                }
                DecodeEvent::Finish(full_text) => return self.complete(full_text, token),
                DecodeEvent::Error(error) => return Attempt::Failed(error),
            };

            if !applied {
                return Attempt::Stopped;
            }
        }
    }

    /// Apply `f` to the current message unless this send has been stopped.
    fn apply<F>(&self, token: &CancellationToken, f: F) -> bool
    where
        F: FnOnce(&mut Message, &dyn MessageHandler),
    {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        let Some(message) = state.current.as_mut() else {
            return false;
        };
        f(message, self.handler.as_ref());
        true
    }

    /// Typing-effect mode: one character per step with a random pause.
    async fn type_out(&self, text: &str, token: &CancellationToken) -> bool {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let piece: &str = ch.encode_utf8(&mut buf);
            let applied = self.apply(token, |message, handler| {
                message.status = MessageStatus::Streaming;
                message.content.push(ch);
                handler.on_token(message, piece);
            });
            if !applied {
                return false;
            }
            if sleep_cancellable(random_delay(self.config.typing_delay), token)
                .await
                .is_err()
            {
                return false;
            }
        }
        true
    }

    fn complete(&self, full_text: String, token: &CancellationToken) -> Attempt {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return Attempt::Stopped;
        }
        let Some(mut message) = state.current.take() else {
            return Attempt::Stopped;
        };
        state.reset();
        message.status = MessageStatus::Complete;
        message.content = full_text;
        self.handler.on_complete(&message);
        Attempt::Complete(message)
    }

    fn recover(
        &self,
        error: &ChatError,
        token: &CancellationToken,
        stats: &mut StreamStats,
    ) -> Recovery {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return Recovery::Stopped;
        }

        if let Some(delay) = self.retry.next_delay(error, state.retry_count) {
            state.retry_count += 1;
            let attempt = state.retry_count;
            if let Some(message) = state.current.as_mut() {
                message.clear_output();
                message.retry_count = attempt;
                self.handler.on_retry(message, error, attempt);
            }
            stats.record_retry();
            tracing::warn!(
                attempt,
                max_retries = self.retry.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "chat request failed, retrying"
            );
            return Recovery::Retry(delay);
        }

        let Some(mut message) = state.current.take() else {
            return Recovery::Stopped;
        };
        state.reset();
        message.status = MessageStatus::Error;
        self.handler.on_error(&message, error);
        tracing::error!(
            code = error.code().as_str(),
            error = %error,
            message_id = %message.id,
            "chat request failed"
        );
        Recovery::Terminal(message)
    }
}

impl SessionCore for ChatEngine {
    fn stop_stream(&self) {
        ChatEngine::stop_stream(self);
    }

    fn is_active(&self) -> bool {
        ChatEngine::is_active(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, GenerationConfig};

    fn engine(handler: Arc<dyn MessageHandler>) -> ChatEngine {
        let client = ChatApiClient::with_client(
            reqwest::Client::new(),
            &ClientConfig::new("http://127.0.0.1:9/chat", "k"),
            &GenerationConfig::default(),
        )
        .unwrap();
        ChatEngine::new(
            ChatConfig::default(),
            ProviderKind::OpenAi,
            Arc::new(client),
            handler,
        )
    }

    #[derive(Default)]
    struct StopCounter {
        stops: parking_lot::Mutex<u32>,
    }

    impl MessageHandler for StopCounter {
        fn on_stop(&self, _message: &Message) {
            *self.stops.lock() += 1;
        }
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let handler = Arc::new(StopCounter::default());
        let engine = engine(handler.clone());
        assert!(!engine.is_active());
        assert!(!engine.stop_stream());
        assert_eq!(*handler.stops.lock(), 0);
    }

    #[test]
    fn test_begin_then_stop_fires_once() {
        let handler = Arc::new(StopCounter::default());
        let engine = engine(handler.clone());
        let token = engine.begin().unwrap();
        assert!(engine.is_active());
        assert_eq!(
            engine.current_message().map(|m| m.status),
            Some(MessageStatus::Pending)
        );

        assert!(matches!(engine.begin(), Err(ChatError::Busy(_))));

        assert!(engine.stop_stream());
        assert!(token.is_cancelled());
        assert!(!engine.stop_stream());
        assert_eq!(*handler.stops.lock(), 1);
        assert!(!engine.is_active());
    }

    #[test]
    fn test_apply_after_stop_is_rejected() {
        let engine = engine(Arc::new(NoopHandler));
        let token = engine.begin().unwrap();
        engine.stop_stream();
        assert!(!engine.apply(&token, |message, _| message.content.push('x')));
    }

    #[test]
    fn test_recover_retries_then_fails() {
        let engine = engine(Arc::new(NoopHandler));
        let token = engine.begin().unwrap();
        let mut stats = StreamStats::new();
        let err = ChatError::network("reset");
        for attempt in 1..=3 {
            assert!(matches!(
                engine.recover(&err, &token, &mut stats),
                Recovery::Retry(_)
            ));
            assert_eq!(engine.current_message().map(|m| m.retry_count), Some(attempt));
        }
        let Recovery::Terminal(message) = engine.recover(&err, &token, &mut stats) else {
            panic!("expected terminal failure");
        };
        assert_eq!(message.status, MessageStatus::Error);
        assert!(!engine.is_active());
        assert_eq!(stats.retries, 3);
    }

    #[test]
    fn test_send_outcome_labels() {
        assert_eq!(SendOutcome::Stopped.as_str(), "stopped");
        assert!(SendOutcome::Stopped.message().is_none());
    }
}
