use std::sync::Arc;

use parking_lot::Mutex;

use super::store::ConversationStore;
use crate::engine::{ChatEngine, MessageHandler};
use crate::error::ChatError;
use crate::message::{Message, ToolCall};
use crate::session::SessionCore;

/// Front-end hooks for conversation events. Every method defaults to a no-op.
pub trait ChatObserver: Send + Sync {
    fn on_message_created(&self, _conversation_id: &str, _message: &Message) {}

    fn on_token(&self, _conversation_id: &str, _message: &Message, _token: &str) {}

    fn on_reasoning_content(&self, _conversation_id: &str, _message: &Message, _text: &str) {}

    fn on_tool_call(&self, _conversation_id: &str, _message: &Message, _tool_calls: &[ToolCall]) {}

    fn on_retry(
        &self,
        _conversation_id: &str,
        _message: &Message,
        _error: &ChatError,
        _attempt: u32,
    ) {
    }

    fn on_complete(&self, _conversation_id: &str, _message: &Message) {}

    fn on_error(&self, _conversation_id: &str, _message: &Message, _error: &ChatError) {}

    fn on_stop(&self, _conversation_id: &str, _message: &Message) {}
}

/// Per-conversation [`MessageHandler`] that mirrors the engine's message into
/// the store and forwards every event to the observer.
pub struct StoreHandler<S> {
    conversation_id: String,
    store: Arc<S>,
    observer: Option<Arc<dyn ChatObserver>>,
    insert_at: Mutex<Option<usize>>,
}

impl<S: ConversationStore> StoreHandler<S> {
    pub fn new(
        conversation_id: impl Into<String>,
        store: Arc<S>,
        observer: Option<Arc<dyn ChatObserver>>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            store,
            observer,
            insert_at: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Position for the next created assistant message. Consumed by one
    /// `on_create`; `None` appends.
    pub fn set_insert_position(&self, index: Option<usize>) {
        *self.insert_at.lock() = index;
    }

    fn observe(&self, f: impl FnOnce(&dyn ChatObserver, &str)) {
        if let Some(observer) = self.observer.as_deref() {
            f(observer, &self.conversation_id);
        }
    }

    fn settle(&self, message: &Message) {
        self.store.update_message(&self.conversation_id, message);
        self.store.set_loading(&self.conversation_id, false);
    }
}

impl<S: ConversationStore> MessageHandler for StoreHandler<S> {
    fn on_create(&self) -> Message {
        let message = Message::assistant_pending();
        let index = self.insert_at.lock().take();
        self.store.set_loading(&self.conversation_id, true);
        self.store
            .insert_message(&self.conversation_id, index, message.clone());
        self.observe(|o, id| o.on_message_created(id, &message));
        message
    }

    fn on_token(&self, message: &Message, token: &str) {
        self.store.update_message(&self.conversation_id, message);
        self.observe(|o, id| o.on_token(id, message, token));
    }

    fn on_reasoning_content(&self, message: &Message, text: &str) {
        self.store.update_message(&self.conversation_id, message);
        self.observe(|o, id| o.on_reasoning_content(id, message, text));
    }

    fn on_tool_call(&self, message: &Message, tool_calls: &[ToolCall]) {
        self.store.update_message(&self.conversation_id, message);
        self.observe(|o, id| o.on_tool_call(id, message, tool_calls));
    }

    fn on_retry(&self, message: &Message, error: &ChatError, attempt: u32) {
        self.store.update_message(&self.conversation_id, message);
        self.observe(|o, id| o.on_retry(id, message, error, attempt));
    }

    fn on_complete(&self, message: &Message) {
        self.settle(message);
        self.observe(|o, id| o.on_complete(id, message));
    }

    fn on_error(&self, message: &Message, error: &ChatError) {
        self.settle(message);
        self.observe(|o, id| o.on_error(id, message, error));
    }

    fn on_stop(&self, message: &Message) {
        self.settle(message);
        self.observe(|o, id| o.on_stop(id, message));
    }
}

/// Pooled unit: an engine plus the handler it reports to.
pub struct ChatSession<S> {
    pub(crate) engine: ChatEngine,
    pub(crate) handler: Arc<StoreHandler<S>>,
}

impl<S: ConversationStore> ChatSession<S> {
    #[must_use]
    pub fn engine(&self) -> &ChatEngine {
        &self.engine
    }

    #[must_use]
    pub fn handler(&self) -> &StoreHandler<S> {
        &self.handler
    }
}

impl<S: ConversationStore> SessionCore for ChatSession<S> {
    fn stop_stream(&self) {
        self.engine.stop_stream();
    }

    fn is_active(&self) -> bool {
        self.engine.is_active()
    }
}
