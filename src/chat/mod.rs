mod handler;
mod store;

pub use handler::{ChatObserver, ChatSession, StoreHandler};
pub use store::{Conversation, ConversationStore, MemoryStore};

use std::sync::Arc;

use http::HeaderMap;

use crate::config::{AppConfig, ChatConfig};
use crate::engine::{ChatEngine, SendOutcome};
use crate::error::ChatError;
use crate::message::{Attachment, Message, MessageStatus, Role};
use crate::protocol::ProviderKind;
use crate::session::SessionManager;
use crate::transport::{ChatApiClient, ChatPayload, PayloadMessage};

/// Conversation-level facade: user messages go into the store, answers stream
/// through a pooled per-conversation engine.
pub struct ChatService<S: ConversationStore> {
    sessions: SessionManager<ChatSession<S>>,
    api_client: Arc<ChatApiClient>,
    store: Arc<S>,
    include_history: bool,
}

impl<S: ConversationStore> std::fmt::Debug for ChatService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("sessions", &self.sessions)
            .field("api_client", &self.api_client)
            .field("include_history", &self.include_history)
            .finish_non_exhaustive()
    }
}

impl<S: ConversationStore> ChatService<S> {
    /// Build the service and its HTTP client from application config.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the client cannot be built.
    pub fn new(
        config: &AppConfig,
        store: Arc<S>,
        observer: Option<Arc<dyn ChatObserver>>,
    ) -> Result<Self, ChatError> {
        let api_client = Arc::new(ChatApiClient::new(&config.client, &config.generation)?);
        Ok(Self::from_parts(
            api_client,
            config.chat.clone(),
            config.client.provider,
            config.sessions.max_concurrent_chats,
            store,
            observer,
        ))
    }

    #[must_use]
    pub fn from_parts(
        api_client: Arc<ChatApiClient>,
        chat: ChatConfig,
        provider: ProviderKind,
        capacity: usize,
        store: Arc<S>,
        observer: Option<Arc<dyn ChatObserver>>,
    ) -> Self {
        let include_history = chat.include_history;
        let factory = {
            let api_client = Arc::clone(&api_client);
            let store = Arc::clone(&store);
            move |conversation_id: &str| {
                let handler = Arc::new(StoreHandler::new(
                    conversation_id,
                    Arc::clone(&store),
                    observer.clone(),
                ));
                let engine = ChatEngine::new(
                    chat.clone(),
                    provider,
                    Arc::clone(&api_client),
                    handler.clone(),
                );
                ChatSession { engine, handler }
            }
        };
        Self {
            sessions: SessionManager::new(capacity, factory),
            api_client,
            store,
            include_history,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager<ChatSession<S>> {
        &self.sessions
    }

    /// Replace the extra headers sent with every request.
    pub fn set_headers(&self, headers: HeaderMap) {
        self.api_client.set_headers(headers);
    }

    #[must_use]
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.sessions
            .find(conversation_id)
            .is_some_and(|session| session.engine.is_active())
    }

    /// Append a user message and stream the assistant's answer into the store.
    ///
    /// # Errors
    ///
    /// - [`ChatError::InvalidRequest`] when both text and attachments are empty.
    /// - [`ChatError::Busy`] when the conversation is already streaming.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome, ChatError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::InvalidRequest("message is empty".to_string()));
        }

        let lease = self.lease(conversation_id)?;
        let session = &lease.session;

        let history = self.store.messages(conversation_id);
        let user = Message::user(text, attachments);
        let user_id = user.id.clone();
        let payload = self.payload_for(&history, &user);
        self.store.insert_message(conversation_id, None, user);

        let result = session.engine.send_message(payload).await;
        if result.is_err() {
            self.store.remove_message(conversation_id, &user_id);
        }
        result
    }

    /// Drop the assistant message at `index` and stream a fresh answer to the
    /// user message before it, in the same position.
    ///
    /// # Errors
    ///
    /// - [`ChatError::InvalidRequest`] when `index` is out of range, is not an
    ///   assistant message, or does not follow a user message.
    /// - [`ChatError::Busy`] when the conversation is already streaming.
    pub async fn regenerate_message(
        &self,
        conversation_id: &str,
        index: usize,
    ) -> Result<SendOutcome, ChatError> {
        let messages = self.store.messages(conversation_id);
        let Some(target) = messages.get(index) else {
            return Err(ChatError::InvalidRequest(format!(
                "no message at index {index} (conversation has {})",
                messages.len()
            )));
        };
        if target.role != Role::Assistant {
            return Err(ChatError::InvalidRequest(format!(
                "message at index {index} is not an assistant message"
            )));
        }
        let Some(prompt) = index
            .checked_sub(1)
            .and_then(|i| messages.get(i))
            .filter(|m| m.role == Role::User)
        else {
            return Err(ChatError::InvalidRequest(format!(
                "message at index {index} does not follow a user message"
            )));
        };

        let lease = self.lease(conversation_id)?;
        let session = &lease.session;

        let payload = self.payload_for(&messages[..index - 1], prompt);
        let removed = self.store.remove_message(conversation_id, &target.id);
        session.handler.set_insert_position(Some(index));

        let result = session.engine.send_message(payload).await;
        if result.is_err() {
            session.handler.set_insert_position(None);
            if let Some(original) = removed {
                self.store.insert_message(conversation_id, Some(index), original);
            }
        }
        result
    }

    /// Stop the conversation's in-flight answer. Returns `false` when idle.
    pub fn stop_stream(&self, conversation_id: &str) -> bool {
        let Some(session) = self.sessions.find(conversation_id) else {
            return false;
        };
        let stopped = session.engine.stop_stream();
        self.sessions.release_session(conversation_id, &session);
        self.store.set_loading(conversation_id, false);
        stopped
    }

    /// Stop any stream and drop every message of the conversation.
    pub fn clear_history(&self, conversation_id: &str) {
        self.sessions.cleanup_session(conversation_id);
        self.store.clear(conversation_id);
    }

    /// Stop every pooled engine.
    pub fn stop_all(&self) {
        self.sessions.stop_all_sessions();
    }

    /// Check out the conversation's engine. The lease releases it back to the
    /// pool when dropped, including when the send future is dropped mid-stream.
    fn lease<'a>(&'a self, conversation_id: &'a str) -> Result<SessionLease<'a, S>, ChatError> {
        let session = self.sessions.get_session(conversation_id);
        let lease = SessionLease {
            sessions: &self.sessions,
            conversation_id,
            session,
        };
        if lease.session.engine.is_active() {
            return Err(busy(conversation_id));
        }
        Ok(lease)
    }

    fn payload_for(&self, history: &[Message], prompt: &Message) -> ChatPayload {
        let mut messages = Vec::new();
        if self.include_history {
            messages.extend(
                history
                    .iter()
                    .filter(|m| is_replayable(m))
                    .map(|m| PayloadMessage::new(m.role, m.content.clone())),
            );
        }
        messages.push(PayloadMessage::new(Role::User, prompt.content.clone()));
        ChatPayload::new(messages).with_files(prompt.attachments.clone())
    }
}

struct SessionLease<'a, S: ConversationStore> {
    sessions: &'a SessionManager<ChatSession<S>>,
    conversation_id: &'a str,
    session: Arc<ChatSession<S>>,
}

impl<S: ConversationStore> Drop for SessionLease<'_, S> {
    fn drop(&mut self) {
        self.session.handler.set_insert_position(None);
        self.sessions.release_session(self.conversation_id, &self.session);
    }
}

fn is_replayable(message: &Message) -> bool {
    matches!(message.role, Role::User | Role::Assistant)
        && message.status == MessageStatus::Complete
        && !message.content.is_empty()
}

fn busy(conversation_id: &str) -> ChatError {
    ChatError::Busy(format!("conversation {conversation_id} is already streaming"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, GenerationConfig};

    fn service(include_history: bool) -> ChatService<MemoryStore> {
        let client = ChatApiClient::with_client(
            reqwest::Client::new(),
            &ClientConfig::new("http://127.0.0.1:9/chat", "k"),
            &GenerationConfig::default(),
        )
        .unwrap();
        let chat = ChatConfig {
            include_history,
            ..ChatConfig::default()
        };
        ChatService::from_parts(
            Arc::new(client),
            chat,
            ProviderKind::OpenAi,
            3,
            Arc::new(MemoryStore::new()),
            None,
        )
    }

    fn completed_answer(text: &str) -> Message {
        let mut message = Message::assistant_pending();
        message.content = text.to_string();
        message.status = MessageStatus::Complete;
        message
    }

    #[test]
    fn test_payload_without_history_has_only_prompt() {
        let service = service(false);
        let history = vec![Message::user("old", Vec::new()), completed_answer("reply")];
        let prompt = Message::user("new", vec![Attachment::new("a.txt", "text/plain", "x")]);
        let payload = service.payload_for(&history, &prompt);
        assert_eq!(payload.messages, [PayloadMessage::new(Role::User, "new")]);
        assert_eq!(payload.files.len(), 1);
    }

    #[test]
    fn test_payload_with_history_skips_unfinished() {
        let service = service(true);
        let mut failed = completed_answer("partial");
        failed.status = MessageStatus::Error;
        let history = vec![
            Message::user("old", Vec::new()),
            completed_answer("reply"),
            failed,
        ];
        let payload = service.payload_for(&history, &Message::user("new", Vec::new()));
        let roles: Vec<_> = payload.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);
    }

    #[tokio::test]
    async fn test_regenerate_rejects_invalid_targets() {
        let service = service(false);
        let store = service.store();
        store.insert_message("c", None, completed_answer("orphan"));
        store.insert_message("c", None, Message::user("q", Vec::new()));

        for index in [0, 1, 7] {
            let err = service.regenerate_message("c", index).await.unwrap_err();
            assert!(matches!(err, ChatError::InvalidRequest(_)), "index {index}");
        }
        assert_eq!(store.messages("c").len(), 2);
        assert!(service.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_send_rejects_empty_message() {
        let service = service(false);
        let err = service.send_message("c", "  ", Vec::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
        assert!(service.store().messages("c").is_empty());
    }

    #[test]
    fn test_stop_idle_conversation() {
        let service = service(false);
        assert!(!service.stop_stream("nobody"));
        assert!(!service.is_streaming("nobody"));
        assert!(service.store().is_empty());
        assert!(service.sessions().is_empty());
    }
}
