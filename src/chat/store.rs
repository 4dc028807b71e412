use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::message::Message;
use crate::util::unix_now_millis;

/// Where conversations and their messages live.
///
/// Implementations are shared between the service and every per-conversation
/// handler, and are called while an engine holds its state lock, so they must
/// not block on anything that could call back into the engine.
pub trait ConversationStore: Send + Sync + 'static {
    /// Snapshot of the conversation's messages, oldest first.
    fn messages(&self, conversation_id: &str) -> Vec<Message>;

    /// Insert at `index` (clamped), or append when `None`.
    fn insert_message(&self, conversation_id: &str, index: Option<usize>, message: Message);

    /// Replace the stored message with the same id. Returns `false` if absent.
    fn update_message(&self, conversation_id: &str, message: &Message) -> bool;

    fn remove_message(&self, conversation_id: &str, message_id: &str) -> Option<Message>;

    fn set_loading(&self, conversation_id: &str, loading: bool);

    fn is_loading(&self, conversation_id: &str) -> bool;

    /// Drop every message of the conversation.
    fn clear(&self, conversation_id: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Conversation {
    fn new(id: &str) -> Self {
        let now = unix_now_millis();
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            loading: false,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at_ms = unix_now_millis();
    }
}

/// In-memory [`ConversationStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: RwLock<FxHashMap<String, Conversation>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.read().get(conversation_id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_conversation<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> R {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id));
        let result = f(conversation);
        conversation.touch();
        result
    }
}

impl ConversationStore for MemoryStore {
    fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    fn insert_message(&self, conversation_id: &str, index: Option<usize>, message: Message) {
        self.with_conversation(conversation_id, |conversation| {
            let len = conversation.messages.len();
            let at = index.map_or(len, |i| i.min(len));
            conversation.messages.insert(at, message);
        });
    }

    fn update_message(&self, conversation_id: &str, message: &Message) -> bool {
        let mut conversations = self.conversations.write();
        let Some(conversation) = conversations.get_mut(conversation_id) else {
            return false;
        };
        let Some(slot) = conversation.messages.iter_mut().find(|m| m.id == message.id) else {
            return false;
        };
        slot.clone_from(message);
        conversation.touch();
        true
    }

    fn remove_message(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        let mut conversations = self.conversations.write();
        let conversation = conversations.get_mut(conversation_id)?;
        let position = conversation.messages.iter().position(|m| m.id == message_id)?;
        conversation.touch();
        Some(conversation.messages.remove(position))
    }

    fn set_loading(&self, conversation_id: &str, loading: bool) {
        self.with_conversation(conversation_id, |conversation| conversation.loading = loading);
    }

    fn is_loading(&self, conversation_id: &str) -> bool {
        self.conversations
            .read()
            .get(conversation_id)
            .is_some_and(|c| c.loading)
    }

    fn clear(&self, conversation_id: &str) {
        let mut conversations = self.conversations.write();
        if let Some(conversation) = conversations.get_mut(conversation_id) {
            conversation.messages.clear();
            conversation.loading = false;
            conversation.touch();
        }
    }
}
