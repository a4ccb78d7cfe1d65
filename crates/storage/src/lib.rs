pub mod clock;
pub mod error;
pub mod ids;
pub mod memory;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use ids::{ConversationId, MessageId};
pub use memory::MemoryStore;
pub use types::{
    Conversation, DEFAULT_CONVERSATION_TITLE, DeleteOutcome, Message, MessageRole, NewMessage,
    TITLE_WORD_LIMIT, derive_title,
};

/// In-memory conversation bookkeeping behind the chat controller.
pub trait ConversationStore {
    /// Appends a message and bumps the conversation's `last_updated`.
    fn add_message(
        &mut self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StoreResult<Message>;
    /// Replaces the content of exactly one message.
    fn update_message_content(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: String,
    ) -> StoreResult<()>;
    /// Prepends a conversation holding a single assistant greeting.
    fn new_conversation(&mut self, greeting: &str) -> ConversationId;
    fn delete_conversation(&mut self, conversation_id: ConversationId)
    -> StoreResult<DeleteOutcome>;
    /// Snapshot ordered by `last_updated` descending, stable over insertion order.
    fn list_sorted(&self) -> Vec<Conversation>;
    fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation>;
    fn active_conversation_id(&self) -> ConversationId;
    fn set_active(&mut self, conversation_id: ConversationId) -> StoreResult<()>;
    fn len(&self) -> usize;
}
