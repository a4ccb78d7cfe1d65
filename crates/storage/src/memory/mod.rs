use std::sync::Arc;

use chrono::{DateTime, Utc};
use snafu::OptionExt;

use super::clock::{Clock, SystemClock};
use super::error::{NotFoundSnafu, StoreResult};
use super::ids::{ConversationId, MessageId};
use super::types::{
    Conversation, DeleteOutcome, Message, MessageRole, NewMessage, derive_title,
};
use super::ConversationStore;

/// Vector-backed store; list order is creation order, newest first.
pub struct MemoryStore {
    conversations: Vec<Conversation>,
    active_conversation_id: ConversationId,
    greeting: String,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates a store seeded with one active greeting conversation.
    pub fn new(greeting: impl Into<String>) -> Self {
        Self::with_clock(greeting, Arc::new(SystemClock))
    }

    pub fn with_clock(greeting: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let greeting = greeting.into();
        let seed = Self::greeting_conversation(&greeting, clock.as_ref());
        Self {
            active_conversation_id: seed.id,
            conversations: vec![seed],
            greeting,
            clock,
        }
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Greeting used for conversations created after this call.
    pub fn set_greeting(&mut self, greeting: impl Into<String>) {
        self.greeting = greeting.into();
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.conversation(self.active_conversation_id)
    }

    fn greeting_conversation(greeting: &str, clock: &dyn Clock) -> Conversation {
        let now = clock.now();
        let messages = vec![Message {
            id: MessageId::new_v7(),
            role: MessageRole::Assistant,
            content: greeting.to_string(),
            timestamp: now,
            image_url: None,
        }];

        Conversation {
            id: ConversationId::new_v7(),
            title: derive_title(&messages),
            messages,
            last_updated: now,
        }
    }

    fn conversation_mut(
        &mut self,
        conversation_id: ConversationId,
        stage: &'static str,
    ) -> StoreResult<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
            .context(NotFoundSnafu {
                stage,
                entity: "conversation",
                id: conversation_id.to_string(),
            })
    }

    fn most_recent_conversation_id(&self) -> Option<ConversationId> {
        // `max_by_key` keeps the last maximum, so fold to keep the first one in list order.
        self.conversations
            .iter()
            .fold(None::<&Conversation>, |best, candidate| match best {
                Some(best) if best.last_updated >= candidate.last_updated => Some(best),
                _ => Some(candidate),
            })
            .map(|conversation| conversation.id)
    }
}

impl ConversationStore for MemoryStore {
    fn add_message(
        &mut self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StoreResult<Message> {
        let now = self.clock.now();
        let conversation = self.conversation_mut(conversation_id, "add-message")?;

        // Recency never moves backwards, even if the clock does.
        let timestamp = now.max(conversation.last_updated);
        let message = Message {
            id: MessageId::new_v7(),
            role: input.role,
            content: input.content,
            timestamp,
            image_url: input.image_url,
        };

        conversation.messages.push(message.clone());
        conversation.last_updated = timestamp;
        conversation.title = derive_title(&conversation.messages);
        Ok(message)
    }

    fn update_message_content(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: String,
    ) -> StoreResult<()> {
        let conversation = self.conversation_mut(conversation_id, "update-message-content")?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|message| message.id == message_id)
            .context(NotFoundSnafu {
                stage: "update-message-content",
                entity: "message",
                id: message_id.to_string(),
            })?;

        message.content = content;
        Ok(())
    }

    fn new_conversation(&mut self, greeting: &str) -> ConversationId {
        let conversation = Self::greeting_conversation(greeting, self.clock.as_ref());
        let conversation_id = conversation.id;
        self.conversations.insert(0, conversation);
        tracing::debug!(conversation_id = %conversation_id, "created conversation");
        conversation_id
    }

    fn delete_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> StoreResult<DeleteOutcome> {
        let index = self
            .conversations
            .iter()
            .position(|conversation| conversation.id == conversation_id)
            .context(NotFoundSnafu {
                stage: "delete-conversation",
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;
        self.conversations.remove(index);

        let was_active = self.active_conversation_id == conversation_id;
        let mut created_greeting = false;

        if let Some(next_active) = self.most_recent_conversation_id() {
            if was_active {
                self.active_conversation_id = next_active;
            }
        } else {
            let greeting = self.greeting.clone();
            self.active_conversation_id = self.new_conversation(&greeting);
            created_greeting = true;
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            active_conversation_id = %self.active_conversation_id,
            created_greeting,
            "deleted conversation"
        );

        Ok(DeleteOutcome {
            active_conversation_id: self.active_conversation_id,
            created_greeting,
        })
    }

    fn list_sorted(&self) -> Vec<Conversation> {
        let mut sorted = self.conversations.clone();
        sorted.sort_by(|left, right| right.last_updated.cmp(&left.last_updated));
        sorted
    }

    fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
    }

    fn active_conversation_id(&self) -> ConversationId {
        self.active_conversation_id
    }

    fn set_active(&mut self, conversation_id: ConversationId) -> StoreResult<()> {
        self.conversation_mut(conversation_id, "set-active")?;
        self.active_conversation_id = conversation_id;
        Ok(())
    }

    fn len(&self) -> usize {
        self.conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::types::DEFAULT_CONVERSATION_TITLE;

    const GREETING: &str = "Olá! Como posso ajudá-lo hoje?";

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn store_at(seconds: i64) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(at(seconds));
        let store = MemoryStore::with_clock(GREETING, Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn new_store_has_one_active_greeting_conversation() {
        let (store, _) = store_at(0);
        assert_eq!(store.len(), 1);

        let active = store.active_conversation().unwrap();
        assert_eq!(active.messages.len(), 1);
        assert_eq!(active.messages[0].content, GREETING);
        assert!(!active.messages[0].is_user());
        assert_eq!(active.title, DEFAULT_CONVERSATION_TITLE);
    }

    #[test]
    fn now_follows_injected_clock() {
        let (store, clock) = store_at(0);
        assert_eq!(store.now(), at(0));
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(store.now(), at(300));
    }

    #[test]
    fn last_updated_tracks_latest_append() {
        let (mut store, clock) = store_at(0);
        let conversation_id = store.active_conversation_id();

        for step in 1..=5 {
            clock.set(at(step * 10));
            let message = store
                .add_message(conversation_id, NewMessage::user(format!("msg {step}")))
                .unwrap();
            let conversation = store.conversation(conversation_id).unwrap();
            assert_eq!(conversation.last_updated, message.timestamp);
            assert_eq!(conversation.last_updated, at(step * 10));
        }
    }

    #[test]
    fn clock_going_backwards_keeps_recency_monotonic() {
        let (mut store, clock) = store_at(100);
        let conversation_id = store.active_conversation_id();

        clock.set(at(50));
        let message = store
            .add_message(conversation_id, NewMessage::user("late"))
            .unwrap();

        let conversation = store.conversation(conversation_id).unwrap();
        assert_eq!(message.timestamp, at(100));
        assert_eq!(conversation.last_updated, message.timestamp);
    }

    #[test]
    fn add_message_derives_title() {
        let (mut store, _) = store_at(0);
        let conversation_id = store.active_conversation_id();
        store
            .add_message(
                conversation_id,
                NewMessage::user("você pode me ajudar com rust hoje"),
            )
            .unwrap();

        assert_eq!(
            store.conversation(conversation_id).unwrap().title,
            "você pode me ajudar..."
        );
    }

    #[test]
    fn add_message_to_unknown_conversation_is_not_found() {
        let (mut store, _) = store_at(0);
        let error = store
            .add_message(ConversationId::new_v7(), NewMessage::user("hi"))
            .unwrap_err();
        assert!(matches!(
            error,
            StoreError::NotFound {
                entity: "conversation",
                ..
            }
        ));
    }

    #[test]
    fn update_message_content_replaces_one_message() {
        let (mut store, _) = store_at(0);
        let conversation_id = store.active_conversation_id();
        let placeholder = store
            .add_message(conversation_id, NewMessage::assistant(""))
            .unwrap();

        store
            .update_message_content(conversation_id, placeholder.id, "Hello".to_string())
            .unwrap();

        let conversation = store.conversation(conversation_id).unwrap();
        assert_eq!(conversation.message(placeholder.id).unwrap().content, "Hello");
        assert_eq!(conversation.messages[0].content, GREETING);
    }

    #[test]
    fn update_of_missing_message_is_not_found() {
        let (mut store, _) = store_at(0);
        let conversation_id = store.active_conversation_id();
        let error = store
            .update_message_content(conversation_id, MessageId::new_v7(), "x".to_string())
            .unwrap_err();
        assert!(matches!(
            error,
            StoreError::NotFound {
                entity: "message",
                ..
            }
        ));
    }

    #[test]
    fn new_conversation_is_prepended_without_activation() {
        let (mut store, _) = store_at(0);
        let first = store.active_conversation_id();
        let second = store.new_conversation("outra saudação");

        assert_eq!(store.len(), 2);
        assert_eq!(store.active_conversation_id(), first);
        assert_eq!(store.list_sorted()[0].id, second);
        assert_eq!(
            store.conversation(second).unwrap().messages[0].content,
            "outra saudação"
        );
    }

    #[test]
    fn deleting_only_conversation_creates_active_greeting() {
        let (mut store, _) = store_at(0);
        let only = store.active_conversation_id();

        let outcome = store.delete_conversation(only).unwrap();

        assert_eq!(store.len(), 1);
        assert!(outcome.created_greeting);
        assert_ne!(outcome.active_conversation_id, only);
        assert_eq!(store.active_conversation_id(), outcome.active_conversation_id);
        let replacement = store.active_conversation().unwrap();
        assert_eq!(replacement.messages[0].content, GREETING);
    }

    #[test]
    fn deleting_non_active_conversation_keeps_active_id() {
        let (mut store, _) = store_at(0);
        let active = store.active_conversation_id();
        let other = store.new_conversation(GREETING);

        let outcome = store.delete_conversation(other).unwrap();

        assert!(!outcome.created_greeting);
        assert_eq!(outcome.active_conversation_id, active);
        assert_eq!(store.active_conversation_id(), active);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deleting_active_moves_to_most_recently_updated() {
        let (mut store, clock) = store_at(0);
        let active = store.active_conversation_id();
        let older = store.new_conversation(GREETING);
        let newer = store.new_conversation(GREETING);

        clock.set(at(30));
        store.add_message(older, NewMessage::user("bump")).unwrap();
        clock.set(at(20));
        store.add_message(newer, NewMessage::user("bump")).unwrap();

        let outcome = store.delete_conversation(active).unwrap();
        assert_eq!(outcome.active_conversation_id, older);
    }

    #[test]
    fn deleting_unknown_conversation_is_not_found() {
        let (mut store, _) = store_at(0);
        assert!(matches!(
            store.delete_conversation(ConversationId::new_v7()),
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_sorted_orders_by_recency_descending() {
        let (mut store, clock) = store_at(0);
        let t3 = store.active_conversation_id();
        let t1 = store.new_conversation(GREETING);
        let t2 = store.new_conversation(GREETING);

        for (conversation_id, seconds) in [(t3, 3), (t1, 1), (t2, 2)] {
            clock.set(at(seconds));
            store
                .add_message(conversation_id, NewMessage::user("update"))
                .unwrap();
        }

        let order = store
            .list_sorted()
            .into_iter()
            .map(|conversation| conversation.id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![t3, t2, t1]);
    }

    #[test]
    fn list_sorted_breaks_ties_by_list_order() {
        let (mut store, _) = store_at(0);
        let first = store.active_conversation_id();
        let second = store.new_conversation(GREETING);

        let order = store
            .list_sorted()
            .into_iter()
            .map(|conversation| conversation.id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![second, first]);
    }

    #[test]
    fn set_active_rejects_unknown_id() {
        let (mut store, _) = store_at(0);
        let active = store.active_conversation_id();
        assert!(store.set_active(ConversationId::new_v7()).is_err());
        assert_eq!(store.active_conversation_id(), active);

        let other = store.new_conversation(GREETING);
        store.set_active(other).unwrap();
        assert_eq!(store.active_conversation_id(), other);
    }
}
