use chrono::{DateTime, Utc};

use super::ids::{ConversationId, MessageId};

/// Title shown until the conversation has a user message to derive one from.
pub const DEFAULT_CONVERSATION_TITLE: &str = "Nova Conversa";

/// Number of leading words of the first user message used as a title.
pub const TITLE_WORD_LIMIT: usize = 4;

/// Store-local speaker role, decoupled from any rendering concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl Message {
    pub fn is_user(&self) -> bool {
        matches!(self.role, MessageRole::User)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub image_url: Option<String>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            image_url: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            image_url: None,
        }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    pub fn message(&self, message_id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Result of removing a conversation from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub active_conversation_id: ConversationId,
    pub created_greeting: bool,
}

/// Derives the display title from the first non-empty user message.
pub fn derive_title(messages: &[Message]) -> String {
    let Some(first_user_message) = messages
        .iter()
        .find(|message| message.is_user() && !message.content.trim().is_empty())
    else {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    };

    let words = first_user_message.content.split_whitespace().collect::<Vec<_>>();
    let mut title = words
        .iter()
        .take(TITLE_WORD_LIMIT)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > TITLE_WORD_LIMIT {
        title.push_str("...");
    }
    title
}
