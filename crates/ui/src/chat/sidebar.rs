use chrono::{DateTime, Utc};
use danzin_storage::{ConversationId, ConversationStore};

/// One row of the conversation list, already formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarEntry {
    pub id: ConversationId,
    pub title: String,
    pub updated_label: String,
    pub is_active: bool,
    /// The last remaining conversation cannot be deleted from the list.
    pub can_delete: bool,
}

/// Builds sidebar rows in recency order.
pub fn sidebar_entries(store: &impl ConversationStore, now: DateTime<Utc>) -> Vec<SidebarEntry> {
    let active_conversation_id = store.active_conversation_id();
    let can_delete = store.len() > 1;

    store
        .list_sorted()
        .into_iter()
        .map(|conversation| SidebarEntry {
            id: conversation.id,
            updated_label: format_time_ago(conversation.last_updated, now),
            is_active: conversation.id == active_conversation_id,
            can_delete,
            title: conversation.title,
        })
        .collect()
}

/// Keeps entries whose title contains `query`, ignoring case.
pub fn filter_entries(entries: Vec<SidebarEntry>, query: &str) -> Vec<SidebarEntry> {
    let normalized_query = query.trim().to_lowercase();
    if normalized_query.is_empty() {
        return entries;
    }

    entries
        .into_iter()
        .filter(|entry| entry.title.to_lowercase().contains(&normalized_query))
        .collect()
}

/// Relative recency label in Brazilian Portuguese.
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        return "Agora".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} min atrás");
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h atrás");
    }

    match hours / 24 {
        1 => "Ontem".to_string(),
        days @ 2..=6 => format!("{days} dias atrás"),
        _ => then.format("%d/%m/%Y").to_string(),
    }
}
