use danzin_storage::Conversation;

use crate::chat::sidebar::SidebarEntry;

/// Presentation boundary the controller drives.
///
/// Rendering, scrolling and the typing indicator live behind this trait; every method
/// must tolerate repeated calls.
pub trait ChatSurface {
    /// The message list of `conversation` changed and should be re-rendered.
    fn conversation_changed(&mut self, _conversation: &Conversation) {}
    fn scroll_to_bottom(&mut self) {}
    /// Busy means an exchange is in flight and input should be disabled.
    fn busy_changed(&mut self, _busy: bool) {}
    fn conversations_changed(&mut self, _entries: &[SidebarEntry]) {}
}

/// Surface that renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl ChatSurface for NullSurface {}
