use std::sync::Arc;

use chrono::{DateTime, Utc};
use danzin_llm::{
    ChatBackend, ImageAttachment, SessionEventStream, SessionFailure, SessionRequest,
    StreamEventPayload, StreamSessionId,
};
use danzin_storage::{
    Conversation, ConversationId, ConversationStore, DeleteOutcome, MemoryStore, MessageId,
    NewMessage,
};
use snafu::ResultExt;
use tokio::task::JoinHandle;

use crate::chat::error::{ChatResult, StoreSnafu};
use crate::chat::events::StreamEventMapped;
use crate::chat::input::Submission;
use crate::chat::message::{ExchangeState, ExchangeTransition, StreamTarget};
use crate::chat::preview::PreviewRegistry;
use crate::chat::sidebar::{SidebarEntry, sidebar_entries};
use crate::chat::surface::ChatSurface;
use crate::settings::ClientSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    /// Another exchange is still in flight.
    Busy,
    EmptyInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Started {
        conversation_id: ConversationId,
        user_message_id: MessageId,
        assistant_message_id: MessageId,
    },
    Rejected(SendRejection),
}

/// Bookkeeping for the exchange currently streaming into a placeholder message.
struct ActiveExchange {
    target: StreamTarget,
    assistant_message_id: MessageId,
    buffer: String,
    stream: Option<SessionEventStream>,
    worker: Option<JoinHandle<()>>,
    preview_uri: Option<String>,
}

/// Single owner of conversations and the in-flight exchange.
///
/// All mutations happen on the task that drives [`ChatController::next_stream_event`] and
/// [`ChatController::handle_stream_event`]; session workers only talk through their event
/// channel.
pub struct ChatController {
    store: MemoryStore,
    backend: Arc<dyn ChatBackend>,
    surface: Box<dyn ChatSurface>,
    previews: PreviewRegistry,
    exchange_state: ExchangeState,
    active_exchange: Option<ActiveExchange>,
    next_stream_session_id: u64,
}

impl ChatController {
    pub fn new(
        store: MemoryStore,
        backend: Arc<dyn ChatBackend>,
        surface: Box<dyn ChatSurface>,
    ) -> Self {
        Self {
            store,
            backend,
            surface,
            previews: PreviewRegistry::new(),
            exchange_state: ExchangeState::Idle,
            active_exchange: None,
            next_stream_session_id: 1,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    /// True from a successful send until the exchange finishes or is cancelled.
    pub fn is_busy(&self) -> bool {
        !self.exchange_state.is_idle()
    }

    pub fn exchange_state(&self) -> ExchangeState {
        self.exchange_state
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.store.active_conversation()
    }

    /// Sidebar rows labelled against the store's clock.
    pub fn sidebar_entries(&self) -> Vec<SidebarEntry> {
        self.sidebar_entries_at(self.store.now())
    }

    pub fn sidebar_entries_at(&self, now: DateTime<Utc>) -> Vec<SidebarEntry> {
        sidebar_entries(&self.store, now)
    }

    /// Applies the greeting to conversations created from now on.
    pub fn apply_settings(&mut self, settings: &ClientSettings) {
        self.store.set_greeting(settings.greeting.clone());
    }

    /// Re-renders the active conversation and the sidebar.
    pub fn refresh(&mut self) {
        self.refresh_conversation(self.store.active_conversation_id(), true);
        self.publish_sidebar();
    }

    /// Starts one exchange in the active conversation.
    ///
    /// Appends the user message and an empty assistant placeholder, then opens a session.
    /// Nothing is touched when the controller is busy or the input is empty.
    pub fn send_message(
        &mut self,
        text: &str,
        image: Option<ImageAttachment>,
    ) -> ChatResult<SendOutcome> {
        if !self.exchange_state.is_idle() {
            tracing::debug!("ignoring send while an exchange is in flight");
            return Ok(SendOutcome::Rejected(SendRejection::Busy));
        }

        let Some(submission) = Submission::new(text, image) else {
            return Ok(SendOutcome::Rejected(SendRejection::EmptyInput));
        };

        let conversation_id = self.store.active_conversation_id();
        let preview_uri = submission
            .image
            .clone()
            .map(|image| self.previews.register(image));

        let appended =
            self.append_exchange_messages(conversation_id, &submission, preview_uri.as_deref());
        let (user_message_id, assistant_message_id) = match appended {
            Ok(ids) => ids,
            Err(error) => {
                if let Some(uri) = &preview_uri {
                    self.previews.release(uri);
                }
                return Err(error);
            }
        };

        let session_id = StreamSessionId::new(self.next_stream_session_id);
        // Reserve the id right away so a later send never reuses a target.
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);
        let target = StreamTarget::new(conversation_id, session_id);

        match self.exchange_state.apply(ExchangeTransition::Start(target)) {
            Ok(next_state) => self.exchange_state = next_state,
            Err(rejection) => {
                tracing::warn!(?rejection, "exchange start rejected");
                return Ok(SendOutcome::Rejected(SendRejection::Busy));
            }
        }

        self.active_exchange = Some(ActiveExchange {
            target,
            assistant_message_id,
            buffer: String::new(),
            stream: None,
            worker: None,
            preview_uri,
        });

        tracing::info!(
            conversation_id = %conversation_id,
            session_id = session_id.0,
            has_image = submission.has_image(),
            "starting exchange"
        );

        self.refresh_conversation(conversation_id, true);
        self.surface.busy_changed(true);
        self.publish_sidebar();

        let mut request =
            SessionRequest::new(session_id, conversation_id.to_string(), submission.text);
        if let Some(image) = submission.image {
            request = request.with_image(image);
        }

        match self.backend.open_session(request) {
            Ok(handle) => {
                if let Some(active) = self.active_exchange.as_mut() {
                    active.worker = Some(tokio::spawn(handle.worker));
                    active.stream = Some(handle.stream);
                }
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to open chat session"
                );
                self.finish_exchange(target, Some(SessionFailure::transport()));
            }
        }

        Ok(SendOutcome::Started {
            conversation_id,
            user_message_id,
            assistant_message_id,
        })
    }

    /// Waits for the next event of the in-flight session. Never resolves while idle.
    pub async fn next_stream_event(&mut self) -> StreamEventMapped {
        let Some(active) = self.active_exchange.as_mut() else {
            return std::future::pending().await;
        };
        let target = active.target;
        let Some(stream) = active.stream.as_mut() else {
            return std::future::pending().await;
        };

        match stream.recv().await {
            Some(event) => StreamEventMapped::new(
                StreamTarget::new(target.conversation_id, event.session_id),
                event.payload,
            ),
            None => {
                tracing::warn!(
                    session_id = target.session_id.0,
                    "session channel closed without a terminal event"
                );
                StreamEventMapped::channel_closed(target)
            }
        }
    }

    pub fn handle_stream_event(&mut self, event: StreamEventMapped) {
        if !self.exchange_state.accepts_stream_event(event.target) {
            // Late events from a cancelled or finished session.
            tracing::debug!(
                conversation_id = %event.target.conversation_id,
                session_id = event.target.session_id.0,
                "dropping stale stream event"
            );
            return;
        }

        let target = event.target;
        match event.payload {
            StreamEventPayload::PayloadSent => {
                if let Ok(next_state) = self
                    .exchange_state
                    .apply(ExchangeTransition::Sent(target))
                {
                    self.exchange_state = next_state;
                }
                tracing::info!(session_id = target.session_id.0, "payload sent");
            }
            StreamEventPayload::Chunk(chunk) => self.append_chunk(target, &chunk),
            StreamEventPayload::Done => self.finish_exchange(target, None),
            StreamEventPayload::Error(failure) => self.finish_exchange(target, Some(failure)),
        }
    }

    /// Creates a greeting conversation and makes it active.
    pub fn start_new_chat(&mut self) -> ChatResult<ConversationId> {
        let greeting = self.store.greeting().to_string();
        let conversation_id = self.store.new_conversation(&greeting);
        self.store
            .set_active(conversation_id)
            .context(StoreSnafu {
                stage: "activate-new-conversation",
            })?;

        self.refresh_conversation(conversation_id, true);
        self.publish_sidebar();
        Ok(conversation_id)
    }

    /// Activates another conversation; an in-flight exchange keeps streaming into its own.
    pub fn switch_conversation(&mut self, conversation_id: ConversationId) -> ChatResult<()> {
        self.store
            .set_active(conversation_id)
            .context(StoreSnafu {
                stage: "switch-conversation",
            })?;

        self.refresh_conversation(conversation_id, true);
        self.publish_sidebar();
        Ok(())
    }

    /// Deletes a conversation, cancelling the exchange streaming into it.
    pub fn delete_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> ChatResult<DeleteOutcome> {
        if self.store.conversation(conversation_id).is_some()
            && self
                .exchange_state
                .active_target()
                .is_some_and(|target| target.conversation_id == conversation_id)
        {
            self.cancel_exchange("conversation-deleted");
        }

        let outcome = self
            .store
            .delete_conversation(conversation_id)
            .context(StoreSnafu {
                stage: "delete-conversation",
            })?;

        self.refresh_conversation(outcome.active_conversation_id, true);
        self.publish_sidebar();
        Ok(outcome)
    }

    /// Cancels any in-flight exchange before the controller goes away.
    pub fn shutdown(&mut self) {
        self.cancel_exchange("shutdown");
    }

    fn append_exchange_messages(
        &mut self,
        conversation_id: ConversationId,
        submission: &Submission,
        preview_uri: Option<&str>,
    ) -> ChatResult<(MessageId, MessageId)> {
        let mut user_message = NewMessage::user(submission.text.clone());
        if let Some(uri) = preview_uri {
            user_message = user_message.with_image_url(uri);
        }

        let user_message = self
            .store
            .add_message(conversation_id, user_message)
            .context(StoreSnafu {
                stage: "append-user-message",
            })?;
        let assistant_message = self
            .store
            .add_message(conversation_id, NewMessage::assistant(String::new()))
            .context(StoreSnafu {
                stage: "append-assistant-placeholder",
            })?;

        Ok((user_message.id, assistant_message.id))
    }

    fn append_chunk(&mut self, target: StreamTarget, chunk: &str) {
        let Some(active) = self
            .active_exchange
            .as_mut()
            .filter(|active| active.target == target)
        else {
            return;
        };

        active.buffer.push_str(chunk);
        let content = active.buffer.clone();
        let assistant_message_id = active.assistant_message_id;

        if let Err(error) =
            self.store
                .update_message_content(target.conversation_id, assistant_message_id, content)
        {
            tracing::debug!(error = %error, "placeholder vanished, chunk not stored");
            return;
        }

        self.refresh_conversation(target.conversation_id, true);
    }

    fn finish_exchange(&mut self, target: StreamTarget, failure: Option<SessionFailure>) {
        let Some(active) = self
            .active_exchange
            .take_if(|active| active.target == target)
        else {
            return;
        };

        let transition = if failure.is_some() {
            ExchangeTransition::Fail(target)
        } else {
            ExchangeTransition::Complete(target)
        };
        match self.exchange_state.apply(transition) {
            Ok(next_state) => self.exchange_state = next_state,
            Err(rejection) => {
                tracing::debug!(?rejection, "exchange finish rejected");
                self.exchange_state = ExchangeState::Idle;
            }
        }

        match failure {
            Some(failure) => {
                tracing::warn!(
                    conversation_id = %target.conversation_id,
                    session_id = target.session_id.0,
                    kind = ?failure.kind,
                    "exchange failed"
                );
                let content = if active.buffer.is_empty() {
                    failure.message
                } else {
                    format!("{} {}", active.buffer, failure.message)
                };
                if let Err(error) = self.store.update_message_content(
                    target.conversation_id,
                    active.assistant_message_id,
                    content,
                ) {
                    tracing::debug!(error = %error, "placeholder vanished, failure not stored");
                }
            }
            None => tracing::info!(
                conversation_id = %target.conversation_id,
                session_id = target.session_id.0,
                length = active.buffer.len(),
                "exchange complete"
            ),
        }

        self.release_exchange(active);
        self.refresh_conversation(target.conversation_id, false);
        self.surface.busy_changed(false);
        self.publish_sidebar();
    }

    fn cancel_exchange(&mut self, reason: &'static str) {
        let Some(mut active) = self.active_exchange.take() else {
            return;
        };

        if let Some(stream) = active.stream.as_mut() {
            stream.cancel();
        }
        if let Ok(next_state) = self
            .exchange_state
            .apply(ExchangeTransition::Cancel(active.target))
        {
            self.exchange_state = next_state;
        }
        tracing::info!(
            conversation_id = %active.target.conversation_id,
            session_id = active.target.session_id.0,
            reason,
            "exchange cancelled"
        );

        self.release_exchange(active);
        self.surface.busy_changed(false);
    }

    fn release_exchange(&mut self, active: ActiveExchange) {
        if let Some(uri) = &active.preview_uri {
            self.previews.release(uri);
        }
        // Dropping the stream signals the worker; the worker task itself is left to finish.
        drop(active.worker);
        drop(active.stream);
    }

    fn refresh_conversation(&mut self, conversation_id: ConversationId, scroll: bool) {
        if self.store.active_conversation_id() != conversation_id {
            return;
        }
        let Some(conversation) = self.store.conversation(conversation_id) else {
            return;
        };

        self.surface.conversation_changed(conversation);
        if scroll {
            self.surface.scroll_to_bottom();
        }
    }

    fn publish_sidebar(&mut self) {
        let entries = self.sidebar_entries();
        self.surface.conversations_changed(&entries);
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
