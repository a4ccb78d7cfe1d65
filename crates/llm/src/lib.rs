use std::sync::Arc;

mod payload;
mod provider;
mod ws_adapter;

pub use payload::{APP_ID, EncodedImage, ImageAttachment, OutboundPayload, SYSTEM_PROMPT};
pub use provider::{
    ABNORMAL_CLOSE_MESSAGE, ChatBackend, FailureKind, SessionError, SessionEvent,
    SessionEventSender, SessionEventStream, SessionFailure, SessionRequest, SessionResult,
    SessionStreamHandle, SessionWorker, StreamEventPayload, StreamSessionId,
    TRANSPORT_ERROR_MESSAGE, make_event_stream,
};
pub use ws_adapter::{BACKEND_URL, WebSocketBackend};

/// Backend wired to the fixed production endpoint.
pub fn create_backend() -> Arc<dyn ChatBackend> {
    Arc::new(WebSocketBackend::new())
}
