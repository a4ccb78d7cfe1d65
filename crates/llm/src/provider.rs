use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::payload::ImageAttachment;

/// Fallback text appended when the connection itself fails.
pub const TRANSPORT_ERROR_MESSAGE: &str = "Erro de conexão. Tente novamente.";
/// Fallback text appended when the backend closes with a non-success status.
pub const ABNORMAL_CLOSE_MESSAGE: &str =
    "A conexão foi encerrada inesperadamente. Tente novamente.";

/// Identifier for one streaming exchange.
///
/// Callers must mint a fresh one per send so late events from older sessions can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub session_id: StreamSessionId,
    pub chat_id: String,
    pub message: String,
    pub image: Option<ImageAttachment>,
}

impl SessionRequest {
    pub fn new(
        session_id: StreamSessionId,
        chat_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            chat_id: chat_id.into(),
            message: message.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    TransportError,
    AbnormalClose,
}

impl FailureKind {
    pub fn fallback_message(self) -> &'static str {
        match self {
            Self::TransportError => TRANSPORT_ERROR_MESSAGE,
            Self::AbnormalClose => ABNORMAL_CLOSE_MESSAGE,
        }
    }
}

/// Terminal failure of one session, carrying the user-facing fallback text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.fallback_message().to_string(),
        }
    }

    pub fn transport() -> Self {
        Self::new(FailureKind::TransportError)
    }

    pub fn abnormal_close() -> Self {
        Self::new(FailureKind::AbnormalClose)
    }
}

/// Backend-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    /// The outbound payload left the client; no chunk precedes this.
    PayloadSent,
    Chunk(String),
    Done,
    Error(SessionFailure),
}

impl StreamEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: StreamSessionId,
    pub payload: StreamEventPayload,
}

pub type SessionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("endpoint '{endpoint}' is not a ws:// or wss:// URL"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
    },
    #[snafu(display("session {session_id:?} has neither text nor image to send"))]
    EmptyRequest {
        stage: &'static str,
        session_id: StreamSessionId,
    },
    #[snafu(display("failed to connect to '{endpoint}' on `{stage}`: {source}"))]
    Connect {
        stage: &'static str,
        endpoint: String,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[snafu(display("payload encoding task failed on `{stage}`: {source}"))]
    EncodeTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("failed to serialize outbound payload on `{stage}`: {source}"))]
    SerializePayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to send outbound payload on `{stage}`: {source}"))]
    SendPayload {
        stage: &'static str,
        source: tokio_tungstenite::tungstenite::Error,
    },
}

/// Receiving half of one session, owned by the caller.
///
/// Dropping it cancels the worker.
pub struct SessionEventStream {
    session_id: StreamSessionId,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct SessionStreamHandle {
    pub stream: SessionEventStream,
    pub worker: SessionWorker,
}

impl SessionEventStream {
    pub(crate) fn new(
        session_id: StreamSessionId,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            session_id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn session_id(&self) -> StreamSessionId {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Force-closes the connection. No event is guaranteed after this.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for SessionEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait ChatBackend: Send + Sync {
    fn endpoint(&self) -> &str;
    fn open_session(&self, request: SessionRequest) -> SessionResult<SessionStreamHandle>;
}

/// Builds the channel pair shared by a session worker and its caller.
pub fn make_event_stream(
    session_id: StreamSessionId,
) -> (SessionEventSender, SessionEventStream, oneshot::Receiver<()>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        SessionEventStream::new(session_id, event_rx, cancel_tx),
        cancel_rx,
    )
}
