use futures::{SinkExt, StreamExt};
use snafu::{ResultExt, ensure};
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::payload::{APP_ID, OutboundPayload, SYSTEM_PROMPT};
use super::provider::{
    ChatBackend, ConnectSnafu, EmptyRequestSnafu, EncodeTaskSnafu, InvalidEndpointSnafu,
    SendPayloadSnafu, SerializePayloadSnafu, SessionEvent, SessionEventSender,
    SessionFailure, SessionRequest, SessionResult, SessionStreamHandle, SessionWorker,
    StreamEventPayload, StreamSessionId, make_event_stream,
};

/// The chatbot backend every session talks to.
pub const BACKEND_URL: &str = "wss://api.danzin.ai/chat";

#[derive(Debug, Clone, PartialEq, Eq)]
struct BackendConfig {
    endpoint: String,
    app_id: String,
    system_prompt: String,
}

/// How an inbound frame affects the session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameOutcome {
    Forward(StreamEventPayload),
    Ignore,
}

pub struct WebSocketBackend {
    config: BackendConfig,
}

impl WebSocketBackend {
    pub fn new() -> Self {
        Self::with_endpoint(BACKEND_URL)
    }

    /// Points the backend somewhere else; used to wire local servers in tests.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            config: BackendConfig {
                endpoint: endpoint.into().trim().to_string(),
                app_id: APP_ID.to_string(),
                system_prompt: SYSTEM_PROMPT.to_string(),
            },
        }
    }

    fn emit(
        event_tx: &SessionEventSender,
        session_id: StreamSessionId,
        payload: StreamEventPayload,
    ) -> bool {
        event_tx.send(SessionEvent { session_id, payload }).is_ok()
    }

    fn emit_failure(
        event_tx: &SessionEventSender,
        session_id: StreamSessionId,
        failure: SessionFailure,
    ) {
        let _ = Self::emit(event_tx, session_id, StreamEventPayload::Error(failure));
    }

    async fn encode_payload(
        config: &BackendConfig,
        request: SessionRequest,
    ) -> SessionResult<String> {
        let app_id = config.app_id.clone();
        let system_prompt = config.system_prompt.clone();

        // Base64 of a multi-megabyte image should not stall the runtime thread.
        let payload = tokio::task::spawn_blocking(move || {
            OutboundPayload::from_request(&request, &app_id, &system_prompt)
        })
        .await
        .context(EncodeTaskSnafu {
            stage: "encode-payload",
        })?;

        serde_json::to_string(&payload).context(SerializePayloadSnafu {
            stage: "serialize-payload",
        })
    }

    fn map_frame(frame: WsMessage) -> FrameOutcome {
        match frame {
            WsMessage::Text(text) => {
                FrameOutcome::Forward(StreamEventPayload::Chunk(text.as_str().to_owned()))
            }
            WsMessage::Binary(bytes) => FrameOutcome::Forward(StreamEventPayload::Chunk(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            WsMessage::Close(frame) => FrameOutcome::Forward(Self::map_close(frame.as_ref())),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => FrameOutcome::Ignore,
        }
    }

    fn map_close(frame: Option<&CloseFrame>) -> StreamEventPayload {
        match frame {
            Some(frame) if frame.code == CloseCode::Normal => StreamEventPayload::Done,
            Some(frame) => {
                tracing::warn!(
                    close_code = u16::from(frame.code),
                    reason = %frame.reason.as_str(),
                    "backend closed the session abnormally"
                );
                StreamEventPayload::Error(SessionFailure::abnormal_close())
            }
            None => {
                tracing::warn!("backend closed the session without a status code");
                StreamEventPayload::Error(SessionFailure::abnormal_close())
            }
        }
    }

    /// A peer that vanishes without a close frame is an abnormal close, not a transport fault.
    fn map_read_error(error: &WsError) -> StreamEventPayload {
        match error {
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            | WsError::ConnectionClosed
            | WsError::AlreadyClosed => {
                StreamEventPayload::Error(SessionFailure::abnormal_close())
            }
            _ => StreamEventPayload::Error(SessionFailure::transport()),
        }
    }

    async fn run_session_worker(
        config: BackendConfig,
        request: SessionRequest,
        event_tx: SessionEventSender,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let session_id = request.session_id;

        let connected = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(session_id = ?session_id, "session cancelled before connecting");
                return;
            }
            connected = connect_async(config.endpoint.as_str()) => connected,
        };

        let socket = match connected.context(ConnectSnafu {
            stage: "connect",
            endpoint: config.endpoint.clone(),
        }) {
            Ok((socket, _response)) => socket,
            Err(error) => {
                tracing::warn!(session_id = ?session_id, error = %error, "failed to open session");
                Self::emit_failure(&event_tx, session_id, SessionFailure::transport());
                return;
            }
        };
        tracing::info!(session_id = ?session_id, endpoint = %config.endpoint, "session connected");

        let (mut sink, mut source) = socket.split();

        let sent = match Self::encode_payload(&config, request).await {
            Ok(payload) => sink
                .send(WsMessage::Text(payload.into()))
                .await
                .context(SendPayloadSnafu {
                    stage: "send-payload",
                }),
            Err(error) => Err(error),
        };
        if let Err(error) = sent {
            tracing::warn!(session_id = ?session_id, error = %error, "failed to send payload");
            Self::emit_failure(&event_tx, session_id, SessionFailure::transport());
            let _ = sink.close().await;
            return;
        }

        if !Self::emit(&event_tx, session_id, StreamEventPayload::PayloadSent) {
            let _ = sink.close().await;
            return;
        }

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(session_id = ?session_id, "session cancelled");
                    let _ = sink.close().await;
                    return;
                }
                next_frame = source.next() => {
                    let payload = match next_frame {
                        Some(Ok(frame)) => match Self::map_frame(frame) {
                            FrameOutcome::Forward(payload) => payload,
                            FrameOutcome::Ignore => continue,
                        },
                        Some(Err(error)) => {
                            tracing::warn!(session_id = ?session_id, error = %error, "session read failed");
                            Self::map_read_error(&error)
                        }
                        None => {
                            tracing::warn!(session_id = ?session_id, "session ended without a close frame");
                            StreamEventPayload::Error(SessionFailure::abnormal_close())
                        }
                    };

                    let terminal = payload.is_terminal();
                    if matches!(payload, StreamEventPayload::Done) {
                        tracing::info!(session_id = ?session_id, "session completed");
                    }
                    if !Self::emit(&event_tx, session_id, payload) || terminal {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for WebSocketBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatBackend for WebSocketBackend {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn open_session(&self, request: SessionRequest) -> SessionResult<SessionStreamHandle> {
        let endpoint = self.config.endpoint.as_str();
        ensure!(
            endpoint.starts_with("ws://") || endpoint.starts_with("wss://"),
            InvalidEndpointSnafu {
                stage: "open-session",
                endpoint,
            }
        );
        ensure!(
            !request.message.trim().is_empty() || request.image.is_some(),
            EmptyRequestSnafu {
                stage: "open-session",
                session_id: request.session_id,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.session_id);
        let worker: SessionWorker = Box::pin(Self::run_session_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(SessionStreamHandle { stream, worker })
    }
}
