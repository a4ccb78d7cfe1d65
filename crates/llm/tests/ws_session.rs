use std::future::Future;
use std::time::Duration;

use danzin_llm::{
    APP_ID, ABNORMAL_CLOSE_MESSAGE, ChatBackend, FailureKind, ImageAttachment, SessionEventStream,
    SessionRequest, StreamEventPayload, StreamSessionId, TRANSPORT_ERROR_MESSAGE,
    WebSocketBackend,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts one WebSocket client and hands it to `script`.
async fn spawn_backend<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
        script(socket).await;
    });

    (format!("ws://{addr}"), handle)
}

async fn read_payload(socket: &mut WebSocketStream<TcpStream>) -> Value {
    match socket.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a JSON text frame, got {other:?}"),
    }
}

async fn close_with(socket: &mut WebSocketStream<TcpStream>, code: CloseCode) {
    let _ = socket
        .close(Some(CloseFrame {
            code,
            reason: "".into(),
        }))
        .await;
}

fn open(endpoint: &str, request: SessionRequest) -> SessionEventStream {
    let handle = WebSocketBackend::with_endpoint(endpoint)
        .open_session(request)
        .unwrap();
    tokio::spawn(handle.worker);
    handle.stream
}

async fn collect_until_terminal(stream: &mut SessionEventStream) -> Vec<StreamEventPayload> {
    let mut payloads = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, stream.recv())
            .await
            .expect("session event timed out")
            .expect("session channel closed before a terminal event");
        let terminal = event.payload.is_terminal();
        payloads.push(event.payload);
        if terminal {
            return payloads;
        }
    }
}

#[tokio::test]
async fn streams_chunks_in_order_and_completes_on_normal_close() {
    let (endpoint, server) = spawn_backend(|mut socket| async move {
        let payload = read_payload(&mut socket).await;
        assert_eq!(payload["chatId"], "chat-1");
        assert_eq!(payload["appId"], APP_ID);
        assert_eq!(payload["message"], "Olá");
        assert!(payload["systemPrompt"].as_str().is_some_and(|p| !p.is_empty()));
        assert!(payload.get("image").is_none());

        for chunk in ["Hel", "lo", "!"] {
            socket.send(Message::Text(chunk.into())).await.unwrap();
        }
        close_with(&mut socket, CloseCode::Normal).await;
    })
    .await;

    let session_id = StreamSessionId::new(7);
    let mut stream = open(&endpoint, SessionRequest::new(session_id, "chat-1", "Olá"));
    let payloads = collect_until_terminal(&mut stream).await;

    assert_eq!(
        payloads,
        vec![
            StreamEventPayload::PayloadSent,
            StreamEventPayload::Chunk("Hel".to_string()),
            StreamEventPayload::Chunk("lo".to_string()),
            StreamEventPayload::Chunk("!".to_string()),
            StreamEventPayload::Done,
        ]
    );
    assert_eq!(stream.session_id(), session_id);
    server.await.unwrap();
}

#[tokio::test]
async fn image_is_sent_as_base64_with_media_type() {
    let (endpoint, server) = spawn_backend(|mut socket| async move {
        let payload = read_payload(&mut socket).await;
        assert_eq!(payload["image"], "R0lGODlh");
        assert_eq!(payload["imageType"], "image/gif");
        close_with(&mut socket, CloseCode::Normal).await;
    })
    .await;

    let request = SessionRequest::new(StreamSessionId::new(1), "chat-img", "")
        .with_image(ImageAttachment::new(b"GIF89a".to_vec(), "image/gif"));
    let mut stream = open(&endpoint, request);
    let payloads = collect_until_terminal(&mut stream).await;

    assert_eq!(payloads.last(), Some(&StreamEventPayload::Done));
    server.await.unwrap();
}

#[tokio::test]
async fn non_normal_close_reports_abnormal_failure_once() {
    let (endpoint, server) = spawn_backend(|mut socket| async move {
        let _ = read_payload(&mut socket).await;
        socket.send(Message::Text("Hel".into())).await.unwrap();
        close_with(&mut socket, CloseCode::Error).await;
    })
    .await;

    let mut stream = open(
        &endpoint,
        SessionRequest::new(StreamSessionId::new(2), "chat-2", "oi"),
    );
    let payloads = collect_until_terminal(&mut stream).await;

    assert_eq!(payloads[1], StreamEventPayload::Chunk("Hel".to_string()));
    match payloads.last() {
        Some(StreamEventPayload::Error(failure)) => {
            assert_eq!(failure.kind, FailureKind::AbnormalClose);
            assert_eq!(failure.message, ABNORMAL_CLOSE_MESSAGE);
        }
        other => panic!("expected abnormal close, got {other:?}"),
    }

    // The worker stops after the terminal event, closing the channel.
    let after = tokio::time::timeout(EVENT_TIMEOUT, stream.recv()).await.unwrap();
    assert!(after.is_none());
    server.await.unwrap();
}

#[tokio::test]
async fn dropped_connection_without_close_frame_reports_abnormal_failure() {
    let (endpoint, server) = spawn_backend(|mut socket| async move {
        let _ = read_payload(&mut socket).await;
        socket.send(Message::Text("Hel".into())).await.unwrap();
        drop(socket);
    })
    .await;

    let mut stream = open(
        &endpoint,
        SessionRequest::new(StreamSessionId::new(5), "chat-5", "oi"),
    );
    let payloads = collect_until_terminal(&mut stream).await;

    assert_eq!(payloads[0], StreamEventPayload::PayloadSent);
    assert_eq!(payloads[1], StreamEventPayload::Chunk("Hel".to_string()));
    match payloads.last() {
        Some(StreamEventPayload::Error(failure)) => {
            assert_eq!(failure.kind, FailureKind::AbnormalClose);
            assert_eq!(failure.message, ABNORMAL_CLOSE_MESSAGE);
        }
        other => panic!("expected abnormal close, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn connection_refused_reports_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut stream = open(
        &format!("ws://{addr}"),
        SessionRequest::new(StreamSessionId::new(3), "chat-3", "oi"),
    );
    let payloads = collect_until_terminal(&mut stream).await;

    assert_eq!(payloads.len(), 1);
    match &payloads[0] {
        StreamEventPayload::Error(failure) => {
            assert_eq!(failure.kind, FailureKind::TransportError);
            assert_eq!(failure.message, TRANSPORT_ERROR_MESSAGE);
        }
        other => panic!("expected transport failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_closes_connection_without_terminal_event() {
    let (endpoint, server) = spawn_backend(|mut socket| async move {
        let _ = read_payload(&mut socket).await;
        socket.send(Message::Text("parcial".into())).await.unwrap();
        // Wait for the client to hang up.
        while let Some(Ok(frame)) = socket.next().await {
            if frame.is_close() {
                break;
            }
        }
    })
    .await;

    let mut stream = open(
        &endpoint,
        SessionRequest::new(StreamSessionId::new(4), "chat-4", "oi"),
    );

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = tokio::time::timeout(EVENT_TIMEOUT, stream.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(event.payload);
    }
    assert_eq!(seen[1], StreamEventPayload::Chunk("parcial".to_string()));

    assert!(stream.cancel());
    let after = tokio::time::timeout(EVENT_TIMEOUT, stream.recv()).await.unwrap();
    assert!(after.is_none());

    tokio::time::timeout(EVENT_TIMEOUT, server).await.unwrap().unwrap();
}
