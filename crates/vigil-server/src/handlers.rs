//! Connection handlers for the Vigil server.
//!
//! This module owns the HTTP surface: the realtime WebSocket endpoint, the
//! health check and the recent-events read endpoint.

use crate::config::Config;
use crate::metrics::{self, Direction, SessionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_core::{Bridge, CommandRequest, EventRecord, HubHandle, SessionId, MAX_RECENT};
use vigil_protocol::{codec, ClientFrame, Encoding, Notification, ServerFrame};

/// Shared server state.
pub struct AppState {
    /// The running bridge.
    pub bridge: Bridge,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, bridge: Bridge) -> Self {
        Self { bridge, config }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/events", get(events_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, bridge: Bridge, shutdown: CancellationToken) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let ws_path = config.transport.websocket_path.clone();
    let app = router(Arc::new(AppState::new(config, bridge)));

    let listener = TcpListener::bind(addr).await?;

    info!("Vigil server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.bridge.hub().stats().await.map(|s| s.sessions).ok();
    Json(serde_json::json!({
        "status": if sessions.is_some() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
    }))
}

/// Query parameters for the events endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Number of records to return, clamped to `1..=MAX_RECENT`.
    pub limit: Option<usize>,
}

/// Recent events, newest first.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventRecord>>, (StatusCode, Json<serde_json::Value>)> {
    let limit = query.limit.unwrap_or(MAX_RECENT).clamp(1, MAX_RECENT);

    state
        .bridge
        .store()
        .list_recent(limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "Failed to list recent events");
            metrics::record_error("store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "store_unavailable" })),
            )
        })
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = SessionMetricsGuard::open();

    let session = SessionId::generate();
    let hub = state.bridge.hub().clone();

    let mut outbox = match hub.connect(session.clone()) {
        Ok(outbox) => outbox,
        Err(e) => {
            error!(session = %session, error = %e, "Hub unavailable, closing connection");
            return;
        }
    };

    debug!(session = %session, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies follow the encoding of the last frame the client sent.
    let mut encoding = Encoding::Json;

    if send_frame(&mut sender, &ServerFrame::connected(session.as_str()), encoding)
        .await
        .is_err()
    {
        error!(session = %session, "Failed to send connected frame");
        let _ = hub.disconnect(&session);
        return;
    }

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Frames fanned out by the hub
            frame = outbox.recv() => {
                let Some(frame) = frame else {
                    debug!(session = %session, "Outbox closed by hub");
                    break;
                };
                if send_frame(&mut sender, &frame, encoding).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        encoding = Encoding::Json;
                        metrics::record_frame(Direction::Inbound, text.len());

                        match codec::decode_json::<ClientFrame>(&text) {
                            Ok(frame) => submit(&hub, &session, frame),
                            Err(e) => {
                                warn!(session = %session, error = %e, "Malformed text frame");
                                if reject_frame(&mut sender, encoding).await.is_err() {
                                    break;
                                }
                            }
                        }

                        metrics::record_inbound_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        encoding = Encoding::MessagePack;
                        metrics::record_frame(Direction::Inbound, data.len());
                        read_buffer.extend_from_slice(&data);

                        let mut failed = false;
                        loop {
                            match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                Ok(Some(frame)) => submit(&hub, &session, frame),
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(session = %session, error = %e, "Malformed binary frame");
                                    read_buffer.clear();
                                    failed = true;
                                    break;
                                }
                            }
                        }

                        if failed && reject_frame(&mut sender, encoding).await.is_err() {
                            break;
                        }

                        metrics::record_inbound_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(session = %session, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = hub.disconnect(&session) {
        debug!(session = %session, error = %e, "Hub already stopped");
    }

    debug!(session = %session, "WebSocket disconnected");
}

/// Hand a decoded client frame to the hub as a command request.
fn submit(hub: &HubHandle, session: &SessionId, frame: ClientFrame) {
    debug!(session = %session, event = %frame.event, "Command request");

    if let Err(e) = hub.command_request(session, CommandRequest::from_frame(frame)) {
        error!(session = %session, error = %e, "Failed to submit command");
        metrics::record_error("hub");
    }
}

/// Tell one session that its frame could not be decoded.
async fn reject_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    encoding: Encoding,
) -> Result<()> {
    metrics::record_error("decode");
    let frame = ServerFrame::from(Notification::error("invalid_frame"));
    send_frame(sender, &frame, encoding).await
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
    encoding: Encoding,
) -> Result<()> {
    let message = encode_frame(frame, encoding)?;
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(Direction::Outbound, len);
    sender.send(message).await?;
    Ok(())
}

fn encode_frame(frame: &ServerFrame, encoding: Encoding) -> Result<Message> {
    Ok(match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use vigil_core::{
        Broker, BrokerError, BridgeConfig, CommandValidator, MemoryStore, QoS, RecordStore,
    };

    struct NullBroker;

    #[async_trait]
    impl Broker for NullBroker {
        async fn publish(&self, _: &str, _: Bytes, _: QoS) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn state_with(store: Arc<MemoryStore>) -> Arc<AppState> {
        let bridge = Bridge::start(
            store,
            Arc::new(NullBroker),
            CommandValidator::default(),
            BridgeConfig::default(),
        );
        Arc::new(AppState::new(Config::default(), bridge))
    }

    #[tokio::test]
    async fn test_events_newest_first_and_capped() {
        let store = Arc::new(MemoryStore::new());
        let state = state_with(store.clone());

        for i in 0..(MAX_RECENT + 20) {
            state.bridge.relay("status", i.to_string().as_bytes());
        }
        tokio::time::timeout(Duration::from_secs(1), async {
            while store.len().await < MAX_RECENT + 20 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let Json(records) = events_handler(
            State(Arc::clone(&state)),
            Query(EventsQuery { limit: Some(1000) }),
        )
        .await
        .unwrap();

        assert_eq!(records.len(), MAX_RECENT);
        assert_eq!(records[0].payload, (MAX_RECENT + 19).to_string());
        assert!(records
            .windows(2)
            .all(|w| w[0].received_at > w[1].received_at));

        let Json(records) = events_handler(State(state), Query(EventsQuery { limit: Some(0) }))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_events_default_limit() {
        let store = Arc::new(MemoryStore::new());
        let state = state_with(store.clone());
        state.bridge.relay("status", b"sensor:triggered");

        tokio::time::timeout(Duration::from_secs(1), async {
            while store.is_empty().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let Json(records) = events_handler(State(state), Query(EventsQuery::default()))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, "sensor:triggered");
        assert_eq!(store.list_recent(MAX_RECENT).await.unwrap(), records);
    }

    #[test]
    fn test_encode_frame_follows_encoding() {
        let frame = ServerFrame::connected("sess_1");

        match encode_frame(&frame, Encoding::Json).unwrap() {
            Message::Text(text) => assert!(text.contains("sess_1")),
            other => panic!("Expected text message, got {:?}", other),
        }

        match encode_frame(&frame, Encoding::MessagePack).unwrap() {
            Message::Binary(data) => {
                let decoded: ServerFrame = codec::decode(&data).unwrap();
                assert_eq!(decoded, frame);
            }
            other => panic!("Expected binary message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_reaches_hub() {
        let state = state_with(Arc::new(MemoryStore::new()));
        let hub = state.bridge.hub().clone();
        let session = SessionId::generate();
        let mut outbox = hub.connect(session.clone()).unwrap();

        submit(&hub, &session, ClientFrame::new("openDoor", None));

        let frame = tokio::time::timeout(Duration::from_secs(1), outbox.recv())
            .await
            .unwrap()
            .unwrap();
        match frame.as_ref() {
            ServerFrame::AlarmNotification(n) => assert!(n.message.contains("unknown_command")),
            other => panic!("Expected notification, got {:?}", other),
        }
    }
}
