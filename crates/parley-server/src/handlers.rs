//! Connection handlers for Parley server.
//!
//! This module handles the handshake, the connection lifecycle and
//! inbound event processing.

use crate::auth::{self, Authenticator, StaticTokens};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_core::{outbox, ChatStore, ConnectionId, MemoryStore, Router as ChatRouter};
use parley_protocol::{codec, ClientEvent, ProtocolError, ServerEvent, UserId, WireFormat};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The event router.
    pub router: ChatRouter,
    /// Server configuration.
    pub config: Config,
    /// Handshake authenticator.
    pub authenticator: Box<dyn Authenticator>,
    /// Connections admitted, from accepted handshake to socket close.
    admitted: AtomicUsize,
}

impl AppState {
    /// Create new app state backed by an in-memory store seeded from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        config.seed(&store);

        Self {
            router: ChatRouter::with_config(store as Arc<dyn ChatStore>, config.router_config()),
            authenticator: Box::new(StaticTokens::from_users(&config.users)),
            admitted: AtomicUsize::new(0),
            config,
        }
    }

    /// Reserve a connection slot, or `None` at `max_connections`.
    ///
    /// Slots are taken before the upgrade completes, so concurrent
    /// handshakes cannot overshoot the limit.
    pub fn try_admit(state: &Arc<Self>) -> Option<Admission> {
        let max = state.config.limits.max_connections;
        state
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Admission {
                state: Arc::clone(state),
            })
    }

    /// Number of admitted connections.
    #[must_use]
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }
}

/// A reserved connection slot, released on drop. Dropped with the upgrade
/// callback if the upgrade fails.
pub struct Admission {
    state: Arc<AppState>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.state.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handshake query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Access token.
    pub token: Option<String>,
    /// Outbound wire format, `json` or `msgpack`.
    pub format: Option<String>,
}

/// Build the HTTP application.
pub fn build_app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let ws_path = config.transport.websocket_path.clone();
    let state = Arc::new(AppState::new(config));
    let app = build_app(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "onlineUsers": stats.online_users,
        "rooms": stats.room_count,
    }))
}

/// WebSocket upgrade handler.
///
/// The token is checked before upgrading; rejected handshakes never touch
/// the router.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = match auth::extract_token(params.token.as_deref(), &headers)
        .and_then(|token| state.authenticator.authenticate(&token))
    {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!(error = %e, "Handshake rejected");
            metrics::record_rejected_handshake("unauthenticated");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let format = match params.format.as_deref() {
        None => WireFormat::default(),
        Some(name) => match WireFormat::from_name(name) {
            Some(format) => format,
            None => {
                metrics::record_rejected_handshake("bad_format");
                return (StatusCode::BAD_REQUEST, format!("Unknown format: {}", name))
                    .into_response();
            }
        },
    };

    let Some(admission) = AppState::try_admit(&state) else {
        warn!(user = %user_id, "Connection limit reached");
        metrics::record_rejected_handshake("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Server at capacity").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, user_id, format, admission))
}

/// Handle an authenticated WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: UserId,
    format: WireFormat,
    _admission: Admission,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, user = %user_id, ?format, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = outbox();

    let report = state.router.connect(&user_id, connection_id.clone(), tx).await;
    metrics::record_delivery(report);
    metrics::record_stats(&state.router.stats());

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    let period = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Events routed to this connection
            Some(event) = rx.recv() => {
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => process_event(&state, &connection_id, event).await,
                            Err(e) => reject_frame(&state, &connection_id, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => {
                                    process_event(&state, &connection_id, event).await;
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    reject_frame(&state, &connection_id, &e);
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= timeout {
                    debug!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let report = state.router.disconnect(&connection_id).await;
    metrics::record_delivery(report);
    metrics::record_stats(&state.router.stats());

    debug!(connection = %connection_id, user = %user_id, "WebSocket disconnected");
}

/// Dispatch a decoded inbound event.
async fn process_event(state: &AppState, connection_id: &ConnectionId, event: ClientEvent) {
    let start = Instant::now();
    metrics::record_event(event.kind());

    let outcome = state.router.dispatch(connection_id, event).await;
    metrics::record_delivery(outcome.report);
    if let Some(e) = outcome.error {
        metrics::record_error(e.kind());
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Answer an undecodable frame with an `error` event to its sender only.
fn reject_frame(state: &AppState, connection_id: &ConnectionId, err: &ProtocolError) {
    warn!(connection = %connection_id, error = %err, "Malformed frame");
    metrics::record_error("malformed_frame");
    state.router.registry().send_to(
        connection_id,
        Arc::new(ServerEvent::error(format!("Malformed event: {}", err))),
    );
}

/// Encode an event in the connection's wire format and send it.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_json(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}
