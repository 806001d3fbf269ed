//! Relay server surface: shared state, routes, and the WebSocket handler.
//!
//! Every accepted socket gets a [`Connection`] (its outbound queue), a writer
//! task draining that queue into the socket, and a reader task running the
//! [`Session`] loop. When the reader finishes, the writer gets a short grace
//! period to flush the close reply before it is aborted; when the writer fails
//! first, the reader is aborted. Either way the session is dropped, which
//! removes the connection from its room.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse};
use futures_util::{SinkExt, StreamExt};
use signal_proto::{ConnectParams, Role, ServerMessage, StatusReport};
use tower_http::cors::CorsLayer;

use crate::config::RelayConfig;
use crate::connection::Connection;
use crate::registry::{GroupRegistry, JoinError};
use crate::session::Session;

/// Default deadline for handing a message to a recipient (5 s).
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of messages buffered per connection before sends wait.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Default maximum size of an inbound WebSocket message (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// How long the writer may keep running after the reader has finished.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Server-wide state handed to every request handler.
#[derive(Debug)]
pub struct RelayState {
    /// Rooms and their members.
    pub registry: Arc<GroupRegistry>,
    send_timeout: Duration,
    outbound_queue: usize,
    max_message_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_SEND_TIMEOUT,
            DEFAULT_OUTBOUND_QUEUE,
            DEFAULT_MAX_MESSAGE_SIZE,
        )
    }

    /// Creates relay state with custom send deadline, queue depth and
    /// message size limit.
    #[must_use]
    pub fn with_limits(send_timeout: Duration, outbound_queue: usize, max_message_size: usize) -> Self {
        Self {
            registry: Arc::new(GroupRegistry::new()),
            send_timeout,
            outbound_queue,
            max_message_size,
        }
    }

    /// Creates relay state from the resolved server configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_limits(
            config.send_timeout,
            config.outbound_queue,
            config.max_message_size,
        )
    }

    /// Current room and connection counts.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let snapshot = self.registry.snapshot();
        StatusReport::ok(snapshot.rooms, snapshot.active_connections)
    }
}

/// Drives one upgraded WebSocket from join to departure.
///
/// The connection lifecycle:
/// 1. Join the requested room under the requested role.
/// 2. If the room refuses a publisher, send the error message, close, and stop.
/// 3. Otherwise relay inbound signals until the socket closes or fails.
/// 4. Leave the room (when the session drops).
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, room: String, role: Role) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut rx) = Connection::channel(state.outbound_queue);
    let connection_id = connection.id();

    let session = match Session::join(
        Arc::clone(&state.registry),
        &room,
        role,
        connection,
        state.send_timeout,
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::info!(
                room = %room,
                role = %role,
                connection = %connection_id,
                reason = %e,
                "join rejected"
            );
            reject(&mut ws_sender, &e).await;
            return;
        }
    };

    // Writer: drains the outbound queue into the socket, stopping after a close frame.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            match ws_sender.send(msg).await {
                Ok(()) if closing => break,
                Ok(()) => {}
                Err(e) if closing => {
                    tracing::debug!(connection = %connection_id, error = %e, "closing handshake ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection = %connection_id, error = %e, "websocket write failed");
                    break;
                }
            }
        }
    });

    // Reader: owns the session, so aborting it also leaves the room.
    let mut read_task = tokio::spawn(async move {
        session.run(&mut ws_receiver).await;
    });

    tokio::select! {
        _ = &mut read_task => {
            if tokio::time::timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
                write_task.abort();
            }
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    tracing::info!(room = %room, role = %role, connection = %connection_id, "connection closed");
}

/// Sends the rejection message for `error` and closes the socket.
async fn reject(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    error: &JoinError,
) {
    let msg = match error {
        JoinError::PublisherPresent => ServerMessage::publisher_present(),
    };
    match msg.encode() {
        Ok(text) => {
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::warn!(error = %e, "failed to deliver rejection");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode rejection"),
    }
    let _ = ws_sender.send(Message::Close(None)).await;
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending::<()>()).await
}

/// Starts the relay server and stops accepting requests once `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Builds the axum router with all routes.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::get(index_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .route("/health", axum::routing::get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
///
/// The query is read as raw pairs so a repeated `room` or `type` key takes
/// its first value instead of failing the upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(pairs): Query<Vec<(String, String)>>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    let params = ConnectParams::from_pairs(pairs);
    let room = params.room().to_string();
    let role = params.role();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, room, role))
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    axum::Json(state.status())
}

/// Minimal status page.
async fn index_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let status = state.status();
    Html(format!(
        "<!DOCTYPE html>
<html>
<head><title>Signal Relay</title></head>
<body>
    <h1>Signal Relay</h1>
    <p>Status: running</p>
    <p>Active rooms: {rooms}</p>
    <p>Active connections: {active}</p>
    <h3>Endpoints:</h3>
    <ul>
        <li><code>/ws?type=streamer&amp;room=ROOM_ID</code> - for the streamer</li>
        <li><code>/ws?type=viewer&amp;room=ROOM_ID</code> - for viewers</li>
        <li><code>/health</code> - health check</li>
    </ul>
</body>
</html>
",
        rooms = status.rooms,
        active = status.active_connections,
    ))
}
