//! Relay server core: shared state, WebSocket handler and event routing.
//!
//! Every connection gets a [`ConnectionId`] and a writer channel. Inbound
//! text frames are decoded as [`ClientEvent`]s and applied to the
//! [`Directory`]; the events it produces are encoded and pushed to the
//! addressed connections' writers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};

use pairchat_proto::event::{self, ClientEvent};

use crate::rooms::{ConnectionId, Directory, Outgoing};

/// Shared relay server state holding the connection registry and the
/// chat directory.
pub struct RelayState {
    /// Maps each live connection to the sender feeding its WebSocket writer.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Rooms, presence and history.
    pub directory: Mutex<Directory>,
    next_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates an empty relay state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_directory(Directory::new())
    }

    /// Creates an empty relay state around `directory`.
    #[must_use]
    pub fn with_directory(directory: Directory) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            directory: Mutex::new(directory),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection and returns its id.
    pub async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Removes a connection from the registry, returning its sender if it existed.
    pub async fn unregister(&self, id: ConnectionId) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.remove(&id)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Each writer forwards the close frame, which the client sees as a
    /// dropped connection. Useful for graceful shutdown and testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(conn = %id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Encodes and delivers events to their connections.
    pub async fn deliver(&self, outgoing: Vec<Outgoing>) {
        if outgoing.is_empty() {
            return;
        }
        let conns = self.connections.read().await;
        for Outgoing { to, event } in outgoing {
            let frame = match event::encode(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(conn = %to, event = event.name(), error = %e, "failed to encode event");
                    continue;
                }
            };
            match conns.get(&to) {
                Some(sender) => {
                    if sender.send(Message::Text(frame.into())).is_err() {
                        tracing::debug!(conn = %to, "writer gone, dropping event");
                    }
                }
                None => tracing::debug!(conn = %to, "connection gone, dropping event"),
            }
        }
    }

    async fn apply(&self, conn: ConnectionId, client_event: ClientEvent) {
        tracing::debug!(conn = %conn, event = client_event.name(), "client event");
        let outgoing = {
            let mut directory = self.directory.lock().await;
            match client_event {
                ClientEvent::JoinPrivateChat(join) => directory.join(conn, &join),
                ClientEvent::SendMessage(payload) => directory.send_message(conn, payload),
                ClientEvent::UserStatusChange(change) => {
                    directory.status_change(conn, change.status)
                }
                ClientEvent::RequestUserStatus(request) => {
                    directory.request_status(conn, &request.target_email)
                }
            }
        };
        self.deliver(outgoing).await;
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Register the connection and greet it with `connection_success`.
/// 2. Forward queued frames to the socket from a writer task.
/// 3. Apply every decodable text frame to the directory.
/// 4. On close, unregister and let the directory announce the departure.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.register(tx).await;
    tracing::info!(conn = %conn, "connection opened");

    let greeting = state.directory.lock().await.connect(conn);
    state.deliver(greeting).await;

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match event::decode::<ClientEvent>(text.as_str()) {
                    Ok(client_event) => reader_state.apply(conn, client_event).await,
                    Err(e) => {
                        tracing::warn!(conn = %conn, error = %e, "failed to decode frame");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn).await;
    let farewell = state.directory.lock().await.disconnect(conn);
    state.deliver(farewell).await;
    tracing::info!(conn = %conn, "connection closed");
}

/// Starts the relay server on the given address.
///
/// Returns the bound address (useful when binding to port 0) and a
/// [`tokio::task::JoinHandle`] for the server task.
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

/// Starts the relay server with a caller-owned [`RelayState`], so tests can
/// inspect or poke it while the server runs.
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
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
