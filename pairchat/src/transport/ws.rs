//! WebSocket link to the relay.
//!
//! [`WsLink`] owns a background supervisor task that keeps one WebSocket
//! connection to the relay alive. Connection attempts are retried with a
//! bounded attempt count and linear backoff (`delay * attempt`, capped at
//! `max_delay`). Every state change is reported as an [`InboundEvent`]:
//!
//! ```text
//! connect()  ──► dial ──ok──► Connect ──► session ──drop──► Disconnect
//!                 │                                           │
//!                 └─fail─► ReconnectAttempt(n) ─► sleep ─► dial (n ≤ max)
//!                                                   └─► ReconnectFailed
//! ```
//!
//! Frames are JSON text messages encoded by [`pairchat_proto::event`].
//! Malformed frames are logged and skipped; they never drop the connection.
//! A frame accepted by [`RelayLink::emit`] is never lost to a drop: if the
//! socket goes away before it is written, it is written after the next
//! successful dial. An explicit [`RelayLink::disconnect`] discards it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pairchat_proto::event::{self, ClientEvent, ServerEvent};

use super::{InboundEvent, RelayLink, TransportError};

/// Type alias for a client WebSocket connection.
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Retry behaviour of the link's supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after a failed or dropped connection before giving up.
    pub max_attempts: u32,
    /// Backoff step; retry `n` waits `n * delay`.
    pub delay: Duration,
    /// Upper bound on a single backoff wait.
    pub max_delay: Duration,
    /// Timeout for one connection attempt.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt).min(self.max_delay)
    }
}

#[derive(Debug)]
enum LinkCommand {
    Connect,
    Disconnect,
    Emit(String),
}

/// How a connected session ended.
enum SessionEnd {
    /// The relay closed or the socket failed; retry.
    Dropped,
    /// We were asked to disconnect; wait for the next connect.
    Closed,
    /// The link or its consumer was dropped; exit the supervisor.
    Shutdown,
}

/// [`RelayLink`] over a WebSocket connection with automatic retry.
pub struct WsLink {
    url: String,
    commands: mpsc::UnboundedSender<LinkCommand>,
    connected: Arc<AtomicBool>,
    _supervisor: tokio::task::JoinHandle<()>,
}

impl WsLink {
    /// Spawns the supervisor task. Nothing is dialled until [`RelayLink::connect`].
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        url: impl Into<String>,
        policy: RetryPolicy,
        events: mpsc::UnboundedSender<InboundEvent>,
    ) -> Self {
        let url = url.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let supervisor = tokio::spawn(supervise(
            url.clone(),
            policy,
            command_rx,
            events,
            Arc::clone(&connected),
        ));
        Self {
            url,
            commands,
            connected,
            _supervisor: supervisor,
        }
    }

    /// The relay URL this link dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a WebSocket connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl RelayLink for WsLink {
    fn connect(&self) {
        let _ = self.commands.send(LinkCommand::Connect);
    }

    fn disconnect(&self) {
        let _ = self.commands.send(LinkCommand::Disconnect);
    }

    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let frame = event::encode(event)?;
        self.commands
            .send(LinkCommand::Emit(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Most frames kept for the next connection while the socket is down.
const MAX_BUFFERED_FRAMES: usize = 1024;

/// Frames accepted by [`WsLink::emit`] that have not reached the socket yet.
///
/// An emit can be accepted just before the socket drops. Such frames are
/// kept here across the reconnect and written first on the next session,
/// ahead of anything emitted after it.
#[derive(Debug, Default)]
struct Outbox {
    frames: VecDeque<String>,
}

impl Outbox {
    fn push(&mut self, frame: String) {
        if self.frames.len() >= MAX_BUFFERED_FRAMES {
            self.frames.pop_front();
            tracing::warn!(
                limit = MAX_BUFFERED_FRAMES,
                "outbound buffer full, dropping oldest frame"
            );
        }
        self.frames.push_back(frame);
    }

    fn clear(&mut self) {
        if !self.frames.is_empty() {
            tracing::debug!(
                count = self.frames.len(),
                "discarding buffered frames on disconnect"
            );
            self.frames.clear();
        }
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

/// Supervisor task: waits for `Connect`, then dials and re-dials until
/// asked to disconnect or the retry budget runs out.
async fn supervise(
    url: String,
    policy: RetryPolicy,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<InboundEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut outbox = Outbox::default();

    'idle: loop {
        loop {
            match commands.recv().await {
                Some(LinkCommand::Connect) => break,
                Some(LinkCommand::Disconnect) => outbox.clear(),
                Some(LinkCommand::Emit(frame)) => outbox.push(frame),
                None => return,
            }
        }

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                if attempt > policy.max_attempts {
                    tracing::warn!(
                        url = %url,
                        attempts = policy.max_attempts,
                        buffered = outbox.len(),
                        "relay unreachable, giving up"
                    );
                    let _ = events.send(InboundEvent::ReconnectFailed);
                    continue 'idle;
                }
                if events.send(InboundEvent::ReconnectAttempt(attempt)).is_err() {
                    return;
                }
                match backoff(policy.delay_for(attempt), &mut commands, &mut outbox).await {
                    Backoff::Elapsed => {}
                    Backoff::Cancelled => continue 'idle,
                    Backoff::Shutdown => return,
                }
            }

            match dial(&url, policy.connect_timeout).await {
                Ok(ws) => {
                    connected.store(true, Ordering::Relaxed);
                    tracing::info!(url = %url, attempt, "relay connection established");
                    if events.send(InboundEvent::Connect).is_err() {
                        return;
                    }
                    if attempt > 0 {
                        let _ = events.send(InboundEvent::Reconnect);
                    }

                    let end = run_session(ws, &mut commands, &events, &mut outbox).await;
                    connected.store(false, Ordering::Relaxed);
                    let _ = events.send(InboundEvent::Disconnect);

                    match end {
                        SessionEnd::Dropped => attempt = 1,
                        SessionEnd::Closed => continue 'idle,
                        SessionEnd::Shutdown => return,
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, attempt, error = %e, "relay connect failed");
                    attempt += 1;
                }
            }
        }
    }
}

enum Backoff {
    Elapsed,
    Cancelled,
    Shutdown,
}

/// Sleeps for `delay` while staying responsive to commands. A `Connect`
/// cuts the wait short; late emits are kept for the next session.
async fn backoff(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    outbox: &mut Outbox,
) -> Backoff {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return Backoff::Elapsed,
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Connect) => return Backoff::Elapsed,
                Some(LinkCommand::Disconnect) => {
                    outbox.clear();
                    return Backoff::Cancelled;
                }
                Some(LinkCommand::Emit(frame)) => outbox.push(frame),
                None => return Backoff::Shutdown,
            },
        }
    }
}

async fn dial(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_connect_error)?;
    Ok(ws)
}

/// Pumps one connected socket: buffered frames go out first, then inbound
/// frames become events and commands become outbound frames.
async fn run_session(
    ws: WsStream,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    events: &mpsc::UnboundedSender<InboundEvent>,
    outbox: &mut Outbox,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    if !outbox.frames.is_empty() {
        tracing::info!(count = outbox.len(), "writing frames buffered while offline");
    }
    while let Some(frame) = outbox.frames.pop_front() {
        if let Err(e) = sink.send(Message::Text(frame.clone().into())).await {
            tracing::warn!(error = %e, "relay send failed");
            outbox.frames.push_front(frame);
            return SessionEnd::Dropped;
        }
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match event::decode::<ServerEvent>(text.as_str()) {
                    Ok(server_event) => {
                        if events.send(InboundEvent::Server(server_event)).is_err() {
                            let _ = sink.close().await;
                            return SessionEnd::Shutdown;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed relay frame, skipping");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("relay closed the connection");
                    return SessionEnd::Dropped;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry no events.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "relay WebSocket read error");
                    return SessionEnd::Dropped;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Emit(frame)) => {
                    if let Err(e) = sink.send(Message::Text(frame.clone().into())).await {
                        tracing::warn!(error = %e, "relay send failed, keeping frame");
                        outbox.push(frame);
                        return SessionEnd::Dropped;
                    }
                }
                Some(LinkCommand::Disconnect) => {
                    outbox.clear();
                    let _ = sink.close().await;
                    return SessionEnd::Closed;
                }
                Some(LinkCommand::Connect) => {}
                None => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            },
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(io_err.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "relay HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "relay connection error: {other}"
        ))),
    }
}
