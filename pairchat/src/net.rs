//! Event loop that drives a [`ChatSessionController`].
//!
//! One tokio task owns the controller and serialises every mutation:
//! inbound link events, [`ChatCommand`]s from the UI and timer deadlines.
//! After each step it publishes a fresh [`ChatSnapshot`] on a `watch`
//! channel, which is all the UI ever reads.
//!
//! # Architecture
//!
//! ```text
//! UI ─── ChatCommand ──►┐
//!                       │  chat task  ── ChatSnapshot (watch) ──► UI
//! RelayLink ─ Inbound ─►┘   (owns controller, sleeps until next deadline)
//! ```

use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use pairchat_proto::identity::Identity;

use crate::chat::{ChatConfig, ChatSessionController, ChatSnapshot, SendOutcome};
use crate::config::DEFAULT_RELAY_URL;
use crate::transport::ws::{RetryPolicy, WsLink};
use crate::transport::{InboundEvent, RelayLink};

/// Commands from the UI to the chat task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Replace both identities, tearing down the current session if they changed.
    SetIdentities {
        /// The local user.
        user: Option<Identity>,
        /// The other participant.
        peer: Option<Identity>,
    },
    /// Start negotiating the session for the current pair.
    InitializeChat,
    /// Send a chat message to the peer.
    SendMessage {
        /// The message text.
        text: String,
    },
    /// Cancel timers, close the connection and stop the task.
    Shutdown,
}

/// Errors returned by [`ChatHandle`].
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The chat task has stopped.
    #[error("chat task has stopped")]
    Closed,
}

/// Configuration for the networking layer.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// WebSocket URL of the relay server (e.g., `ws://127.0.0.1:9000/ws`).
    pub relay_url: String,
    /// Local identity, if known at startup.
    pub user: Option<Identity>,
    /// Peer identity, if known at startup.
    pub peer: Option<Identity>,
    /// Reconnect behaviour of the WebSocket link.
    pub retry: RetryPolicy,
    /// Controller tunables.
    pub chat: ChatConfig,
    /// Capacity of the command channel.
    pub channel_capacity: usize,
}

impl NetConfig {
    /// Creates a `NetConfig` with default retry, timers and channel capacity.
    #[must_use]
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            user: None,
            peer: None,
            retry: RetryPolicy::default(),
            chat: ChatConfig::default(),
            channel_capacity: 256,
        }
    }
}

/// Handle to a running chat task.
pub struct ChatHandle {
    commands: mpsc::Sender<ChatCommand>,
    snapshots: watch::Receiver<ChatSnapshot>,
    task: JoinHandle<()>,
}

impl ChatHandle {
    /// Sends a raw command.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Closed`] if the chat task has stopped.
    pub async fn command(&self, command: ChatCommand) -> Result<(), NetError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NetError::Closed)
    }

    /// Sets both identities.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Closed`] if the chat task has stopped.
    pub async fn set_identities(
        &self,
        user: Option<Identity>,
        peer: Option<Identity>,
    ) -> Result<(), NetError> {
        self.command(ChatCommand::SetIdentities { user, peer }).await
    }

    /// Starts session negotiation.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Closed`] if the chat task has stopped.
    pub async fn initialize_chat(&self) -> Result<(), NetError> {
        self.command(ChatCommand::InitializeChat).await
    }

    /// Sends a chat message.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Closed`] if the chat task has stopped.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), NetError> {
        self.command(ChatCommand::SendMessage { text: text.into() })
            .await
    }

    /// The most recently published state.
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that observes every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    /// Asks the task to shut down and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(ChatCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "chat task ended abnormally");
        }
    }
}

/// Spawns a chat task connected to the relay over WebSocket.
///
/// Must be called from within a tokio runtime. The link starts connecting
/// immediately; if both identities are configured, negotiation starts too.
#[must_use]
pub fn spawn_chat(config: NetConfig) -> ChatHandle {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let link = WsLink::spawn(config.relay_url.clone(), config.retry.clone(), event_tx);
    tracing::info!(relay = %config.relay_url, "starting chat");
    spawn_with_link(link, event_rx, &config)
}

/// Spawns a chat task over an arbitrary link.
///
/// `events` must carry what `link` observes.
#[must_use]
pub fn spawn_with_link<L: RelayLink + 'static>(
    link: L,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    config: &NetConfig,
) -> ChatHandle {
    let now = Instant::now();
    let mut chat = ChatSessionController::new(link, &config.chat);
    if config.user.is_some() || config.peer.is_some() {
        chat.set_identities(config.user.clone(), config.peer.clone());
        chat.initialize_chat(now);
    }

    let (commands_tx, commands_rx) = mpsc::channel(config.channel_capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(chat.snapshot(now));
    let task = tokio::spawn(run_chat(chat, events, commands_rx, snapshot_tx));

    ChatHandle {
        commands: commands_tx,
        snapshots: snapshot_rx,
        task,
    }
}

async fn run_chat<L: RelayLink>(
    mut chat: ChatSessionController<L>,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    mut commands: mpsc::Receiver<ChatCommand>,
    snapshots: watch::Sender<ChatSnapshot>,
) {
    let mut link_open = true;

    loop {
        let deadline = chat.next_deadline();
        let sleep = async move {
            match deadline {
                Some(due) => tokio::time::sleep_until(tokio::time::Instant::from_std(due)).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = events.recv(), if link_open => match event {
                Some(event) => {
                    tracing::trace!(event = %event.name(), "inbound event");
                    chat.handle_event(&event, Instant::now());
                }
                None => {
                    tracing::warn!("relay link stopped reporting events");
                    link_open = false;
                }
            },
            command = commands.recv() => match command {
                Some(ChatCommand::Shutdown) | None => {
                    chat.shutdown();
                    snapshots.send_replace(chat.snapshot(Instant::now()));
                    break;
                }
                Some(command) => apply(&mut chat, command),
            },
            () = sleep => chat.on_tick(Instant::now()),
        }

        snapshots.send_replace(chat.snapshot(Instant::now()));
    }
    tracing::info!("chat task stopped");
}

fn apply<L: RelayLink>(chat: &mut ChatSessionController<L>, command: ChatCommand) {
    let now = Instant::now();
    match command {
        ChatCommand::SetIdentities { user, peer } => {
            chat.set_identities(user, peer);
        }
        ChatCommand::InitializeChat => {
            chat.initialize_chat(now);
        }
        ChatCommand::SendMessage { text } => {
            match chat.send_message(&text) {
                SendOutcome::Dropped(reason) => tracing::info!(%reason, "message not sent"),
                outcome => tracing::debug!(?outcome, "send_message"),
            }
        }
        ChatCommand::Shutdown => chat.shutdown(),
    }
}
