//! Room directory for the relay server.
//!
//! [`Directory`] is the relay's whole chat state: which connection speaks for
//! which identity, which room each connection sits in, the last known status
//! of every identity and the message history of every room. It is plain
//! synchronous state. Each operation returns the [`Outgoing`] events it
//! produced and [`crate::relay`] delivers them to the sockets.
//!
//! Room entries are ephemeral: lost on relay restart, same as the
//! connection registry. Each room keeps at most `history_limit` messages
//! and statuses are only held for identities with a live connection.

use std::collections::HashMap;
use std::fmt;

use pairchat_proto::event::{
    ChatPayload, ConnectionSuccess, JoinPrivateChat, MessageSent, RelayError, RoomJoined,
    ServerEvent, UserJoined, UserStatusUpdate,
};
use pairchat_proto::identity::Identity;
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::session::SessionId;
use pairchat_proto::timestamp::Timestamp;

/// Relay-local id of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One event addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Recipient connection.
    pub to: ConnectionId,
    /// The event.
    pub event: ServerEvent,
}

#[derive(Debug, Default)]
struct Member {
    identity: Option<Identity>,
    room: Option<SessionId>,
}

/// Messages kept per room unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// In-memory chat state of the relay.
#[derive(Debug)]
pub struct Directory {
    members: HashMap<ConnectionId, Member>,
    status: HashMap<Identity, PresenceStatus>,
    history: HashMap<SessionId, Vec<ChatPayload>>,
    history_limit: usize,
}

impl Default for Directory {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty directory keeping the newest `limit` messages per room.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            members: HashMap::new(),
            status: HashMap::new(),
            history: HashMap::new(),
            history_limit: limit,
        }
    }

    /// A new connection: greet it.
    pub fn connect(&mut self, conn: ConnectionId) -> Vec<Outgoing> {
        self.members.insert(conn, Member::default());
        vec![Outgoing {
            to: conn,
            event: ServerEvent::ConnectionSuccess(ConnectionSuccess {
                session_id: conn.to_string(),
            }),
        }]
    }

    /// `join_private_chat`: move `conn` into the pair's room.
    pub fn join(&mut self, conn: ConnectionId, join: &JoinPrivateChat) -> Vec<Outgoing> {
        let (sender, recipient) = (&join.sender_email, &join.recipient_email);
        if sender.is_empty() || recipient.is_empty() {
            return vec![error_to(conn, "Missing sender or recipient email")];
        }

        let room = SessionId::derive(sender, recipient);
        let member = self.members.entry(conn).or_default();
        if let Some(previous) = member.room.replace(room.clone())
            && previous != room
        {
            tracing::info!(conn = %conn, room = %previous, "left room");
        }
        member.identity = Some(sender.clone());
        self.status.insert(sender.clone(), PresenceStatus::Online);
        let history = self.history.get(&room).cloned().unwrap_or_default();

        tracing::info!(conn = %conn, user = %sender, room = %room, "joined room");

        let recipient_online = self.status.get(recipient) == Some(&PresenceStatus::Online);
        let mut out = vec![Outgoing {
            to: conn,
            event: ServerEvent::RoomJoined(RoomJoined {
                room: room.clone(),
                sender: Some(sender.clone()),
                recipient: Some(recipient.clone()),
                recipient_online: Some(recipient_online),
                message_history: Some(history),
            }),
        }];

        let online = ServerEvent::UserStatusUpdate(UserStatusUpdate {
            email: sender.clone(),
            status: PresenceStatus::Online,
        });
        out.extend(self.broadcast(&room, &online, None));

        if sender != recipient {
            let joined = ServerEvent::UserJoined(UserJoined {
                email: sender.clone(),
                status: Some(PresenceStatus::Online),
                room: Some(room.clone()),
            });
            out.extend(self.broadcast(&room, &joined, Some(conn)));
        }
        out
    }

    /// `send_message`: store in the pair's history and fan out to the room.
    pub fn send_message(&mut self, conn: ConnectionId, payload: ChatPayload) -> Vec<Outgoing> {
        if payload.username.is_empty() || payload.message.is_empty() {
            return vec![Outgoing {
                to: conn,
                event: ServerEvent::MessageSent(MessageSent {
                    status: "error".to_string(),
                    id: None,
                    message: Some("Missing required fields".to_string()),
                }),
            }];
        }

        let recipient = payload
            .recipient
            .clone()
            .unwrap_or_else(|| payload.username.clone());
        let room = SessionId::derive(&payload.username, &recipient);
        let stored = ChatPayload {
            recipient: Some(recipient),
            timestamp: Some(payload.timestamp.unwrap_or_else(Timestamp::now)),
            ..payload
        };
        let id = format!(
            "{}-{}-{}",
            Timestamp::now().as_millis(),
            stored.username,
            stored.message.chars().count()
        );
        tracing::debug!(room = %room, from = %stored.username, "message stored");

        if self.history_limit > 0 {
            let history = self.history.entry(room.clone()).or_default();
            history.push(stored.clone());
            if history.len() > self.history_limit {
                let excess = history.len() - self.history_limit;
                history.drain(..excess);
                tracing::trace!(room = %room, dropped = excess, "history trimmed");
            }
        }

        let mut out = self.broadcast(&room, &ServerEvent::ReceiveMessage(stored), None);
        out.push(Outgoing {
            to: conn,
            event: ServerEvent::MessageSent(MessageSent {
                status: "ok".to_string(),
                id: Some(id),
                message: None,
            }),
        });
        out
    }

    /// `user_status_change`: record and announce to the connection's room.
    pub fn status_change(&mut self, conn: ConnectionId, status: PresenceStatus) -> Vec<Outgoing> {
        let Some(Member {
            identity: Some(identity),
            room,
        }) = self.members.get(&conn)
        else {
            return Vec::new();
        };
        let (identity, room) = (identity.clone(), room.clone());
        self.status.insert(identity.clone(), status);

        room.map_or_else(Vec::new, |room| {
            let update = ServerEvent::UserStatusUpdate(UserStatusUpdate {
                email: identity,
                status,
            });
            self.broadcast(&room, &update, None)
        })
    }

    /// `request_user_status`: reply with the target's status.
    #[must_use]
    pub fn request_status(&self, conn: ConnectionId, target: &Identity) -> Vec<Outgoing> {
        if target.is_empty() {
            return Vec::new();
        }
        vec![Outgoing {
            to: conn,
            event: ServerEvent::UserStatusUpdate(UserStatusUpdate {
                email: target.clone(),
                status: self.status_of(target),
            }),
        }]
    }

    /// Connection closed: the identity goes offline once its last
    /// connection is gone.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Outgoing> {
        let Some(member) = self.members.remove(&conn) else {
            return Vec::new();
        };
        let Some(identity) = member.identity else {
            return Vec::new();
        };
        if self
            .members
            .values()
            .any(|m| m.identity.as_ref() == Some(&identity))
        {
            return Vec::new();
        }

        // Unknown identities read as offline, so the entry can go.
        self.status.remove(&identity);
        tracing::info!(user = %identity, "user offline");
        member.room.map_or_else(Vec::new, |room| {
            let update = ServerEvent::UserStatusUpdate(UserStatusUpdate {
                email: identity,
                status: PresenceStatus::Offline,
            });
            self.broadcast(&room, &update, None)
        })
    }

    /// Last known status, `offline` if never seen.
    #[must_use]
    pub fn status_of(&self, identity: &Identity) -> PresenceStatus {
        self.status
            .get(identity)
            .copied()
            .unwrap_or(PresenceStatus::Offline)
    }

    /// Stored history of a room.
    #[must_use]
    pub fn history(&self, room: &SessionId) -> &[ChatPayload] {
        self.history.get(room).map_or(&[], Vec::as_slice)
    }

    /// Messages kept per room.
    #[must_use]
    pub const fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.members.len()
    }

    fn broadcast(
        &self,
        room: &SessionId,
        event: &ServerEvent,
        skip: Option<ConnectionId>,
    ) -> Vec<Outgoing> {
        let mut out: Vec<Outgoing> = self
            .members
            .iter()
            .filter(|(id, m)| m.room.as_ref() == Some(room) && Some(**id) != skip)
            .map(|(id, _)| Outgoing {
                to: *id,
                event: event.clone(),
            })
            .collect();
        out.sort_by_key(|o| o.to);
        out
    }
}

fn error_to(conn: ConnectionId, message: &str) -> Outgoing {
    Outgoing {
        to: conn,
        event: ServerEvent::Error(RelayError {
            message: message.to_string(),
        }),
    }
}
