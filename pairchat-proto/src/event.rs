//! Named events exchanged between a `PairChat` client and the relay.
//!
//! Every event travels as one WebSocket text frame holding a JSON object
//! `{"event": <name>, "data": <payload>}`. Payload field names are
//! camelCase. [`ClientEvent`] flows client → relay, [`ServerEvent`] flows
//! relay → client.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::presence::PresenceStatus;
use crate::session::SessionId;
use crate::timestamp::Timestamp;

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not match a known event.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A chat message as carried by `send_message`, `receive_message` and
/// room history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Author of the message.
    #[serde(default)]
    pub username: Identity,
    /// Message text.
    #[serde(default)]
    pub message: String,
    /// Addressee, present on messages sent by a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Identity>,
    /// Time the author created the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Payload of `user_status_change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// The sender's new status.
    pub status: PresenceStatus,
}

/// Payload of `join_private_chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPrivateChat {
    /// Identity of the joining participant.
    #[serde(default)]
    pub sender_email: Identity,
    /// Identity of the participant to chat with.
    #[serde(default)]
    pub recipient_email: Identity,
}

/// Payload of `request_user_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUserStatus {
    /// Identity whose status is requested.
    #[serde(default)]
    pub target_email: Identity,
}

/// Payload of `connection_success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSuccess {
    /// Relay-side id of this connection.
    #[serde(rename = "sessionId", alias = "sid", default)]
    pub session_id: String,
}

/// Payload of `room_joined`, the join confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    /// The session the connection was admitted into.
    pub room: SessionId,
    /// Identity that asked to join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Identity>,
    /// The other participant of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Identity>,
    /// Whether the other participant is currently online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_online: Option<bool>,
    /// Ordered history of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_history: Option<Vec<ChatPayload>>,
}

/// Payload of `user_joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoined {
    /// Identity that joined the session.
    pub email: Identity,
    /// Status of the joining participant, `online` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
    /// Session that was joined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<SessionId>,
}

/// Payload of `user_disconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDisconnected {
    /// Identity whose connection dropped.
    pub email: Identity,
}

/// Payload of `user_status_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatusUpdate {
    /// Identity whose status changed.
    pub email: Identity,
    /// The new status.
    pub status: PresenceStatus,
}

/// Payload of `message_sent`, the relay's acknowledgement of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSent {
    /// `"ok"` or `"error"`.
    pub status: String,
    /// Relay-assigned id of the stored message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Error description when `status` is `"error"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MessageSent {
    /// Returns `true` if the relay accepted the message.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayError {
    /// Human-readable error description.
    pub message: String,
}

/// Events sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Announce the sender's own presence.
    UserStatusChange(StatusChange),
    /// Ask to be admitted into the session for a pair.
    JoinPrivateChat(JoinPrivateChat),
    /// Transmit a chat message.
    SendMessage(ChatPayload),
    /// Ask for the latest status of an identity.
    RequestUserStatus(RequestUserStatus),
}

impl ClientEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UserStatusChange(_) => "user_status_change",
            Self::JoinPrivateChat(_) => "join_private_chat",
            Self::SendMessage(_) => "send_message",
            Self::RequestUserStatus(_) => "request_user_status",
        }
    }
}

/// Events sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The relay accepted the connection.
    ConnectionSuccess(ConnectionSuccess),
    /// Join confirmation, optionally with presence and history.
    RoomJoined(RoomJoined),
    /// The other participant joined the session.
    UserJoined(UserJoined),
    /// A participant's connection dropped.
    UserDisconnected(UserDisconnected),
    /// A participant's status changed or was requested.
    UserStatusUpdate(UserStatusUpdate),
    /// A live chat message in the session.
    ReceiveMessage(ChatPayload),
    /// Acknowledgement of a `send_message`.
    MessageSent(MessageSent),
    /// The relay rejected a request.
    Error(RelayError),
}

impl ServerEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess(_) => "connection_success",
            Self::RoomJoined(_) => "room_joined",
            Self::UserJoined(_) => "user_joined",
            Self::UserDisconnected(_) => "user_disconnected",
            Self::UserStatusUpdate(_) => "user_status_update",
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageSent(_) => "message_sent",
            Self::Error(_) => "error",
        }
    }
}

/// Encodes an event into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the event cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes an event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the frame is malformed or names an
/// unknown event.
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(frame)?)
}
