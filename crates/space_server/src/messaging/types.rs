//! Message type definitions for client-server communication.
//!
//! Every frame is a JSON envelope `{ "type": ..., "payload": ... }`.
//! Inbound envelopes are decoded in two steps (envelope, then payload by
//! type) so that a bad payload is reported as a protocol error for that type
//! rather than an unknown message.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

/// Raw inbound envelope before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `join` payload.
///
/// A missing or non-string field decodes as absent so that the join is still
/// answered with a rejection instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub space_id: String,
    #[serde(default, deserialize_with = "string_or_none")]
    pub token: Option<String>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    string_or_none(deserializer).map(Option::unwrap_or_default)
}

/// `move` payload: the absolute position the client wants to occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MoveRequest {
    pub x: i64,
    pub y: i64,
}

/// `chat` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Join(JoinRequest),
    Move(MoveRequest),
    Chat(ChatRequest),
    Leave,
}

/// Envelopes that cannot be interpreted. Never reported to the client.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid envelope: {0}")]
    Envelope(serde_json::Error),

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        source: serde_json::Error,
    },
}

/// Reasons a join can be refused, as sent in `join-rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinRejectReason {
    InvalidToken,
    SpaceNotFound,
    AlreadyInSpace,
}

impl JoinRejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinRejectReason::InvalidToken => "invalid-token",
            JoinRejectReason::SpaceNotFound => "space-not-found",
            JoinRejectReason::AlreadyInSpace => "already-in-space",
        }
    }
}

/// Public view of a room member, as other clients see it.
///
/// `id` is the identifier clients key avatars by; it carries the user id,
/// which is unique within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: String,
    pub user_id: String,
    pub avatar_key: String,
    pub x: i64,
    pub y: i64,
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    SpaceJoined {
        #[serde(rename = "self")]
        me: MemberView,
        users: Vec<MemberView>,
    },
    JoinRejected {
        reason: JoinRejectReason,
    },
    UserJoined(MemberView),
    Movement {
        id: String,
        x: i64,
        y: i64,
    },
    MovementRejected {},
    Chat {
        #[serde(rename = "userId")]
        user_id: String,
        message: String,
        ts: i64,
    },
    UserLeft {
        id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
}

impl ServerMessage {
    /// The envelope `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SpaceJoined { .. } => "space-joined",
            ServerMessage::JoinRejected { .. } => "join-rejected",
            ServerMessage::UserJoined(_) => "user-joined",
            ServerMessage::Movement { .. } => "movement",
            ServerMessage::MovementRejected {} => "movement-rejected",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::UserLeft { .. } => "user-left",
        }
    }

    /// Encodes the message as a websocket text frame.
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::text)
    }
}
