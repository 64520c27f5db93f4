// WebSocket event types for the `/v1/chat` gateway.
//
// Every frame is a JSON text frame of the form `{"event": <name>, "data": <payload>}`.
// The only exception is the optional handshake frame `{"auth": {"token": ...}}`
// a client may send first when it could not present its token on the upgrade
// request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{GroupChatSummary, MessageView};

/// Client -> Server events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start listening to a conversation's live room.
    JoinGroup(GroupRoomRequest),
    /// Stop listening to a conversation's live room.
    LeaveGroup(GroupRoomRequest),
}

/// Payload of `join_group` / `leave_group`. The id is kept raw so that a
/// malformed value can be reported as a scoped validation error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoomRequest {
    pub group_id: String,
}

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once the handshake succeeded. `socketId` is what the client passes
    /// to the REST message endpoint so that it is skipped by the fan-out.
    Connected(ConnectedPayload),
    /// Acknowledges a successful `join_group`.
    JoinedGroup(GroupRoomAck),
    /// Acknowledges a `leave_group`.
    LeftGroup(GroupRoomAck),
    /// Full message, delivered to connections viewing the conversation.
    NewMessage(MessageView),
    /// Conversation activity notice, delivered to every member's personal room.
    GroupNewMessage(GroupChatSummary),
    /// Error scoped to the receiving connection.
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { message: message.into(), code: Some(code.to_string()) })
    }

    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::JoinedGroup(_) => "joined_group",
            Self::LeftGroup(_) => "left_group",
            Self::NewMessage(_) => "new_message",
            Self::GroupNewMessage(_) => "group_new_message",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub socket_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoomAck {
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Optional first frame carrying the bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeFrame {
    pub auth: HandshakeAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeAuth {
    pub token: String,
}
