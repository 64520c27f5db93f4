// Domain view types shared between the server and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated principal behind a request or a WebSocket connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// Kind of conversation. A personal chat is a pairwise conversation, a group
/// chat has three or more members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupChatType {
    Group,
    Personal,
}

impl GroupChatType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Group => "GROUP",
            Self::Personal => "PERSONAL",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "GROUP" => Some(Self::Group),
            "PERSONAL" => Some(Self::Personal),
            _ => None,
        }
    }

    /// Whether `member_count` (including the creator) is allowed for this kind.
    pub const fn accepts_member_count(self, member_count: usize) -> bool {
        match self {
            Self::Personal => member_count == 2,
            Self::Group => member_count >= 3,
        }
    }
}

/// Lightweight conversation projection, used in listings and in the
/// `group_new_message` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupChatSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub chat_type: GroupChatType,
}

/// A persisted message as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub content: String,
    pub user_id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}
