// Room addressing for the chat gateway.
//
// Rooms are addressed by a tagged id rather than ad hoc string prefixes. The
// canonical string key is what travels over the backplane and shows up in
// logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const PERSONAL_ROOM_PREFIX: &str = "user_";
const GROUP_ROOM_PREFIX: &str = "group_chat_room_";

/// A broadcast group of connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RoomId {
    /// Auto-joined by every connection of the user.
    Personal(Uuid),
    /// Joined explicitly after a membership check.
    Group(Uuid),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomKeyError {
    #[error("room key has no known prefix: {0}")]
    UnknownPrefix(String),

    #[error("room key carries an invalid id: {0}")]
    InvalidId(String),
}

impl RoomId {
    pub const fn personal(user_id: Uuid) -> Self {
        Self::Personal(user_id)
    }

    pub const fn group(group_id: Uuid) -> Self {
        Self::Group(group_id)
    }

    pub const fn is_personal(&self) -> bool {
        matches!(self, Self::Personal(_))
    }

    /// Canonical string key, e.g. `user_<uuid>` or `group_chat_room_<uuid>`.
    pub fn key(&self) -> String {
        match self {
            Self::Personal(user_id) => format!("{PERSONAL_ROOM_PREFIX}{user_id}"),
            Self::Group(group_id) => format!("{GROUP_ROOM_PREFIX}{group_id}"),
        }
    }

    pub fn parse_key(key: &str) -> Result<Self, RoomKeyError> {
        let (raw_id, build): (&str, fn(Uuid) -> Self) =
            if let Some(rest) = key.strip_prefix(GROUP_ROOM_PREFIX) {
                (rest, Self::Group)
            } else if let Some(rest) = key.strip_prefix(PERSONAL_ROOM_PREFIX) {
                (rest, Self::Personal)
            } else {
                return Err(RoomKeyError::UnknownPrefix(key.to_string()));
            };

        Uuid::parse_str(raw_id)
            .map(build)
            .map_err(|_| RoomKeyError::InvalidId(key.to_string()))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.key()
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_key(&value)
    }
}
