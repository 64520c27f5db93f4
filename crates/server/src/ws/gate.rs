// Membership check in front of group-room joins.
//
// Every rejection is scoped to the requesting connection: it becomes an
// `error` event and the connection stays open.

use huddle_common::{
    protocol::ws::{GroupRoomAck, ServerEvent},
    room::RoomId,
};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use super::{registry::RoomRegistry, session::ConnectionSession};
use crate::{
    error::ErrorCode,
    store::{ChatStore, StoreError},
};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid object id")]
    InvalidGroupId(String),
    #[error("Group chat not found")]
    GroupChatNotFound(Uuid),
    #[error("Not a member of this group")]
    NotAMember(Uuid),
    #[error("failed to load group chat")]
    Store(#[from] StoreError),
}

impl GateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidGroupId(_) => ErrorCode::ValidationFailed,
            Self::GroupChatNotFound(_) => ErrorCode::GroupChatNotFound,
            Self::NotAMember(_) => ErrorCode::NotAMember,
            Self::Store(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code().as_str(), self.to_string())
    }
}

pub fn parse_group_id(raw: &str) -> Result<Uuid, GateError> {
    Uuid::parse_str(raw.trim()).map_err(|_| GateError::InvalidGroupId(raw.to_owned()))
}

/// Joins the connection to the group's room if its user is a member.
pub async fn request_join(
    registry: &RoomRegistry,
    store: &ChatStore,
    session: &ConnectionSession,
    raw_group_id: &str,
) -> Result<ServerEvent, GateError> {
    let group_id = parse_group_id(raw_group_id)?;
    let user_id = session.identity().user_id;

    let group_chat = match store.get_group_chat(group_id).await {
        Ok(Some(group_chat)) => group_chat,
        Ok(None) => return Err(GateError::GroupChatNotFound(group_id)),
        Err(store_error) => {
            error!(error = ?store_error, group_id = %group_id, "group lookup failed during join");
            return Err(store_error.into());
        }
    };

    if !group_chat.is_member(user_id) {
        return Err(GateError::NotAMember(group_id));
    }

    registry.join(session.id(), RoomId::group(group_id)).await;
    info!(
        connection_id = %session.id(),
        user_id = %user_id,
        group_id = %group_id,
        "joined group room"
    );

    Ok(ServerEvent::JoinedGroup(GroupRoomAck { group_id }))
}

/// Leaves the group's room. No membership check: leaving is always allowed.
pub async fn request_leave(
    registry: &RoomRegistry,
    session: &ConnectionSession,
    raw_group_id: &str,
) -> Result<ServerEvent, GateError> {
    let group_id = parse_group_id(raw_group_id)?;
    registry.leave(session.id(), RoomId::group(group_id)).await;

    Ok(ServerEvent::LeftGroup(GroupRoomAck { group_id }))
}
