use std::collections::HashMap;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use huddle_common::types::{GroupChatSummary, GroupChatType, Identity, MessageView};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{ApiState, DataEnvelope, IdResponse};
use crate::{
    error::{ErrorCode, ServerError},
    store::{GroupChatRecord, MessageRecord, NewGroupChat},
    validation::{
        parse_object_id, require_max_chars, require_max_encoded_bytes, require_non_blank,
        PageQuery, ValidatedJson, MAX_GROUP_NAME_CHARS, MAX_MESSAGE_CONTENT_ENCODED_BYTES,
    },
};

#[derive(Debug, Deserialize)]
pub struct CreateGroupChatRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub members: Vec<String>,
    #[serde(rename = "type")]
    pub chat_type: GroupChatType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    /// Connection to skip during fan-out, as announced by the `connected` event.
    #[serde(default)]
    pub socket_id: Option<String>,
}

type Created = (StatusCode, Json<DataEnvelope<IdResponse>>);

pub async fn create_group_chat(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    ValidatedJson(payload): ValidatedJson<CreateGroupChatRequest>,
) -> Result<Created, ServerError> {
    let group_name = match payload.chat_type {
        GroupChatType::Group => {
            let name = require_non_blank("name", payload.name.as_deref().unwrap_or_default())?;
            require_max_chars("name", &name, MAX_GROUP_NAME_CHARS)?;
            Some(name)
        }
        GroupChatType::Personal => None,
    };

    let mut invited = Vec::with_capacity(payload.members.len());
    for raw in &payload.members {
        let member_id = parse_object_id(raw)?;
        if member_id != identity.user_id && !invited.contains(&member_id) {
            invited.push(member_id);
        }
    }
    let found = state.store.find_users_by_ids(&invited).await?;
    if found.len() != invited.len() {
        return Err(ServerError::from_code(ErrorCode::MemberNotFound));
    }

    let mut members = invited;
    members.push(identity.user_id);
    if !payload.chat_type.accepts_member_count(members.len()) {
        return Err(ServerError::from_code(ErrorCode::InvalidMemberNumber));
    }

    let name = match group_name {
        Some(name) => name,
        None => {
            let Some(other) = found.first() else {
                return Err(ServerError::from_code(ErrorCode::InvalidMemberNumber));
            };
            if let Some(existing) = state.store.find_personal_chat(identity.user_id, other.id).await? {
                let response = DataEnvelope::new(IdResponse { id: existing.id });
                return Ok((StatusCode::CREATED, Json(response)));
            }
            other.username.clone()
        }
    };

    let group_chat = state
        .store
        .create_group_chat(NewGroupChat {
            name,
            chat_type: payload.chat_type,
            members,
            created_by: identity.user_id,
        })
        .await?;
    info!(
        group_id = %group_chat.id,
        user_id = %identity.user_id,
        chat_type = group_chat.chat_type.as_str(),
        members = group_chat.members.len(),
        "group chat created"
    );

    Ok((StatusCode::CREATED, Json(DataEnvelope::new(IdResponse { id: group_chat.id }))))
}

/// Persists the message, then fans it out. Delivery never affects the response.
pub async fn send_message(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(raw_group_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<SendMessageRequest>,
) -> Result<Created, ServerError> {
    let group_id = parse_object_id(&raw_group_id)?;
    let content = require_non_blank("content", &payload.content)?;
    require_max_encoded_bytes("content", &content, MAX_MESSAGE_CONTENT_ENCODED_BYTES)?;
    let origin = match payload.socket_id.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| {
            ServerError::validation("socketId must be a connection id")
                .with_details(serde_json::json!({ "field": "socketId" }))
        })?),
        None => None,
    };

    let group_chat = load_group_chat_for_member(&state, group_id, identity.user_id).await?;
    let message = state.store.create_message(identity.user_id, group_id, &content).await?;
    let view = message_view(message, &identity.username);
    let message_id = view.id;

    let origin = filter_foreign_origin(&state, origin, identity.user_id).await;
    state.fanout.spawn_broadcast(group_chat, view, origin);

    Ok((StatusCode::CREATED, Json(DataEnvelope::new(IdResponse { id: message_id }))))
}

pub async fn list_messages(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(raw_group_id): Path<String>,
    Query(paging): Query<PageQuery>,
) -> Result<Json<DataEnvelope<Vec<MessageView>>>, ServerError> {
    let group_id = parse_object_id(&raw_group_id)?;
    let page = paging.into_page()?;
    load_group_chat_for_member(&state, group_id, identity.user_id).await?;

    let messages = state.store.list_messages(group_id, page).await?;
    let mut author_ids = messages.iter().map(|message| message.author_id).collect::<Vec<_>>();
    author_ids.sort();
    author_ids.dedup();
    let usernames = state
        .store
        .find_users_by_ids(&author_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user.username))
        .collect::<HashMap<_, _>>();

    let views = messages
        .into_iter()
        .map(|message| {
            let username = usernames.get(&message.author_id).map(String::as_str).unwrap_or_default();
            message_view(message, username)
        })
        .collect();

    Ok(Json(DataEnvelope::new(views)))
}

pub async fn list_my_group_chats(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Query(paging): Query<PageQuery>,
) -> Result<Json<DataEnvelope<Vec<GroupChatSummary>>>, ServerError> {
    let page = paging.into_page()?;
    let group_chats = state.store.list_group_chats_for_member(identity.user_id, page).await?;

    Ok(Json(DataEnvelope::new(group_chats.iter().map(GroupChatRecord::summary).collect())))
}

async fn load_group_chat_for_member(
    state: &ApiState,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<GroupChatRecord, ServerError> {
    let group_chat = state
        .store
        .get_group_chat(group_id)
        .await?
        .ok_or_else(|| ServerError::from_code(ErrorCode::GroupChatNotFound))?;

    if !group_chat.is_member(user_id) {
        return Err(ServerError::from_code(ErrorCode::NotAMember));
    }

    Ok(group_chat)
}

// A socket id owned by somebody else must not silence their delivery.
async fn filter_foreign_origin(state: &ApiState, origin: Option<Uuid>, user_id: Uuid) -> Option<Uuid> {
    let connection_id = origin?;
    match state.fanout.registry().user_of(connection_id).await {
        Some(owner) if owner != user_id => None,
        _ => Some(connection_id),
    }
}

fn message_view(message: MessageRecord, username: &str) -> MessageView {
    MessageView {
        id: message.id,
        content: message.content,
        user_id: message.author_id,
        username: username.to_owned(),
        created_at: message.created_at,
        is_read: message.is_read,
    }
}
