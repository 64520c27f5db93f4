use axum::{
    extract::{Extension, Query, State},
    Json,
};
use huddle_common::types::Identity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiState, DataEnvelope};
use crate::{
    error::{ErrorCode, ServerError},
    store::UserRecord,
    validation::PageQuery,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user_id: Uuid,
    pub username: String,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        Self { user_id: user.id, username: user.username }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FriendsQuery {
    keyword: Option<String>,
    #[serde(flatten)]
    paging: PageQuery,
}

pub async fn profile(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<DataEnvelope<UserResponse>>, ServerError> {
    let user = state
        .store
        .find_user_by_id(identity.user_id)
        .await?
        .ok_or_else(|| ServerError::from_code(ErrorCode::UserNotFound))?;

    Ok(Json(DataEnvelope::new(user.into())))
}

/// Everyone except the caller, optionally narrowed by a username substring.
pub async fn friends(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<FriendsQuery>,
) -> Result<Json<DataEnvelope<Vec<UserResponse>>>, ServerError> {
    let page = query.paging.into_page()?;
    let keyword = query.keyword.as_deref().map(str::trim).filter(|keyword| !keyword.is_empty());

    let users = state.store.search_users(identity.user_id, keyword, page).await?;

    Ok(Json(DataEnvelope::new(users.into_iter().map(UserResponse::from).collect())))
}
