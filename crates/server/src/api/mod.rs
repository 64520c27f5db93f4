pub mod auth;
pub mod group_chats;
pub mod users;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::{
    auth::{jwt::JwtAccessTokenService, middleware::require_bearer_auth},
    store::ChatStore,
    ws::fanout::ChatFanout,
};

#[derive(Clone)]
pub struct ApiState {
    store: ChatStore,
    jwt_service: Arc<JwtAccessTokenService>,
    fanout: ChatFanout,
}

/// Success envelope shared by every REST response.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: uuid::Uuid,
}

pub fn router(
    store: ChatStore,
    jwt_service: Arc<JwtAccessTokenService>,
    fanout: ChatFanout,
) -> Router {
    let state = ApiState { store, jwt_service: Arc::clone(&jwt_service), fanout };

    let public = Router::new()
        .route("/v1/auth/register", post(auth::register))
        .route("/v1/auth/login", post(auth::login));

    let protected = Router::new()
        .route("/v1/users/profile", get(users::profile))
        .route("/v1/users/friends", get(users::friends))
        .route("/v1/group-chats", post(group_chats::create_group_chat))
        .route("/v1/group-chats/me", get(group_chats::list_my_group_chats))
        .route(
            "/v1/group-chats/{group_id}/messages",
            post(group_chats::send_message).get(group_chats::list_messages),
        )
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth));

    public.merge(protected).with_state(state)
}
