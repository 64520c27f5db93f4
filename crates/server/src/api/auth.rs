use axum::{extract::State, http::StatusCode, Json};
use huddle_common::types::Identity;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{ApiState, DataEnvelope};
use crate::{
    auth::password::{hash_password, verify_password},
    error::{ErrorCode, ServerError},
    store::UserRecord,
    validation::{require_max_chars, require_non_blank, ValidatedJson, MAX_USERNAME_CHARS},
};

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

pub async fn register(
    State(state): State<ApiState>,
    ValidatedJson(payload): ValidatedJson<CredentialsRequest>,
) -> Result<(StatusCode, Json<DataEnvelope<AccessTokenResponse>>), ServerError> {
    let username = require_non_blank("username", &payload.username)?;
    require_max_chars("username", &username, MAX_USERNAME_CHARS)?;
    if payload.password.is_empty() {
        return Err(ServerError::validation("password must not be empty"));
    }

    if state.store.find_user_by_username(&username).await?.is_some() {
        return Err(ServerError::from_code(ErrorCode::UserAlreadyExists));
    }

    let password_hash = hash_password(&payload.password).map_err(internal)?;
    let user = state.store.create_user(&username, &password_hash).await?;
    info!(user_id = %user.id, "user registered");

    let response = issue_token(&state, &user)?;
    Ok((StatusCode::CREATED, Json(DataEnvelope::new(response))))
}

pub async fn login(
    State(state): State<ApiState>,
    ValidatedJson(payload): ValidatedJson<CredentialsRequest>,
) -> Result<Json<DataEnvelope<AccessTokenResponse>>, ServerError> {
    let username = require_non_blank("username", &payload.username)?;
    if payload.password.is_empty() {
        return Err(ServerError::validation("password must not be empty"));
    }

    let Some(user) = state.store.find_user_by_username(&username).await? else {
        return Err(ServerError::from_code(ErrorCode::AuthInvalidCredentials));
    };
    if !verify_password(&payload.password, &user.password_hash).map_err(internal)? {
        return Err(ServerError::from_code(ErrorCode::AuthInvalidCredentials));
    }

    Ok(Json(DataEnvelope::new(issue_token(&state, &user)?)))
}

fn issue_token(state: &ApiState, user: &UserRecord) -> Result<AccessTokenResponse, ServerError> {
    let identity = Identity { user_id: user.id, username: user.username.clone() };
    let access_token = state.jwt_service.issue_access_token(&identity).map_err(internal)?;
    Ok(AccessTokenResponse { access_token })
}

fn internal(error: anyhow::Error) -> ServerError {
    error!(?error, "auth api internal error");
    ServerError::from_code(ErrorCode::InternalError)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApi;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn register_then_login_issues_verifiable_tokens() {
        let api = TestApi::new();

        let (status, body) = api
            .call(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(json!({ "username": "alice", "password": "pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = body["data"]["accessToken"].as_str().expect("token should be present");
        let identity = api.jwt_service.verify(token).expect("token should verify");
        assert_eq!(identity.username, "alice");

        let (status, body) = api
            .call(
                Method::POST,
                "/v1/auth/login",
                None,
                Some(json!({ "username": "alice", "password": "pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let login_token = body["data"]["accessToken"].as_str().expect("token should be present");
        assert_eq!(
            api.jwt_service.verify(login_token).expect("token should verify").user_id,
            identity.user_id
        );
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let api = TestApi::new();
        let payload = json!({ "username": "alice", "password": "pw" });
        api.call(Method::POST, "/v1/auth/register", None, Some(payload.clone())).await;

        let (status, body) =
            api.call(Method::POST, "/v1/auth/register", None, Some(payload)).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "USER_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let api = TestApi::new();
        api.call(
            Method::POST,
            "/v1/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "pw" })),
        )
        .await;

        for payload in [
            json!({ "username": "alice", "password": "nope" }),
            json!({ "username": "nobody", "password": "pw" }),
        ] {
            let (status, body) = api.call(Method::POST, "/v1/auth/login", None, Some(payload)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["code"], "AUTH_INVALID_CREDENTIALS");
        }
    }

    #[tokio::test]
    async fn blank_credentials_fail_validation() {
        let api = TestApi::new();

        let (status, body) = api
            .call(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(json!({ "username": "   ", "password": "pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

        let (status, _) = api
            .call(Method::POST, "/v1/auth/login", None, Some(json!({ "username": "alice" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn overlong_usernames_are_rejected() {
        let api = TestApi::new();

        let (status, body) = api
            .call(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(json!({ "username": "u".repeat(65), "password": "pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "username");

        let (status, _) = api
            .call(
                Method::POST,
                "/v1/auth/register",
                None,
                Some(json!({ "username": "u".repeat(64), "password": "pw" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}
