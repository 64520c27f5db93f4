// Request validation helpers.
//
// - `ValidatedJson<T>`: JSON body extractor that answers with VALIDATION_FAILED.
// - One-based paging parameters.
// - Path id parsing.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use uuid::Uuid;

use crate::{error::ServerError, store::Page};

/// Maximum REST request body in bytes (1 MiB).
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

// Every string a user controls ends up inside room envelopes, which must stay
// under the PostgreSQL NOTIFY payload limit. These bounds keep the largest
// `new_message` envelope below it even when every character needs escaping.
pub const MAX_MESSAGE_CONTENT_ENCODED_BYTES: usize = 6_000;
pub const MAX_USERNAME_CHARS: usize = 64;
pub const MAX_GROUP_NAME_CHARS: usize = 100;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 250;

/// A JSON body extractor that returns a structured `ServerError` on failure
/// instead of axum's plain-text rejection.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(ServerError::validation(message).with_details(details).into_response())
            }
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => (
            format!("invalid JSON payload: {}", e.body_text()),
            serde_json::json!({ "kind": "data_error" }),
        ),
        JsonRejection::JsonSyntaxError(e) => (
            format!("malformed JSON: {}", e.body_text()),
            serde_json::json!({ "kind": "syntax_error" }),
        ),
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            serde_json::json!({ "kind": "missing_content_type" }),
        ),
        other => (
            format!("request body error: {}", other.body_text()),
            serde_json::json!({ "kind": "body_error" }),
        ),
    }
}

/// Raw `page`/`size` query parameters. Kept as strings so that bad input is
/// reported through the structured error envelope.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub size: Option<String>,
}

impl PageQuery {
    pub fn into_page(self) -> Result<Page, ServerError> {
        Ok(Page {
            page: parse_positive("page", self.page.as_deref(), DEFAULT_PAGE)?,
            size: parse_positive("size", self.size.as_deref(), DEFAULT_PAGE_SIZE)?,
        })
    }
}

fn parse_positive(field: &'static str, raw: Option<&str>, default: u32) -> Result<u32, ServerError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(default);
    };

    raw.parse::<u32>()
        .ok()
        .filter(|value| *value >= 1)
        .ok_or_else(|| {
            ServerError::validation(format!("{field} must be a positive integer"))
                .with_details(serde_json::json!({ "field": field }))
        })
}

pub fn parse_object_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ServerError::validation("invalid object id"))
}

/// Trims `value` and rejects it when nothing is left.
pub fn require_non_blank(field: &'static str, value: &str) -> Result<String, ServerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServerError::validation(format!("{field} must not be empty"))
            .with_details(serde_json::json!({ "field": field })));
    }

    Ok(trimmed.to_owned())
}

pub fn require_max_chars(field: &'static str, value: &str, max: usize) -> Result<(), ServerError> {
    if value.chars().count() > max {
        return Err(ServerError::validation(format!("{field} must be at most {max} characters"))
            .with_details(serde_json::json!({ "field": field, "max": max })));
    }

    Ok(())
}

/// Bounds `value` by its size as a JSON string literal, escapes included.
pub fn require_max_encoded_bytes(
    field: &'static str,
    value: &str,
    max_bytes: usize,
) -> Result<(), ServerError> {
    let encoded_len = serde_json::to_string(value).map(|encoded| encoded.len()).unwrap_or(usize::MAX);
    if encoded_len > max_bytes {
        return Err(ServerError::validation(format!("{field} is too long"))
            .with_details(serde_json::json!({ "field": field, "max_bytes": max_bytes })));
    }

    Ok(())
}
