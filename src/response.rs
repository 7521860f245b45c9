//! Response rendering shared by every service.
//!
//! Errors are rendered as `{ "<code> <reason phrase>": "<message>" }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

/// `"<code> <reason phrase>"`, e.g. `"401 Unauthorized"`.
pub fn status_label(code: StatusCode) -> String {
    match code.canonical_reason() {
        Some(reason) => format!("{} {}", code.as_u16(), reason),
        None => code.as_u16().to_string(),
    }
}

/// Render an error response.
pub fn send_error(code: StatusCode, message: impl Into<String>) -> Response {
    let mut body = Map::new();
    body.insert(status_label(code), Value::String(message.into()));
    (code, Json(Value::Object(body))).into_response()
}

/// Render a successful response with `data` as the JSON body.
pub fn send_ok<T: Serialize>(data: T, code: StatusCode) -> Response {
    (code, Json(data)).into_response()
}

/// Handler error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Log the underlying cause and hide it from the client.
    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal(context.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        send_error(status, message)
    }
}
