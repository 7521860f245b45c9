//! Authorization failures and their HTTP rendering.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::Response,
};

use crate::response::send_error;

/// Why a request was rejected. Every variant is terminal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorisation token.")]
    MissingToken,
    #[error("Invalid authorisation token.")]
    InvalidToken,
    #[error("Access token is expired.")]
    ExpiredToken,
    #[error("Invalid token issuer: {0}")]
    InvalidIssuer(String),
    #[error("Token is missing an audience.")]
    MissingAudience,
    #[error("Invalid token audience: {0}")]
    InvalidAudience(String),
    #[error("You cannot perform that action.")]
    Forbidden,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Render the rejection. 401s carry a `WWW-Authenticate` challenge for `realm`.
    pub fn into_response_with_realm(self, realm: &str) -> Response {
        let message = self.to_string();
        let mut response = send_error(self.status_code(), message.as_str());

        if self.status_code() == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = bearer_challenge(realm, &message) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge);
            }
        }

        response
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `Bearer realm="…", error="invalid_token", error_description="…"`.
pub fn bearer_challenge(realm: &str, description: &str) -> Option<HeaderValue> {
    let full = format!(
        r#"Bearer realm="{}", error="invalid_token", error_description="{}""#,
        quote(realm),
        quote(description)
    );
    HeaderValue::from_str(&full).ok().or_else(|| {
        // Descriptions echo token claims and may hold bytes a header cannot.
        let bare = format!(r#"Bearer realm="{}", error="invalid_token""#, quote(realm));
        HeaderValue::from_str(&bare).ok()
    })
}
