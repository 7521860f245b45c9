//! Verified user identity and the extractors that read it back.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::response::ApiError;

/// Claims that describe the token rather than the user.
pub const TOKEN_CLAIMS: [&str; 4] = ["iat", "exp", "aud", "iss"];

/// The verified token payload without its temporal and audience claims.
///
/// Lives in the request extensions for the rest of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub uuid: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    /// Any other claims the identity provider issued.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identity {
    /// Build an identity from a verified payload, dropping [`TOKEN_CLAIMS`].
    pub fn from_claims(mut claims: Map<String, Value>) -> Result<Self, serde_json::Error> {
        for claim in TOKEN_CLAIMS {
            claims.remove(claim);
        }
        serde_json::from_value(Value::Object(claims))
    }
}

/// Extractor for handlers behind the authorizer that need a signed-in user.
pub struct RequireIdentity(pub Identity);

impl<S> FromRequestParts<S> for RequireIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(RequireIdentity)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Optional identity - never fails.
/// Anonymous routes still see the identity when a valid token was sent.
pub struct MaybeIdentity(pub Option<Identity>);

impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(parts.extensions.get::<Identity>().cloned()))
    }
}
