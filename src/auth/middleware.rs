//! Axum middleware running the [`Authorizer`] in front of every route.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::authorizer::{Authorizer, Decision};
use super::request::RequestFacts;

/// Authorize the request, attach the verified [`Identity`](super::Identity)
/// on success and render the rejection otherwise.
pub async fn authorize_request(
    State(authorizer): State<Arc<Authorizer>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let decision = authorizer
        .authorize(&RequestFacts::from_parts(&parts))
        .await;

    match decision {
        Decision::Allow(identity) => {
            if let Some(identity) = identity {
                parts.extensions.insert(identity);
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Decision::Reject(error) => error.into_response_with_realm(authorizer.realm()),
    }
}
