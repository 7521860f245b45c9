//! Cross-origin resource sharing.

use axum::http::{
    HeaderName, HeaderValue, Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::method_override::METHOD_OVERRIDE_HEADER;
use crate::request_log::REQUEST_ID_HEADER;

const METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// CORS layer for the given origins.
///
/// With no origins every origin is allowed, but without credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_headers = [
        AUTHORIZATION,
        ACCEPT,
        CONTENT_TYPE,
        HeaderName::from_static(METHOD_OVERRIDE_HEADER),
        HeaderName::from_static(REQUEST_ID_HEADER),
    ];
    let exposed_headers = [WWW_AUTHENTICATE, HeaderName::from_static(REQUEST_ID_HEADER)];

    let layer = CorsLayer::new()
        .allow_methods(METHODS)
        .allow_headers(allowed_headers)
        .expose_headers(exposed_headers);

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}
