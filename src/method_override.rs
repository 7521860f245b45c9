//! Method override for clients limited to `GET` and `POST`.
//!
//! A `POST` naming `PUT`, `PATCH` or `DELETE` in `X-HTTP-Method-Override`
//! (or the `_method` query parameter) is routed as that method. The
//! middleware must wrap the router, not sit inside it, since routing has
//! already happened by the time inner layers run.

use axum::{
    extract::Request,
    http::{HeaderMap, Method, Uri},
    middleware::Next,
    response::Response,
};
use tracing::debug;

pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";
pub const METHOD_OVERRIDE_PARAM: &str = "_method";

fn requested_method(headers: &HeaderMap, uri: &Uri) -> Option<Method> {
    let requested = headers
        .get(METHOD_OVERRIDE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            let query = uri.query()?;
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == METHOD_OVERRIDE_PARAM)
                .map(|(_, value)| value.into_owned())
        })?;

    match requested.trim().to_ascii_uppercase().as_str() {
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}

pub async fn method_override(mut request: Request, next: Next) -> Response {
    if request.method() == Method::POST {
        if let Some(method) = requested_method(request.headers(), request.uri()) {
            debug!(path = %request.uri().path(), method = %method, "Method overridden");
            *request.method_mut() = method;
        }
    }
    next.run(request).await
}
