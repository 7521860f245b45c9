//! The parts of an HTTP request the authorizer looks at.

use axum::extract::OriginalUri;
use axum::http::{HeaderMap, Method, Uri, header, request::Parts};

/// Cookie, query parameter and header name carrying the access token.
pub const ACCESS_TOKEN_NAME: &str = "access_token";

/// Cookie name of the refresh token. It must never travel with ordinary requests.
pub const REFRESH_TOKEN_NAME: &str = "refresh_token";

/// Borrowed view of a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestFacts<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    /// Build from request parts, preferring the URI seen before any router nesting.
    pub fn from_parts(parts: &'a Parts) -> Self {
        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or(&parts.uri);
        Self::new(&parts.method, uri, &parts.headers)
    }

    pub fn path(&self) -> &'a str {
        self.uri.path()
    }

    /// Value of cookie `name`, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim())
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    fn authorization_bearer(&self) -> Option<&'a str> {
        let value = self.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        (!token.is_empty()).then_some(token)
    }

    /// The bearer token: `Authorization` header, then query parameter, then cookie.
    pub fn bearer_token(&self) -> Option<String> {
        if let Some(token) = self.authorization_bearer() {
            return Some(token.to_string());
        }
        if let Some(token) = self.query_param(ACCESS_TOKEN_NAME).filter(|t| !t.is_empty()) {
            return Some(token);
        }
        self.cookie(ACCESS_TOKEN_NAME)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// `{protocol}://{host}/` as the client addressed it.
    pub fn origin(&self) -> Option<String> {
        let protocol = self
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| self.uri.scheme_str())
            .unwrap_or("http");

        let host = self
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri.authority().map(|authority| authority.as_str()))?;

        Some(format!("{}://{}/", protocol, host))
    }
}
