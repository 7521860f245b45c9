#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{Method, Request, header, request::Builder},
    middleware,
    response::Response,
    routing::{get, post, put},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gatekeeper::ServerConfig;
use gatekeeper::auth::{Authorizer, MaybeIdentity, authorize_request};
use gatekeeper::jwks::{KeyError, KeyResolver, StaticJwks};
use gatekeeper::permissions::{AccessLevel, PermissionTable};
use gatekeeper::settings::{AuthSettings, PRODUCTION_IDENTITY_PROVIDER_URL};
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value, json};

pub const SECRET: &[u8] = b"integration-test-signing-secret";
pub const KEY_ID: &str = "test-key";
pub const HOST: &str = "api.example";
pub const ORIGIN: &str = "https://api.example/";
pub const USER_UUID: &str = "0b6f8a52-3c1d-4e7f-9a2b-5d4c3b2a1f00";
pub const OTHER_UUID: &str = "7e3d2c1b-0a9f-4e8d-8c7b-6a5f4e3d2c1b";

pub fn key_set_json() -> String {
    format!(
        r#"{{"keys": [{{"kty": "oct", "kid": "{}", "alg": "HS256", "k": "{}"}}]}}"#,
        KEY_ID,
        URL_SAFE_NO_PAD.encode(SECRET)
    )
}

pub fn key_set() -> Arc<dyn KeyResolver> {
    Arc::new(StaticJwks::from_json(&key_set_json()).expect("valid key set"))
}

/// Serve the key set like an identity provider, counting fetches.
/// Returns the provider's base URL.
pub async fn serve_identity_provider(fetches: Arc<AtomicUsize>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route(
        "/.well-known/jwks.json",
        get(move || {
            let fetches = fetches.clone();
            async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    key_set_json(),
                )
            }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Key resolver standing in for an unreachable identity provider.
pub struct UnreachableKeys;

#[async_trait]
impl KeyResolver for UnreachableKeys {
    async fn resolve(&self, _kid: Option<&str>) -> Result<Jwk, KeyError> {
        Err(KeyError::Timeout)
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Builder for signed test tokens. Defaults to a valid, non-admin token for this origin.
pub struct TokenBuilder {
    claims: Map<String, Value>,
    secret: &'static [u8],
    kid: String,
}

impl TokenBuilder {
    pub fn new() -> Self {
        let claims = json!({
            "uuid": USER_UUID,
            "username": "alice",
            "email": "alice@example.com",
            "iat": now(),
            "exp": now() + 300,
            "aud": ORIGIN,
            "iss": PRODUCTION_IDENTITY_PROVIDER_URL,
        });
        let Value::Object(claims) = claims else {
            unreachable!()
        };
        Self {
            claims,
            secret: SECRET,
            kid: KEY_ID.to_string(),
        }
    }

    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn expired(self) -> Self {
        self.claim("exp", json!(now() - 60))
    }

    pub fn admin(self) -> Self {
        self.claim("admin", json!(true))
    }

    pub fn uuid(self, uuid: &str) -> Self {
        self.claim("uuid", json!(uuid))
    }

    pub fn audience(self, aud: Value) -> Self {
        self.claim("aud", aud)
    }

    pub fn signed_with(mut self, secret: &'static [u8]) -> Self {
        self.secret = secret;
        self
    }

    pub fn kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    pub fn sign(self) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.kid);
        jsonwebtoken::encode(&header, &self.claims, &EncodingKey::from_secret(self.secret))
            .expect("Failed to sign token")
    }
}

pub fn permissions() -> PermissionTable {
    PermissionTable::builder()
        .allow(AccessLevel::Anonymous, Method::GET, "/pages")
        .allow(AccessLevel::Anonymous, Method::GET, "/health")
        .allow(AccessLevel::AuthenticatedUser, Method::POST, "/tu-lalem")
        .allow(AccessLevel::AuthenticatedUser, Method::GET, "/tu-lalem")
        .allow(AccessLevel::AuthenticatedUser, Method::GET, "/me")
        .build()
}

async fn echo(MaybeIdentity(identity): MaybeIdentity) -> Json<Value> {
    Json(json!({ "identity": identity }))
}

/// Routes behind the authorizer that report the attached identity.
pub fn guarded_router(settings: AuthSettings, keys: Arc<dyn KeyResolver>) -> Router {
    guarded_routes(Arc::new(Authorizer::with_key_resolver(
        settings,
        Arc::new(permissions()),
        keys,
    )))
}

pub fn guarded_routes(authorizer: Arc<Authorizer>) -> Router {
    Router::new()
        .route("/pages", get(echo))
        .route("/tu-lalem", post(echo).get(echo))
        .route("/auth/users/me", put(echo))
        .route(
            "/auth/user/{uuid}",
            get(echo).put(echo).patch(echo).delete(echo),
        )
        .route("/anything", get(echo).delete(echo))
        .layer(middleware::from_fn_with_state(authorizer, authorize_request))
}

pub fn test_config(log_dir: &Path) -> ServerConfig {
    ServerConfig {
        auth: AuthSettings::production(),
        permissions: permissions(),
        key_resolver: Some(key_set()),
        log_dir: log_dir.to_path_buf(),
        cors_origins: vec!["https://app.example".to_string()],
        rate_limit: None,
    }
}

/// Request builder addressed to the test origin over HTTPS.
pub fn request(method: Method, uri: &str) -> Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", HOST)
        .header("x-forwarded-proto", "https")
}

pub fn bearer(method: Method, uri: &str, token: &str) -> Request<Body> {
    request(method, uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn anonymous(method: Method, uri: &str) -> Request<Body> {
    request(method, uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
