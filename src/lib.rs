pub mod auth;
pub mod cli;
pub mod client_ip;
pub mod cors;
pub mod jwks;
pub mod logs;
pub mod method_override;
pub mod permissions;
pub mod rate_limit;
pub mod request_log;
pub mod response;
pub mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use auth::{Authorizer, Identity, MaybeIdentity, RequireIdentity, authorize_request};
use axum::{Json, Router, http::StatusCode, middleware, response::Response, routing::get};
use jwks::{KeyError, KeyResolver};
use permissions::PermissionTable;
use rate_limit::{RateLimitConfig, rate_limit};
use serde::Serialize;
use settings::AuthSettings;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::trace::TraceLayer;

pub struct ServerConfig {
    pub auth: AuthSettings,
    pub permissions: PermissionTable,
    /// Verify tokens with these keys instead of fetching the identity provider's JWKS.
    pub key_resolver: Option<Arc<dyn KeyResolver>>,
    /// Directory holding the newline-delimited JSON log files.
    pub log_dir: PathBuf,
    /// Origins allowed by CORS. Empty allows any origin without credentials.
    pub cors_origins: Vec<String>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    authenticated: bool,
}

async fn health(MaybeIdentity(identity): MaybeIdentity) -> Response {
    response::send_ok(
        HealthResponse {
            status: "ok",
            authenticated: identity.is_some(),
        },
        StatusCode::OK,
    )
}

async fn whoami(RequireIdentity(identity): RequireIdentity) -> Json<Identity> {
    Json(identity)
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, KeyError> {
    let permissions = Arc::new(config.permissions.clone());
    let authorizer = Arc::new(match &config.key_resolver {
        Some(keys) => Authorizer::with_key_resolver(config.auth.clone(), permissions, keys.clone()),
        None => Authorizer::new(config.auth.clone(), permissions)?,
    });

    let routes = Router::new()
        .route("/health", get(health))
        .route("/me", get(whoami))
        .nest(
            "/logs",
            logs::router(logs::LogsState {
                dir: config.log_dir.clone(),
            }),
        )
        .layer(middleware::from_fn_with_state(authorizer, authorize_request));

    let routes = match &config.rate_limit {
        Some(limits) => routes.layer(middleware::from_fn_with_state(limits.clone(), rate_limit)),
        None => routes,
    };

    let routes = routes
        .layer(middleware::from_fn(request_log::log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors::cors_layer(&config.cors_origins));

    // Method override has to see the request before routing does.
    let app = middleware::from_fn(method_override::method_override).layer(routes);
    Ok(Router::new().fallback_service(app))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;

    if let Some(limits) = &config.rate_limit {
        rate_limit::spawn_limiter_cleanup(limits.clone());
    }

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
