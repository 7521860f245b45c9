//! CLI argument parsing and startup helpers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tracing::{error, info};

use crate::ServerConfig;
use crate::client_ip::ClientIpHeader;
use crate::jwks::{KeyResolver, StaticJwks};
use crate::permissions::{AccessLevel, PermissionTable};
use crate::rate_limit::RateLimitConfig;
use crate::settings::AuthSettings;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gatekeeper",
    about = "Bearer-token authorization gateway for internal services"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "7300")]
    pub port: u16,

    /// JSON permission table (access level -> method -> path prefixes)
    #[arg(long, env = "PERMISSIONS_FILE")]
    pub permissions: Option<PathBuf>,

    /// Verify tokens with a local JWKS file instead of the identity provider's
    #[arg(long)]
    pub jwks_file: Option<PathBuf>,

    /// Directory containing newline-delimited JSON log files
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Allowed CORS origin (repeatable). Any origin is allowed when omitted
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,

    /// Requests per second allowed per client IP (0 disables rate limiting)
    #[arg(long, default_value = "20")]
    pub rate_limit: u32,

    /// Burst size for the per-client rate limit
    #[arg(long, default_value = "40")]
    pub rate_limit_burst: u32,

    /// Header set by a trusted reverse proxy to identify clients. Without it
    /// clients are identified by their peer address
    #[arg(long, env = "TRUSTED_PROXY_HEADER")]
    pub trusted_proxy_header: Option<ClientIpHeader>,

    /// Enable debug mode (also enabled by DEBUG=true)
    #[arg(long)]
    pub debug: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Table used when no permission file is given: only the health check is public.
pub fn default_permissions() -> PermissionTable {
    PermissionTable::builder()
        .allow(AccessLevel::Anonymous, Method::GET, "/health")
        .build()
}

/// Load the permission table, logging errors if it fails.
pub fn load_permissions(path: Option<&Path>) -> Option<PermissionTable> {
    let Some(path) = path else {
        info!("No permission table given; only /health is public");
        return Some(default_permissions());
    };

    match PermissionTable::load(path) {
        Ok(table) => {
            info!(path = %path.display(), "Permission table loaded");
            Some(table)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to load permission table");
            None
        }
    }
}

/// Load a static key set, logging errors if it fails.
pub fn load_key_resolver(path: &Path) -> Option<Arc<dyn KeyResolver>> {
    match StaticJwks::load(path) {
        Ok(keys) => {
            info!(path = %path.display(), "Static key set loaded");
            Some(Arc::new(keys))
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to load key set");
            None
        }
    }
}

/// Build ServerConfig from parsed arguments and the environment.
/// Returns None after logging the reason when startup should abort.
pub fn build_config(args: &Args) -> Option<ServerConfig> {
    let debug_mode = args.debug || AuthSettings::debug_from_env();
    let auth = AuthSettings::from_env(debug_mode);

    let permissions = load_permissions(args.permissions.as_deref())?;

    let key_resolver = match &args.jwks_file {
        Some(path) => Some(load_key_resolver(path)?),
        None => None,
    };

    info!(
        debug_mode,
        identity_provider = %auth.identity_provider_url(),
        enforce_expiry = auth.enforce_expiry,
        enforce_issuer = auth.enforce_issuer,
        "Authorization configured"
    );

    Some(ServerConfig {
        auth,
        permissions,
        key_resolver,
        log_dir: args.log_dir.clone(),
        cors_origins: args.cors_origins.clone(),
        rate_limit: RateLimitConfig::from_limits(args.rate_limit, args.rate_limit_burst)
            .map(|limits| limits.with_trusted_header(args.trusted_proxy_header)),
    })
}
