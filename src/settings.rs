//! Authorizer settings resolved once at startup.
//!
//! Environment flags are read a single time into [`AuthSettings`] and never
//! consulted again. The debug-only escape hatches are ignored unless debug
//! mode is on.

use std::time::Duration;

use crate::jwks::{DEFAULT_CACHE_TTL, DEFAULT_REFETCH_INTERVAL};

/// Origin of the production identity provider. Tokens are expected to carry it as `iss`.
pub const PRODUCTION_IDENTITY_PROVIDER_URL: &str = "https://auth.tulalem.com";

/// Identity provider used when `USE_LOCAL_AUTH_SERVER=true` in debug mode.
pub const DEFAULT_LOCAL_IDENTITY_PROVIDER_URL: &str = "http://localhost:3000";

/// A `DELETE` to this path is a logout and may legitimately carry the refresh token.
pub const DEFAULT_TOKEN_REVOCATION_PATH: &str = "/auth/token";

/// Upper bound on a JWKS fetch.
pub const DEFAULT_KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_DEBUG: &str = "DEBUG";
pub const ENV_DISABLE_AUTH: &str = "DISABLE_AUTH";
pub const ENV_USE_LOCAL_AUTH_SERVER: &str = "USE_LOCAL_AUTH_SERVER";
pub const ENV_LOCAL_AUTH_SERVER_URL: &str = "LOCAL_AUTH_SERVER_URL";
pub const ENV_ALLOW_EXPIRED_TOKENS: &str = "ALLOW_EXPIRED_TOKENS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub debug: bool,
    /// Every rejection is suppressed. Only honoured in debug mode.
    pub auth_disabled: bool,
    pub use_local_identity_provider: bool,
    pub local_identity_provider_url: String,
    pub enforce_expiry: bool,
    /// Require `iss` to be the production identity provider.
    pub enforce_issuer: bool,
    pub token_revocation_path: String,
    pub key_fetch_timeout: Duration,
    /// How long a fetched key set is trusted before it is fetched again.
    pub key_cache_ttl: Duration,
    /// Minimum gap between two fetches, whatever key id a token names.
    pub key_refetch_interval: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::production()
    }
}

impl AuthSettings {
    /// Settings with every check enforced and no debug escape hatch.
    pub fn production() -> Self {
        Self {
            debug: false,
            auth_disabled: false,
            use_local_identity_provider: false,
            local_identity_provider_url: DEFAULT_LOCAL_IDENTITY_PROVIDER_URL.to_string(),
            enforce_expiry: true,
            enforce_issuer: true,
            token_revocation_path: DEFAULT_TOKEN_REVOCATION_PATH.to_string(),
            key_fetch_timeout: DEFAULT_KEY_FETCH_TIMEOUT,
            key_cache_ttl: DEFAULT_CACHE_TTL,
            key_refetch_interval: DEFAULT_REFETCH_INTERVAL,
        }
    }

    /// Resolve settings from the process environment.
    pub fn from_env(debug: bool) -> Self {
        Self::from_lookup(debug, |name| std::env::var(name).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    ///
    /// Boolean flags are only set by the exact string `"true"`.
    pub fn from_lookup<F>(debug: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).as_deref() == Some("true");

        let auth_disabled = debug && flag(ENV_DISABLE_AUTH);
        let use_local_identity_provider = debug && flag(ENV_USE_LOCAL_AUTH_SERVER);
        let local_identity_provider_url = lookup(ENV_LOCAL_AUTH_SERVER_URL)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_IDENTITY_PROVIDER_URL.to_string());

        Self {
            debug,
            auth_disabled,
            use_local_identity_provider,
            local_identity_provider_url,
            enforce_expiry: !(debug && flag(ENV_ALLOW_EXPIRED_TOKENS)),
            // A local identity provider signs with its own origin as issuer.
            enforce_issuer: !use_local_identity_provider,
            ..Self::production()
        }
    }

    /// Debug flag as read from `DEBUG`.
    pub fn debug_from_env() -> bool {
        std::env::var(ENV_DEBUG).as_deref() == Ok("true")
    }

    /// Base URL of the identity provider tokens are verified against.
    pub fn identity_provider_url(&self) -> &str {
        if self.use_local_identity_provider {
            self.local_identity_provider_url.trim_end_matches('/')
        } else {
            PRODUCTION_IDENTITY_PROVIDER_URL
        }
    }

    /// JWKS endpoint of the identity provider.
    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.identity_provider_url())
    }
}
