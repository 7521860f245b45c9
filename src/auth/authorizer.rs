//! Per-request authorization decision.
//!
//! Evaluation order:
//! 1. classify the route against the permission table (`HEAD` counts as `GET`)
//! 2. warn about refresh tokens sent outside of logout
//! 3. extract and verify the bearer token against the identity provider's JWKS
//! 4. enforce expiry, issuer and audience
//! 5. allow authenticated routes, a user's own profile, and administrators
//!
//! Any rejection is turned into an allow when the route is open to anonymous
//! users or authentication is disabled in debug mode. The checks still run so
//! the identity is attached whenever a valid token was presented.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::Method;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::errors::AuthError;
use super::identity::Identity;
use super::request::{REFRESH_TOKEN_NAME, RequestFacts};
use crate::jwks::{KeyError, KeyResolver, RemoteJwks, verify_token};
use crate::permissions::{Accessibility, PermissionTable, effective_method};
use crate::settings::{AuthSettings, PRODUCTION_IDENTITY_PROVIDER_URL};

/// Audience accepted for any origin.
pub const WILDCARD_AUDIENCE: &str = "*";

/// Users may always read and edit their own record below this prefix.
pub const SELF_SERVICE_PREFIX: &str = "/auth/user/";

/// Outcome of authorizing one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Let the request through, with the identity when a valid token was sent.
    Allow(Option<Identity>),
    Reject(AuthError),
}

pub struct Authorizer {
    settings: AuthSettings,
    permissions: Arc<PermissionTable>,
    keys: Arc<dyn KeyResolver>,
    disable_auth: bool,
}

impl Authorizer {
    /// Authorizer verifying tokens against the identity provider's published key set.
    pub fn new(settings: AuthSettings, permissions: Arc<PermissionTable>) -> Result<Self, KeyError> {
        let keys = RemoteJwks::new(settings.jwks_url(), settings.key_fetch_timeout)?
            .with_cache_ttl(settings.key_cache_ttl)
            .with_refetch_interval(settings.key_refetch_interval);
        Ok(Self::with_key_resolver(settings, permissions, Arc::new(keys)))
    }

    pub fn with_key_resolver(
        settings: AuthSettings,
        permissions: Arc<PermissionTable>,
        keys: Arc<dyn KeyResolver>,
    ) -> Self {
        let disable_auth = settings.debug && settings.auth_disabled;
        if disable_auth {
            warn!("Authentication is fully disabled. Never run this configuration in production");
        }

        Self {
            settings,
            permissions,
            keys,
            disable_auth,
        }
    }

    /// Realm advertised in `WWW-Authenticate` challenges.
    pub fn realm(&self) -> &str {
        self.settings.identity_provider_url()
    }

    pub async fn authorize(&self, request: &RequestFacts<'_>) -> Decision {
        let path = request.path();
        let access = self.permissions.accessibility(request.method, path);

        self.check_refresh_token(request);

        let mut identity = None;
        match self.evaluate(request, access, &mut identity).await {
            Ok(()) => Decision::Allow(identity),
            Err(error) if access.anonymous || self.disable_auth => {
                debug!(
                    method = %request.method,
                    path = %path,
                    error = %error,
                    anonymous = access.anonymous,
                    "Rejection suppressed"
                );
                Decision::Allow(identity)
            }
            Err(error) => {
                debug!(method = %request.method, path = %path, error = %error, "Request rejected");
                Decision::Reject(error)
            }
        }
    }

    fn check_refresh_token(&self, request: &RequestFacts<'_>) {
        if request.cookie(REFRESH_TOKEN_NAME).is_none() {
            return;
        }
        let is_logout = request.method == Method::DELETE
            && request.path().starts_with(&self.settings.token_revocation_path);
        if !is_logout {
            warn!(
                method = %request.method,
                path = %request.path(),
                "Refresh token sent with a request other than logout; check the client's cookie path"
            );
        }
    }

    async fn evaluate(
        &self,
        request: &RequestFacts<'_>,
        access: Accessibility,
        identity_slot: &mut Option<Identity>,
    ) -> Result<(), AuthError> {
        let token = request.bearer_token().ok_or(AuthError::MissingToken)?;

        let claims = verify_token(self.keys.as_ref(), &token)
            .await
            .map_err(|e| {
                debug!(error = %e, "Token verification failed");
                AuthError::InvalidToken
            })?;

        let exp = claims.get("exp").and_then(Value::as_f64);
        let iss = claims.get("iss").cloned();
        let aud = claims.get("aud").cloned();

        let identity = Identity::from_claims(claims).map_err(|e| {
            debug!(error = %e, "Token payload is not a user identity");
            AuthError::InvalidToken
        })?;
        let identity = identity_slot.insert(identity);

        if self.settings.enforce_expiry && is_expired(exp) {
            return Err(AuthError::ExpiredToken);
        }

        if self.settings.enforce_issuer {
            check_issuer(iss.as_ref())?;
        }

        check_audience(aud.as_ref(), request.origin().as_deref())?;

        if access.authenticated_user {
            return Ok(());
        }

        if is_self_service(request, identity) {
            return Ok(());
        }

        if identity.admin {
            info!(
                user = %identity.uuid,
                method = %request.method,
                path = %request.path(),
                "Administrator override"
            );
            return Ok(());
        }

        Err(AuthError::Forbidden)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A token without a numeric `exp` never counts as fresh.
fn is_expired(exp: Option<f64>) -> bool {
    match exp {
        Some(exp) => now_secs() > exp,
        None => true,
    }
}

fn check_issuer(iss: Option<&Value>) -> Result<(), AuthError> {
    match iss.and_then(Value::as_str) {
        Some(iss) if iss == PRODUCTION_IDENTITY_PROVIDER_URL => Ok(()),
        Some(iss) => Err(AuthError::InvalidIssuer(iss.to_string())),
        None => Err(AuthError::InvalidIssuer(
            iss.map(Value::to_string).unwrap_or_else(|| "none".to_string()),
        )),
    }
}

fn check_audience(aud: Option<&Value>, origin: Option<&str>) -> Result<(), AuthError> {
    let accepts = |candidate: &str| candidate == WILDCARD_AUDIENCE || Some(candidate) == origin;

    match aud {
        None | Some(Value::Null) => Err(AuthError::MissingAudience),
        Some(Value::String(aud)) if accepts(aud.as_str()) => Ok(()),
        Some(Value::String(aud)) => Err(AuthError::InvalidAudience(aud.clone())),
        Some(Value::Array(list)) => {
            if list.iter().filter_map(Value::as_str).any(accepts) {
                Ok(())
            } else {
                Err(AuthError::InvalidAudience(describe_list(list)))
            }
        }
        Some(other) => Err(AuthError::InvalidAudience(other.to_string())),
    }
}

fn describe_list(list: &[Value]) -> String {
    list.iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_self_service(request: &RequestFacts<'_>, identity: &Identity) -> bool {
    if identity.uuid.is_empty() {
        return false;
    }
    let method = effective_method(request.method);
    let own_record = format!("{}{}", SELF_SERVICE_PREFIX, identity.uuid);
    request.path().starts_with(&own_record)
        && matches!(method, Method::GET | Method::PUT | Method::PATCH)
}
