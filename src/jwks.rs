//! JWT signature verification against a JSON Web Key Set.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// How long a fetched key set is reused before it is fetched again.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Minimum time between two fetches of the key set.
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Errors raised while resolving a key or verifying a token with it.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("malformed token: {0}")]
    MalformedToken(jsonwebtoken::errors::Error),
    #[error("no key matches key id {0:?}")]
    UnknownKeyId(Option<String>),
    #[error("algorithm {0:?} does not match the key")]
    AlgorithmMismatch(Algorithm),
    #[error("unsupported key: {0}")]
    UnsupportedKey(jsonwebtoken::errors::Error),
    #[error("signature verification failed: {0}")]
    Signature(jsonwebtoken::errors::Error),
    #[error("failed to fetch key set: {0}")]
    Fetch(reqwest::Error),
    #[error("timed out fetching key set")]
    Timeout,
    #[error("failed to read key set: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed key set: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Looks up the public key a token was signed with.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Return the key for `kid`. A token without `kid` only resolves against a single-key set.
    async fn resolve(&self, kid: Option<&str>) -> Result<Jwk, KeyError>;
}

fn find_key(keys: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => keys.find(kid).cloned(),
        None if keys.keys.len() == 1 => keys.keys.first().cloned(),
        None => None,
    }
}

/// A fixed key set, typically loaded from disk or built in tests.
#[derive(Debug, Clone)]
pub struct StaticJwks {
    keys: JwkSet,
}

impl StaticJwks {
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }

    pub fn from_json(json: &str) -> Result<Self, KeyError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[async_trait]
impl KeyResolver for StaticJwks {
    async fn resolve(&self, kid: Option<&str>) -> Result<Jwk, KeyError> {
        find_key(&self.keys, kid).ok_or_else(|| KeyError::UnknownKeyId(kid.map(str::to_string)))
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

#[derive(Default)]
struct KeyCache {
    keys: Option<CachedKeys>,
    last_attempt: Option<Instant>,
}

/// Key set published by an identity provider at `/.well-known/jwks.json`.
///
/// The set is cached for `cache_ttl` and refetched early when a token names
/// an unknown key id, so key rotation is picked up without a restart. Fetches
/// are serialised behind the cache lock and never closer together than
/// `refetch_interval`, so unknown key ids cannot drive traffic to the
/// identity provider.
pub struct RemoteJwks {
    url: String,
    client: reqwest::Client,
    cache_ttl: Duration,
    refetch_interval: Duration,
    cache: RwLock<KeyCache>,
}

impl RemoteJwks {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(KeyError::Fetch)?;

        Ok(Self {
            url: url.into(),
            client,
            cache_ttl: DEFAULT_CACHE_TTL,
            refetch_interval: DEFAULT_REFETCH_INTERVAL,
            cache: RwLock::new(KeyCache::default()),
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = interval;
        self
    }

    fn cached_key(&self, cache: &KeyCache, kid: Option<&str>) -> Option<Jwk> {
        cache
            .keys
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.cache_ttl)
            .and_then(|cached| find_key(&cached.keys, kid))
    }

    async fn fetch(&self) -> Result<JwkSet, KeyError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                KeyError::Timeout
            } else {
                KeyError::Fetch(e)
            }
        };

        let keys = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(classify)?
            .json::<JwkSet>()
            .await
            .map_err(classify)?;

        debug!(url = %self.url, keys = keys.keys.len(), "Fetched key set");
        Ok(keys)
    }
}

#[async_trait]
impl KeyResolver for RemoteJwks {
    async fn resolve(&self, kid: Option<&str>) -> Result<Jwk, KeyError> {
        let unknown = || KeyError::UnknownKeyId(kid.map(str::to_string));

        if let Some(key) = self.cached_key(&*self.cache.read().await, kid) {
            return Ok(key);
        }

        let mut cache = self.cache.write().await;

        // Another request may have refreshed the set while this one waited.
        if let Some(key) = self.cached_key(&cache, kid) {
            return Ok(key);
        }

        let throttled = cache
            .last_attempt
            .is_some_and(|at| at.elapsed() < self.refetch_interval);
        if throttled {
            debug!(kid = ?kid, "Key set fetched recently; not refetching");
            return cache
                .keys
                .as_ref()
                .and_then(|cached| find_key(&cached.keys, kid))
                .ok_or_else(unknown);
        }

        cache.last_attempt = Some(Instant::now());
        let keys = self.fetch().await.inspect_err(|e| {
            warn!(url = %self.url, error = %e, "Key set fetch failed");
        })?;
        let key = find_key(&keys, kid);

        cache.keys = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        key.ok_or_else(unknown)
    }
}

/// Signing algorithm a JWK pins through its `alg` parameter.
fn pinned_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    #[allow(unreachable_patterns)]
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        // Encryption algorithms never sign a token.
        _ => None,
    }
}

fn algorithm_matches_key(jwk: &Jwk, alg: Algorithm) -> bool {
    use Algorithm::*;
    #[allow(unreachable_patterns)]
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
        AlgorithmParameters::EllipticCurve(_) => matches!(alg, ES256 | ES384),
        AlgorithmParameters::OctetKey(_) => matches!(alg, HS256 | HS384 | HS512),
        AlgorithmParameters::OctetKeyPair(_) => matches!(alg, EdDSA),
        _ => false,
    }
}

/// Verify the token signature and return its payload.
///
/// Only the signature is checked here; expiry, issuer and audience are left
/// to the caller.
pub async fn verify_token(
    resolver: &dyn KeyResolver,
    token: &str,
) -> Result<Map<String, Value>, KeyError> {
    let header = jsonwebtoken::decode_header(token).map_err(KeyError::MalformedToken)?;
    let jwk = resolver.resolve(header.kid.as_deref()).await?;

    if !algorithm_matches_key(&jwk, header.alg) {
        return Err(KeyError::AlgorithmMismatch(header.alg));
    }
    if let Some(pinned) = &jwk.common.key_algorithm {
        if pinned_algorithm(pinned) != Some(header.alg) {
            return Err(KeyError::AlgorithmMismatch(header.alg));
        }
    }

    let key = DecodingKey::from_jwk(&jwk).map_err(KeyError::UnsupportedKey)?;

    let mut validation = Validation::new(header.alg);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)
        .map_err(KeyError::Signature)?;

    Ok(token_data.claims)
}
