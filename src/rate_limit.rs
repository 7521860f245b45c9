//! Per-client rate limiting.
//!
//! Token bucket per client IP. Buckets of clients that went quiet are
//! dropped by a background task.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use tracing::{debug, warn};

use crate::client_ip::{ClientIpHeader, extract_client_ip};
use crate::response::send_error;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Interval between sweeps of idle buckets.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RateLimitConfig {
    limiter: Arc<IpLimiter>,
    /// `None` keys clients by peer address.
    trusted_header: Option<ClientIpHeader>,
}

impl RateLimitConfig {
    /// Allow `per_second` requests per client, with bursts up to `burst`.
    pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(
                Quota::per_second(per_second).allow_burst(burst),
            )),
            trusted_header: None,
        }
    }

    /// Key clients by the address a trusted proxy puts in `header`.
    pub fn with_trusted_header(mut self, header: Option<ClientIpHeader>) -> Self {
        self.trusted_header = header;
        self
    }

    /// Build from raw numbers; a zero rate disables limiting.
    pub fn from_limits(per_second: u32, burst: u32) -> Option<Self> {
        let per_second = NonZeroU32::new(per_second)?;
        let burst = NonZeroU32::new(burst).unwrap_or(per_second);
        Some(Self::new(per_second, burst))
    }

    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }
}

/// Spawn a background task that forgets idle clients.
/// Returns a handle that can be used to abort the task.
pub fn spawn_limiter_cleanup(config: RateLimitConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            config.limiter.retain_recent();
            config.limiter.shrink_to_fit();
            debug!(clients = config.limiter.len(), "Rate limiter swept");
        }
    })
}

/// Middleware rejecting clients over their quota.
pub async fn rate_limit(
    State(config): State<RateLimitConfig>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, config.trusted_header) {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(path = %request.uri().path(), reason, "Unable to determine client IP");
            return send_error(StatusCode::FORBIDDEN, "Unable to determine client IP.");
        }
    };

    if config.check(&ip) {
        next.run(request).await
    } else {
        debug!(ip = %ip, "Rate limit exceeded");
        send_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let config = RateLimitConfig::from_limits(1, 3).unwrap();
        assert!(config.check("203.0.113.7"));
        assert!(config.check("203.0.113.7"));
        assert!(config.check("203.0.113.7"));
        assert!(!config.check("203.0.113.7"));
    }

    #[test]
    fn test_clients_are_independent() {
        let config = RateLimitConfig::from_limits(1, 1).unwrap();
        assert!(config.check("203.0.113.7"));
        assert!(!config.check("203.0.113.7"));
        assert!(config.check("198.51.100.2"));
    }

    #[test]
    fn test_zero_rate_disables() {
        assert!(RateLimitConfig::from_limits(0, 10).is_none());
    }
}
