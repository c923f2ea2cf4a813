//! Per-client token-bucket rate limiting.
//!
//! Each client IP gets a bucket holding up to `burst_size` tokens, refilled
//! continuously at `requests_per_second`. A request spends one token or is
//! rejected with `429`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};
use ubctl_config::RateLimitConfig;

use super::error::ApiError;
use super::{ApiState, client_ip};

/// Idle time after which a client's bucket is forgotten.
pub const BUCKET_IDLE_TTL: Duration = Duration::from_secs(3600);

/// How often idle buckets are swept.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token-bucket rate limiter keyed by client identity.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: HashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
        }
    }

    /// Apply new parameters. Existing buckets keep their level, capped at
    /// the new burst size.
    pub fn reconfigure(&mut self, config: RateLimitConfig) {
        let burst = config.burst_size;
        for bucket in self.buckets.values_mut() {
            bucket.tokens = bucket.tokens.min(burst);
        }
        self.config = config;
    }

    /// Spend one token for `client` if one is available.
    pub fn check(&mut self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&mut self, client: &str, now: Instant) -> bool {
        let RateLimitConfig {
            requests_per_second,
            burst_size,
        } = self.config;
        let bucket = self.buckets.entry(client.to_string()).or_insert(Bucket {
            tokens: burst_size,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * requests_per_second).min(burst_size);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens left for `client` (a full bucket for unknown clients).
    pub fn remaining(&self, client: &str) -> u32 {
        self.buckets
            .get(client)
            .map(|b| b.tokens)
            .unwrap_or(self.config.burst_size)
            .floor() as u32
    }

    /// Forget clients idle for longer than `max_idle`; returns how many.
    pub fn purge_idle(&mut self, max_idle: Duration) -> usize {
        self.purge_idle_at(max_idle, Instant::now())
    }

    fn purge_idle_at(&mut self, max_idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_refill) <= max_idle);
        before - self.buckets.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Middleware: reject the request with `429` when the client is out of tokens.
pub async fn enforce(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_ip(&request);
    let allowed = state
        .limiter
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .check(&client);
    if !allowed {
        warn!(client = %client, path = %request.uri().path(), "rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

/// Periodically drop idle buckets until the task is aborted.
pub async fn cleanup_loop(state: Arc<ApiState>) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let purged = state
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .purge_idle(BUCKET_IDLE_TTL);
        if purged > 0 {
            debug!(purged, "dropped idle rate-limit buckets");
        }
    }
}
