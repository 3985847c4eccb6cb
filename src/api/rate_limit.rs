//! Per-client request throttling.
//!
//! Each (client IP, tier) pair holds a bucket that refills continuously over
//! the configured window. Auth endpoints get a much smaller bucket than the
//! rest of the API to slow down password and code guessing.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    Api,
    /// Login, registration, verification and password reset
    Auth,
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

impl Bucket {
    fn full(max_tokens: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

/// Allowed request, with what is left for the client
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, RateLimitTier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    pub fn limit_for(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Take one token. `Err` carries the retry-after in seconds.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
            });
        }

        let max_tokens = self.limit_for(tier);
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((ip, tier))
            .or_insert_with(|| Bucket::full(max_tokens));

        let elapsed = now.duration_since(bucket.window_start);
        if elapsed >= self.window {
            bucket.tokens = max_tokens;
            bucket.window_start = now;
        } else {
            let since_last = now.duration_since(bucket.last_request);
            let per_second = max_tokens as f64 / self.window.as_secs_f64();
            let refill = (since_last.as_secs_f64() * per_second) as u32;
            bucket.tokens = bucket.tokens.saturating_add(refill).min(max_tokens);
        }
        bucket.last_request = now;

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(bucket.window_start))
            .as_secs();
        if bucket.tokens == 0 {
            return Err(reset_after.max(1));
        }
        bucket.tokens -= 1;
        Ok(RateLimitInfo {
            remaining: bucket.tokens,
            limit: max_tokens,
            reset_after,
        })
    }

    /// Drop buckets idle for two windows
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Client address as reported by the reverse proxy in front of the API
fn client_ip(request: &Request<Body>) -> IpAddr {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };
    forwarded
        .or_else(real_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn rate_limit_api(State(state): State<Arc<AppState>>, request: Request<Body>, next: Next) -> Response {
    throttle(state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(State(state): State<Arc<AppState>>, request: Request<Body>, next: Next) -> Response {
    throttle(state, request, next, RateLimitTier::Auth).await
}

async fn throttle(state: Arc<AppState>, request: Request<Body>, next: Next, tier: RateLimitTier) -> Response {
    let ip = client_ip(&request);

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset_after));
            response
        }
        Err(retry_after) => {
            tracing::warn!(ip = %ip, tier = ?tier, retry_after, "Rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Too many requests. Try again in {} seconds",
                retry_after
            ))
            .into_response();
            let headers = response.headers_mut();
            headers.insert("retry-after", HeaderValue::from(retry_after));
            headers.insert("x-ratelimit-limit", HeaderValue::from(state.rate_limiter.limit_for(tier)));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            response
        }
    }
}

pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs.max(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            rate_limiter.cleanup_expired();
            tracing::debug!(entries = rate_limiter.entry_count(), "Rate limiter cleanup complete");
        }
    });
}
