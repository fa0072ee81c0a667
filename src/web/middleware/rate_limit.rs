//! Per-IP request throttling at the HTTP edge.
//!
//! Separate from the per-client upload limiter: this bounds how fast any
//! address can hit the API at all, which also slows credential guessing.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use crate::web::error::ApiError;

/// Per-IP rate limiter using Governor.
pub type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Interval between sweeps of idle per-IP limiters.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// State for per-IP throttling.
pub struct IpThrottle {
    limiters: RwLock<HashMap<String, Arc<IpRateLimiter>>>,
    /// Requests per minute per IP.
    requests_per_minute: u32,
}

impl IpThrottle {
    /// Create a throttle admitting `requests_per_minute` per IP.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            requests_per_minute,
        }
    }

    fn limiter_for(&self, ip: &str) -> Arc<IpRateLimiter> {
        {
            let read_guard = self.limiters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(limiter) = read_guard.get(ip) {
                return limiter.clone();
            }
        }

        let mut write_guard = self.limiters.write().unwrap_or_else(PoisonError::into_inner);

        // Double-check after acquiring write lock
        if let Some(limiter) = write_guard.get(ip) {
            return limiter.clone();
        }

        let quota = Quota::per_minute(
            NonZeroU32::new(self.requests_per_minute).unwrap_or(NonZeroU32::MIN),
        );
        let limiter = Arc::new(RateLimiter::direct(quota));
        write_guard.insert(ip.to_string(), limiter.clone());
        limiter
    }

    /// Check if a request from `ip` is allowed.
    pub fn check(&self, ip: &str) -> bool {
        self.limiter_for(ip).check().is_ok()
    }

    /// Drop limiters no request is currently using.
    pub fn cleanup(&self) -> usize {
        let mut guard = self.limiters.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, limiter| Arc::strong_count(limiter) > 1);
        before - guard.len()
    }

    /// Start a background task to periodically clean up old entries.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = self.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "Dropped idle per-IP limiters");
                }
            }
        });
    }
}

/// Extract client IP from request.
fn client_ip(req: &Request<Body>) -> String {
    // Reverse proxy headers first
    if let Some(forwarded) = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(ip) = forwarded.split(',').next() {
            return ip.trim().to_string();
        }
    }

    if let Some(real_ip) = req
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
    {
        return real_ip.to_string();
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Throttling middleware.
pub async fn ip_throttle(state: Arc<IpThrottle>, req: Request<Body>, next: Next) -> Response {
    let ip = client_ip(&req);

    if !state.check(&ip) {
        tracing::warn!(ip = %ip, "Request rate limit exceeded");
        return ApiError::too_many_requests(
            "Too many requests. Please try again later.",
            Duration::from_secs(60) / state.requests_per_minute.max(1),
        )
        .into_response();
    }

    next.run(req).await
}
