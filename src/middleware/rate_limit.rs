use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, header::IntoHeaderName, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ApiError;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { limit: u32, remaining: u32, reset: Duration },
    Rejected { limit: u32, retry_after: Duration },
}

/// Per-client sliding-log limiter: a client may make at most `limit`
/// requests in any rolling `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit: limit.max(1), window, hits: Mutex::new(HashMap::new()) }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, DEFAULT_WINDOW)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut hits = self.hits.lock();
        let log = hits.entry(key.to_string()).or_default();
        while log.front().is_some_and(|&t| now.duration_since(t) >= self.window) {
            log.pop_front();
        }

        // the window frees up when the oldest recorded hit ages out
        let until_free = |oldest: Option<&Instant>| {
            oldest.map_or(self.window, |&t| self.window.saturating_sub(now.duration_since(t)))
        };

        if log.len() as u32 >= self.limit {
            return Decision::Rejected { limit: self.limit, retry_after: until_free(log.front()) };
        }
        log.push_back(now);
        Decision::Allowed {
            limit: self.limit,
            remaining: self.limit - log.len() as u32,
            reset: until_free(log.front()),
        }
    }

    /// Drops clients whose every hit has left the window. Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock();
        let before = hits.len();
        hits.retain(|_, log| log.back().is_some_and(|&t| now.duration_since(t) < self.window));
        before - hits.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn tracked_clients(&self) -> usize {
        self.hits.lock().len()
    }
}

fn applies_to(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

const LIMIT: &str = "ratelimit-limit";
const REMAINING: &str = "ratelimit-remaining";
const RESET: &str = "ratelimit-reset";

fn set_secs(headers: &mut HeaderMap, name: impl IntoHeaderName, d: Duration) {
    // round up so clients never retry early
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    headers.insert(name, HeaderValue::from(secs));
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<SlidingWindowLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !applies_to(req.uri().path()) {
        return next.run(req).await;
    }

    let key = client_key(&req);
    match limiter.check(&key) {
        Decision::Allowed { limit, remaining, reset } => {
            debug!(client = %key, remaining, "rate limit check passed");
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(LIMIT, HeaderValue::from(limit));
            headers.insert(REMAINING, HeaderValue::from(remaining));
            set_secs(headers, RESET, reset);
            response
        }
        Decision::Rejected { limit, retry_after } => {
            warn!(client = %key, path = %req.uri().path(), "🚫 rate limit exceeded");
            let mut response = ApiError::RateLimited.into_response();
            let headers = response.headers_mut();
            headers.insert(LIMIT, HeaderValue::from(limit));
            headers.insert(REMAINING, HeaderValue::from(0u32));
            set_secs(headers, RESET, retry_after);
            set_secs(headers, header::RETRY_AFTER, retry_after);
            response
        }
    }
}
