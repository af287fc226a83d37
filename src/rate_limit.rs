use std::collections::HashMap;
use std::time::{Duration, Instant};

use actix_web::HttpRequest;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug)]
pub enum RateLimitDecision {
    Allowed {
        /// Requests left in the current window, after this one.
        remaining: u32,
    },
    Limited {
        /// Time until the oldest hit falls out of the window.
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitDecision::Limited { .. })
    }
}

/// Sliding-window counter keyed by client identity.
///
/// Recording and checking a hit happens under a single write-lock
/// acquisition, so concurrent requests from the same client cannot both slip
/// under the limit. State is in-memory only and scoped to this process.
pub struct RateLimiter {
    config: RateLimitConfig,
    hits: RwLock<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            hits: RwLock::new(HashMap::new()),
        }
    }

    /// Checks and records one request for `key`.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut hits = self.hits.write().await;
        let window_hits = hits.entry(key.to_string()).or_default();

        window_hits.retain(|hit| now.duration_since(*hit) < self.config.window);

        if (window_hits.len() as u32) < self.config.max_requests {
            window_hits.push(now);
            let remaining = self.config.max_requests - window_hits.len() as u32;
            RateLimitDecision::Allowed { remaining }
        } else {
            // Safe to index: max_requests >= 1 implies a non-empty window.
            let oldest = window_hits[0];
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(oldest));
            debug!(key, ?retry_after, "rate limit exceeded");
            RateLimitDecision::Limited { retry_after }
        }
    }

    /// Drops keys whose hits have all aged out of the window, keeping the map
    /// bounded for long-running processes.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut hits = self.hits.write().await;
        hits.retain(|_, window_hits| {
            window_hits.retain(|hit| now.duration_since(*hit) < self.config.window);
            !window_hits.is_empty()
        });
    }
}

/// The per-endpoint-class limiters. The subscribe form is public and bursty;
/// confirm/unsubscribe are link clicks and share a looser bucket.
pub struct RateLimiters {
    pub subscribe: RateLimiter,
    pub links: RateLimiter,
}

/// Best-effort client identity: the leftmost forwarded address when behind a
/// proxy, the peer address otherwise.
pub fn client_ip(req: &HttpRequest) -> String {
    let connection_info = req.connection_info();
    let addr = connection_info.realip_remote_addr().unwrap_or("unknown");

    // Peer addresses come as `ip:port`; forwarded headers carry a bare IP.
    addr.parse::<std::net::SocketAddr>()
        .map(|socket_addr| socket_addr.ip().to_string())
        .unwrap_or_else(|_| addr.to_string())
}

/// Retry-After header value, rounded up so a client that waits exactly this
/// long is never still limited.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}
