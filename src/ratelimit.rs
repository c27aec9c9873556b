//! Rate-limit gate for the proxy surface.
//!
//! Keyed by `(backend host:port, client IP)`; the check is O(1) and never
//! blocks the request path. The trait is the seam for swapping in a shared
//! bucket store or a per-endpoint policy later.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a passage request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passage {
    Granted,
    Denied,
}

/// Rate limiter contract consumed by the forwarder pipeline
pub trait RateLimiter: Send + Sync {
    fn request_passage(&self, endpoint: &str, source_ip: &str) -> Passage;
}

/// In-memory fixed-window counter.
///
/// A window starts on the first request for a key and resets once it ages
/// out. With `max_requests == 0` the limiter grants everything.
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<(String, String), WindowState>>,
}

struct WindowState {
    started: Instant,
    count: u32,
}

// Expired entries are pruned opportunistically once the map grows past this
const PRUNE_THRESHOLD: usize = 10_000;

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the configured security policy
    pub fn from_config(security: &crate::config::SecurityConfig) -> Self {
        let max = if security.rate_limit_enabled {
            security.rate_limit_max_requests
        } else {
            0
        };
        Self::new(max, Duration::from_secs(security.rate_limit_window_secs))
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn request_passage(&self, endpoint: &str, source_ip: &str) -> Passage {
        if self.max_requests == 0 {
            return Passage::Granted;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, state| now.duration_since(state.started) < window);
        }

        let state = windows
            .entry((endpoint.to_string(), source_ip.to_string()))
            .or_insert(WindowState {
                started: now,
                count: 0,
            });

        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }

        state.count += 1;
        if state.count > self.max_requests {
            tracing::warn!(
                endpoint = %endpoint,
                ip = %source_ip,
                count = state.count,
                limit = self.max_requests,
                "Rate limit exceeded"
            );
            Passage::Denied
        } else {
            Passage::Granted
        }
    }
}

/// Limiter that denies every passage; used in tests and for draining a node
pub struct DenyAllLimiter;

impl RateLimiter for DenyAllLimiter {
    fn request_passage(&self, _endpoint: &str, _source_ip: &str) -> Passage {
        Passage::Denied
    }
}
