//! Sliding-window rate limiter for the remote server topology (spec.md
//! §4.8). Keyed by caller identity ARN rather than IP, since the remote
//! topology sits behind NAT. Limiter errors fail **open**: availability
//! wins over strictness here (spec.md §4.8 "fail open").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit: limit_per_minute,
            window: Duration::from_secs(60),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if `key` is still within its window budget; records this call
    /// as a hit either way. A poisoned internal mutex (should never happen
    /// outside a prior panic) fails open rather than blocking every caller.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };

        let hits = windows.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < self.window);

        if hits.len() as u32 >= self.limit {
            return false;
        }
        hits.push(now);
        true
    }
}
