//! Fixed-window submission limiter keyed by client origin.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use pagebrief_shared::RateLimitConfig;

/// Windows are pruned once the map holds more origins than this.
const PRUNE_THRESHOLD: usize = 1000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// In-process limiter. Counters live in this process only.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt from `origin`; `true` if it is admitted.
    pub async fn check(&self, origin: &str) -> bool {
        self.check_at(origin, Instant::now()).await
    }

    /// [`check`](Self::check) with an explicit clock.
    ///
    /// A window opens on the first attempt and lasts `window`. Once it has
    /// expired the next attempt starts a new one with a count of 1. Rejected
    /// attempts still count.
    pub async fn check_at(&self, origin: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| now <= w.reset_at);
        }

        if let Some(w) = windows.get_mut(origin) {
            if now <= w.reset_at {
                w.count = w.count.saturating_add(1);
                return w.count <= self.max_requests;
            }
        }

        windows.insert(
            origin.to_string(),
            Window {
                count: 1,
                reset_at: now + self.window,
            },
        );
        self.max_requests >= 1
    }

    /// Number of origins currently tracked.
    pub async fn tracked_origins(&self) -> usize {
        self.windows.lock().await.len()
    }
}
