use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

/// Configurable rate limit values. All read from environment variables with
/// sensible defaults.
///
/// - `TALKTO_RATE_LIMIT_MESSAGES` — Max messages per minute per IP (default: 60)
/// - `TALKTO_RATE_LIMIT_WS_FRAMES` — Max inbound WebSocket control frames per
///   client per 10 seconds (default: 30)
pub struct RateLimitConfig {
    pub messages_max: usize,
    pub messages_window_secs: u64,
    pub ws_frames_max: usize,
    pub ws_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_max: 60,
            messages_window_secs: 60,
            ws_frames_max: 30,
            ws_window_secs: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("TALKTO_RATE_LIMIT_MESSAGES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.messages_max = n;
        }
        if let Ok(val) = env::var("TALKTO_RATE_LIMIT_WS_FRAMES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.ws_frames_max = n;
        }

        config
    }
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (i.e. a slot
    /// opens). 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed. `key` is typically `"action:principal"`.
    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    /// Check rate limit and return detailed info for response headers.
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();

        // Remove expired entries
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        remaining: 0,
                        limit: max,
                        retry_after_secs: 1,
                    };
                }
            };
            let elapsed = now.duration_since(*oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1 // +1 to ensure the slot is actually open
            } else {
                1
            };

            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();

        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }

    /// Drop all entries for a key (used when a WebSocket client disconnects).
    pub fn forget(&self, key: &str) {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        limits.remove(key);
    }
}
