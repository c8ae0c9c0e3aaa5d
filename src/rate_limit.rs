use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-route budgets. Analyze spins up a navigation plus a PDF parse, so it
/// gets a much tighter window than search.
const SEARCH_LIMIT: u32 = 30;
const ANALYZE_LIMIT: u32 = 10;
const REFRESH_LIMIT: u32 = 2;
const WINDOW: Duration = Duration::from_secs(60);

static LIMITER: Lazy<RateLimiter> = Lazy::new(RateLimiter::new);

struct WindowState {
    started: Instant,
    count: u32,
}

/// In-memory fixed-window limiter, keyed by route name.
pub struct RateLimiter {
    routes: Mutex<HashMap<&'static str, WindowState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, route: &'static str, limit: u32, window: Duration) -> bool {
        let mut routes = match self.routes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let state = routes.entry(route).or_insert(WindowState {
            started: now,
            count: 0,
        });
        if now.duration_since(state.started) >= window {
            state.started = now;
            state.count = 0;
        }
        if state.count >= limit {
            return false;
        }
        state.count += 1;
        true
    }
}

/// Gate a request against the process-wide limiter.
pub fn allow(route: &'static str) -> bool {
    let limit = match route {
        "search" => SEARCH_LIMIT,
        "analyze" => ANALYZE_LIMIT,
        "refresh" => REFRESH_LIMIT,
        _ => SEARCH_LIMIT,
    };
    LIMITER.check(route, limit, WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("t", 5, Duration::from_secs(60)));
        }
        assert!(!limiter.check("t", 5, Duration::from_secs(60)));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("t", 1, Duration::from_millis(10)));
        assert!(!limiter.check("t", 1, Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("t", 1, Duration::from_millis(10)));
    }

    #[test]
    fn routes_are_tracked_independently() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("a", 1, Duration::from_secs(60)));
        assert!(!limiter.check("a", 1, Duration::from_secs(60)));
        assert!(limiter.check("b", 1, Duration::from_secs(60)));
    }
}
