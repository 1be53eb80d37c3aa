//! Fixed-window-per-minute rate limiter, keyed by client host.
//!
//! Deliberately not `tower_governor`'s GCRA/token-bucket algorithm: the
//! bucket here resets on the wall-clock minute rather than leaking
//! continuously, matching the fixed-window counter the original request
//! handler kept per client. Per-process only — see spec.md §5's note that a
//! shared, cross-process counter is out of scope.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

struct WindowCounter {
    window_start_minute: i64,
    count: u32,
}

/// A per-process, per-minute request counter keyed by client IP.
pub struct RateLimiter {
    limit_per_min: u32,
    windows: Mutex<HashMap<IpAddr, WindowCounter>>,
}

impl RateLimiter {
    pub fn new(limit_per_min: u32) -> Self {
        Self {
            limit_per_min,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if the request at `now` is within budget for `client`. A limit
    /// of `0` disables the limiter entirely.
    pub fn check(&self, client: IpAddr, now_unix_secs: i64) -> bool {
        if self.limit_per_min == 0 {
            return true;
        }
        let current_minute = now_unix_secs.div_euclid(60);
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let entry = windows.entry(client).or_insert(WindowCounter {
            window_start_minute: current_minute,
            count: 0,
        });
        if entry.window_start_minute != current_minute {
            entry.window_start_minute = current_minute;
            entry.count = 0;
        }
        if entry.count >= self.limit_per_min {
            return false;
        }
        entry.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new(2);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip, 1_000));
        assert!(limiter.check(ip, 1_000));
        assert!(!limiter.check(ip, 1_000));
    }

    #[test]
    fn resets_on_the_next_minute_boundary() {
        let limiter = RateLimiter::new(1);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip, 0));
        assert!(!limiter.check(ip, 30));
        assert!(limiter.check(ip, 60));
    }

    #[test]
    fn zero_limit_disables_the_limiter() {
        let limiter = RateLimiter::new(0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..1000 {
            assert!(limiter.check(ip, 0));
        }
    }

    #[test]
    fn clients_are_tracked_independently() {
        let limiter = RateLimiter::new(1);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(a, 0));
        assert!(limiter.check(b, 0));
        assert!(!limiter.check(a, 0));
    }
}
