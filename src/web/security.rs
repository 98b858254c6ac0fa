use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response};
use axum::middleware::Next;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub fn security_headers<B>(mut response: Response<B>) -> Response<B> {
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    // JSON and uploaded images only; nothing served here should run scripts
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; img-src 'self'; frame-ancestors 'none'"),
    );

    response
}

pub async fn apply_security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let response = next.run(request).await;
    security_headers(response)
}

/// Sliding-window limiter: at most `max_attempts` per `window` per key.
pub struct RateLimiter {
    attempts: RwLock<HashMap<String, Vec<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Login throttle: 5 failed attempts lock the caller out for 15 minutes.
    pub fn for_login() -> Self {
        Self::new(5, Duration::from_secs(900))
    }

    fn remaining(&self, oldest: Instant, now: Instant) -> Duration {
        self.window.saturating_sub(now.duration_since(oldest))
    }

    /// `Err(retry_after)` when `key` has used up the window.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let attempts = self.attempts.read().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = attempts.get(key) else {
            return Ok(());
        };
        let live: Vec<&Instant> = entry
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .collect();
        if live.len() >= self.max_attempts {
            if let Some(oldest) = live.first() {
                return Err(self.remaining(**oldest, now));
            }
        }
        Ok(())
    }

    pub fn record_attempt(&self, key: &str) {
        let now = Instant::now();
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        let entry = attempts.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        entry.push(now);
    }

    /// Checks and records in one step under the write lock, so concurrent
    /// callers cannot both slip under the limit.
    pub fn hit(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        let entry = attempts.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max_attempts {
            let oldest = entry.first().copied().unwrap_or(now);
            return Err(self.remaining(oldest, now));
        }
        entry.push(now);
        Ok(())
    }

    pub fn clear(&self, key: &str) {
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        attempts.remove(key);
    }

    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut attempts = self.attempts.write().unwrap_or_else(|e| e.into_inner());
        attempts.retain(|_, v| {
            v.retain(|t| now.duration_since(*t) < self.window);
            !v.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.attempts.read().map(|a| a.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_allows_up_to_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.hit("1.2.3.4").is_ok());
        }
        let retry_after = limiter.hit("1.2.3.4").unwrap_err();
        assert!(retry_after <= Duration::from_secs(60));
        assert!(retry_after > Duration::from_secs(50));
        assert!(limiter.hit("5.6.7.8").is_ok());
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.hit("k").is_ok());
        assert!(limiter.hit("k").is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.hit("k").is_ok());
    }

    #[test]
    fn check_does_not_record() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("k").is_ok());
        limiter.record_attempt("k");
        assert!(limiter.check("k").is_ok());
        limiter.record_attempt("k");
        assert!(limiter.check("k").is_err());
        limiter.clear("k");
        assert!(limiter.check("k").is_ok());
    }

    #[test]
    fn cleanup_drops_stale_keys() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.record_attempt("a");
        std::thread::sleep(Duration::from_millis(20));
        limiter.cleanup();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
