//! Per-client control-message rate limiting (§4.4: "a token-bucket per
//! client is recommended"). Adapted from the sliding-window HTTP rate
//! limiter in `middleware::rate_limit`, simplified to a token bucket scoped
//! to a single connection — no shared map, no IP keying, since each
//! connection already owns one bucket for its lifetime.

use std::time::{Duration, Instant};

pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let refill_per_sec = capacity as f64 / window.as_secs_f64().max(0.001);
        Self {
            capacity,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Returns `true` if a token was available and consumed.
    pub fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(5, Duration::from_secs(10));
        for _ in 0..5 {
            assert!(bucket.try_consume());
        }
        assert!(!bucket.try_consume());
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = TokenBucket::new(1, Duration::from_millis(10));
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
        std::thread::sleep(Duration::from_millis(15));
        assert!(bucket.try_consume());
    }
}
