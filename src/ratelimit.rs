//! Per-host token-bucket rate limiting for the web API client.
//!
//! Steam's web endpoints don't publish a rate-limit header contract, so this
//! follows the conservative scheme the spec calls for: a token bucket per
//! host that halves its refill rate whenever the host returns HTTP 429, and
//! honors `Retry-After` when present.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Bucket {
	capacity: f64,
	tokens: f64,
	refill_per_sec: f64,
	last_refill: Instant,
}

impl Bucket {
	fn new(capacity: f64, refill_per_sec: f64) -> Self {
		Bucket {
			capacity,
			tokens: capacity,
			refill_per_sec,
			last_refill: Instant::now(),
		}
	}

	fn refill(&mut self, now: Instant) {
		let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
		self.last_refill = now;
	}

	/// Returns `None` if a token was available now, or `Some(wait)` for how
	/// long the caller should sleep before retrying.
	fn try_acquire(&mut self, now: Instant) -> Option<Duration> {
		self.refill(now);
		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			None
		} else {
			let deficit = 1.0 - self.tokens;
			Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
		}
	}

	fn halve(&mut self) {
		self.refill_per_sec = (self.refill_per_sec / 2.0).max(0.1);
	}
}

/// Token-bucket limiter keyed by host (e.g. `"api.steampowered.com"`).
pub struct RateLimiter {
	default_capacity: f64,
	default_refill_per_sec: f64,
	buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
	pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
		RateLimiter {
			default_capacity: capacity,
			default_refill_per_sec: refill_per_sec,
			buckets: Mutex::new(HashMap::new()),
		}
	}

	/// Blocks the caller until a token for `host` is available.
	pub fn acquire(&self, host: &str) {
		loop {
			let wait = {
				let mut buckets = self.buckets.lock().expect("ratelimit mutex poisoned");
				let bucket = buckets
					.entry(host.to_string())
					.or_insert_with(|| Bucket::new(self.default_capacity, self.default_refill_per_sec));
				bucket.try_acquire(Instant::now())
			};
			match wait {
				None => return,
				Some(d) => std::thread::sleep(d),
			}
		}
	}

	/// Call after observing an HTTP 429 from `host`. Halves that host's
	/// refill rate and, if the server named a `Retry-After` delay, blocks for
	/// it so the next `acquire` doesn't immediately retry into the same wall.
	pub fn on_rate_limited(&self, host: &str, retry_after: Option<Duration>) {
		{
			let mut buckets = self.buckets.lock().expect("ratelimit mutex poisoned");
			let bucket = buckets
				.entry(host.to_string())
				.or_insert_with(|| Bucket::new(self.default_capacity, self.default_refill_per_sec));
			bucket.halve();
			bucket.tokens = 0.0;
		}
		if let Some(d) = retry_after {
			std::thread::sleep(d);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn acquire_never_exceeds_capacity_instantly() {
		let limiter = RateLimiter::new(2.0, 100.0);
		limiter.acquire("host");
		limiter.acquire("host");
		// Third immediate acquire should have to wait, not panic or spin forever.
		let start = Instant::now();
		limiter.acquire("host");
		assert!(start.elapsed() < Duration::from_secs(1));
	}

	#[test]
	fn distinct_hosts_have_independent_buckets() {
		let limiter = RateLimiter::new(1.0, 1.0);
		limiter.acquire("a");
		limiter.acquire("b");
	}

	#[test]
	fn rate_limited_halves_refill_rate() {
		let limiter = RateLimiter::new(1.0, 10.0);
		limiter.on_rate_limited("host", None);
		let buckets = limiter.buckets.lock().unwrap();
		assert_eq!(buckets.get("host").unwrap().refill_per_sec, 5.0);
	}
}
