//! Per-provider request throttling

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;

/// Requests-per-minute limit shared by every caller of one provider
///
/// The full minute's allowance may be spent as a burst; after that requests
/// are released as the quota replenishes.
pub struct Throttle {
    limiter: DefaultDirectRateLimiter,
    per_minute: NonZeroU32,
}

impl Throttle {
    /// Limit to `requests` per minute; `None` when `requests` is 0
    #[must_use]
    pub fn per_minute(requests: u32) -> Option<Self> {
        let per_minute = NonZeroU32::new(requests)?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            per_minute,
        })
    }

    /// Configured limit
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.per_minute.get()
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a permit without waiting; false if the quota is spent
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("per_minute", &self.per_minute)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unlimited() {
        assert!(Throttle::per_minute(0).is_none());
    }

    #[test]
    fn quota_is_spent_then_refused() {
        let throttle = Throttle::per_minute(3).unwrap();
        assert_eq!(throttle.limit(), 3);
        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }
}
