use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Limits how often generation requests may be submitted.
/// Uses a token bucket algorithm via governor crate.
pub struct SubmitRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    /// Zero submits per minute disables limiting
    enabled: bool,
}

impl SubmitRateLimiter {
    /// Create a limiter allowing `submits_per_minute` sustained, with the
    /// same number available as an initial burst.
    ///
    /// # Arguments
    /// * `submits_per_minute` - Maximum sustained rate (0 disables limiting)
    pub fn new(submits_per_minute: u32) -> Self {
        let enabled = submits_per_minute > 0;
        let rate = NonZeroU32::new(submits_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            limiter: RateLimiter::direct(Quota::per_minute(rate)),
            enabled,
        }
    }

    /// Check if a submission is allowed to proceed.
    ///
    /// This is an immediate check that does not wait for tokens to become available.
    ///
    /// # Returns
    /// * `true` - Submission is allowed
    /// * `false` - Submission is rate limited and should be rejected
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
