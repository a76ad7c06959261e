//! Retry policy for the optimistic read-transform-CAS loop.

use std::num::NonZeroU32;
use std::time::Duration;

/// Exponential backoff between conflicting attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// How hard the retry helpers try before returning the last conflict.
///
/// The default retries forever without sleeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<NonZeroU32>,
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = NonZeroU32::new(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub(crate) fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts
            .map(|max| attempts < max.get())
            .unwrap_or(true)
    }

    /// Sleeps before retry number `retry`, if backoff is configured.
    pub(crate) fn pause(&self, retry: u32) {
        if let Some(backoff) = &self.backoff {
            std::thread::sleep(backoff.delay(retry));
        }
    }
}
