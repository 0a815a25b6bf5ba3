use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay strategy applied between retry attempts of a failed job.
///
/// `next_delay` is a pure function of the attempt number and the policy,
/// aside from optional jitter on the exponential strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// Same delay for every attempt
    Fixed { delay: Duration },

    /// `base * attempt`, capped at `max`
    Linear { base: Duration, max: Duration },

    /// `base * 2^attempt`, capped at `max`, optionally with random jitter
    /// to avoid thundering-herd retries across many jobs
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl BackoffPolicy {
    /// Exponential backoff with jitter: 1s base, 1h ceiling
    pub const fn exponential_default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(3600),
            jitter: true,
        }
    }

    /// The ceiling this policy will never exceed
    pub fn max_delay(&self) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear { max, .. } | Self::Exponential { max, .. } => *max,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential_default()
    }
}

/// Compute the delay before the next attempt.
///
/// `attempt` is the number of attempts already made (1 after the first
/// failure). The result never exceeds the policy's `max_delay`.
pub fn next_delay(attempt: u32, policy: &BackoffPolicy) -> Duration {
    match policy {
        BackoffPolicy::Fixed { delay } => *delay,

        BackoffPolicy::Linear { base, max } => {
            let scaled = base
                .as_millis()
                .saturating_mul(u128::from(attempt.max(1)));
            Duration::from_millis(scaled.min(max.as_millis()) as u64)
        }

        BackoffPolicy::Exponential { base, max, jitter } => {
            let exp = attempt.min(63);
            let scaled = base.as_millis().saturating_mul(1u128 << exp);
            let capped = scaled.min(max.as_millis()) as u64;

            let millis = if *jitter && capped > 0 {
                // +/- 50% of the computed delay, still under the cap
                let spread = capped / 2;
                let low = capped - spread;
                let high = (capped + spread).min(max.as_millis() as u64);
                rand::thread_rng().gen_range(low..=high)
            } else {
                capped
            };

            Duration::from_millis(millis)
        }
    }
}
