//! Exponential backoff with jitter for restart scheduling.

use std::time::Duration;

use rand::Rng;

use crate::types::BackoffConfig;

/// Computes the delay before the next restart attempt, given a count of
/// consecutive failures (spec.md §4.3, step 3).
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// `base * factor^(failures - 1)`, clamped to `ceiling`, with up to
    /// `jitter_fraction` of the result added or subtracted at random so
    /// that many simultaneously-crashing agents don't retry in lockstep.
    pub fn next_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1) as i32;
        let raw_secs = self.config.base.as_secs_f64() * self.config.factor.powi(exponent);
        let capped_secs = raw_secs.min(self.config.ceiling.as_secs_f64());

        let jitter_span = capped_secs * self.config.jitter_fraction;
        let jitter = if jitter_span > 0.0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0.0
        };

        let jittered = (capped_secs + jitter).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}
