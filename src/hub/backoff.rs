//! Reconnect backoff policies

use rand::Rng;
use std::time::Duration;

/// Maps a 1-based attempt number to the wait before that attempt
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// `base * 2^(attempt-1) + uniform[0, jitter_max)`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    jitter_max: Duration,
}

impl ExponentialBackoff {
    /// Largest doubling exponent; keeps the multiplication in range
    const MAX_EXPONENT: u32 = 20;

    pub fn new(base: Duration, jitter_max: Duration) -> Self {
        Self { base, jitter_max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn jitter_max(&self) -> Duration {
        self.jitter_max
    }

    /// Deterministic part of the delay
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(Self::MAX_EXPONENT);
        self.base.saturating_mul(1 << exponent)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(300))
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt).saturating_add(self.jitter())
    }
}
