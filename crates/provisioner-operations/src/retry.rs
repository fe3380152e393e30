// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry for persisted writes and failure side effects.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay multiplied by the policy factor after every retry.
    #[default]
    ExponentialBackoff,
}

/// Retry policy applied to every session write, failure handler call and
/// status update.
///
/// The default makes 5 attempts with delays of 10ms, 50ms, 250ms and 1.25s
/// between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Delay growth.
    pub strategy: RetryStrategy,
    /// Multiplier for [`RetryStrategy::ExponentialBackoff`].
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(10),
            strategy: RetryStrategy::ExponentialBackoff,
            factor: 5,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between a bounded number of attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            strategy: RetryStrategy::Fixed,
            factor: 1,
        }
    }

    /// Same policy with a different attempt count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed => self.delay,
            RetryStrategy::ExponentialBackoff => {
                let multiplier = self.factor.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(multiplier)
            }
        }
    }

    /// Run `f` until it succeeds or the attempts are used up.
    pub async fn run<T, E, F, Fut>(&self, what: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(what, |_| true, f).await
    }

    /// Like [`run`](Self::run), but stops early on errors `should_retry`
    /// rejects.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        what: &str,
        should_retry: P,
        mut f: F,
    ) -> Result<T, E>
    where
        E: Display,
        P: Fn(&E) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && should_retry(&e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
