// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::time::Duration;

/// Delays between connection attempts. The first delay is the initial delay of the policy, each
/// following one doubles up to the maximum. The sequence ends after the retry limit.
#[derive(Debug, Clone)]
pub(crate) struct ExponentialBackoff {
    next_delay: Duration,
    max_delay: Duration,
    remaining: Option<u32>,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        match self.remaining.as_mut() {
            Some(0) => return None,
            Some(n) => *n -= 1,
            None => {}
        }
        let delay = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2).min(self.max_delay);
        self.attempts += 1;
        Some(delay)
    }
}

/// How a session retries establishing its connection after a failure. The same policy covers
/// the first connect and every reconnect after the connection was lost.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    /// `None` retries forever
    retry_limit: Option<u32>,
}

impl Default for SessionRetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(Self::DEFAULT_MAX_SLEEP_MS),
            Some(Self::DEFAULT_RETRY_LIMIT),
            Duration::from_millis(Self::DEFAULT_INITIAL_SLEEP_MS),
        )
    }
}

impl SessionRetryPolicy {
    pub const DEFAULT_RETRY_LIMIT: u32 = 10;
    pub const DEFAULT_INITIAL_SLEEP_MS: u64 = 500;
    pub const DEFAULT_MAX_SLEEP_MS: u64 = 30000;

    pub fn new(max_delay: Duration, retry_limit: Option<u32>, initial_delay: Duration) -> Self {
        Self {
            initial_delay: initial_delay.min(max_delay),
            max_delay,
            retry_limit,
        }
    }

    /// Policy from the configured limit, where -1 retries forever and 0 never retries.
    pub fn from_limit(retry_limit: i32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(max_delay, u32::try_from(retry_limit).ok(), initial_delay)
    }

    /// Retry forever.
    pub fn infinity(max_delay: Duration, initial_delay: Duration) -> Self {
        Self::new(max_delay, None, initial_delay)
    }

    /// Give up after the first failure.
    pub fn never() -> Self {
        Self {
            retry_limit: Some(0),
            ..Default::default()
        }
    }

    pub fn retry_limit(&self) -> Option<u32> {
        self.retry_limit
    }

    pub(crate) fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            next_delay: self.initial_delay,
            max_delay: self.max_delay,
            remaining: self.retry_limit,
            attempts: 0,
        }
    }
}
