//! Bounded exponential-backoff retries.
//!
//! Delays come from a `backon` exponential schedule; sleeping is done with
//! the tokio timer so paused-clock tests observe exact delays.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use log::{debug, warn};

use crate::config::RetryConfig;

/// Errors that can tell whether another attempt is worthwhile.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Information passed to the retry observer before each sleep.
#[derive(Debug)]
pub struct RetryAttempt<'e, E> {
    /// 1-based number of the attempt that just failed
    pub attempt: usize,
    /// How long the executor will wait before the next attempt
    pub delay: Duration,
    pub error: &'e E,
}

/// Retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub backoff_factor: f32,
    pub max_delay: Duration,
    /// Randomize delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(30_000),
            jitter: false,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The delay sequence, one entry per permitted retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.backoff_factor)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder = builder.with_jitter();
        }
        builder.build()
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_observed(op, |_| {}).await
    }

    /// Like [`RetryPolicy::run`], calling `on_retry` before every sleep.
    pub async fn run_observed<T, E, F, Fut, O>(&self, mut op: F, mut on_retry: O) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(RetryAttempt<'_, E>),
    {
        let mut delays = self.delays();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                debug!("event=retry_abort attempt={} error=\"{}\"", attempt, error);
                return Err(error);
            }

            let Some(delay) = delays.next() else {
                warn!(
                    "event=retry_exhausted attempts={} error=\"{}\"",
                    attempt, error
                );
                return Err(error);
            };

            on_retry(RetryAttempt {
                attempt,
                delay,
                error: &error,
            });
            debug!(
                "event=retry_wait attempt={} delay_ms={} error=\"{}\"",
                attempt,
                delay.as_millis(),
                error
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Run `op` with the default policy.
pub async fn with_retry<T, E, F, Fut>(op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryPolicy::default().run(op).await
}
