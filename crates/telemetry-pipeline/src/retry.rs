// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff with jitter around one fallible async operation.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::PipelineError;

/// Predicate deciding whether a failed attempt is worth retrying.
pub type RetryClassifier = dyn Fn(&PipelineError, u32) -> bool + Send + Sync;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 3 means up to 4 attempts total.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Computed delays are capped here before jitter.
    pub max_delay: Duration,
    /// Relative jitter applied to every delay, e.g. 0.1 for ±10%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`:
    /// `min(initial * factor^attempt, max)` with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            capped * (1.0 + rand::rng().random_range(-self.jitter..=self.jitter))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Runs an operation to success or retry exhaustion.
///
/// `execute` takes `&mut self`: one executor runs one operation at a time,
/// and the exclusive borrow makes overlapping calls a compile error rather
/// than a corrupted attempt count.
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: Option<Box<RetryClassifier>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: None,
        }
    }

    /// Replace the default retryability classification (network, timeout,
    /// and 408/429/5xx statuses).
    pub fn with_classifier(policy: RetryPolicy, classifier: Box<RetryClassifier>) -> Self {
        Self {
            policy,
            classifier: Some(classifier),
        }
    }

    fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool {
        match &self.classifier {
            Some(classifier) => classifier(error, attempt),
            None => error.is_retryable(),
        }
    }

    /// Attempt `op` until it succeeds, fails permanently, or retries are
    /// exhausted. The attempt counter is local to each call.
    pub async fn execute<T, F, Fut>(&mut self, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.policy.max_retries || !self.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        "Attempt {} failed ({error}), retrying in {:?}",
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportFailure;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn retryable() -> PipelineError {
        PipelineError::transport(TransportFailure::Network, "connection reset")
    }

    fn permanent() -> PipelineError {
        PipelineError::transport(TransportFailure::Status(400), "bad request")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_takes_three_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut executor = RetryExecutor::new(policy());

        let started = tokio::time::Instant::now();
        let result = executor
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(retryable())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // waits of ~100ms and ~200ms, each within ±10% jitter
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(270) && elapsed <= Duration::from_millis(330),
            "unexpected total backoff: {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate_final_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut executor = RetryExecutor::new(policy());

        let result: Result<(), _> = executor
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(retryable()) }
            })
            .await;

        assert!(result.is_err());
        // initial attempt + 3 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut executor = RetryExecutor::new(policy());

        let result: Result<(), _> = executor
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(permanent()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_counter_resets_between_calls() {
        let mut executor = RetryExecutor::new(RetryPolicy {
            max_retries: 1,
            ..policy()
        });

        for _ in 0..2 {
            let attempts = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&attempts);
            let _: Result<(), _> = executor
                .execute(|| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(retryable()) }
                })
                .await;
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
        }
    }

    #[tokio::test]
    async fn test_custom_classifier_overrides_default() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        // never retry, even network errors
        let mut executor =
            RetryExecutor::with_classifier(policy(), Box::new(|_error, _attempt| false));

        let result: Result<(), _> = executor
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(retryable()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 10.0,
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(9), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = policy();
        for _ in 0..1_000 {
            let delay = policy.delay_for(0).as_secs_f64();
            assert!((0.09..=0.111).contains(&delay), "delay out of band: {delay}");
        }
    }
}
