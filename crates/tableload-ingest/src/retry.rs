//! Backpressure retry
//!
//! Each attempt resubmits the whole unit from its first chunk. A throttled
//! attempt is followed by a linear backoff of `step * (attempt - 1)` inside the
//! calling task only, so a sleeping unit never holds up its siblings. The
//! schedule is fixed; a store's `Retry-After` hint is reported but not obeyed.

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{MAX_RETRIES, RETRY_STEP_SECS};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::record::{LoadUnit, SyntheticRecord};
use crate::store::Store;
use crate::submit::{ChunkSubmitter, SubmitError};

/// How a unit's submission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSubmitResult {
    /// Every chunk was committed on attempt `attempts`
    Committed { attempts: u32 },
    /// The store returned a non-retryable error
    Rejected { attempts: u32, error: SubmitError },
    /// Every attempt was throttled
    Exhausted { attempts: u32 },
}

impl UnitSubmitResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Committed { attempts }
            | Self::Rejected { attempts, .. }
            | Self::Exhausted { attempts } => *attempts,
        }
    }
}

/// Bounded linear-backoff retry on backpressure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            step: Duration::from_secs(RETRY_STEP_SECS),
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` (at least one) with the given backoff step
    pub fn new(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            step,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the throttled attempt that follows `retry_count` earlier retries
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.step * retry_count
    }

    /// Submit `records` for `unit`, retrying throttled attempts
    pub async fn run<S>(
        &self,
        store: &mut S,
        submitter: &ChunkSubmitter,
        unit: &LoadUnit,
        records: &[SyntheticRecord],
        reporter: &dyn ProgressReporter,
    ) -> UnitSubmitResult
    where
        S: Store + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let error = match submitter.submit(store, records).await {
                Ok(chunks) => {
                    debug!(unit = unit.index(), attempt, chunks, "Unit committed");
                    return UnitSubmitResult::Committed { attempts: attempt };
                },
                Err(error) => error,
            };

            if !error.is_backpressure() {
                return UnitSubmitResult::Rejected {
                    attempts: attempt,
                    error,
                };
            }

            let delay = self.backoff(attempt - 1);
            warn!(
                unit = unit.index(),
                attempt,
                max_attempts = self.max_attempts,
                chunk = error.chunk,
                "Unit throttled, backing off {}s",
                delay.as_secs()
            );
            reporter.report(&ProgressEvent::UnitRetrying {
                index: unit.index(),
                attempt,
                wait_secs: delay.as_secs(),
                retry_after: error.source.retry_after(),
                final_attempt: attempt == self.max_attempts,
            });
            tokio::time::sleep(delay).await;
        }

        UnitSubmitResult::Exhausted {
            attempts: self.max_attempts,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::progress::ChannelReporter;
    use crate::record::synthesize;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Throttles the first `throttled` calls, then answers with `then`
    struct ScriptedStore {
        calls: u32,
        throttled: u32,
        then: Result<(), StoreError>,
    }

    impl ScriptedStore {
        fn new(throttled: u32, then: Result<(), StoreError>) -> Self {
            Self {
                calls: 0,
                throttled,
                then,
            }
        }
    }

    #[async_trait]
    impl Store for ScriptedStore {
        async fn ensure_container_exists(&mut self, _name: &str) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn submit_chunk(&mut self, _records: &[SyntheticRecord]) -> Result<(), StoreError> {
            self.calls += 1;
            if self.calls <= self.throttled {
                return Err(StoreError::Backpressure {
                    retry_after: Some(Duration::from_secs(1)),
                });
            }
            self.then.clone()
        }
    }

    fn unit() -> (LoadUnit, Vec<SyntheticRecord>) {
        let unit = LoadUnit::new(0, "Batch", 100);
        let records = synthesize(&unit);
        (unit, records)
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 30);
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(29), Duration::from_secs(58));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_throttled_gives_up_after_exactly_thirty_attempts() {
        let (unit, records) = unit();
        let mut store = ScriptedStore::new(u32::MAX, Ok(()));
        let (reporter, mut rx) = ChannelReporter::new();

        let started = Instant::now();
        let result = RetryPolicy::default()
            .run(&mut store, &ChunkSubmitter::default(), &unit, &records, &reporter)
            .await;

        assert_eq!(result, UnitSubmitResult::Exhausted { attempts: 30 });
        assert_eq!(store.calls, 30);
        assert_eq!(started.elapsed(), Duration::from_secs(2 * (0..30).sum::<u64>()));

        let mut retries = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::UnitRetrying {
                attempt,
                retry_after,
                final_attempt,
                ..
            } = event
            {
                assert_eq!(retry_after, Some(Duration::from_secs(1)));
                retries.push((attempt, final_attempt));
            }
        }
        assert_eq!(retries.len(), 30);
        // Only the 30th event announces giving up; no 31st attempt follows it.
        assert_eq!(retries.last(), Some(&(30, true)));
        assert!(retries[..29].iter().all(|(_, last)| !last));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let (unit, records) = unit();
        let mut store = ScriptedStore::new(0, Err(StoreError::fatal("HTTP 400: bad entity")));
        let (reporter, _rx) = ChannelReporter::new();

        let started = Instant::now();
        let result = RetryPolicy::default()
            .run(&mut store, &ChunkSubmitter::default(), &unit, &records, &reporter)
            .await;

        match result {
            UnitSubmitResult::Rejected { attempts, error } => {
                assert_eq!(attempts, 1);
                assert!(!error.is_backpressure());
            },
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(store.calls, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_throttling() {
        let (unit, records) = unit();
        let mut store = ScriptedStore::new(3, Ok(()));
        let (reporter, _rx) = ChannelReporter::new();

        let started = Instant::now();
        let result = RetryPolicy::default()
            .run(&mut store, &ChunkSubmitter::default(), &unit, &records, &reporter)
            .await;

        assert!(result.is_committed());
        assert_eq!(result.attempts(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(2 + 4));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
