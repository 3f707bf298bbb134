// Load orchestrator
//
// Spawns one task per load unit. A unit must hold one of `max_workers`
// semaphore permits while it runs; that semaphore is the only thing bounding
// parallelism. Finished tasks are drained in completion order, each one
// counted exactly once and reported with a running `[completed/total]` counter.
//
// A panic inside a unit task surfaces as a `JoinError` and is turned into a
// failed outcome for that unit; siblings keep running.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use tableload_common::{LoadError, Result};

use crate::config::LoadConfig;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::record::LoadUnit;
use crate::stats::{RunReport, StatsAggregator};
use crate::store::{ClientPool, StoreFactory};
use crate::worker::{BatchWorker, Outcome};

/// Runs every unit of a load with bounded concurrency
pub struct Orchestrator<F: StoreFactory> {
    config: LoadConfig,
    pool: Arc<ClientPool<F>>,
    worker: BatchWorker,
    reporter: Arc<dyn ProgressReporter>,
    stats: Arc<StatsAggregator>,
    cancel: CancellationToken,
}

impl<F: StoreFactory> Orchestrator<F> {
    /// Create an orchestrator whose units get clients built by `factory`
    pub fn new(config: LoadConfig, factory: F, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            config,
            pool: Arc::new(ClientPool::new(factory)),
            worker: BatchWorker::default(),
            reporter,
            stats: Arc::new(StatsAggregator::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a custom worker (retry policy, chunk size)
    pub fn with_worker(mut self, worker: BatchWorker) -> Self {
        self.worker = worker;
        self
    }

    /// Count into `stats` instead of a private aggregator. It must start empty.
    pub fn with_stats(mut self, stats: Arc<StatsAggregator>) -> Self {
        self.stats = stats;
        self
    }

    /// Stop on an externally owned token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops units which have not started yet
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn client_pool(&self) -> Arc<ClientPool<F>> {
        Arc::clone(&self.pool)
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        Arc::clone(&self.stats)
    }

    /// Run every unit and return the final report
    ///
    /// Unit failures never fail the run. An error means the configuration was
    /// invalid or the outcome accounting no longer adds up.
    pub async fn run(self) -> Result<RunReport> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = self.config.num_batches;
        let expected_records = self.config.expected_records();

        self.reporter.report(&ProgressEvent::RunStarted {
            run_id,
            max_workers: self.config.max_workers,
            num_batches: total,
            partition_key_prefix: self.config.partition_key_prefix.clone(),
            expected_records,
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut pending = FuturesUnordered::new();

        for index in 0..total {
            let unit = LoadUnit::new(index, &self.config.partition_key_prefix, self.config.batch_size);
            let record_count = unit.record_count();
            let span = info_span!("unit", index, partition_key = %unit.partition_key());

            let semaphore = Arc::clone(&semaphore);
            let pool = Arc::clone(&self.pool);
            let reporter = Arc::clone(&self.reporter);
            let cancel = self.cancel.clone();
            let worker = self.worker;

            let handle = tokio::spawn(
                async move {
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Outcome::cancelled(index, record_count),
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(e) => return Outcome::failed(
                                index,
                                record_count,
                                format!("Batch {} failed: {}", unit.number(), e),
                            ),
                        },
                    };

                    let mut client = match pool.checkout() {
                        Ok(client) => client,
                        Err(e) => {
                            return Outcome::failed(
                                index,
                                record_count,
                                format!("Batch {} failed: {}", unit.number(), e),
                            )
                        },
                    };

                    worker.process(&mut *client, &unit, reporter.as_ref()).await
                }
                .instrument(span),
            );

            pending.push(handle.map(move |joined| (index, record_count, joined)));
        }

        debug!(units = total, "All units scheduled");

        let mut drained: u64 = 0;
        while let Some((index, record_count, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = describe_join_error(e);
                    error!(unit = index, "Unit task aborted: {}", reason);
                    Outcome::failed(
                        index,
                        record_count,
                        format!("Batch {} failed: {}", index + 1, reason),
                    )
                },
            };

            drained += 1;
            let completed = self.stats.record(&outcome);
            self.reporter.report(&ProgressEvent::UnitCompleted {
                completed,
                total,
                index: outcome.index,
                success: outcome.success,
                message: outcome.message,
            });
        }

        let stats = self.stats.snapshot(expected_records);
        let expected_units = total as u64;
        if drained != expected_units
            || stats.units_completed != expected_units
            || stats.units_succeeded + stats.units_failed != stats.units_completed
            || stats.records_processed() != expected_records
        {
            error!(%run_id, "Outcome accounting mismatch: {}", stats);
            return Err(LoadError::Accounting {
                expected: expected_units,
                actual: stats.units_completed,
            });
        }

        let report = RunReport::new(run_id, started_at, Utc::now(), self.config, stats);
        info!(%run_id, success_rate = %report.success_rate, "Run finished");
        self.reporter.report(&ProgressEvent::RunFinished {
            report: Box::new(report.clone()),
        });

        Ok(report)
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("task panicked: {}", panic_message(err.into_panic()))
    } else {
        "task cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::progress::ChannelReporter;
    use crate::store::{MemoryStore, Store};

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_any_work() {
        let store = MemoryStore::new();
        let (reporter, mut rx) = ChannelReporter::new();
        let config = LoadConfig {
            max_workers: 0,
            ..Default::default()
        };

        let result = Orchestrator::new(config, store.connector("orders"), Arc::new(reporter))
            .run()
            .await;

        assert!(matches!(result, Err(LoadError::Config(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_worker_count_above_permit_ceiling_is_config_error() {
        let store = MemoryStore::new();
        let (reporter, _rx) = ChannelReporter::new();
        let config = LoadConfig {
            max_workers: usize::MAX,
            ..Default::default()
        };

        let result = Orchestrator::new(config, store.connector("orders"), Arc::new(reporter))
            .run()
            .await;

        assert!(matches!(result, Err(LoadError::Config(_))));
        assert_eq!(store.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_completed_counter_is_monotonic() {
        let store = MemoryStore::new();
        let mut client = store.client("orders");
        client.ensure_container_exists("orders").await.unwrap();

        let (reporter, mut rx) = ChannelReporter::new();
        let config = LoadConfig {
            max_workers: 3,
            num_batches: 12,
            ..Default::default()
        };

        let report = Orchestrator::new(config, store.connector("orders"), Arc::new(reporter))
            .run()
            .await
            .unwrap();
        assert_eq!(report.stats.units_succeeded, 12);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::UnitCompleted { completed, total, .. } = event {
                assert_eq!(total, 12);
                seen.push(completed);
            }
        }
        assert_eq!(seen, (1..=12).collect::<Vec<u64>>());
    }
}
