//! Progress and result events
//!
//! The engine never prints. It hands [`ProgressEvent`]s to a
//! [`ProgressReporter`] and leaves presentation to the caller.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use crate::stats::RunReport;

/// Something observable happened during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: Uuid,
        max_workers: usize,
        num_batches: usize,
        partition_key_prefix: String,
        expected_records: u64,
    },
    /// A throttled unit is about to sleep before its next attempt
    ///
    /// On the last attempt `final_attempt` is set: the unit still waits out
    /// `wait_secs`, then gives up instead of retrying.
    UnitRetrying {
        index: usize,
        attempt: u32,
        wait_secs: u64,
        retry_after: Option<Duration>,
        final_attempt: bool,
    },
    /// One unit reached its final outcome; `completed` counts up from 1
    UnitCompleted {
        completed: u64,
        total: usize,
        index: usize,
        success: bool,
        message: String,
    },
    RunFinished {
        report: Box<RunReport>,
    },
}

/// Receives progress events; called concurrently from unit tasks
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Writes every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                run_id,
                max_workers,
                num_batches,
                partition_key_prefix,
                expected_records,
            } => {
                info!(%run_id, "Parallel load started - workers: {}, batches: {}", max_workers, num_batches);
                info!(%run_id, "Partition key prefix: {}", partition_key_prefix);
                info!(%run_id, "Records to write: {}", expected_records);
            },
            ProgressEvent::UnitRetrying {
                index,
                attempt,
                wait_secs,
                retry_after,
                final_attempt: false,
            } => {
                warn!(
                    unit = index,
                    attempt,
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "Throughput exceeded. Retrying batch {} in {}s",
                    index + 1,
                    wait_secs
                );
            },
            ProgressEvent::UnitRetrying {
                index,
                attempt,
                wait_secs,
                retry_after,
                final_attempt: true,
            } => {
                warn!(
                    unit = index,
                    attempt,
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "Throughput exceeded. Batch {} is out of retries, giving up after {}s",
                    index + 1,
                    wait_secs
                );
            },
            ProgressEvent::UnitCompleted {
                completed,
                total,
                index,
                success,
                message,
            } => {
                if *success {
                    info!(unit = index, "[{}/{}] {}", completed, total, message);
                } else {
                    warn!(unit = index, "[{}/{}] {}", completed, total, message);
                }
            },
            ProgressEvent::RunFinished { report } => {
                let stats = &report.stats;
                info!(run_id = %report.run_id, "Data insertion complete.");
                info!(
                    "Batch results - succeeded: {}, failed: {}, total: {}",
                    stats.units_succeeded, stats.units_failed, stats.units_completed
                );
                info!(
                    "Record results - succeeded: {}, failed: {}",
                    stats.records_succeeded, stats.records_failed
                );
                info!(
                    "Records processed: {} / expected: {}",
                    stats.records_processed(),
                    stats.expected_records
                );
                info!("Success rate: {}", stats.success_rate_label());
                info!(
                    "Started: {}, finished: {} ({:.2}s)",
                    report.started_at.to_rfc3339(),
                    report.finished_at.to_rfc3339(),
                    report.duration_secs
                );
            },
        }
    }
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: &ProgressEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Terminal progress bar over the batch count, logging through [`TracingReporter`]
pub struct ProgressBarReporter {
    bar: ProgressBar,
    inner: TracingReporter,
}

impl ProgressBarReporter {
    pub fn new(total_batches: u64) -> Self {
        let bar = ProgressBar::new(total_batches);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} batches ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self {
            bar,
            inner: TracingReporter,
        }
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn report(&self, event: &ProgressEvent) {
        self.bar.suspend(|| self.inner.report(event));

        match event {
            ProgressEvent::UnitCompleted { success: false, .. } => {
                self.bar.inc(1);
                self.bar.set_message("(failures present)");
            },
            ProgressEvent::UnitCompleted { .. } => self.bar.inc(1),
            ProgressEvent::RunFinished { report } => {
                self.bar
                    .finish_with_message(format!("success rate {}", report.success_rate));
            },
            _ => {},
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_reporter_forwards_events() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.report(&ProgressEvent::UnitRetrying {
            index: 4,
            attempt: 1,
            wait_secs: 0,
            retry_after: None,
            final_attempt: false,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::UnitRetrying { index: 4, .. }));
    }

    #[test]
    fn test_retry_event_serializes_final_attempt_flag() {
        let event = ProgressEvent::UnitRetrying {
            index: 2,
            attempt: 30,
            wait_secs: 58,
            retry_after: None,
            final_attempt: true,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "unit_retrying");
        assert_eq!(json["attempt"], 30);
        assert_eq!(json["final_attempt"], true);
    }

    #[test]
    fn test_channel_reporter_tolerates_dropped_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.report(&ProgressEvent::UnitCompleted {
            completed: 1,
            total: 1,
            index: 0,
            success: true,
            message: "ok".to_string(),
        });
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = ProgressEvent::UnitCompleted {
            completed: 3,
            total: 10,
            index: 7,
            success: false,
            message: "Batch 8 failed".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "unit_completed");
        assert_eq!(json["completed"], 3);
    }
}
