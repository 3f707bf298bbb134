//! Batch worker
//!
//! Turns one [`LoadUnit`] into exactly one [`Outcome`]: synthesize the
//! records, submit them under the retry policy, and describe the result.

use chrono::Local;
use serde::Serialize;
use tracing::debug;

use crate::progress::ProgressReporter;
use crate::record::{synthesize, LoadUnit};
use crate::retry::{RetryPolicy, UnitSubmitResult};
use crate::store::Store;
use crate::submit::ChunkSubmitter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Terminal verdict for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub index: usize,
    pub success: bool,
    pub message: String,
    /// Records attributed to this outcome, all-or-nothing
    pub record_count: usize,
    /// Submission attempts made; 0 when the unit never reached the store
    pub attempts: u32,
}

impl Outcome {
    /// Failure that happened outside the retry policy
    pub fn failed(index: usize, record_count: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            message: message.into(),
            record_count,
            attempts: 0,
        }
    }

    /// Unit skipped because the run was cancelled before it got a permit
    pub fn cancelled(index: usize, record_count: usize) -> Self {
        Self::failed(
            index,
            record_count,
            format!("Batch {} cancelled before start.", index + 1),
        )
    }
}

/// Processes load units against a store
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchWorker {
    policy: RetryPolicy,
    submitter: ChunkSubmitter,
}

impl BatchWorker {
    pub fn new(policy: RetryPolicy, submitter: ChunkSubmitter) -> Self {
        Self { policy, submitter }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `unit` to completion on `store`
    pub async fn process<S>(&self, store: &mut S, unit: &LoadUnit, reporter: &dyn ProgressReporter) -> Outcome
    where
        S: Store + ?Sized,
    {
        let started = timestamp();
        let records = synthesize(unit);
        debug!(
            unit = unit.index(),
            partition_key = unit.partition_key(),
            records = records.len(),
            "Records synthesized"
        );

        let result = self
            .policy
            .run(store, &self.submitter, unit, &records, reporter)
            .await;
        let attempts = result.attempts();

        let (success, message) = match result {
            UnitSubmitResult::Committed { .. } => (
                true,
                format!(
                    "[{}] Batch {} inserted successfully. (started: {})",
                    timestamp(),
                    unit.number(),
                    started
                ),
            ),
            UnitSubmitResult::Rejected { error, .. } => (
                false,
                format!(
                    "[{}] Batch {} failed: {} (started: {})",
                    timestamp(),
                    unit.number(),
                    error,
                    started
                ),
            ),
            UnitSubmitResult::Exhausted { attempts } => (
                false,
                format!(
                    "[{}] Batch {} failed after {} retries. (started: {})",
                    timestamp(),
                    unit.number(),
                    attempts,
                    started
                ),
            ),
        };

        Outcome {
            index: unit.index(),
            success,
            message,
            record_count: unit.record_count(),
            attempts,
        }
    }
}
