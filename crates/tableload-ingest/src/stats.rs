//! Run statistics
//!
//! [`StatsAggregator`] is updated from whichever task observes a unit
//! finishing. Every counter is an atomic, so concurrent updates are never
//! lost. Record counters move in whole units: a unit's full record count is
//! attributed to success or failure, never split by chunk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::config::LoadConfig;
use crate::worker::Outcome;

/// Thread-safe outcome counters for one run
#[derive(Debug, Default)]
pub struct StatsAggregator {
    units_completed: AtomicU64,
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    records_succeeded: AtomicU64,
    records_failed: AtomicU64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful unit. Returns the completed-unit count including it.
    pub fn record_success(&self, records: u64) -> u64 {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
        self.records_succeeded.fetch_add(records, Ordering::Relaxed);
        self.units_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a failed unit. Returns the completed-unit count including it.
    pub fn record_failure(&self, records: u64) -> u64 {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(records, Ordering::Relaxed);
        self.units_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count `outcome` exactly once
    pub fn record(&self, outcome: &Outcome) -> u64 {
        let records = outcome.record_count as u64;
        if outcome.success {
            self.record_success(records)
        } else {
            self.record_failure(records)
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self, expected_records: u64) -> RunStatistics {
        RunStatistics {
            units_completed: self.units_completed.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            records_succeeded: self.records_succeeded.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            expected_records,
        }
    }
}

/// Final (or in-progress) counter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub units_completed: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    /// `batch_size * num_batches`
    pub expected_records: u64,
}

impl RunStatistics {
    pub fn records_processed(&self) -> u64 {
        self.records_succeeded + self.records_failed
    }

    /// Percentage of expected records that were written
    pub fn success_rate(&self) -> f64 {
        if self.expected_records == 0 {
            return 0.0;
        }
        self.records_succeeded as f64 / self.expected_records as f64 * 100.0
    }

    /// `success_rate` rendered with two decimals, e.g. `"50.00%"`
    pub fn success_rate_label(&self) -> String {
        format!("{:.2}%", self.success_rate())
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "units {}/{} succeeded ({} failed), records {} succeeded, {} failed, {} of {} processed, success rate {}",
            self.units_succeeded,
            self.units_completed,
            self.units_failed,
            self.records_succeeded,
            self.records_failed,
            self.records_processed(),
            self.expected_records,
            self.success_rate_label()
        )
    }
}

/// Everything worth keeping about a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub config: LoadConfig,
    pub stats: RunStatistics,
    pub success_rate: String,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        config: LoadConfig,
        stats: RunStatistics,
    ) -> Self {
        let duration_secs = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            run_id,
            started_at,
            finished_at,
            duration_secs,
            config,
            success_rate: stats.success_rate_label(),
            stats,
        }
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> tableload_common::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
