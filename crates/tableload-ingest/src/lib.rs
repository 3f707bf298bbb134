//! Tableload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Bounded-concurrency bulk loading of synthetic order records into a
//! batch-oriented table store.
//!
//! # Pipeline
//!
//! - **[`record`]**: synthesizes the records of one load unit
//! - **[`submit`]**: splits them into transaction-sized chunks
//! - **[`retry`]**: resubmits throttled units with linear backoff
//! - **[`worker`]**: turns one unit into one [`Outcome`]
//! - **[`orchestrator`]**: runs every unit under a concurrency cap
//! - **[`stats`]**: counts outcomes as they arrive
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tableload_ingest::config::LoadConfig;
//! use tableload_ingest::progress::TracingReporter;
//! use tableload_ingest::store::{MemoryStore, Store};
//! use tableload_ingest::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryStore::new();
//!     store.client("orders").ensure_container_exists("orders").await?;
//!
//!     let report = Orchestrator::new(
//!         LoadConfig::default(),
//!         store.connector("orders"),
//!         Arc::new(TracingReporter),
//!     )
//!     .run()
//!     .await?;
//!
//!     println!("{}", report.stats);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod retry;
pub mod stats;
pub mod store;
pub mod submit;
pub mod worker;

pub use config::{LoadConfig, StoreConfig, StoreKind};
pub use orchestrator::Orchestrator;
pub use progress::{ProgressEvent, ProgressReporter};
pub use record::{LoadUnit, SyntheticRecord};
pub use retry::RetryPolicy;
pub use stats::{RunReport, RunStatistics, StatsAggregator};
pub use store::{Store, StoreError, StoreFactory};
pub use submit::ChunkSubmitter;
pub use worker::{BatchWorker, Outcome};
