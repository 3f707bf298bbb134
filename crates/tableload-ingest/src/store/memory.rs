//! In-process table store
//!
//! Rows are keyed by `(PartitionKey, RowKey)` and written with upsert
//! semantics, so resubmitting a chunk never inflates the row count. A chunk
//! is applied under one lock, which makes it all-or-nothing.
//!
//! A non-zero throttle rate makes the store answer a random share of submits
//! with backpressure, which is handy for exercising the retry path locally.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Store, StoreError, StoreFactory};
use crate::config::MAX_TRANSACTION_SIZE;
use crate::record::SyntheticRecord;

type Table = HashMap<(String, String), SyntheticRecord>;

#[derive(Default)]
struct Shared {
    tables: Mutex<HashMap<String, Table>>,
    throttle_rate: f64,
    submits: AtomicU64,
}

/// Handle to one in-memory store; clones share the same tables
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that answers `rate` (0.0..=1.0) of submits with backpressure
    pub fn with_throttle(rate: f64) -> Self {
        Self {
            shared: Arc::new(Shared {
                throttle_rate: rate.clamp(0.0, 1.0),
                ..Default::default()
            }),
        }
    }

    /// Factory handing out clients bound to `table`
    pub fn connector(&self, table: impl Into<String>) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
            table: table.into(),
        }
    }

    /// Client bound to `table`
    pub fn client(&self, table: impl Into<String>) -> MemoryClient {
        MemoryClient {
            store: self.clone(),
            table: table.into(),
        }
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables().contains_key(table)
    }

    /// Number of rows in `table` (0 when it does not exist)
    pub fn row_count(&self, table: &str) -> usize {
        self.tables().get(table).map_or(0, HashMap::len)
    }

    /// Number of rows in `table` under `partition_key`
    pub fn partition_row_count(&self, table: &str, partition_key: &str) -> usize {
        self.tables().get(table).map_or(0, |rows| {
            rows.keys().filter(|(pk, _)| pk == partition_key).count()
        })
    }

    /// Fetch one row by its key
    pub fn get(&self, table: &str, partition_key: &str, row_key: &str) -> Option<SyntheticRecord> {
        self.tables()
            .get(table)
            .and_then(|rows| rows.get(&(partition_key.to_string(), row_key.to_string())))
            .cloned()
    }

    /// Chunk submissions seen so far, throttled ones included
    pub fn submit_calls(&self) -> u64 {
        self.shared.submits.load(Ordering::Relaxed)
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Table>> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn throttled(&self) -> bool {
        self.shared.throttle_rate > 0.0 && rand::random::<f64>() < self.shared.throttle_rate
    }
}

/// [`StoreFactory`] for [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    table: String,
}

impl StoreFactory for MemoryConnector {
    type Client = MemoryClient;

    fn connect(&self) -> Result<Self::Client, StoreError> {
        Ok(self.store.client(self.table.clone()))
    }
}

/// Client of a [`MemoryStore`], bound to one table
pub struct MemoryClient {
    store: MemoryStore,
    table: String,
}

#[async_trait]
impl Store for MemoryClient {
    async fn ensure_container_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        let mut tables = self.store.tables();
        if tables.contains_key(name) {
            return Ok(false);
        }
        tables.insert(name.to_string(), Table::new());
        Ok(true)
    }

    async fn submit_chunk(&mut self, records: &[SyntheticRecord]) -> Result<(), StoreError> {
        self.store.shared.submits.fetch_add(1, Ordering::Relaxed);

        if records.len() > MAX_TRANSACTION_SIZE {
            return Err(StoreError::fatal(format!(
                "transaction holds {} entities, limit is {}",
                records.len(),
                MAX_TRANSACTION_SIZE
            )));
        }

        if let Some(first) = records.first() {
            if records.iter().any(|r| r.partition_key != first.partition_key) {
                return Err(StoreError::fatal(
                    "all entities in a transaction must share one partition key",
                ));
            }
        }

        if self.store.throttled() {
            return Err(StoreError::Backpressure { retry_after: None });
        }

        let mut tables = self.store.tables();
        let rows = tables
            .get_mut(&self.table)
            .ok_or_else(|| StoreError::fatal(format!("table '{}' not found", self.table)))?;

        for record in records {
            rows.insert(
                (record.partition_key.clone(), record.row_key.clone()),
                record.clone(),
            );
        }

        Ok(())
    }
}
