//! Store collaborator
//!
//! The engine only needs two calls from a store: make sure the target table
//! exists, and commit one chunk of records as a single all-or-nothing
//! transaction. Everything about the wire protocol lives behind [`Store`].
//!
//! Store clients are `Send` but not required to be `Sync`. Each running unit
//! borrows an exclusive client from a [`ClientPool`]; clients are built lazily
//! by a [`StoreFactory`] and reused by later units, never shared by two units
//! at the same time.

pub mod http;
pub mod memory;
pub mod pool;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::record::SyntheticRecord;

pub use http::{HttpStore, HttpStoreFactory};
pub use memory::{MemoryClient, MemoryConnector, MemoryStore};
pub use pool::{ClientPool, PooledClient};

/// Classified store failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store is over capacity; the caller should slow down and retry.
    #[error("Store throughput exceeded (retry after: {retry_after:?})")]
    Backpressure { retry_after: Option<Duration> },

    /// Anything else. Not retried.
    #[error("Store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns `true` if the store asked the caller to back off
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }

    /// Server-provided wait hint, when there is one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Backpressure { retry_after } => *retry_after,
            Self::Fatal(_) => None,
        }
    }
}

/// One connection to a batch-oriented table store
#[async_trait]
pub trait Store: Send {
    /// Create the table if it is missing. Returns `true` when it was created.
    async fn ensure_container_exists(&mut self, name: &str) -> Result<bool, StoreError>;

    /// Commit `records` atomically: either all are upserted or none are.
    async fn submit_chunk(&mut self, records: &[SyntheticRecord]) -> Result<(), StoreError>;
}

/// Builds store clients on demand
pub trait StoreFactory: Send + Sync + 'static {
    type Client: Store + 'static;

    /// Open one new client
    fn connect(&self) -> Result<Self::Client, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let throttled = StoreError::Backpressure {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(throttled.is_backpressure());
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(3)));

        let fatal = StoreError::fatal("HTTP 400: bad entity");
        assert!(!fatal.is_backpressure());
        assert_eq!(fatal.retry_after(), None);
        assert_eq!(fatal.to_string(), "Store error: HTTP 400: bad entity");
    }
}
