//! Chunked submission
//!
//! A unit's records go to the store in contiguous chunks no larger than the
//! store's transaction ceiling. Chunks are sent one at a time; the first
//! failing chunk ends the attempt.

use thiserror::Error;
use tracing::debug;

use crate::config::MAX_TRANSACTION_SIZE;
use crate::record::SyntheticRecord;
use crate::store::{Store, StoreError};

/// A chunk the store refused, with how far the attempt got
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chunk {chunk} rejected after {chunks_committed} committed: {source}")]
pub struct SubmitError {
    /// 0-based index of the failing chunk
    pub chunk: usize,
    pub chunks_committed: usize,
    #[source]
    pub source: StoreError,
}

impl SubmitError {
    pub fn is_backpressure(&self) -> bool {
        self.source.is_backpressure()
    }
}

/// Splits records into transaction-sized chunks and submits them in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSubmitter {
    chunk_size: usize,
}

impl Default for ChunkSubmitter {
    fn default() -> Self {
        Self {
            chunk_size: MAX_TRANSACTION_SIZE,
        }
    }
}

impl ChunkSubmitter {
    /// Submitter with a custom chunk size, clamped to `1..=MAX_TRANSACTION_SIZE`
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_TRANSACTION_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks `records` splits into
    pub fn chunk_count(&self, records: usize) -> usize {
        records.div_ceil(self.chunk_size)
    }

    /// Submit every chunk of `records`, awaiting each before the next.
    ///
    /// Returns the number of chunks committed.
    pub async fn submit<S>(&self, store: &mut S, records: &[SyntheticRecord]) -> Result<usize, SubmitError>
    where
        S: Store + ?Sized,
    {
        let mut committed = 0;

        for (chunk, slice) in records.chunks(self.chunk_size).enumerate() {
            store.submit_chunk(slice).await.map_err(|source| SubmitError {
                chunk,
                chunks_committed: committed,
                source,
            })?;
            committed += 1;
            debug!(chunk, records = slice.len(), "Chunk submitted");
        }

        Ok(committed)
    }
}
