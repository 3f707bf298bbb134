//! Per-unit store client affinity
//!
//! A running unit checks out one client for its whole lifetime and the
//! client goes back to the idle list when the [`PooledClient`] guard drops.
//! Clients are only built when the idle list is empty, so with `N` permits no
//! more than `N` clients exist in steady state.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::{StoreError, StoreFactory};

/// Lazily populated set of exclusive store clients
pub struct ClientPool<F: StoreFactory> {
    factory: F,
    idle: Mutex<Vec<F::Client>>,
    created: AtomicUsize,
}

impl<F: StoreFactory> ClientPool<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Take an idle client, or connect a new one if none is idle
    pub fn checkout(&self) -> Result<PooledClient<'_, F>, StoreError> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let client = match reused {
            Some(client) => client,
            None => {
                let client = self.factory.connect()?;
                let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(clients = created, "Opened store client");
                client
            },
        };

        Ok(PooledClient {
            pool: self,
            client: Some(client),
        })
    }

    /// Clients built so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Clients currently waiting for a unit
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn checkin(&self, client: F::Client) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }
}

/// Exclusive loan of a client; returned to the pool on drop
pub struct PooledClient<'a, F: StoreFactory> {
    pool: &'a ClientPool<F>,
    client: Option<F::Client>,
}

impl<F: StoreFactory> Deref for PooledClient<'_, F> {
    type Target = F::Client;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the client out.
        match &self.client {
            Some(client) => client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl<F: StoreFactory> DerefMut for PooledClient<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.client {
            Some(client) => client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl<F: StoreFactory> Drop for PooledClient<'_, F> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.checkin(client);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_clients_are_reused_after_release() {
        let pool = ClientPool::new(MemoryStore::new().connector("orders"));

        {
            let _a = pool.checkout().unwrap();
            let _b = pool.checkout().unwrap();
            assert_eq!(pool.created(), 2);
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 2);

        let _c = pool.checkout().unwrap();
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_nothing_built_until_first_checkout() {
        let pool = ClientPool::new(MemoryStore::new().connector("orders"));
        assert_eq!(pool.created(), 0);
        assert_eq!(pool.idle(), 0);
    }
}
