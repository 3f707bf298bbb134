//! Test helpers for tableload integration tests
//!
//! [`ScriptedFactory`] builds store clients that write through to a
//! [`MemoryStore`] while letting a test:
//! - script the verdict of every submit call per unit
//! - add latency to each call
//! - observe how many submit calls were in flight at once

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tableload_ingest::progress::ProgressEvent;
use tableload_ingest::store::{MemoryClient, MemoryStore, Store, StoreError, StoreFactory};
use tableload_ingest::SyntheticRecord;
use tokio::sync::mpsc::UnboundedReceiver;

pub const TABLE: &str = "orders";

/// What a scripted store does with one submit call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Throttle,
    Fatal,
    Panic,
}

/// Decides the verdict from `(unit index, 1-based call number for that unit)`
pub type Script = Arc<dyn Fn(usize, u32) -> Verdict + Send + Sync>;

pub fn accept_all() -> Script {
    Arc::new(|_, _| Verdict::Accept)
}

/// Shared observations across every client of one factory
#[derive(Default)]
pub struct CallLog {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total_calls: AtomicUsize,
    calls_per_unit: Mutex<HashMap<usize, u32>>,
}

impl CallLog {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, unit: usize) -> u32 {
        self.calls_per_unit
            .lock()
            .unwrap()
            .get(&unit)
            .copied()
            .unwrap_or(0)
    }

    fn next_call(&self, unit: usize) -> u32 {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let mut calls = self.calls_per_unit.lock().unwrap();
        let count = calls.entry(unit).or_insert(0);
        *count += 1;
        *count
    }
}

struct InFlight<'a>(&'a CallLog);

impl<'a> InFlight<'a> {
    fn enter(calls: &'a CallLog) -> Self {
        let now = calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        calls.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(calls)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedFactory {
    pub memory: MemoryStore,
    pub calls: Arc<CallLog>,
    script: Script,
    latency: Duration,
}

impl ScriptedFactory {
    /// Factory over a fresh memory store whose table already exists
    pub async fn new(script: Script) -> Self {
        let memory = MemoryStore::new();
        memory
            .client(TABLE)
            .ensure_container_exists(TABLE)
            .await
            .unwrap();

        Self {
            memory,
            calls: Arc::new(CallLog::default()),
            script,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl StoreFactory for ScriptedFactory {
    type Client = ScriptedClient;

    fn connect(&self) -> Result<Self::Client, StoreError> {
        Ok(ScriptedClient {
            inner: self.memory.client(TABLE),
            calls: Arc::clone(&self.calls),
            script: Arc::clone(&self.script),
            latency: self.latency,
        })
    }
}

pub struct ScriptedClient {
    inner: MemoryClient,
    calls: Arc<CallLog>,
    script: Script,
    latency: Duration,
}

#[async_trait]
impl Store for ScriptedClient {
    async fn ensure_container_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        self.inner.ensure_container_exists(name).await
    }

    async fn submit_chunk(&mut self, records: &[SyntheticRecord]) -> Result<(), StoreError> {
        let _in_flight = InFlight::enter(&self.calls);
        let unit = unit_of(records);
        let call = self.calls.next_call(unit);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match (self.script)(unit, call) {
            Verdict::Accept => self.inner.submit_chunk(records).await,
            Verdict::Throttle => Err(StoreError::Backpressure { retry_after: None }),
            Verdict::Fatal => Err(StoreError::fatal(format!("unit {} rejected", unit))),
            Verdict::Panic => panic!("store exploded on unit {}", unit),
        }
    }
}

/// Unit index encoded in the row keys (`Order_{unit}_{item}`)
pub fn unit_of(records: &[SyntheticRecord]) -> usize {
    records
        .first()
        .and_then(|r| r.row_key.split('_').nth(1))
        .and_then(|u| u.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Everything the channel has buffered so far
pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// `(index, success, message)` of every completion event, in arrival order
pub fn completions(events: &[ProgressEvent]) -> Vec<(usize, bool, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::UnitCompleted {
                index,
                success,
                message,
                ..
            } => Some((*index, *success, message.clone())),
            _ => None,
        })
        .collect()
}
