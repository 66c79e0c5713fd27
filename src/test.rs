#![cfg(any(test, feature = "test"))]
//! Test doubles for the cache collaborators: an in-memory durable store with fault injection, a manually driven
//! clock, and a counting producer.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::TimeZone;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;

use crate::traits::Clock;
use crate::traits::DataController;
use crate::traits::DurableStore;
use crate::types::StoredRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("injected store fault on {operation}")]
pub struct StoreFault {
    pub operation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestError {
    #[error("producer failed on call {0}")]
    Producer(usize),
    #[error(transparent)]
    Store(#[from] StoreFault),
}

/// Produces `"{context}{args}#{n}"` where `n` is the number of the call, counting from 1.
#[derive(Debug, Default)]
pub struct EchoController {
    calls:   AtomicUsize,
    fail:    AtomicBool,
    latency: Mutex<Duration>,
}

impl EchoController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        let controller = Self::new();
        controller.set_latency(latency);
        controller
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }
}

#[async_trait]
impl DataController for EchoController {
    type Args = String;
    type Context = String;
    type Error = TestError;
    type Key = String;
    type Value = String;

    async fn produce(&self, context: &String, args: &String) -> Result<String, TestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(TestError::Producer(call));
        }

        Ok(format!("{context}{args}#{call}"))
    }
}

/// In-memory [`DurableStore`] counting its operations.
pub struct MemoryStore<DC>
where
    DC: DataController,
{
    records:      Mutex<HashMap<DC::Key, StoredRecord<DC::Value>>>,
    removed:      Mutex<Vec<DC::Key>>,
    reads:        AtomicUsize,
    writes:       AtomicUsize,
    fail_reads:   AtomicBool,
    fail_writes:  AtomicBool,
    fail_removes: AtomicBool,
}

impl<DC> MemoryStore<DC>
where
    DC: DataController,
{
    pub fn new() -> Self {
        Self {
            records:      Mutex::new(HashMap::new()),
            removed:      Mutex::new(Vec::new()),
            reads:        AtomicUsize::new(0),
            writes:       AtomicUsize::new(0),
            fail_reads:   AtomicBool::new(false),
            fail_writes:  AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
        }
    }

    /// Put a record in place without counting it as a write.
    pub fn seed(&self, key: DC::Key, record: StoredRecord<DC::Value>) {
        self.records.lock().insert(key, record);
    }

    pub fn record(&self, key: &DC::Key) -> Option<StoredRecord<DC::Value>> {
        self.records.lock().get(key).cloned()
    }

    /// Every key passed to `remove`, in call order.
    pub fn removed_keys(&self) -> Vec<DC::Key> {
        self.removed.lock().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

impl<DC> Default for MemoryStore<DC>
where
    DC: DataController,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<DC> DurableStore<DC> for MemoryStore<DC>
where
    DC: DataController,
    DC::Error: From<StoreFault>,
{
    async fn get(&self, key: &DC::Key) -> Result<Option<StoredRecord<DC::Value>>, DC::Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreFault { operation: "get" }.into());
        }
        Ok(self.record(key))
    }

    async fn store(&self, key: &DC::Key, record: StoredRecord<DC::Value>) -> Result<(), DC::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreFault { operation: "store" }.into());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(key.clone(), record);
        Ok(())
    }

    async fn remove(&self, keys: &[DC::Key]) -> Result<(), DC::Error> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(StoreFault { operation: "remove" }.into());
        }
        let mut records = self.records.lock();
        let mut removed = self.removed.lock();
        for key in keys {
            records.remove(key);
            removed.push(key.clone());
        }
        Ok(())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Start at `ms` milliseconds after the Unix epoch.
    pub fn at_millis(ms: i64) -> Self {
        Self::new(Utc.timestamp_millis_opt(ms).single().unwrap_or_default())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Some(later) = TimeDelta::from_std(by).ok().and_then(|by| now.checked_add_signed(by)) {
            *now = later;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Let spawned background work run to completion. Deterministic under a paused tokio clock since time only advances
/// once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
