use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;

use crate::types::StoredRecord;

/// The type-defining half of a cache: it names the key, argument, context, value and error types, and knows how to
/// produce a fresh value for a key.
#[async_trait]
pub trait DataController: Sized + Send + Sync + 'static {
    /// The key used with [`RelayCache::read()`](crate::RelayCache::read) and
    /// [`RelayCache::invalidate()`](crate::RelayCache::invalidate).
    type Key: Debug + Display + Hash + Clone + Eq + Sized + Send + Sync + 'static;
    /// Arguments captured from the first read of a key and passed to every refresh of that key.
    type Args: Debug + Send + Sync + 'static;
    /// Execution context captured alongside the arguments.
    type Context: Send + Sync + 'static;
    type Value: Debug + Clone + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Compute a fresh value. Called once per refresh; the result is persisted and then published to subscribers.
    async fn produce(&self, context: &Self::Context, args: &Self::Args) -> Result<Self::Value, Self::Error>;
}

/// The durable side of the cache. Records outlive the process and let a restarted cache serve values without calling
/// the producer.
///
/// Calls for distinct keys may run concurrently. Calls for the same key may overlap as well when a key is invalidated
/// while a refresh is running, so implementations must not rely on per-key serialization.
#[async_trait]
pub trait DurableStore<DC>: Send + Sync + 'static
where
    DC: DataController,
{
    async fn get(&self, key: &DC::Key) -> Result<Option<StoredRecord<DC::Value>>, DC::Error>;
    async fn store(&self, key: &DC::Key, record: StoredRecord<DC::Value>) -> Result<(), DC::Error>;
    async fn remove(&self, keys: &[DC::Key]) -> Result<(), DC::Error>;
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
