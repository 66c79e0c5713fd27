//! # relay-cache
//!
//! Per-key in-process cache that pushes values to its consumers instead of handing out snapshots.
//!
//! # The Basics
//!
//! The `relay-cache` crate is designed for the following use case:
//!
//! - Values are expensive to compute and are shared by many concurrent consumers.
//! - Consumers want to be told when a value changes rather than poll for it.
//! - Computed values must survive a restart, so they are kept in a durable store with a time-to-live.
//!
//! The cache operates on the following principles:
//!
//! - It is backend-agnostic: the durable store and the producer are traits.
//! - It is key and value agnostic.
//! - A read returns a live [`Subscription`](multicast::Subscription) immediately. The latest known value, if any,
//!   is replayed to it; refreshed values follow as they are produced.
//! - Staleness is decided by the durable store's records, not by in-memory timers. A restarted process serves fresh
//!   stored records without calling the producer.
//! - Entries are kept only while somebody is subscribed. There is no capacity-based eviction.
//! - Fully async.
//! - As an "L1" cache, it doesn't support distributed caching.
//!
//! # Data Controller
//!
//! As with a write-behind cache, the central piece is the data controller: the [`DataController`] implementation
//! defines the `Key`, `Args`, `Context`, `Value`, and `Error` types, and produces fresh values. The
//! [`DurableStore`](traits::DurableStore) keeps [`StoredRecord`](types::StoredRecord)s between refreshes, and the
//! [`Clock`](traits::Clock) tells when they are outdated.
//!
//! # Lifecycle Of A Key
//!
//! 1. The first [`read`](RelayCache::read) creates an entry and captures the call arguments and context.
//! 2. A background task asks the store for the record. A missing or outdated record triggers a refresh: the producer
//!    is called, its value is stored with the configured max-age, and then published to the subscribers. A fresh
//!    record is published as is if the entry has no value yet.
//! 3. A failure of the producer or of the store write terminates the entry's channel. Every subscriber, present or
//!    future, gets the error until the entry is collected.
//! 4. [`invalidate`](RelayCache::invalidate) removes stored records and refreshes the entries unconditionally.
//! 5. Entries with no subscribers are collected on every read for another key and on every invalidation.

pub mod cache;
pub mod entry;
pub mod error;
#[cfg(feature = "tracing")]
pub mod logging;
pub mod multicast;
pub mod test;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::RelayCache;
#[doc(inline)]
pub use traits::DataController;

pub mod prelude {
    pub use crate::cache::RelayCache;
    pub use crate::entry::CacheEntry;
    pub use crate::entry::EntrySubscription;
    pub use crate::error::CacheError;
    pub use crate::multicast::Multicast;
    pub use crate::multicast::Subscription;
    pub use crate::traits::*;
    pub use crate::types::*;
}
