use crate::error::CacheError;
use crate::multicast::Multicast;
use crate::multicast::Subscription;
use crate::traits::DataController;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;

pub type EntryChannel<DC> = Multicast<<DC as DataController>::Value, CacheError<<DC as DataController>::Error>>;
pub type EntrySubscription<DC> = Subscription<<DC as DataController>::Value, CacheError<<DC as DataController>::Error>>;

/// In-memory state of a single key.
///
/// Arguments and context are captured from the read that created the entry and never change afterwards. The channel
/// lives exactly as long as the entry: once the entry is dropped out of the cache, a later read for the same key gets
/// a new entry with a new channel.
pub struct CacheEntry<DC>
where
    DC: DataController,
{
    key:         DC::Key,
    args:        DC::Args,
    context:     DC::Context,
    channel:     EntryChannel<DC>,
    initialized: AtomicBool,
    // Held for the whole duration of a refresh so that refreshes of one entry never overlap.
    refresh:     Mutex<()>,
}

impl<DC> CacheEntry<DC>
where
    DC: DataController,
{
    pub(crate) fn new(key: DC::Key, args: DC::Args, context: DC::Context) -> Self {
        Self {
            key,
            args,
            context,
            channel: Multicast::new(),
            initialized: AtomicBool::new(false),
            refresh: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &DC::Key {
        &self.key
    }

    pub fn args(&self) -> &DC::Args {
        &self.args
    }

    pub fn context(&self) -> &DC::Context {
        &self.context
    }

    /// `true` once a value has been published on the entry's channel.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.channel.is_failed()
    }

    pub fn is_observed(&self) -> bool {
        self.channel.has_active_subscribers()
    }

    pub fn subscriber_count(&self) -> usize {
        self.channel.subscriber_count()
    }

    /// The most recently published value, if any.
    pub fn latest(&self) -> Option<DC::Value> {
        self.channel.latest()
    }

    pub fn subscribe(&self) -> EntrySubscription<DC> {
        self.channel.subscribe()
    }

    pub(crate) fn publish(&self, value: DC::Value) -> bool {
        if self.channel.publish(value) {
            self.initialized.store(true, Ordering::Release);
            true
        }
        else {
            false
        }
    }

    pub(crate) fn fail(&self, error: Arc<CacheError<DC::Error>>) -> bool {
        self.channel.fail(error)
    }

    // Returns None if a refresh is already running.
    pub(crate) fn try_lock_refresh(&self) -> Option<MutexGuard<'_, ()>> {
        self.refresh.try_lock().ok()
    }

    pub(crate) async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh.lock().await
    }
}

impl<DC> Debug for CacheEntry<DC>
where
    DC: DataController,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("args", &self.args)
            .field("initialized", &self.is_initialized())
            .field("channel", &self.channel)
            .finish()
    }
}
