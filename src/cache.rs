use crate::entry::CacheEntry;
use crate::entry::EntrySubscription;
use crate::error::CacheError;
use crate::traits::Clock;
use crate::traits::DataController;
use crate::traits::DurableStore;
use crate::traits::SystemClock;
use crate::types::StoredRecord;
use fieldx_plus::fx_plus;
use moka::future::Cache;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

type EntryMap<DC> = Cache<<DC as DataController>::Key, Arc<CacheEntry<DC>>>;

/// Keeps one live entry per key and pushes fresh values to whoever is subscribed to it.
///
/// ```ignore
/// let cache = RelayCache::builder()
///     .data_controller(QuoteFetcher::new(endpoint))
///     .store(Arc::new(RedisStore::connect(url).await?))
///     .max_age(Duration::from_secs(30))
///     .build()?;
///
/// let mut quotes = cache.read(symbol, FetchArgs::default(), session).await;
/// while let Some(quote) = quotes.next().await {
///     render(quote?);
/// }
/// ```
///
/// A read never waits for the producer. The returned subscription receives the latest known value right away if
/// there is one, and every refreshed value after that. Entries nobody subscribes to anymore are dropped on the next
/// [`read`](Self::read) or [`invalidate`](Self::invalidate) call for another key.
#[fx_plus(parent, no_new, default(off), sync, builder(vis(pub)))]
pub struct RelayCache<DC>
where
    DC: DataController,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required, into), get(clone))]
    data_controller: Arc<DC>,

    #[fieldx(vis(pub(crate)), builder(vis(pub), required), get(clone))]
    store: Arc<dyn DurableStore<DC>>,

    /// Time source for staleness checks and for the creation time of stored records.
    #[fieldx(vis(pub(crate)), builder(vis(pub)), get(clone), default(Arc::new(SystemClock) as Arc<dyn Clock>))]
    clock: Arc<dyn Clock>,

    /// How long a refreshed value stays fresh in the durable store.
    #[fieldx(get(vis(pub), copy), builder(vis(pub)), default(Duration::from_secs(60)))]
    max_age: Duration,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get(vis(pub)), builder(vis(pub), into), default(String::from("relay-cache")))]
    name: String,

    #[fieldx(lazy, get(clone), builder(off))]
    entries: Arc<EntryMap<DC>>,
}

impl<DC> RelayCache<DC>
where
    DC: DataController,
{
    // No capacity: entries leave the map only when nobody watches them.
    fn build_entries(&self) -> Arc<EntryMap<DC>> {
        Arc::new(Cache::builder().name(self.name()).build())
    }

    /// Subscribe to the value of `key`.
    ///
    /// `args` and `context` are only used if this read creates the entry; otherwise the ones captured by the first
    /// read are kept. The staleness check and a possible refresh run in a background task.
    #[instrument(level = "debug", skip(self, args, context), fields(cache = %self.name()))]
    pub async fn read(&self, key: DC::Key, args: DC::Args, context: DC::Context) -> EntrySubscription<DC> {
        let (entry, subscription) = self.get_or_create(key.clone(), args, context).await;

        self.sweep(Some(&key)).await;

        if entry.is_failed() {
            trace!("entry has failed, serving the error until it is collected");
        }
        else if let Some(myself) = self.myself() {
            tokio::spawn(async move { myself.resolve(entry).await });
        }
        else {
            warn!("cache object is gone, cannot schedule staleness check");
        }

        subscription
    }

    /// Force removal of the stored record for `key` and recompute its value if the entry is still in use.
    ///
    /// Returns the number of entries refreshed successfully.
    pub async fn invalidate(&self, key: &DC::Key) -> Result<usize, CacheError<DC::Error>> {
        self.invalidate_keys(Some(key)).await
    }

    /// Same as [`invalidate`](Self::invalidate) but for every key known to the cache.
    pub async fn invalidate_all(&self) -> Result<usize, CacheError<DC::Error>> {
        self.invalidate_keys(None).await
    }

    #[instrument(level = "debug", skip(self), fields(cache = %self.name()))]
    async fn invalidate_keys(&self, key: Option<&DC::Key>) -> Result<usize, CacheError<DC::Error>> {
        // Collect targets before sweeping so that records of collected entries are removed too.
        let targets = match key {
            Some(key) => vec![key.clone()],
            None => self.keys(),
        };

        self.sweep(None).await;

        if targets.is_empty() {
            return Ok(0);
        }

        self.store()
            .remove(&targets)
            .await
            .map_err(|source| CacheError::Remove { source })?;

        let mut refreshed = 0;
        for key in &targets {
            let Some(entry) = self.lookup(key).await
            else {
                trace!(%key, "entry is gone, the next read will recompute");
                continue;
            };

            let _refreshing = entry.lock_refresh().await;
            if entry.is_failed() {
                trace!(%key, "not refreshing a failed entry");
                continue;
            }
            if self.refresh_entry(&entry).await {
                refreshed += 1;
            }
        }

        debug!(targets = targets.len(), refreshed, "invalidation complete");
        Ok(refreshed)
    }

    pub async fn lookup(&self, key: &DC::Key) -> Option<Arc<CacheEntry<DC>>> {
        self.entries().get(key).await
    }

    /// Drop entries from memory regardless of their subscribers. Stored records are not touched.
    pub async fn remove(&self, keys: &[DC::Key]) {
        let entries = self.entries();
        for key in keys {
            entries.invalidate(key).await;
        }
    }

    pub fn keys(&self) -> Vec<DC::Key> {
        self.entries().iter().map(|(key, _)| DC::Key::clone(&key)).collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries().iter().count()
    }

    /// Drop every entry whose channel has no subscribers, except the one for `except`. Returns the number of entries
    /// dropped.
    #[instrument(level = "trace", skip(self), fields(cache = %self.name()))]
    pub async fn sweep(&self, except: Option<&DC::Key>) -> usize {
        let entries = self.entries();
        let idle: Vec<Arc<DC::Key>> = entries
            .iter()
            .filter(|(key, entry)| except != Some(&**key) && !entry.is_observed())
            .map(|(key, _)| key)
            .collect();

        let mut collected = 0;
        for key in idle {
            // Re-check under the key lock: a concurrent read may have subscribed in the meantime.
            let result = entries
                .entry(DC::Key::clone(&key))
                .and_compute_with(|current| {
                    ready(match current {
                        Some(current) if !current.value().is_observed() => Op::Remove,
                        _ => Op::Nop,
                    })
                })
                .await;

            if let CompResult::Removed(_) = result {
                trace!(key = %key, "collected unobserved entry");
                collected += 1;
            }
        }

        if collected > 0 {
            debug!(collected, "swept unobserved entries");
        }
        collected
    }

    pub async fn close(&self) {
        let keys = self.keys();
        debug!(cache = %self.name(), count = keys.len(), "closing");
        self.remove(&keys).await;
        self.entries().run_pending_tasks().await;
    }

    // Lookup and subscription happen under the entry's key lock, so a concurrent sweep can't drop the entry before
    // the new subscriber is registered.
    async fn get_or_create(
        &self,
        key: DC::Key,
        args: DC::Args,
        context: DC::Context,
    ) -> (Arc<CacheEntry<DC>>, EntrySubscription<DC>) {
        let mut outcome = None;

        let result = self
            .entries()
            .entry(key.clone())
            .and_compute_with(|existing| {
                let (entry, op) = match existing {
                    Some(existing) => (existing.into_value(), Op::Nop),
                    None => {
                        let entry = Arc::new(CacheEntry::new(key, args, context));
                        (Arc::clone(&entry), Op::Put(entry))
                    }
                };
                let subscription = entry.subscribe();
                outcome = Some((entry, subscription));
                ready(op)
            })
            .await;

        let Some((entry, subscription)) = outcome
        else {
            panic!("Entry computation produced nothing: {result:?}");
        };

        if let CompResult::Inserted(_) = result {
            debug!(key = %entry.key(), "created entry");
        }

        (entry, subscription)
    }

    #[instrument(level = "trace", skip(self, entry), fields(cache = %self.name(), key = %entry.key()))]
    async fn resolve(&self, entry: Arc<CacheEntry<DC>>) {
        // Someone else is already refreshing this entry; their result will reach our subscriber too.
        let Some(_refreshing) = entry.try_lock_refresh()
        else {
            trace!("refresh already in progress");
            return;
        };

        if entry.is_failed() {
            return;
        }

        if self.needs_refresh(&entry).await {
            self.refresh_entry(&entry).await;
        }
    }

    /// Decide whether the entry has to go through the producer. A fresh stored record is published directly if the
    /// entry has no value yet.
    pub(crate) async fn needs_refresh(&self, entry: &CacheEntry<DC>) -> bool {
        match self.store().get(entry.key()).await {
            Ok(Some(record)) => {
                if record.is_outdated(self.clock().now()) {
                    debug!(created_at = %record.created_at, "stored record is outdated");
                    true
                }
                else {
                    if !entry.is_initialized() {
                        debug!("serving stored record");
                        entry.publish(record.into_value());
                    }
                    false
                }
            }
            Ok(None) => {
                debug!("no stored record");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to read stored record, refreshing");
                true
            }
        }
    }

    /// Run the producer, persist its value, publish it. Any failure terminates the entry's channel.
    #[instrument(level = "debug", skip(self, entry), fields(cache = %self.name(), key = %entry.key()))]
    pub(crate) async fn refresh_entry(&self, entry: &CacheEntry<DC>) -> bool {
        match self.produce_and_persist(entry).await {
            Ok(value) => {
                entry.publish(value);
                trace!("published refreshed value");
                true
            }
            Err(err) => {
                error!(error = %err, "refresh failed");
                entry.fail(Arc::new(err));
                false
            }
        }
    }

    async fn produce_and_persist(&self, entry: &CacheEntry<DC>) -> Result<DC::Value, CacheError<DC::Error>> {
        let value = self
            .data_controller()
            .produce(entry.context(), entry.args())
            .await
            .map_err(|source| CacheError::Produce {
                key: entry.key().to_string(),
                source,
            })?;

        let record = StoredRecord::new(value.clone(), self.max_age(), self.clock().now());
        self.store()
            .store(entry.key(), record)
            .await
            .map_err(|source| CacheError::Persist {
                key: entry.key().to_string(),
                source,
            })?;

        Ok(value)
    }
}
