//! Stale-while-revalidate cache in front of a `FeedSource`.
//!
//! Each entry is in one of three states relative to its windows:
//!
//! * fresh: served from the store, no network access;
//! * stale: served from the store immediately, and at most one background
//!   refresh per key is started to replace it;
//! * expired (or missing): re-fetched while the caller waits.
//!
//! The store is fail-open. Lookup errors count as misses and write errors are
//! logged, so an unreachable store degrades `get` to a direct fetch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, ExpiredPolicy};
use crate::error::{FeedError, FetchError};
use crate::feed::{parse_feed, ParsedFeed};
use crate::source::FeedSource;
use crate::store::{CacheEntry, CacheStore, Freshness, PutOutcome};

type LoadResult = Result<ParsedFeed, FeedError>;

#[derive(Clone)]
pub struct FeedCacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    source: Arc<dyn FeedSource>,
    clock: Arc<dyn Clock>,
    in_flight: DashMap<String, ()>,
    last_attempt: DashMap<String, DateTime<Utc>>,
    /// Blocking loads in progress; later callers wait for the leader's result.
    loads: DashMap<String, watch::Receiver<Option<LoadResult>>>,
    write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    refreshes: Mutex<JoinSet<()>>,
    shutdown_tx: watch::Sender<bool>,
}

enum LoadRole {
    Lead(watch::Sender<Option<LoadResult>>),
    Follow(watch::Receiver<Option<LoadResult>>),
}

/// Unregisters a leader's load, also when the leading caller is dropped.
struct LoadSlot<'a> {
    loads: &'a DashMap<String, watch::Receiver<Option<LoadResult>>>,
    url: &'a str,
}

impl Drop for LoadSlot<'_> {
    fn drop(&mut self) {
        self.loads.remove(self.url);
    }
}

impl FeedCacheManager {
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn FeedSource>,
    ) -> Self {
        Self::with_clock(config, store, source, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &CacheConfig,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn FeedSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                store,
                source,
                clock,
                in_flight: DashMap::new(),
                last_attempt: DashMap::new(),
                loads: DashMap::new(),
                write_locks: DashMap::new(),
                refreshes: Mutex::new(JoinSet::new()),
                shutdown_tx,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the parsed feed at `url`, fetching it if the cache cannot serve it.
    pub async fn get(&self, url: &str) -> Result<ParsedFeed, FeedError> {
        let now = self.inner.clock.now();
        let Some(entry) = self.inner.lookup(url).await else {
            debug!(url = %url, "cache miss");
            return self.inner.load(url).await;
        };

        match entry.freshness(now) {
            Freshness::Fresh => {
                debug!(url = %url, "fresh cache hit");
                self.serve_cached(url, &entry).await
            }
            Freshness::Stale => {
                debug!(url = %url, age = ?entry.age(now), "stale cache hit");
                match parse_feed(&entry.value) {
                    Ok(feed) => {
                        self.maybe_spawn_refresh(url, now);
                        Ok(feed)
                    }
                    Err(err) => {
                        warn!(url = %url, error = %err, "cached feed no longer parses, refetching");
                        self.inner.load(url).await
                    }
                }
            }
            Freshness::Expired => {
                debug!(url = %url, age = ?entry.age(now), "cache entry expired");
                match self.inner.load(url).await {
                    Ok(feed) => Ok(feed),
                    Err(err) if self.inner.config.expired_policy == ExpiredPolicy::ServeStale => {
                        match parse_feed(&entry.value) {
                            Ok(feed) => {
                                warn!(url = %url, error = %err, "refetch failed, serving expired entry");
                                Ok(feed)
                            }
                            Err(_) => Err(err),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Drops the cached entry for `url`. Store failures are logged, not returned.
    pub async fn invalidate(&self, url: &str) {
        let store_op = self.inner.store.invalidate(url);
        match tokio::time::timeout(self.inner.config.store_timeout, store_op).await {
            Ok(Ok(())) => debug!(url = %url, "cache entry invalidated"),
            Ok(Err(err)) => warn!(url = %url, error = %err, "failed to invalidate cache entry"),
            Err(_) => warn!(url = %url, "cache store timed out on invalidate"),
        }
    }

    pub fn in_flight(&self, url: &str) -> bool {
        self.inner.in_flight.contains_key(url)
    }

    pub fn refreshes_in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Per-key load and write bookkeeping currently held; zero when idle.
    pub fn tracked_keys(&self) -> usize {
        self.inner.loads.len() + self.inner.write_locks.len()
    }

    /// Abandons running background refreshes, refuses to start new ones and
    /// waits until every refresh task has finished.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let mut tasks = std::mem::take(&mut *self.inner.refresh_tasks());
        info!(
            in_flight = self.inner.in_flight.len(),
            "feed cache shutting down"
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "background refresh task failed");
            }
        }
    }

    async fn serve_cached(&self, url: &str, entry: &CacheEntry) -> Result<ParsedFeed, FeedError> {
        match parse_feed(&entry.value) {
            Ok(feed) => Ok(feed),
            Err(err) => {
                warn!(url = %url, error = %err, "cached feed no longer parses, refetching");
                self.inner.load(url).await
            }
        }
    }

    fn maybe_spawn_refresh(&self, url: &str, now: DateTime<Utc>) {
        // checked under the task lock so `shutdown` cannot miss a new task
        let mut tasks = self.inner.refresh_tasks();
        if *self.inner.shutdown_tx.borrow() {
            return;
        }

        if let Some(last) = self.inner.last_attempt.get(url) {
            let since = (now - *last).to_std().unwrap_or_default();
            if since < self.inner.config.refresh_period {
                debug!(url = %url, since = ?since, "refresh attempted recently, skipping");
                return;
            }
        }

        match self.inner.in_flight.entry(url.to_owned()) {
            Entry::Occupied(_) => {
                debug!(url = %url, "refresh already in flight");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let period = self.inner.config.refresh_period;
        self.inner
            .last_attempt
            .retain(|_, last| (now - *last).to_std().unwrap_or_default() < period);
        self.inner.last_attempt.insert(url.to_owned(), now);

        let inner = Arc::clone(&self.inner);
        let url = url.to_owned();
        let mut shutdown_rx = inner.shutdown_tx.subscribe();
        tasks.spawn(async move {
            tokio::select! {
                _ = async { let _ = shutdown_rx.wait_for(|stopped| *stopped).await; } => {
                    debug!(url = %url, "background refresh abandoned");
                }
                result = inner.fetch_and_store(&url) => match result {
                    Ok(_) => info!(url = %url, "background refresh complete"),
                    Err(err) => warn!(url = %url, error = %err, "background refresh failed, keeping stale entry"),
                }
            }
            inner.in_flight.remove(&url);
        });
        while tasks.try_join_next().is_some() {}
    }
}

impl Inner {
    fn refresh_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.refreshes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocking fetch for a missing or expired key.
    ///
    /// The first caller for a key leads the fetch; callers arriving while it
    /// runs wait for the leader's result instead of fetching again, so every
    /// caller is bounded by the one fetch timeout.
    async fn load(&self, url: &str) -> LoadResult {
        loop {
            match self.join_or_lead(url) {
                LoadRole::Lead(done_tx) => {
                    let slot = LoadSlot {
                        loads: &self.loads,
                        url,
                    };
                    let result = self.reload(url).await;
                    drop(slot);
                    done_tx.send_replace(Some(result.clone()));
                    return result;
                }
                LoadRole::Follow(mut done_rx) => {
                    let outcome = done_rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|done| (*done).clone());
                    match outcome {
                        Some(result) => {
                            debug!(url = %url, "joined a concurrent fetch");
                            return result;
                        }
                        // the leading caller was dropped before finishing
                        None => debug!(url = %url, "concurrent fetch abandoned, retrying"),
                    }
                }
            }
        }
    }

    fn join_or_lead(&self, url: &str) -> LoadRole {
        match self.loads.entry(url.to_owned()) {
            Entry::Occupied(load) => LoadRole::Follow(load.get().clone()),
            Entry::Vacant(slot) => {
                let (done_tx, done_rx) = watch::channel(None);
                slot.insert(done_rx);
                LoadRole::Lead(done_tx)
            }
        }
    }

    async fn reload(&self, url: &str) -> LoadResult {
        if let Some(entry) = self.lookup(url).await {
            if entry.freshness(self.clock.now()) == Freshness::Fresh {
                if let Ok(feed) = parse_feed(&entry.value) {
                    debug!(url = %url, "filled by a concurrent fetch");
                    return Ok(feed);
                }
            }
        }
        self.fetch_and_store(url).await
    }

    async fn lookup(&self, url: &str) -> Option<CacheEntry> {
        match tokio::time::timeout(self.config.store_timeout, self.store.lookup(url)).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(err)) => {
                warn!(url = %url, error = %err, "cache lookup failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(url = %url, "cache lookup timed out, treating as miss");
                None
            }
        }
    }

    /// Fetches, parses and stores. Nothing is written unless both steps succeed.
    async fn fetch_and_store(&self, url: &str) -> Result<ParsedFeed, FeedError> {
        let started_at = self.clock.now();
        let body = self.fetch(url).await?;
        let feed = parse_feed(&body)?;

        let entry = CacheEntry {
            value: body,
            stored_at: started_at,
            cache_window: self.config.cache_window,
            valid_window: self.config.valid_window,
        };
        self.commit(url, entry).await;
        Ok(feed)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, FeedError> {
        let limit = self.config.fetch_timeout;
        match tokio::time::timeout(limit, self.source.fetch(url)).await {
            Ok(result) => result.map_err(FeedError::from),
            Err(_) => Err(FetchError::Timeout(limit).into()),
        }
    }

    async fn commit(&self, url: &str, entry: CacheEntry) {
        let lock = self
            .write_locks
            .entry(url.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        {
            let _guard = lock.lock().await;
            let stored_at = entry.stored_at;
            let put = self.store.put(url, entry);
            match tokio::time::timeout(self.config.store_timeout, put).await {
                Ok(Ok(PutOutcome::Written)) => debug!(url = %url, %stored_at, "cache entry stored"),
                Ok(Ok(PutOutcome::Discarded)) => {
                    debug!(url = %url, %stored_at, "newer cache entry present, write discarded")
                }
                Ok(Err(err)) => warn!(url = %url, error = %err, "failed to store cache entry"),
                Err(_) => warn!(url = %url, "cache store timed out on write"),
            }
        }
        drop(lock);
        self.write_locks
            .remove_if(url, |_, lock| Arc::strong_count(lock) == 1);
    }
}
