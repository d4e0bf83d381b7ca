#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use feed_core::{
    CacheConfig, CacheEntry, CacheStore, ExpiredPolicy, FeedCacheManager, FeedSource, FetchError,
    PutOutcome, StoreError,
};
use tokio::sync::Semaphore;

pub const URL: &str = "http://feeds.example.lu/news.xml";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 21, 7, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

pub fn rss(title: &str) -> Bytes {
    Bytes::from(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>{title}</title>
    <link>http://feeds.example.lu/</link>
    <description>test</description>
    <item>
      <title>{title} item</title>
      <link>http://feeds.example.lu/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First</description>
    </item>
  </channel>
</rss>"#
    ))
}

pub fn config() -> CacheConfig {
    CacheConfig {
        cache_window: Duration::from_secs(900),
        valid_window: Duration::from_secs(86_400),
        refresh_period: Duration::from_secs(300),
        fetch_timeout: Duration::from_secs(30),
        store_timeout: Duration::from_millis(200),
        expired_policy: ExpiredPolicy::Fail,
    }
}

pub fn entry(body: Bytes, stored_at: DateTime<Utc>) -> CacheEntry {
    let config = config();
    CacheEntry {
        value: body,
        stored_at,
        cache_window: config.cache_window,
        valid_window: config.valid_window,
    }
}

/// In-memory source whose body and failure mode can be changed between calls.
pub struct ScriptedSource {
    body: Mutex<Bytes>,
    failing: AtomicBool,
    calls: AtomicUsize,
    gate: Semaphore,
}

impl ScriptedSource {
    pub fn new(body: Bytes) -> Self {
        Self {
            body: Mutex::new(body),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    /// Fetches block until `open_gate` is called.
    pub fn gated(body: Bytes) -> Self {
        Self {
            gate: Semaphore::new(0),
            ..Self::new(body)
        }
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1024);
    }

    pub fn set_body(&self, body: Bytes) {
        *self.body.lock().unwrap() = body;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.expect("gate closed");
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: 503,
            });
        }
        Ok(self.body.lock().unwrap().clone())
    }
}

/// Store that is always down.
pub struct DownStore;

#[async_trait]
impl CacheStore for DownStore {
    async fn lookup(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn put(&self, _key: &str, _entry: CacheEntry) -> Result<PutOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn invalidate(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Store whose calls never complete.
pub struct HangingStore;

#[async_trait]
impl CacheStore for HangingStore {
    async fn lookup(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        std::future::pending().await
    }

    async fn put(&self, _key: &str, _entry: CacheEntry) -> Result<PutOutcome, StoreError> {
        std::future::pending().await
    }

    async fn invalidate(&self, _key: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }
}

/// Waits until no background refresh is running.
pub async fn wait_for_refreshes(manager: &FeedCacheManager) {
    for _ in 0..500 {
        if manager.refreshes_in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background refresh did not finish");
}
