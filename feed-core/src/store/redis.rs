use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{CacheEntry, CacheStore, PutOutcome};
use crate::config::StoreConfig;
use crate::error::StoreError;

const KEY_PREFIX: &str = "feed";

/// Serialized form of a `CacheEntry` as kept in Redis.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    stored_at: DateTime<Utc>,
    cache_window_secs: u64,
    valid_window_secs: u64,
    compressed: bool,
    body: String,
}

/// Redis-backed store shared between processes.
///
/// The connection is opened on first use and kept by a `ConnectionManager`,
/// which reconnects on its own. Until a connection succeeds every call fails
/// with `StoreError::Unavailable`.
pub struct RedisStore {
    client: ::redis::Client,
    conn: OnceCell<ConnectionManager>,
    ttl_secs: u64,
    compress: bool,
    redis_url: String,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("redis_url", &self.redis_url)
            .field("ttl_secs", &self.ttl_secs)
            .field("compress", &self.compress)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisStore {
    /// Builds the client without touching the network.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config.connection_url()?;
        let client = ::redis::Client::open(url.as_str())?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            ttl_secs: config.ttl.as_secs().max(1),
            compress: config.compress,
            redis_url: config.redacted_url(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!(redis_url = %self.redis_url, "connected to redis cache store");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(conn.clone())
    }

    fn key(url: &str) -> String {
        format!("{KEY_PREFIX}:{url}")
    }

    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, StoreError> {
        let body = if self.compress {
            gzip(&entry.value)?
        } else {
            entry.value.to_vec()
        };
        let envelope = Envelope {
            stored_at: entry.stored_at,
            cache_window_secs: entry.cache_window.as_secs(),
            valid_window_secs: entry.valid_window.as_secs(),
            compressed: self.compress,
            body: STANDARD.encode(body),
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| StoreError::Unavailable(format!("failed to encode entry: {e}")))
    }

    fn decode(raw: &[u8]) -> Result<CacheEntry, String> {
        let envelope: Envelope = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
        let body = STANDARD.decode(envelope.body).map_err(|e| e.to_string())?;
        let value = if envelope.compressed {
            gunzip(&body).map_err(|e| e.to_string())?
        } else {
            body
        };
        Ok(CacheEntry {
            value: Bytes::from(value),
            stored_at: envelope.stored_at,
            cache_window: Duration::from_secs(envelope.cache_window_secs),
            valid_window: Duration::from_secs(envelope.valid_window_secs),
        })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<Vec<u8>> = conn.get(Self::key(key)).await?;
        match raw {
            Some(raw) => match Self::decode(&raw) {
                Ok(entry) => Ok(Some(entry)),
                Err(err) => {
                    warn!(url = %key, error = %err, "discarding undecodable cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<PutOutcome, StoreError> {
        if let Some(current) = self.lookup(key).await? {
            if current.stored_at > entry.stored_at {
                debug!(url = %key, "redis holds a newer entry, dropping write");
                return Ok(PutOutcome::Discarded);
            }
        }
        let payload = self.encode(&entry)?;
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(Self::key(key), payload, self.ttl_secs)
            .await?;
        Ok(PutOutcome::Written)
    }

    async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(Self::key(key)).await?;
        Ok(())
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StoreError::Unavailable(format!("gzip write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| StoreError::Unavailable(format!("gzip finish failed: {e}")))
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output)?;
    Ok(output)
}
