use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Error)]
#[error("feed parsing error: {0}")]
pub struct ParseError(pub String);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Errors surfaced by `FeedCacheManager::get`.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(FetchError),
    #[error("feed fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(Arc::new(err))
    }
}

impl From<FetchError> for FeedError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout(limit) => FeedError::Timeout(limit),
            other => FeedError::Fetch(other),
        }
    }
}

impl FeedError {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Fetch(_) => "fetch error",
            FeedError::Timeout(_) => "timeout",
            FeedError::Parse(_) => "parse error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("cache window ({cache:?}) must not exceed valid window ({valid:?})")]
    WindowOrder { cache: Duration, valid: Duration },
    #[error("failed to read feeds file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed feeds file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
