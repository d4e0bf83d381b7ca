use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, StoreError};
use crate::feed::FeedDescriptor;

/// What `get` does when an expired entry cannot be re-fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiredPolicy {
    /// Propagate the fetch error.
    #[default]
    Fail,
    /// Fall back to the expired entry.
    ServeStale,
}

impl FromStr for ExpiredPolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(ExpiredPolicy::Fail),
            "serve-stale" | "serve_stale" => Ok(ExpiredPolicy::ServeStale),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries younger than this are served without network access.
    pub cache_window: Duration,
    /// Entries at least this old need a blocking re-fetch.
    pub valid_window: Duration,
    /// Minimum spacing between background refresh attempts for one key.
    pub refresh_period: Duration,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub expired_policy: ExpiredPolicy,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub compress: bool,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Zero disables the warmer.
    pub warm_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub store: Option<StoreConfig>,
    pub server: ServerConfig,
    pub feeds_file: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_window: Duration::from_secs(900),
            valid_window: Duration::from_secs(86_400),
            refresh_period: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(2),
            expired_policy: ExpiredPolicy::Fail,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4567".to_owned(),
            warm_interval: Duration::ZERO,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            store: None,
            server: ServerConfig::default(),
            feeds_file: PathBuf::from("feeds.yml"),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_window > self.valid_window {
            return Err(ConfigError::WindowOrder {
                cache: self.cache_window,
                valid: self.valid_window,
            });
        }
        Ok(())
    }
}

impl StoreConfig {
    /// The configured URL with credentials filled in.
    pub fn connection_url(&self) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| StoreError::Unavailable(format!("invalid store url: {e}")))?;
        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|_| StoreError::Unavailable("store url cannot carry a username".into()))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password.as_str()))
                .map_err(|_| StoreError::Unavailable("store url cannot carry a password".into()))?;
        }
        Ok(url)
    }

    /// The URL without any password, for logs.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                let _ = url.set_password(None);
                url.to_string()
            }
            Err(_) => self.url.clone(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidValue {
                        key: key.to_owned(),
                        value,
                    }),
                None => Ok(default),
            }
        };

        let flag = |key: &str, default: bool| -> Result<bool, ConfigError> {
            match get(key) {
                Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Ok(true),
                    "0" | "false" | "no" | "off" => Ok(false),
                    _ => Err(ConfigError::InvalidValue {
                        key: key.to_owned(),
                        value,
                    }),
                },
                None => Ok(default),
            }
        };

        let expired_policy = match get("CACHE_EXPIRED_POLICY") {
            Some(value) => value.parse::<ExpiredPolicy>().map_err(|_| ConfigError::InvalidValue {
                key: "CACHE_EXPIRED_POLICY".to_owned(),
                value,
            })?,
            None => defaults.cache.expired_policy,
        };

        let cache = CacheConfig {
            cache_window: secs("CACHE_TIME", defaults.cache.cache_window)?,
            valid_window: secs("CACHE_EXPIRY", defaults.cache.valid_window)?,
            refresh_period: secs("CACHE_FREQUENCY", defaults.cache.refresh_period)?,
            fetch_timeout: secs("CACHE_TIMEOUT", defaults.cache.fetch_timeout)?,
            store_timeout: secs("STORE_TIMEOUT", defaults.cache.store_timeout)?,
            expired_policy,
        };
        cache.validate()?;

        let store = match get("REDIS_URL") {
            Some(url) => Some(StoreConfig {
                url,
                username: get("REDIS_USERNAME"),
                password: get("REDIS_PASSWORD"),
                compress: flag("REDIS_COMPRESS", true)?,
                ttl: secs("REDIS_TTL", Duration::from_secs(86_400))?,
            }),
            None => None,
        };

        let server = ServerConfig {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.server.bind_addr),
            warm_interval: secs("WARM_INTERVAL", defaults.server.warm_interval)?,
        };

        Ok(Self {
            cache,
            store,
            server,
            feeds_file: get("FEEDS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.feeds_file),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FeedSettings {
    url: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedsFile {
    #[serde(default)]
    feeds: serde_yaml::Mapping,
}

/// Parses a feeds document, keeping the order in which feeds are written.
pub fn parse_feeds(source: &str) -> Result<Vec<FeedDescriptor>, ConfigError> {
    let file: FeedsFile = serde_yaml::from_str(source)?;
    let mut feeds = Vec::with_capacity(file.feeds.len());
    for (key, value) in file.feeds {
        let id = match key {
            serde_yaml::Value::String(id) => id,
            other => serde_yaml::to_string(&other)?.trim().to_owned(),
        };
        let settings: FeedSettings = serde_yaml::from_value(value)?;
        feeds.push(FeedDescriptor {
            id,
            url: settings.url,
            title: settings.title,
        });
    }
    Ok(feeds)
}

pub fn load_feeds(path: impl AsRef<Path>) -> Result<Vec<FeedDescriptor>, ConfigError> {
    let source = std::fs::read_to_string(path)?;
    parse_feeds(&source)
}
