pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod manager;
pub mod source;
pub mod store;
pub mod warmer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    load_feeds, parse_feeds, AppConfig, CacheConfig, ExpiredPolicy, ServerConfig, StoreConfig,
};
pub use error::{ConfigError, FeedError, FetchError, ParseError, StoreError};
pub use feed::{parse_feed, FeedDescriptor, FeedEntry, ParsedFeed};
pub use manager::FeedCacheManager;
pub use source::{FeedSource, HttpSource};
pub use store::{CacheEntry, CacheStore, Freshness, MemoryStore, PutOutcome, RedisStore};
pub use warmer::{spawn_warmer, warm_once, WarmerHandle};
