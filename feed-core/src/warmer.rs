use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::feed::FeedDescriptor;
use crate::manager::FeedCacheManager;

/// Keeps configured feeds warm by reading them through the cache on a timer.
pub struct WarmerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl WarmerHandle {
    pub async fn stop(self) -> Result<(), JoinError> {
        let _ = self.cancel_tx.send(());
        self.join.await
    }
}

/// Starts the warmer. A zero interval disables it and returns `None`.
pub fn spawn_warmer(
    manager: FeedCacheManager,
    feeds: Vec<FeedDescriptor>,
    interval: Duration,
) -> Option<WarmerHandle> {
    if interval.is_zero() {
        debug!("warm interval is zero, warmer disabled");
        return None;
    }

    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("warmer shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    warm_once(&manager, &feeds).await;
                }
            }
        }
    });

    Some(WarmerHandle { cancel_tx, join })
}

/// Reads every feed once through the cache. Returns how many succeeded.
pub async fn warm_once(manager: &FeedCacheManager, feeds: &[FeedDescriptor]) -> usize {
    let mut ok = 0;
    for feed in feeds {
        match manager.get(&feed.url).await {
            Ok(parsed) => {
                debug!(feed = %feed.id, entries = parsed.entries.len(), "feed warm");
                ok += 1;
            }
            Err(err) => {
                warn!(feed = %feed.id, url = %feed.url, error = %err, "failed to warm feed");
            }
        }
    }
    ok
}
