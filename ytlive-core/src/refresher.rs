use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::enumerator::{EnumerationError, Enumerator};
use crate::metadata::MetadataFetcher;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStats {
    pub enumerated: usize,
    pub new_ids: usize,
    pub fetched: usize,
    pub failed_batches: usize,
}

/// Keeps the cache eventually consistent with the channel's actual uploads
/// while fetching metadata only for ids the cache has never seen.
pub struct CacheRefresher {
    enumerator: Arc<dyn Enumerator>,
    fetcher: Arc<dyn MetadataFetcher>,
    store: CacheStore,
    channel_url: String,
}

impl CacheRefresher {
    pub fn new(
        enumerator: Arc<dyn Enumerator>,
        fetcher: Arc<dyn MetadataFetcher>,
        store: CacheStore,
        channel_url: String,
    ) -> Self {
        Self {
            enumerator,
            fetcher,
            store,
            channel_url,
        }
    }

    /// One refresh cycle. An enumeration failure skips the whole cycle with
    /// no cache mutation; a failed metadata batch leaves its ids "new" for
    /// the next cycle. Each fetched record is persisted immediately, so an
    /// interrupt loses at most the in-flight fetch.
    pub async fn run_once(&self) -> std::result::Result<RefreshStats, RefreshError> {
        let ids = self.enumerator.list(&self.channel_url).await?;
        let mut snapshot = self.store.load();
        let new_ids: Vec<String> = ids
            .iter()
            .filter(|id| !snapshot.records.contains_key(*id))
            .cloned()
            .collect();
        let mut stats = RefreshStats {
            enumerated: ids.len(),
            new_ids: new_ids.len(),
            ..RefreshStats::default()
        };

        snapshot.ordered_ids = ids;
        for id in &new_ids {
            match self.fetcher.fetch(std::slice::from_ref(id)).await {
                Ok(records) => {
                    for record in records {
                        snapshot.records.insert(record.id.clone(), record);
                    }
                    stats.fetched += 1;
                    if let Err(error) = self.store.save(&snapshot) {
                        warn!(video = %id, %error, "failed to persist cache after new record");
                    } else {
                        info!(video = %id, "cached metadata for new video");
                    }
                }
                Err(error) => {
                    stats.failed_batches += 1;
                    warn!(video = %id, %error, "metadata fetch failed, id stays pending");
                }
            }
        }

        if let Err(error) = self.store.save(&snapshot) {
            warn!(%error, "failed to persist refreshed cache");
        }
        Ok(stats)
    }

    /// Supervised repeating schedule: first cycle runs immediately, then
    /// every `every`. A failed cycle is logged and never stops the next one.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(stats) => info!(
                        enumerated = stats.enumerated,
                        new = stats.new_ids,
                        fetched = stats.fetched,
                        failed = stats.failed_batches,
                        "cache refresh cycle finished"
                    ),
                    Err(error) => warn!(%error, "cache refresh cycle skipped"),
                }
            }
        })
    }
}
