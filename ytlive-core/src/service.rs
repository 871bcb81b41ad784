use serde::Serialize;
use tracing::info;

use crate::cache::CacheStore;
use crate::metadata::VideoRecord;
use crate::relay::{RelayEngine, StopHandle};
use crate::select::{select, SelectionRequest};

#[derive(Debug, Clone, Serialize)]
pub struct VideoPage {
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub records: Vec<VideoRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayOutcome {
    pub ok: bool,
    pub message: String,
}

/// Query surface consumed by the HTTP layer: paged reads straight from the
/// cache, and a synchronous relay call that returns only after every
/// selected video has been attempted.
pub struct RelayService {
    store: CacheStore,
    engine: RelayEngine,
}

impl RelayService {
    pub fn new(store: CacheStore, engine: RelayEngine) -> Self {
        Self { store, engine }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.engine.stop_handle()
    }

    /// Read one 1-based page from a freshly loaded snapshot; no live fetch.
    /// Ids still awaiting their metadata fetch count toward `total_count`
    /// but produce no record entry.
    pub fn list_page(&self, page: usize, page_size: usize) -> VideoPage {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let snapshot = self.store.load();
        let total_count = snapshot.ordered_ids.len();
        let records = snapshot
            .ordered_ids
            .iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .filter_map(|id| snapshot.records.get(id))
            .map(|record| {
                let mut record = record.clone();
                if record.thumbnail_url.is_empty() {
                    record.thumbnail_url = default_thumbnail(&record.id);
                }
                record
            })
            .collect();
        VideoPage {
            total_count,
            page,
            page_size,
            records,
        }
    }

    /// Resolve the selection against a fresh snapshot and drive the relay
    /// engine to completion.
    pub async fn relay(&self, request: &SelectionRequest) -> RelayOutcome {
        let snapshot = self.store.load();
        let selected = select(request, &snapshot);
        if selected.is_empty() {
            // a legitimate empty result, distinct from a failed run
            return RelayOutcome {
                ok: true,
                message: "no videos matched the selection".to_string(),
            };
        }
        info!(count = selected.len(), "starting relay run");
        match self.engine.run(&selected).await {
            Ok(report) => {
                let mut message = format!(
                    "relayed {} of {} videos ({} failed)",
                    report.done(),
                    selected.len(),
                    report.failed()
                );
                if report.interrupted {
                    message.push_str(", interrupted before completion");
                }
                RelayOutcome { ok: true, message }
            }
            Err(error) => RelayOutcome {
                ok: false,
                message: format!("relay run could not start: {error}"),
            },
        }
    }
}

fn default_thumbnail(id: &str) -> String {
    format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")
}
