use chrono::NaiveDate;

use crate::cache::CacheSnapshot;

/// Structural prefix shared by channel identifiers. A channel-shaped id is
/// never a downloadable video and is dropped wherever ids are consumed.
const CHANNEL_ID_PREFIX: &str = "UC";

pub fn is_channel_ref(id: &str) -> bool {
    id.starts_with(CHANNEL_ID_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionRequest {
    /// The newest `n` ids in enumeration order.
    Latest(usize),
    /// Ids whose cached upload date falls within the inclusive bounds.
    DateRange {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    /// A caller-supplied id list, passed through after filtering.
    Explicit(Vec<String>),
}

/// Turn a request into a concrete ordered id list. Pure; an empty result is
/// a legitimate outcome the caller surfaces, not an error.
pub fn select(request: &SelectionRequest, snapshot: &CacheSnapshot) -> Vec<String> {
    match request {
        SelectionRequest::Latest(count) => snapshot
            .ordered_ids
            .iter()
            .filter(|id| !is_channel_ref(id))
            .take(*count)
            .cloned()
            .collect(),
        SelectionRequest::DateRange { from, to } => snapshot
            .ordered_ids
            .iter()
            .filter(|id| !is_channel_ref(id))
            .filter(|id| {
                // ids without a resolved record cannot be date-matched
                snapshot
                    .records
                    .get(*id)
                    .and_then(|record| record.upload_date)
                    .map(|date| {
                        from.map_or(true, |lower| date >= lower)
                            && to.map_or(true, |upper| date <= upper)
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect(),
        SelectionRequest::Explicit(ids) => ids
            .iter()
            .filter(|id| !id.is_empty() && !is_channel_ref(id))
            .cloned()
            .collect(),
    }
}
