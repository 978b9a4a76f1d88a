//! Incremental search controller: debounced, generation-tagged, cached,
//! paginated queries over one record-store collection.
//!
//! The full collection is fetched at most once per session; filtering and
//! paging happen client-side against that cached copy. Staleness is decided
//! by a monotonically increasing generation counter compared at every
//! suspension point, so the most recently issued fetch always wins
//! regardless of completion order.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use shared::domain::{MatchRange, OptionId, OptionItem};
use store::RecordStore;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

const DEFAULT_FETCH_DELAY: Duration = Duration::from_millis(600);
const DEFAULT_FETCH_MORE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum SearchError {
    /// The fetch was superseded by a newer one (or by `stop`). Not a
    /// user-visible error; callers drop the result silently.
    #[error("fetch superseded by a newer request")]
    Canceled,
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl SearchError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<store::StoreError> for SearchError {
    fn from(err: store::StoreError) -> Self {
        Self::Source(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Debounce for a fresh filter.
    pub fetch_delay: Duration,
    /// Shorter debounce used when paginating an existing filter.
    pub fetch_more_delay: Duration,
    pub page_size: usize,
    /// Record field the prefix match runs against.
    pub title_field: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            fetch_delay: DEFAULT_FETCH_DELAY,
            fetch_more_delay: DEFAULT_FETCH_MORE_DELAY,
            page_size: DEFAULT_PAGE_SIZE,
            title_field: "title".to_string(),
        }
    }
}

/// Mutable cursor state of one search session. Owned exclusively by the
/// controller; no cross-session sharing.
struct SessionInner {
    /// Strictly increases with every `fetch` and `stop`.
    generation: u64,
    /// A fetch is outstanding (its timer has not paid off yet).
    pending: bool,
    /// Accumulated debounce for the outstanding fetch. Keystrokes arriving
    /// while a fetch is pending lengthen the wait additively.
    pending_delay: Duration,
    filter: String,
    first_index: usize,
    last_index: usize,
    /// Options accumulated from previous pages of the current filter.
    previous_pages: Vec<OptionItem>,
    /// Currently visible option list (previous pages + current page).
    visible: Vec<OptionItem>,
}

impl SessionInner {
    fn reset_window(&mut self, page_size: usize) {
        self.first_index = 0;
        self.last_index = page_size;
        self.previous_pages.clear();
        self.visible.clear();
    }
}

pub struct SearchController {
    source: Arc<dyn RecordStore>,
    collection: String,
    options: SearchOptions,
    /// Full collection snapshot, fetched at most once per session.
    dataset: OnceCell<Arc<Vec<Value>>>,
    inner: Mutex<SessionInner>,
}

impl SearchController {
    pub fn new(source: Arc<dyn RecordStore>, collection: impl Into<String>) -> Self {
        Self::with_options(source, collection, SearchOptions::default())
    }

    pub fn with_options(
        source: Arc<dyn RecordStore>,
        collection: impl Into<String>,
        options: SearchOptions,
    ) -> Self {
        let page_size = options.page_size;
        Self {
            source,
            collection: collection.into(),
            options,
            dataset: OnceCell::new(),
            inner: Mutex::new(SessionInner {
                generation: 0,
                pending: false,
                pending_delay: Duration::ZERO,
                filter: String::new(),
                first_index: 0,
                last_index: page_size,
                previous_pages: Vec::new(),
                visible: Vec::new(),
            }),
        }
    }

    /// Sole entry point for "first query" and "query changed". Returns the
    /// new visible option list, or `Canceled` when a later call superseded
    /// this one before it landed.
    pub async fn fetch(&self, filter: &str) -> Result<Vec<OptionItem>, SearchError> {
        self.fetch_with_delay(filter, self.options.fetch_delay).await
    }

    pub async fn fetch_with_delay(
        &self,
        filter: &str,
        delay: Duration,
    ) -> Result<Vec<OptionItem>, SearchError> {
        let (generation, wait) = {
            let mut inner = self.inner.lock().await;
            // Filter recorded before the timer starts: a rapid second call
            // with the same filter is pagination, not a filter change.
            if inner.visible.is_empty() || inner.filter != filter {
                inner.reset_window(self.options.page_size);
            }
            inner.filter = filter.to_string();
            if inner.pending {
                inner.pending_delay += delay;
            } else {
                inner.pending_delay = delay;
            }
            inner.pending = true;
            inner.generation += 1;
            (inner.generation, inner.pending_delay)
        };

        tokio::time::sleep(wait).await;

        // Timer paid off; bail out before any network work if superseded.
        {
            let inner = self.inner.lock().await;
            if inner.generation != generation {
                debug!(generation, "debounced fetch superseded before firing");
                return Err(SearchError::Canceled);
            }
        }

        let dataset = match self.dataset().await {
            Ok(dataset) => dataset,
            Err(err) => {
                // A failed fetch must not leave the session looking
                // in-flight, or later calls keep lengthening the stale
                // debounce accumulator.
                let mut inner = self.inner.lock().await;
                if inner.generation == generation {
                    inner.pending = false;
                    inner.pending_delay = Duration::ZERO;
                }
                return Err(err);
            }
        };

        let mut inner = self.inner.lock().await;
        // The dataset fetch is a suspension point too; re-check.
        if inner.generation != generation {
            debug!(generation, "fetch result arrived stale; dropping");
            return Err(SearchError::Canceled);
        }
        inner.pending = false;

        let page = page_options(
            &dataset,
            &self.options.title_field,
            &inner.filter,
            inner.first_index,
            inner.last_index,
        );
        let mut visible = inner.previous_pages.clone();
        visible.extend(page);
        inner.visible = visible.clone();
        debug!(
            filter = %inner.filter,
            visible = visible.len(),
            "search page resolved"
        );
        Ok(visible)
    }

    /// Advances the page window by one page and re-issues the fetch with the
    /// shorter pagination delay, preserving the current filter.
    pub async fn fetch_more(&self) -> Result<Vec<OptionItem>, SearchError> {
        let filter = {
            let mut inner = self.inner.lock().await;
            let page_size = self.options.page_size;
            inner.previous_pages = inner.visible.clone();
            inner.first_index += page_size;
            inner.last_index += page_size;
            inner.filter.clone()
        };
        self.fetch_with_delay(&filter, self.options.fetch_more_delay)
            .await
    }

    /// Resets the page window and visible caches to their initial state.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.reset_window(self.options.page_size);
    }

    /// Cancels any outstanding debounce timer or in-flight fetch. Cached
    /// state (dataset, visible list) is left untouched.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.pending = false;
        inner.pending_delay = Duration::ZERO;
    }

    /// Looks a single record up by id in the cached dataset.
    pub async fn get_option(&self, id: OptionId) -> Option<OptionItem> {
        let dataset = self.dataset.get()?;
        dataset.iter().enumerate().find_map(|(index, record)| {
            let item = option_from_record(record, index, &self.options.title_field)?;
            (item.id == id).then_some(item)
        })
    }

    /// Resolves already-selected ids against the cached dataset.
    pub async fn get_selected_options(&self, ids: &[OptionId]) -> Vec<OptionItem> {
        let Some(dataset) = self.dataset.get() else {
            return Vec::new();
        };
        dataset
            .iter()
            .enumerate()
            .filter_map(|(index, record)| option_from_record(record, index, &self.options.title_field))
            .filter(|item| ids.contains(&item.id))
            .collect()
    }

    /// Number of options currently visible (all pages fetched so far).
    pub async fn get_current_count(&self) -> usize {
        self.inner.lock().await.visible.len()
    }

    /// Total number of records matching the current filter, from the cached
    /// dataset. Zero until the first fetch has landed.
    pub async fn get_full_count(&self) -> usize {
        let Some(dataset) = self.dataset.get() else {
            return 0;
        };
        let inner = self.inner.lock().await;
        filtered_indices(dataset, &self.options.title_field, &inner.filter).len()
    }

    async fn dataset(&self) -> Result<Arc<Vec<Value>>, SearchError> {
        let dataset = self
            .dataset
            .get_or_try_init(|| async {
                debug!(collection = %self.collection, "fetching full dataset");
                let records = self.source.fetch_collection(&self.collection).await?;
                Ok::<_, SearchError>(Arc::new(records))
            })
            .await?;
        Ok(Arc::clone(dataset))
    }
}

/// Indices of records whose title starts with the filter, case-insensitive.
/// An empty filter matches every record.
fn filtered_indices(dataset: &[Value], title_field: &str, filter: &str) -> Vec<usize> {
    if filter.is_empty() {
        return (0..dataset.len()).collect();
    }
    let needle = filter.to_lowercase();
    dataset
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let title = record.get(title_field)?.as_str()?;
            title.to_lowercase().starts_with(&needle).then_some(index)
        })
        .collect()
}

fn page_options(
    dataset: &[Value],
    title_field: &str,
    filter: &str,
    first_index: usize,
    last_index: usize,
) -> Vec<OptionItem> {
    let matches = filtered_indices(dataset, title_field, filter);
    let slice_end = last_index.min(matches.len());
    let slice_start = first_index.min(slice_end);
    matches[slice_start..slice_end]
        .iter()
        .filter_map(|&index| {
            let mut item = option_from_record(&dataset[index], index, title_field)?;
            if !filter.is_empty() {
                item.match_ranges = Some(vec![MatchRange {
                    start: 0,
                    end: filter.chars().count(),
                }]);
            }
            Some(item)
        })
        .collect()
}

/// Maps a raw store record to an option. Records carry at least an
/// identifier and a title; anything else lands in the attribute bag.
fn option_from_record(record: &Value, index: usize, title_field: &str) -> Option<OptionItem> {
    let object = record.as_object()?;
    let title = object.get(title_field)?.as_str()?.to_string();
    let id = match object.get("id").and_then(Value::as_i64) {
        Some(id) => OptionId(id),
        None => {
            warn!(index, "record has no numeric id; using position");
            OptionId(index as i64)
        }
    };
    let attributes = object
        .iter()
        .filter(|(key, _)| key.as_str() != "id" && key.as_str() != title_field)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Some(OptionItem {
        id,
        title,
        attributes,
        match_ranges: None,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
