//! Page Cache
//!
//! Position-indexed state of the current view, shared by the caller thread
//! and the workers:
//!
//! - `row position → record` for hydrated pages
//! - `record id → row position` (reverse index)
//! - `page key → queued | fetching | fetched`
//! - the ordered id list, once the resolver built it
//!
//! The sort/filter spec and the generation counter live under the same lock.
//! A worker checks the generation and writes its result while holding the
//! write lock, so nothing computed against an old spec can land after
//! [`PageCache::update_spec`] or [`PageCache::invalidate`].

use std::sync::Arc;

use ahash::AHashMap;
use hashlink::LinkedHashMap;
use parking_lot::RwLock;

use crate::domain::{PageKey, RecordId, RowPosition, TourRecord};
use crate::query::SortFilterSpec;
use crate::store::PageRow;

/// Load state of one page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PageState {
    #[default]
    Unrequested,
    Queued,
    Fetching,
    Fetched,
}

/// Spec and generation a job was issued against
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub generation: u64,
    pub spec: Arc<SortFilterSpec>,
}

#[derive(Default)]
struct ViewState {
    generation: u64,
    spec: Arc<SortFilterSpec>,
    records: AHashMap<RowPosition, Arc<TourRecord>>,
    positions: AHashMap<RecordId, RowPosition>,
    pages: AHashMap<PageKey, PageState>,
    ordered_ids: Option<Arc<[RecordId]>>,
}

impl ViewState {
    fn clear_positions(&mut self) {
        self.records.clear();
        self.positions.clear();
        self.pages.clear();
        self.ordered_ids = None;
    }
}

/// Shared position-indexed caches
pub struct PageCache {
    state: RwLock<ViewState>,
}

impl PageCache {
    pub fn new(spec: SortFilterSpec) -> Self {
        Self {
            state: RwLock::new(ViewState {
                spec: Arc::new(spec),
                ..ViewState::default()
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            generation: state.generation,
            spec: state.spec.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn spec(&self) -> Arc<SortFilterSpec> {
        self.state.read().spec.clone()
    }

    // ==================== Lookups ====================

    pub fn record(&self, position: RowPosition) -> Option<Arc<TourRecord>> {
        self.state.read().records.get(&position).cloned()
    }

    pub fn position(&self, id: RecordId) -> Option<RowPosition> {
        self.state.read().positions.get(&id).copied()
    }

    pub fn page_state(&self, page: PageKey) -> PageState {
        self.state
            .read()
            .pages
            .get(&page)
            .copied()
            .unwrap_or_default()
    }

    /// Id at a position, from the id list or a hydrated page
    pub fn record_id_at(&self, position: RowPosition) -> Option<RecordId> {
        let state = self.state.read();
        if let Some(ids) = &state.ordered_ids {
            return ids.get(position).copied();
        }
        state.records.get(&position).map(|r| r.id)
    }

    pub fn has_id_list(&self) -> bool {
        self.state.read().ordered_ids.is_some()
    }

    /// Positions of `ids` under `generation`, in request order
    ///
    /// `None` if the generation moved on or the id list is not built yet.
    pub fn positions_for(&self, generation: u64, ids: &[RecordId]) -> Option<Vec<RowPosition>> {
        let state = self.state.read();
        if state.generation != generation || state.ordered_ids.is_none() {
            return None;
        }
        Some(
            ids.iter()
                .filter_map(|id| state.positions.get(id).copied())
                .collect(),
        )
    }

    // ==================== Page transitions ====================

    /// `unrequested → queued`
    ///
    /// Returns the snapshot the job must carry, or `None` when the page
    /// already has a live job or was fetched.
    pub fn try_reserve(&self, page: PageKey) -> Option<Snapshot> {
        let mut state = self.state.write();
        if state.pages.contains_key(&page) {
            return None;
        }
        state.pages.insert(page, PageState::Queued);
        Some(Snapshot {
            generation: state.generation,
            spec: state.spec.clone(),
        })
    }

    /// `queued → fetching`; false for a job whose generation is gone
    pub fn begin_fetch(&self, page: PageKey, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.generation != generation {
            return false;
        }
        match state.pages.get_mut(&page) {
            Some(s @ PageState::Queued) => {
                *s = PageState::Fetching;
                true
            }
            _ => false,
        }
    }

    /// `queued | fetching → unrequested`, so the next access retries
    pub fn release(&self, page: PageKey, generation: u64) {
        let mut state = self.state.write();
        if state.generation != generation {
            return;
        }
        if matches!(
            state.pages.get(&page),
            Some(PageState::Queued | PageState::Fetching)
        ) {
            state.pages.remove(&page);
        }
    }

    /// `fetching → fetched`, storing records from `first_position` on
    ///
    /// Returns false (and stores nothing) if `generation` is stale.
    pub fn apply_page(
        &self,
        page: PageKey,
        generation: u64,
        first_position: RowPosition,
        records: Vec<TourRecord>,
    ) -> bool {
        let mut state = self.state.write();
        if state.generation != generation {
            return false;
        }

        for (offset, record) in records.into_iter().enumerate() {
            let position = first_position + offset;
            state.positions.insert(record.id, position);
            state.records.insert(position, Arc::new(record));
        }
        state.pages.insert(page, PageState::Fetched);
        true
    }

    /// Store the ordered id list and index every id in it
    ///
    /// Returns false if `generation` is stale.
    pub fn apply_id_list(&self, generation: u64, ids: Vec<RecordId>) -> bool {
        let mut state = self.state.write();
        if state.generation != generation {
            return false;
        }

        let mut previous = None;
        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            // DISTINCT over id + sort columns still yields one row per id, but
            // a store may hand back adjacent duplicates
            if previous == Some(id) {
                continue;
            }
            previous = Some(id);
            state.positions.insert(id, ordered.len());
            ordered.push(id);
        }
        state.ordered_ids = Some(ordered.into());
        true
    }

    // ==================== Generation ====================

    /// Derive a new spec from the current one, bump the generation and drop
    /// all positional state
    ///
    /// Runs under the write lock, so concurrent updates never overwrite each
    /// other. Returns the previous spec and the new generation.
    pub fn update_spec<F>(&self, update: F) -> (Arc<SortFilterSpec>, u64)
    where
        F: FnOnce(&SortFilterSpec) -> SortFilterSpec,
    {
        let mut state = self.state.write();
        let next = Arc::new(update(&state.spec));
        let previous = std::mem::replace(&mut state.spec, next);
        state.generation += 1;
        state.clear_positions();
        (previous, state.generation)
    }

    /// Bump the generation and drop all positional state
    pub fn invalidate(&self) -> u64 {
        let mut state = self.state.write();
        state.generation += 1;
        state.clear_positions();
        state.generation
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("PageCache")
            .field("generation", &state.generation)
            .field("records", &state.records.len())
            .field("pages", &state.pages.len())
            .field("id_list", &state.ordered_ids.as_ref().map(|ids| ids.len()))
            .finish()
    }
}

/// Fold joined page rows into one record per id
///
/// The first row of an id seeds the scalar fields; later rows only add to
/// the tag and marker collections. Records keep first-appearance order.
pub fn hydrate(rows: Vec<PageRow>) -> Vec<TourRecord> {
    let mut records: LinkedHashMap<RecordId, TourRecord> = LinkedHashMap::new();

    for row in rows {
        let PageRow {
            record,
            tag_id,
            marker_id,
        } = row;

        let id = record.id;
        let entry = records.entry(id).or_insert(record);
        if let Some(tag_id) = tag_id {
            entry.add_tag(tag_id);
        }
        if let Some(marker_id) = marker_id {
            entry.add_marker(marker_id);
        }
    }

    records.into_iter().map(|(_, record)| record).collect()
}
