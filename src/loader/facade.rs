//! Loader Facade
//!
//! The one object a table view talks to. Owns its caches and both workers;
//! dropping it (or calling [`Loader::shutdown`]) tears them down.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::count_cache::{CountCache, Counts};
use super::events::LoaderEvent;
use super::fetch::FetchScheduler;
use super::page_cache::{PageCache, PageState};
use super::resolver::RowResolver;
use crate::config::LoaderConfig;
use crate::constants::EVENT_QUEUE_CAPACITY;
use crate::domain::{PageKey, RecordId, RowPosition, TourRecord};
use crate::error::Result;
use crate::query::{
    FilterKind, FilterSpec, QueryBuilder, SortDirection, SortFilterSpec, SortKey, SortSpec,
};
use crate::store::RecordStore;

pub struct Loader {
    config: LoaderConfig,
    store: Arc<dyn RecordStore>,
    cache: Arc<PageCache>,
    counts: CountCache,
    fetcher: FetchScheduler,
    resolver: RowResolver,
    events: Receiver<LoaderEvent>,
}

impl Loader {
    /// Create a loader and start its workers
    ///
    /// The initial view is unfiltered and sorted by the tie-break field.
    pub fn new(store: Arc<dyn RecordStore>, config: LoaderConfig) -> Result<Self> {
        config.validate()?;

        let spec = SortFilterSpec::new(SortSpec::new([], config.tie_break), FilterSpec::None);
        let cache = Arc::new(PageCache::new(spec));
        let (events_tx, events) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);

        let fetcher = FetchScheduler::spawn(
            cache.clone(),
            store.clone(),
            config.error_policy(),
            events_tx,
            config.paging,
            config.page_size,
            config.queue_capacity,
        )?;
        let resolver = RowResolver::spawn(
            cache.clone(),
            store.clone(),
            config.error_policy(),
            config.paging,
            config.resolve_attempts as usize,
            config.queue_capacity,
        )?;

        tracing::info!(
            page_size = config.page_size,
            tie_break = %config.tie_break,
            paging = ?config.paging,
            "Loader started"
        );

        Ok(Self {
            config,
            store,
            cache,
            counts: CountCache::new(),
            fetcher,
            resolver,
            events,
        })
    }

    /// Redraw notifications
    ///
    /// Every clone competes for the same events; drain from one place.
    /// At most [`EVENT_QUEUE_CAPACITY`] events are kept; newer ones are
    /// dropped while the queue is full, since a pending event already asks
    /// for a redraw.
    pub fn events(&self) -> Receiver<LoaderEvent> {
        self.events.clone()
    }

    // ==================== Sort & filter ====================

    /// Replace the sort order
    ///
    /// The tie-break field and the record id are appended when missing.
    /// Positions are dropped; counts are kept.
    pub fn set_sort(&self, keys: impl IntoIterator<Item = SortKey>) {
        let sort = SortSpec::new(keys, self.config.tie_break);
        self.apply_sort(sort);
    }

    /// Replace the sort order by table column ids
    ///
    /// Unknown column ids sort by the tie-break field instead.
    pub fn set_sort_columns<S: AsRef<str>>(
        &self,
        columns: impl IntoIterator<Item = (S, SortDirection)>,
    ) {
        let sort = SortSpec::from_column_ids(columns, self.config.tie_break);
        self.apply_sort(sort);
    }

    fn apply_sort(&self, sort: SortSpec) {
        tracing::debug!("Sorting by {}", sort.order_by_sql());
        let (_, generation) = self.cache.update_spec(|spec| spec.with_sort(sort));
        tracing::debug!("Sort changed, generation {}", generation);
    }

    /// Replace the id filter
    ///
    /// An empty include-only set matches nothing, an empty exclude set
    /// matches everything. Cached counts only apply to the filter they were
    /// counted under, so a changed filter is counted again.
    pub fn set_filter(&self, kind: FilterKind, ids: impl IntoIterator<Item = RecordId>) {
        let filter = FilterSpec::new(kind, ids);
        let (_, generation) = self.cache.update_spec(|spec| spec.with_filter(filter));
        tracing::debug!("Filter changed, generation {}", generation);
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.cache.spec().sort.clone()
    }

    pub fn filter_spec(&self) -> FilterSpec {
        self.cache.spec().filter.clone()
    }

    // ==================== Rows ====================

    /// Record at `position`, or `None` while its page is loading
    ///
    /// Never blocks. A miss schedules the page unless it already has a job.
    pub fn record(&self, position: RowPosition) -> Option<Arc<TourRecord>> {
        self.fetcher.request(position)
    }

    /// Record at `position` if already loaded; never schedules a fetch
    pub fn fetched_record(&self, position: RowPosition) -> Option<Arc<TourRecord>> {
        self.cache.record(position)
    }

    /// Position of `id` if its page is loaded or the id list is built
    pub fn fetched_position(&self, id: RecordId) -> Option<RowPosition> {
        self.cache.position(id)
    }

    pub fn record_id_at(&self, position: RowPosition) -> Option<RecordId> {
        self.cache.record_id_at(position)
    }

    /// Positions of `ids` in the current view, in request order
    ///
    /// Ids not in the view are omitted.
    pub async fn row_positions(&self, ids: &[RecordId]) -> Vec<RowPosition> {
        self.resolver.resolve(ids).await
    }

    // ==================== Counts ====================

    /// Filtered and unfiltered row counts
    ///
    /// The first call after a filter change runs the count queries on the
    /// calling thread. A failed count is logged and reported as zero without
    /// being cached.
    pub fn count(&self) -> Counts {
        let query = QueryBuilder::new(self.cache.spec(), self.config.paging);
        match self.counts.get_or_load(self.store.as_ref(), &query) {
            Ok(counts) => counts,
            Err(e) => {
                let sql = query.count(true);
                tracing::error!(
                    "Count query failed: {} | sql: {} | params: {}",
                    e,
                    sql.sql,
                    sql.params.len()
                );
                Counts::default()
            }
        }
    }

    /// Counts if already known; never queries
    pub fn cached_count(&self) -> Option<Counts> {
        self.counts.cached(&self.cache.spec().filter)
    }

    // ==================== Invalidation ====================

    /// Drop every loaded row and position
    ///
    /// With `reset_filter` the filter is cleared too, and the unfiltered view
    /// is counted again. Results still in flight are discarded.
    pub fn invalidate(&self, reset_filter: bool) {
        let generation = if reset_filter {
            let (_, generation) = self
                .cache
                .update_spec(|spec| spec.with_filter(FilterSpec::None));
            generation
        } else {
            self.cache.invalidate()
        };
        tracing::debug!("Invalidated, generation {}", generation);
    }

    /// Drop everything including counts, keeping sort and filter
    pub fn reload(&self) {
        self.counts.clear();
        let generation = self.cache.invalidate();
        tracing::info!("Reloading, generation {}", generation);
    }

    // ==================== Introspection ====================

    pub fn page_state(&self, page: PageKey) -> PageState {
        self.cache.page_state(page)
    }

    /// Page jobs waiting behind the one being fetched
    pub fn queued_pages(&self) -> usize {
        self.fetcher.queued()
    }

    pub fn page_of(&self, position: RowPosition) -> PageKey {
        self.fetcher.page_of(position)
    }

    pub fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Stop both workers, waiting for queued jobs to finish
    pub fn shutdown(&mut self) {
        self.fetcher.shutdown();
        self.resolver.shutdown();
        tracing::info!("Loader stopped");
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("counts", &self.counts)
            .field("fetcher", &self.fetcher)
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SortField;
    use crate::store::scripted::ScriptedStore;
    use crate::store::{PageRow, SqliteStore, StoreError};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn tour(id: i64, start_ms: i64) -> TourRecord {
        TourRecord::new(id, Utc.timestamp_millis_opt(start_ms).single().expect("time"))
    }

    fn sqlite(tours: &[TourRecord]) -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().expect("open");
        store.init_schema().expect("schema");
        store.insert_tours(tours).expect("insert");
        Arc::new(store)
    }

    fn small_pages() -> LoaderConfig {
        LoaderConfig {
            page_size: 10,
            ..LoaderConfig::default()
        }
    }

    fn page_row(id: i64, tag_id: Option<i64>) -> PageRow {
        PageRow {
            record: tour(id, id * 1000),
            tag_id,
            marker_id: None,
        }
    }

    fn next_event(loader: &Loader) -> LoaderEvent {
        loader
            .events()
            .recv_timeout(Duration::from_secs(5))
            .expect("loader event")
    }

    /// Request `position` and wait until its page is loaded
    fn load(loader: &Loader, position: RowPosition) -> Arc<TourRecord> {
        if let Some(record) = loader.record(position) {
            return record;
        }
        assert!(next_event(loader).needs_redraw());
        loader.record(position).expect("record after load")
    }

    #[test]
    fn test_include_only_filter_counts_and_orders() {
        let store = sqlite(&[
            tour(1, 3_000),
            tour(2, 1_000),
            tour(3, 2_000),
            tour(4, 500),
            tour(5, 4_000),
        ]);
        let loader = Loader::new(store, LoaderConfig::default()).expect("loader");

        loader.set_sort([SortKey::asc(SortField::StartTime)]);
        loader.set_filter(
            FilterKind::IncludeOnly,
            [RecordId(1), RecordId(2), RecordId(3)],
        );

        assert_eq!(
            loader.count(),
            Counts {
                filtered: 3,
                unfiltered: 5
            }
        );
        assert!(loader.record(0).is_none());
        assert!(next_event(&loader).needs_redraw());
        assert_eq!(loader.record(0).map(|r| r.id), Some(RecordId(2)));
        assert_eq!(loader.record(2).map(|r| r.id), Some(RecordId(1)));
        assert!(loader.fetched_record(3).is_none());
    }

    #[test]
    fn test_ties_break_on_start_time() {
        let mut a = tour(1, 200);
        a.distance = Some(10.0);
        let mut b = tour(2, 100);
        b.distance = Some(10.0);
        let mut c = tour(3, 300);
        c.distance = Some(5.0);
        let store = sqlite(&[a, b, c]);
        let loader = Loader::new(store, small_pages()).expect("loader");

        loader.set_sort([SortKey::asc(SortField::Distance)]);
        assert_eq!(
            loader.sort_spec().keys(),
            &[
                SortKey::asc(SortField::Distance),
                SortKey::asc(SortField::StartTime),
                SortKey::asc(SortField::Id),
            ]
        );

        let ids: Vec<RecordId> = (0..3).map(|p| load(&loader, p).id).collect();
        assert_eq!(ids, vec![RecordId(3), RecordId(2), RecordId(1)]);

        let positions = futures::executor::block_on(
            loader.row_positions(&[RecordId(1), RecordId(2), RecordId(3)]),
        );
        assert_eq!(positions, vec![2, 1, 0]);
    }

    #[test]
    fn test_joined_rows_hydrate_one_record() {
        let mut tagged = tour(1, 100);
        tagged.tag_ids = vec![7, 8];
        let store = sqlite(&[tagged, tour(2, 200)]);
        let loader = Loader::new(store, small_pages()).expect("loader");

        let first = load(&loader, 0);
        assert_eq!(first.id, RecordId(1));
        assert_eq!(first.tag_ids, vec![7, 8]);
        assert!(first.marker_ids.is_empty());

        let second = load(&loader, 1);
        assert_eq!(second.id, RecordId(2));
        assert!(second.tag_ids.is_empty());
        assert!(loader.record(2).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_keeps_counts_and_refetches() {
        let store = Arc::new(ScriptedStore {
            filtered_count: 2,
            unfiltered_count: 10,
            ids: vec![RecordId(4), RecordId(5)],
            ..ScriptedStore::default()
        });
        store.push_page(Ok(vec![page_row(4, None), page_row(5, None)]));
        store.push_page(Ok(vec![page_row(4, None), page_row(5, None)]));
        let loader = Loader::new(store.clone(), small_pages()).expect("loader");

        loader.set_filter(FilterKind::IncludeOnly, [RecordId(4), RecordId(5)]);
        let counts = loader.count();
        assert_eq!(counts.filtered, 2);
        assert_eq!(store.count_calls.load(Ordering::SeqCst), 2);
        load(&loader, 0);
        assert_eq!(loader.row_positions(&[RecordId(5)]).await, vec![1]);

        loader.set_sort([SortKey::desc(SortField::Title)]);
        loader.invalidate(false);

        assert_eq!(loader.cached_count(), Some(counts));
        assert_eq!(loader.count(), counts);
        assert_eq!(store.count_calls.load(Ordering::SeqCst), 2);

        assert!(loader.fetched_record(0).is_none());
        assert!(loader.fetched_position(RecordId(5)).is_none());
        assert!(loader.record(0).is_none());
        assert!(next_event(&loader).needs_redraw());
        assert!(loader.record(0).is_some());
        assert_eq!(store.page_calls.load(Ordering::SeqCst), 2);
        let page_query = store
            .queries
            .lock()
            .iter()
            .rev()
            .find(|q| q.sql.contains("LEFT JOIN"))
            .cloned()
            .expect("page query");
        assert!(page_query.sql.contains("ORDER BY t.title DESC"));
        assert_eq!(&page_query.params[..2], &[4, 5]);

        assert_eq!(loader.row_positions(&[RecordId(5)]).await, vec![1]);
        assert_eq!(store.id_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cached_record_is_served_without_query() {
        let store = Arc::new(ScriptedStore::default());
        store.push_page(Ok(vec![page_row(1, None)]));
        let loader = Loader::new(store.clone(), small_pages()).expect("loader");

        let first = load(&loader, 0);
        let again = loader.record(0).expect("cached");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(store.page_calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.page_state(0), PageState::Fetched);
        assert_eq!(loader.fetched_position(RecordId(1)), Some(0));
        assert_eq!(loader.record_id_at(0), Some(RecordId(1)));
    }

    #[test]
    fn test_one_job_per_page() {
        let (store, gate, started) = ScriptedStore::default().gated();
        let store = Arc::new(store);
        store.push_page(Ok((0..10).map(|id| page_row(id, None)).collect()));
        let mut loader = Loader::new(store.clone(), small_pages()).expect("loader");

        assert!(loader.record(0).is_none());
        assert!(loader.record(3).is_none());
        started
            .recv_timeout(Duration::from_secs(5))
            .expect("fetch started");
        assert_eq!(loader.page_state(0), PageState::Fetching);
        assert!(loader.record(9).is_none());
        assert_eq!(loader.queued_pages(), 0);
        assert_eq!(loader.page_of(9), 0);

        gate.send(()).expect("release");
        assert!(next_event(&loader).needs_redraw());
        assert!(loader.record(9).is_some());
        assert_eq!(store.page_calls.load(Ordering::SeqCst), 1);

        loader.shutdown();
    }

    #[test]
    fn test_failed_pages_are_retried_on_next_access() {
        let store = Arc::new(ScriptedStore::default());
        store.push_page(Err(StoreError::query("SQLITE_RANGE", "column index out of range")));
        store.push_page(Err(StoreError::query("SQLITE_ERROR", "no such table: tour")));
        store.push_page(Ok(vec![page_row(1, None)]));
        let loader = Loader::new(store.clone(), small_pages()).expect("loader");

        assert!(loader.record(0).is_none());
        assert_eq!(
            next_event(&loader),
            LoaderEvent::PageFailed {
                page: 0,
                transient: true
            }
        );
        assert_eq!(loader.page_state(0), PageState::Unrequested);

        assert!(loader.record(0).is_none());
        assert_eq!(
            next_event(&loader),
            LoaderEvent::PageFailed {
                page: 0,
                transient: false
            }
        );
        assert_eq!(loader.page_state(0), PageState::Unrequested);

        assert_eq!(load(&loader, 0).id, RecordId(1));
        assert_eq!(store.page_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_result_landing_after_invalidate_is_dropped() {
        let (store, gate, started) = ScriptedStore::default().gated();
        let store = Arc::new(store);
        store.push_page(Ok(vec![page_row(1, None)]));
        let mut loader = Loader::new(store.clone(), small_pages()).expect("loader");

        assert!(loader.record(0).is_none());
        started
            .recv_timeout(Duration::from_secs(5))
            .expect("fetch started");
        loader.invalidate(false);
        gate.send(()).expect("release");
        loader.shutdown();

        assert!(loader.fetched_record(0).is_none());
        assert_eq!(loader.page_state(0), PageState::Unrequested);
        assert!(loader.events().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_row_positions_are_stable() {
        let store = sqlite(&(1..=30).map(|id| tour(id, (31 - id) * 1000)).collect::<Vec<_>>());
        let loader = Loader::new(store, small_pages()).expect("loader");
        loader.set_filter(FilterKind::Exclude, [RecordId(30)]);

        let ids = [RecordId(1), RecordId(30), RecordId(29)];
        let first = loader.row_positions(&ids).await;
        let second = loader.row_positions(&ids).await;
        // 29 rows remain; id 1 starts last
        assert_eq!(first, vec![28, 0]);
        assert_eq!(first, second);
        assert_eq!(loader.record_id_at(28), Some(RecordId(1)));
        assert_eq!(loader.record_id_at(0), Some(RecordId(29)));
    }

    #[test]
    fn test_reset_filter_recounts() {
        let store = sqlite(&[tour(1, 100), tour(2, 200)]);
        let loader = Loader::new(store, small_pages()).expect("loader");

        loader.set_filter(FilterKind::IncludeOnly, []);
        assert_eq!(
            loader.count(),
            Counts {
                filtered: 0,
                unfiltered: 2
            }
        );

        loader.invalidate(true);
        assert!(loader.filter_spec().is_empty());
        assert_eq!(loader.cached_count(), None);
        assert_eq!(loader.count().filtered, 2);

        loader.reload();
        assert_eq!(loader.cached_count(), None);
    }

    #[test]
    fn test_unknown_sort_column_falls_back() {
        let store = Arc::new(ScriptedStore::default());
        let loader = Loader::new(store, small_pages()).expect("loader");

        loader.set_sort_columns([("no_such_column", SortDirection::Desc)]);
        assert_eq!(
            loader.sort_spec().keys(),
            &[SortKey::desc(SortField::StartTime), SortKey::asc(SortField::Id)]
        );
    }

    #[test]
    fn test_count_for_replaced_filter_is_not_reused() {
        let store = Arc::new(ScriptedStore {
            filtered_count: 3,
            unfiltered_count: 10,
            ..ScriptedStore::default()
        });
        let loader = Loader::new(store.clone(), small_pages()).expect("loader");

        // a count started under the old filter finishes after the change
        let before = QueryBuilder::new(loader.cache.spec(), loader.config.paging);
        loader.set_filter(FilterKind::Exclude, [RecordId(1)]);
        loader
            .counts
            .get_or_load(store.as_ref(), &before)
            .expect("counts");

        assert_eq!(loader.cached_count(), None);
        assert_eq!(
            loader.count(),
            Counts {
                filtered: 3,
                unfiltered: 10
            }
        );
        assert_eq!(loader.cached_count(), Some(loader.count()));
    }

    #[test]
    fn test_concurrent_sort_and_filter_changes_both_apply() {
        let store = Arc::new(ScriptedStore::default());
        let loader = Loader::new(store, small_pages()).expect("loader");

        std::thread::scope(|s| {
            s.spawn(|| loader.set_sort([SortKey::desc(SortField::Title)]));
            s.spawn(|| loader.set_filter(FilterKind::Exclude, [RecordId(7)]));
        });

        assert_eq!(loader.sort_spec().keys()[0], SortKey::desc(SortField::Title));
        assert_eq!(loader.filter_spec(), FilterSpec::exclude([RecordId(7)]));
        assert_eq!(loader.generation(), 2);
    }

    #[test]
    fn test_undrained_events_stay_bounded() {
        let store = Arc::new(ScriptedStore::default());
        let config = LoaderConfig {
            page_size: 1,
            ..LoaderConfig::default()
        };
        let mut loader = Loader::new(store, config).expect("loader");

        for position in 0..EVENT_QUEUE_CAPACITY * 4 {
            assert!(loader.record(position).is_none());
        }
        loader.shutdown();

        let events = loader.events();
        assert!(!events.is_empty());
        assert!(events.len() <= EVENT_QUEUE_CAPACITY);
    }
}
