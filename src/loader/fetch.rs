//! Page Fetch Scheduler
//!
//! Turns a cache miss into at most one queued page job and runs page jobs on
//! the page worker.
//!
//! ```text
//! record(pos) ── hit ──▶ Some(record)
//!      │
//!      └─ miss ─▶ try_reserve(page) ─▶ submit(FetchJob) ─▶ None
//!                                            │
//!                          page worker ◀─────┘
//!                            begin_fetch ─▶ page query ─▶ hydrate ─▶ apply_page
//! ```

use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};

use super::events::LoaderEvent;
use super::page_cache::{PageCache, hydrate};
use super::worker::{SerialWorker, SubmitError};
use crate::constants::PAGE_FETCH_WORKER_NAME;
use crate::domain::{PageKey, RowPosition, TourRecord};
use crate::error::Result;
use crate::query::{PagingSyntax, QueryBuilder};
use crate::store::{ErrorPolicy, FailureClass, RecordStore};

/// One page to load for one generation
#[derive(Debug)]
pub struct FetchJob {
    pub page: PageKey,
    pub generation: u64,
    pub query: QueryBuilder,
}

/// Everything the page worker needs
struct FetchContext {
    cache: Arc<PageCache>,
    store: Arc<dyn RecordStore>,
    policy: ErrorPolicy,
    events: Sender<LoaderEvent>,
    page_size: usize,
}

/// Resets a page to unrequested unless the fetch completed
struct FetchGuard<'a> {
    cache: &'a PageCache,
    page: PageKey,
    generation: u64,
    armed: bool,
}

impl FetchGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.release(self.page, self.generation);
        }
    }
}

pub struct FetchScheduler {
    cache: Arc<PageCache>,
    worker: SerialWorker<FetchJob>,
    paging: PagingSyntax,
    page_size: usize,
}

impl FetchScheduler {
    pub fn spawn(
        cache: Arc<PageCache>,
        store: Arc<dyn RecordStore>,
        policy: ErrorPolicy,
        events: Sender<LoaderEvent>,
        paging: PagingSyntax,
        page_size: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        let context = FetchContext {
            cache: cache.clone(),
            store,
            policy,
            events,
            page_size,
        };
        let worker = SerialWorker::spawn(PAGE_FETCH_WORKER_NAME, queue_capacity, move |job| {
            context.run(job)
        })?;

        Ok(Self {
            cache,
            worker,
            paging,
            page_size,
        })
    }

    pub fn page_of(&self, position: RowPosition) -> PageKey {
        position / self.page_size
    }

    /// Cached record at `position`, scheduling its page on a miss
    pub fn request(&self, position: RowPosition) -> Option<Arc<TourRecord>> {
        if let Some(record) = self.cache.record(position) {
            return Some(record);
        }

        let page = self.page_of(position);
        let Some(snapshot) = self.cache.try_reserve(page) else {
            // queued, fetching, or fetched without a row at this position
            return None;
        };

        let job = FetchJob {
            page,
            generation: snapshot.generation,
            query: QueryBuilder::new(snapshot.spec, self.paging),
        };
        match self.worker.submit(job) {
            Ok(()) => tracing::debug!("Queued page {} (generation {})", page, snapshot.generation),
            Err(SubmitError::Full) => {
                tracing::warn!("Page queue full, page {} left unrequested", page);
                self.cache.release(page, snapshot.generation);
            }
            Err(SubmitError::Closed) => {
                tracing::warn!("Page worker stopped, page {} not loaded", page);
                self.cache.release(page, snapshot.generation);
            }
        }

        // the page may have been fetched between the miss and now
        self.cache.record(position)
    }

    pub fn queued(&self) -> usize {
        self.worker.queued()
    }

    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }
}

impl std::fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("worker", &self.worker)
            .field("paging", &self.paging)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl FetchContext {
    fn run(&self, job: FetchJob) {
        let FetchJob {
            page,
            generation,
            query,
        } = job;

        if !self.cache.begin_fetch(page, generation) {
            tracing::debug!("Skipping stale page {} (generation {})", page, generation);
            return;
        }
        let guard = FetchGuard {
            cache: &self.cache,
            page,
            generation,
            armed: true,
        };

        let offset = page * self.page_size;
        let sql = query.page(offset, self.page_size);
        match self.store.page_rows(&sql) {
            Ok(rows) => {
                let records = hydrate(rows);
                let count = records.len();
                if self.cache.apply_page(page, generation, offset, records) {
                    guard.disarm();
                    tracing::debug!("Loaded page {} with {} records", page, count);
                    self.notify(LoaderEvent::PageLoaded { page, rows: count });
                } else {
                    tracing::debug!("Discarding stale page {} (generation {})", page, generation);
                }
            }
            Err(e) => {
                let transient = self.policy.classify(&e) == FailureClass::Transient;
                if transient {
                    tracing::warn!("Page {} query hit a transient error: {}", page, e);
                } else {
                    tracing::error!(
                        "Page {} query failed: {} | sql: {} | params: {}",
                        page,
                        e,
                        sql.sql,
                        sql.params.len()
                    );
                }
                drop(guard);
                self.notify(LoaderEvent::PageFailed { page, transient });
            }
        }
    }

    /// Coalesces into the events already pending when the queue is full
    fn notify(&self, event: LoaderEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
