//! Row Resolver
//!
//! Maps record ids to row positions on its own worker, so a "scroll to this
//! record" lookup never waits behind page fetches. The first lookup of a
//! generation runs the id-list query once and indexes every returned id.

use std::sync::Arc;

use tokio::sync::oneshot;

use super::page_cache::PageCache;
use super::worker::{SerialWorker, SubmitError};
use crate::constants::ROW_RESOLVE_WORKER_NAME;
use crate::domain::{RecordId, RowPosition};
use crate::error::Result;
use crate::query::{PagingSyntax, QueryBuilder};
use crate::store::{ErrorPolicy, FailureClass, RecordStore};

/// Ids to resolve and where to send the answer
pub struct ResolveJob {
    pub ids: Vec<RecordId>,
    pub reply: oneshot::Sender<Vec<RowPosition>>,
}

struct ResolveContext {
    cache: Arc<PageCache>,
    store: Arc<dyn RecordStore>,
    policy: ErrorPolicy,
    paging: PagingSyntax,
    attempts: usize,
}

pub struct RowResolver {
    cache: Arc<PageCache>,
    worker: SerialWorker<ResolveJob>,
}

impl RowResolver {
    pub fn spawn(
        cache: Arc<PageCache>,
        store: Arc<dyn RecordStore>,
        policy: ErrorPolicy,
        paging: PagingSyntax,
        attempts: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        let context = ResolveContext {
            cache: cache.clone(),
            store,
            policy,
            paging,
            attempts,
        };
        let worker = SerialWorker::spawn(ROW_RESOLVE_WORKER_NAME, queue_capacity, move |job| {
            context.run(job)
        })?;

        Ok(Self { cache, worker })
    }

    /// Positions of `ids` in the current view, in request order
    ///
    /// Ids outside the view are omitted. Lookup failures yield an empty list.
    pub async fn resolve(&self, ids: &[RecordId]) -> Vec<RowPosition> {
        if ids.is_empty() {
            return Vec::new();
        }
        if let Some(positions) = self.cache.positions_for(self.cache.generation(), ids) {
            return positions;
        }

        let (reply, rx) = oneshot::channel();
        let job = ResolveJob {
            ids: ids.to_vec(),
            reply,
        };
        match self.worker.submit(job) {
            Ok(()) => {}
            Err(SubmitError::Full) => {
                tracing::warn!("Resolve queue full, dropping lookup of {} ids", ids.len());
                return Vec::new();
            }
            Err(SubmitError::Closed) => {
                tracing::warn!("Resolve worker stopped");
                return Vec::new();
            }
        }

        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }
}

impl std::fmt::Debug for RowResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowResolver")
            .field("worker", &self.worker)
            .finish()
    }
}

impl ResolveContext {
    fn run(&self, job: ResolveJob) {
        let ResolveJob { ids, reply } = job;
        let positions = self.resolve(&ids);
        // the caller may have stopped waiting
        let _ = reply.send(positions);
    }

    fn resolve(&self, ids: &[RecordId]) -> Vec<RowPosition> {
        for attempt in 1..=self.attempts {
            let snapshot = self.cache.snapshot();
            if let Some(positions) = self.cache.positions_for(snapshot.generation, ids) {
                return positions;
            }

            let query = QueryBuilder::new(snapshot.spec, self.paging).id_list();
            match self.store.record_ids(&query) {
                Ok(list) => {
                    let total = list.len();
                    if self.cache.apply_id_list(snapshot.generation, list) {
                        tracing::debug!(
                            "Indexed {} ids (generation {})",
                            total,
                            snapshot.generation
                        );
                        if let Some(positions) =
                            self.cache.positions_for(snapshot.generation, ids)
                        {
                            return positions;
                        }
                    }
                    tracing::debug!("Id list went stale, attempt {}/{}", attempt, self.attempts);
                }
                Err(e) => {
                    match self.policy.classify(&e) {
                        FailureClass::Transient => {
                            tracing::warn!("Id list query hit a transient error: {}", e)
                        }
                        FailureClass::Fatal => tracing::error!(
                            "Id list query failed: {} | sql: {} | params: {}",
                            e,
                            query.sql,
                            query.params.len()
                        ),
                    }
                    return Vec::new();
                }
            }
        }

        tracing::warn!("Giving up resolving {} ids after {} attempts", ids.len(), self.attempts);
        Vec::new()
    }
}
