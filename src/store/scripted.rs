//! Scripted store for loader tests
//!
//! Returns canned results, counts calls and can hold page queries until the
//! test releases them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::{PageRow, RecordStore, StoreError};
use crate::domain::RecordId;
use crate::query::SqlQuery;

#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub filtered_count: u64,
    pub unfiltered_count: u64,
    pub ids: Vec<RecordId>,
    /// Results handed out by successive page queries; empty pages once drained
    pub pages: Mutex<VecDeque<Result<Vec<PageRow>, StoreError>>>,
    pub count_calls: AtomicUsize,
    pub id_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    /// Every query the store was asked to run, in call order
    pub queries: Mutex<Vec<SqlQuery>>,
    /// Page queries block on this until released, see [`ScriptedStore::gated`]
    pub gate: Option<Receiver<()>>,
    /// Signalled whenever a page query starts
    pub started: Option<Sender<()>>,
}

impl ScriptedStore {
    /// Page queries block until a unit is sent on the returned gate sender.
    /// The second sender is signalled whenever a page query starts.
    pub fn gated(mut self) -> (Self, Sender<()>, Receiver<()>) {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        self.gate = Some(gate_rx);
        self.started = Some(started_tx);
        (self, gate_tx, started_rx)
    }

    pub fn push_page(&self, result: Result<Vec<PageRow>, StoreError>) {
        self.pages.lock().push_back(result);
    }
}

impl RecordStore for ScriptedStore {
    fn count(&self, query: &SqlQuery) -> Result<u64, StoreError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        // The unfiltered form carries no filter parameters
        if query.sql.contains("AND ") {
            Ok(self.filtered_count)
        } else {
            Ok(self.unfiltered_count)
        }
    }

    fn record_ids(&self, query: &SqlQuery) -> Result<Vec<RecordId>, StoreError> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        Ok(self.ids.clone())
    }

    fn page_rows(&self, query: &SqlQuery) -> Result<Vec<PageRow>, StoreError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        if let Some(started) = &self.started {
            let _ = started.send(());
        }
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.pages.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
