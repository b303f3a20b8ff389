//! Count Cache
//!
//! Memoized filtered and unfiltered counts. Counts survive sort changes and
//! are only served for the filter they were computed under.

use parking_lot::Mutex;
use serde::Serialize;

use crate::query::{FilterSpec, QueryBuilder};
use crate::store::{RecordStore, StoreError};

/// Row counts of the current view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Rows matching the filter
    pub filtered: u64,
    /// All rows in the store
    pub unfiltered: u64,
}

#[derive(Default)]
struct Slot {
    epoch: u64,
    /// Counts and the filter they were computed for
    counts: Option<(FilterSpec, Counts)>,
}

#[derive(Default)]
pub struct CountCache {
    slot: Mutex<Slot>,
}

impl CountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached counts for `filter`, if any
    pub fn cached(&self, filter: &FilterSpec) -> Option<Counts> {
        match &self.slot.lock().counts {
            Some((counted, counts)) if counted == filter => Some(*counts),
            _ => None,
        }
    }

    /// Cached counts for the query's filter, or run the count queries and
    /// cache the result
    ///
    /// Queries run outside the lock. A result is only stored if no
    /// [`CountCache::clear`] happened meanwhile.
    pub fn get_or_load(
        &self,
        store: &dyn RecordStore,
        query: &QueryBuilder,
    ) -> Result<Counts, StoreError> {
        let filter = &query.spec().filter;
        let epoch = {
            let slot = self.slot.lock();
            if let Some((counted, counts)) = &slot.counts {
                if counted == filter {
                    return Ok(*counts);
                }
            }
            slot.epoch
        };

        let filtered = store.count(&query.count(true))?;
        let unfiltered = if filter.is_empty() {
            filtered
        } else {
            store.count(&query.count(false))?
        };
        let counts = Counts {
            filtered,
            unfiltered,
        };

        let mut slot = self.slot.lock();
        if slot.epoch == epoch {
            slot.counts = Some((filter.clone(), counts));
        } else {
            tracing::debug!("Count cache cleared while counting, not storing");
        }
        Ok(counts)
    }

    /// Drop cached counts, including any count still running
    pub fn clear(&self) {
        let mut slot = self.slot.lock();
        slot.epoch += 1;
        slot.counts = None;
    }
}

impl std::fmt::Debug for CountCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountCache")
            .field("counts", &self.slot.lock().counts.as_ref().map(|(_, c)| *c))
            .finish()
    }
}
