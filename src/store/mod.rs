//! Backing Store Layer
//!
//! The loader talks to its store only through [`RecordStore`]. Any store that
//! can run the three query forms built by [`crate::query::QueryBuilder`]
//! (count, ordered id list, paged join) can be plugged in.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Loader                     │
//! │  page worker ──┐        ┌── resolve worker    │
//! └────────────────┼────────┼─────────────────────┘
//!                  ▼        ▼
//!          ┌──────────────────────┐
//!          │   dyn RecordStore     │  count / record_ids / page_rows
//!          └──────────┬───────────┘
//!                     ▼
//!               SqliteStore (rusqlite)
//! ```

#[cfg(test)]
pub(crate) mod scripted;
mod sqlite;

pub use sqlite::*;

use ahash::AHashSet;
use snafu::Snafu;

use crate::domain::{RecordId, TourRecord};
use crate::query::SqlQuery;

/// Failure reported by a backing store
#[derive(Clone, Debug, Snafu)]
pub enum StoreError {
    /// Statement failed; `code` is the store's error state (e.g. `XCL13`, `SQLITE_RANGE`)
    #[snafu(display("Query failed [{code}]: {message}"))]
    Query { code: String, message: String },

    /// Row could not be decoded into a record
    #[snafu(display("Decode error: {message}"))]
    Decode { message: String },
}

impl StoreError {
    pub fn query(code: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Query {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Store-specific error state, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Query { code, .. } => Some(code),
            StoreError::Decode { .. } => None,
        }
    }
}

/// How a store failure is handled by the loader
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Known race (e.g. parameter count changed under a running statement)
    Transient,
    /// Anything else; logged with the full query
    Fatal,
}

/// Classifies store errors by their code
#[derive(Clone, Debug)]
pub struct ErrorPolicy {
    transient_codes: AHashSet<String>,
}

impl ErrorPolicy {
    pub fn new<S: Into<String>>(transient_codes: impl IntoIterator<Item = S>) -> Self {
        Self {
            transient_codes: transient_codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, error: &StoreError) -> FailureClass {
        match error.code() {
            Some(code) if self.transient_codes.contains(code) => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_TRANSIENT_ERROR_CODES.iter().copied())
    }
}

/// One physical row of the paged join
///
/// A tour with two tags comes back as two rows sharing the same record id.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRow {
    /// Scalar fields; the collections are always empty here
    pub record: TourRecord,
    pub tag_id: Option<i64>,
    pub marker_id: Option<i64>,
}

/// Query contract of a backing store
///
/// Calls are made from the loader's worker threads and may block.
pub trait RecordStore: Send + Sync + 'static {
    /// Run a count query and return its single value
    fn count(&self, query: &SqlQuery) -> Result<u64, StoreError>;

    /// Run an id-list query; ids come back in query order
    fn record_ids(&self, query: &SqlQuery) -> Result<Vec<RecordId>, StoreError>;

    /// Run a page query; rows come back in query order
    fn page_rows(&self, query: &SqlQuery) -> Result<Vec<PageRow>, StoreError>;
}
