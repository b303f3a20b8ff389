//! Lazy Paginated Loader
//!
//! Serves rows of a large sorted and filtered tour table one page at a time,
//! without blocking the caller on I/O.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌──────────────────────────┐
//!   table view ─────────▶│          Loader          │
//!    record(pos)         │  spec + generation       │
//!    count()             │  PageCache   CountCache  │
//!    row_positions(ids)  └───┬──────────────┬───────┘
//!                            │              │
//!              FetchScheduler│              │RowResolver
//!                            ▼              ▼
//!                     page worker     resolve worker
//!                     (page query)    (id-list query)
//!                            │              │
//!                            └──────┬───────┘
//!                                   ▼
//!                            dyn RecordStore
//! ```
//!
//! Each worker is a single thread with a bounded FIFO queue. A sort or filter
//! change bumps the generation; results computed for an older generation are
//! dropped when they arrive.

mod count_cache;
mod events;
mod facade;
mod fetch;
mod page_cache;
mod resolver;
mod worker;

pub use count_cache::{CountCache, Counts};
pub use events::LoaderEvent;
pub use facade::Loader;
pub use fetch::{FetchJob, FetchScheduler};
pub use page_cache::{PageCache, PageState, Snapshot, hydrate};
pub use resolver::{ResolveJob, RowResolver};
pub use worker::{SerialWorker, SubmitError};
