//! Loader Constants
//!
//! Centralized defaults for paging, queueing and error classification.

/// Rows per page (one FetchJob hydrates one page)
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Capacity of each background worker's FIFO queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Store error codes treated as transient races rather than failures.
///
/// `XCL13` is the Derby "parameter position out of range" state, `SQLITE_RANGE`
/// the SQLite equivalent; both show up when a filter parameter list changes
/// while a statement is being bound.
pub const DEFAULT_TRANSIENT_ERROR_CODES: &[&str] = &["XCL13", "SQLITE_RANGE"];

/// Pending loader events kept for a consumer that has not drained them
pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// How often the resolver rebuilds the id list when the generation moves
/// while its query is running
pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 3;

/// Config file name inside the project config directory
pub const CONFIG_FILE_NAME: &str = "loader.toml";

/// Thread names for the background workers
pub const PAGE_FETCH_WORKER_NAME: &str = "tour-loader: loading pages";
pub const ROW_RESOLVE_WORKER_NAME: &str = "tour-loader: resolving rows";
