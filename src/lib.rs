//! Tour Loader Library
//!
//! Lazy, paginated loading of a large sortable and filterable tour table.
//! Rows are fetched one page at a time on background workers and cached by
//! row position until the sort or filter changes.

pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod loader;
pub mod query;
pub mod store;
