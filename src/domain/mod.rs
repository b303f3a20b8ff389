//! Domain - Pure Data Structures
//!
//! Record identifiers, the hydrated tour row and the sortable column table.
//! Nothing here knows about threads or the backing store.

mod record;
mod sort_field;

pub use record::*;
pub use sort_field::*;
