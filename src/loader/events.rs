//! Loader Events
//!
//! Coarse notifications from the background workers. The cache is the source
//! of truth; a consumer only needs to know that it should redraw.
//!
//! ```text
//! page worker ──▶ crossbeam channel ──▶ UI drains on its own thread ──▶ redraw
//! ```

use crate::domain::PageKey;

/// Events emitted by the loader
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoaderEvent {
    /// A page was hydrated for the current generation
    PageLoaded {
        /// Page number
        page: PageKey,
        /// Number of records on the page
        rows: usize,
    },

    /// A page query failed; the page will be requested again on next access
    PageFailed {
        /// Page number
        page: PageKey,
        /// Whether the failure was a known transient race
        transient: bool,
    },
}

impl LoaderEvent {
    /// Whether the table should repaint
    pub fn needs_redraw(&self) -> bool {
        matches!(self, LoaderEvent::PageLoaded { .. })
    }
}
