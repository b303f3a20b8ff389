//! Query Layer
//!
//! Sort/filter state and the SQL derived from it.

mod builder;
mod spec;

pub use builder::*;
pub use spec::*;
