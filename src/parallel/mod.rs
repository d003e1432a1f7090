//! Parallel execution support
//!
//! Provides a parallel map used for per-unit parsing and per-anchor slicing.

mod executor;

pub use executor::{parallel_map, ParallelConfig};
