//! Storage port definitions.
//!
//! These traits define the storage interface that the infrastructure layer
//! (draftline-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod checkpoint;
pub mod memory;

pub use checkpoint::{CheckpointStore, ListOptions};
pub use memory::InMemoryCheckpointStore;

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}
