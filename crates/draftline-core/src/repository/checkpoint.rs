//! Checkpoint store trait definition.
//!
//! Durable, append-only storage of workflow snapshots keyed by thread id and
//! checkpoint id. Implementations must make `put` atomic per thread (a
//! half-written checkpoint is never observable) and give read-your-writes
//! for `get_latest` on the same thread.

use draftline_types::checkpoint::{Checkpoint, ThreadId, ThreadSummary};
use draftline_types::error::RepositoryError;
use uuid::Uuid;

use super::SortOrder;

/// Options for [`CheckpointStore::list`]. Ordered by `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: Option<u32>,
    pub order: SortOrder,
}

impl ListOptions {
    pub fn ascending() -> Self {
        Self {
            limit: None,
            order: SortOrder::Asc,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint. Returns its id. A duplicate id is a `Conflict`.
    fn put(&self, checkpoint: &Checkpoint) -> impl std::future::Future<Output = Result<Uuid, RepositoryError>> + Send;

    fn get(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Most recently written checkpoint for the thread.
    fn get_latest(
        &self,
        thread_id: &ThreadId,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    fn list(
        &self,
        thread_id: &ThreadId,
        options: ListOptions,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Remove every checkpoint of the thread. Returns the number removed.
    fn delete_thread(&self, thread_id: &ThreadId)
    -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// One summary per thread, most recently active first.
    fn list_threads(&self) -> impl std::future::Future<Output = Result<Vec<ThreadSummary>, RepositoryError>> + Send;
}

impl<T: CheckpointStore> CheckpointStore for std::sync::Arc<T> {
    fn put(&self, checkpoint: &Checkpoint) -> impl std::future::Future<Output = Result<Uuid, RepositoryError>> + Send {
        (**self).put(checkpoint)
    }

    fn get(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
        (**self).get(thread_id, checkpoint_id)
    }

    fn get_latest(
        &self,
        thread_id: &ThreadId,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send {
        (**self).get_latest(thread_id)
    }

    fn list(
        &self,
        thread_id: &ThreadId,
        options: ListOptions,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send {
        (**self).list(thread_id, options)
    }

    fn delete_thread(&self, thread_id: &ThreadId)
    -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send {
        (**self).delete_thread(thread_id)
    }

    fn list_threads(&self) -> impl std::future::Future<Output = Result<Vec<ThreadSummary>, RepositoryError>> + Send {
        (**self).list_threads()
    }
}
