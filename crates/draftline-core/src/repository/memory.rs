//! In-memory checkpoint store for tests and single-process embedding.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use draftline_types::checkpoint::{Checkpoint, ThreadId, ThreadSummary};
use draftline_types::error::RepositoryError;
use uuid::Uuid;

use super::SortOrder;
use super::checkpoint::{CheckpointStore, ListOptions};

/// Checkpoints of one thread in write order.
#[derive(Debug, Default)]
struct ThreadLog {
    /// Store-wide sequence number of the most recent write.
    last_seq: u64,
    checkpoints: Vec<Checkpoint>,
}

/// Checkpoints per thread, ordered by write sequence rather than wall clock.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    threads: DashMap<ThreadId, ThreadLog>,
    seq: AtomicU64,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<Uuid, RepositoryError> {
        let mut log = self.threads.entry(checkpoint.thread_id.clone()).or_default();
        if log.checkpoints.iter().any(|c| c.checkpoint_id == checkpoint.checkpoint_id) {
            return Err(RepositoryError::Conflict(format!(
                "checkpoint {} already exists",
                checkpoint.checkpoint_id
            )));
        }
        log.last_seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        log.checkpoints.push(checkpoint.clone());
        Ok(checkpoint.checkpoint_id)
    }

    async fn get(&self, thread_id: &ThreadId, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.threads.get(thread_id).and_then(|log| {
            log.checkpoints
                .iter()
                .find(|c| c.checkpoint_id == checkpoint_id)
                .cloned()
        }))
    }

    async fn get_latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self
            .threads
            .get(thread_id)
            .and_then(|log| log.checkpoints.last().cloned()))
    }

    async fn list(&self, thread_id: &ThreadId, options: ListOptions) -> Result<Vec<Checkpoint>, RepositoryError> {
        let Some(log) = self.threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        let limit = options.limit.map_or(usize::MAX, |l| l as usize);
        let list = match options.order {
            SortOrder::Asc => log.checkpoints.iter().take(limit).cloned().collect(),
            SortOrder::Desc => log.checkpoints.iter().rev().take(limit).cloned().collect(),
        };
        Ok(list)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<u64, RepositoryError> {
        Ok(self
            .threads
            .remove(thread_id)
            .map(|(_, log)| log.checkpoints.len() as u64)
            .unwrap_or(0))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let mut summaries: Vec<(u64, ThreadSummary)> = self
            .threads
            .iter()
            .filter_map(|entry| {
                let log = entry.value();
                let latest = log.checkpoints.last()?;
                Some((
                    log.last_seq,
                    ThreadSummary {
                        thread_id: entry.key().clone(),
                        checkpoint_count: log.checkpoints.len() as u64,
                        latest_checkpoint_id: latest.checkpoint_id,
                        latest_at: latest.created_at,
                    },
                ))
            })
            .collect();
        summaries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(summaries.into_iter().map(|(_, summary)| summary).collect())
    }
}
