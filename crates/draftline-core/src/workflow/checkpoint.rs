//! Durable checkpoint manager for workflow threads.
//!
//! Wraps a `CheckpointStore` with thread-id validation (before any I/O) and a
//! bounded retry for transient storage failures. Once retries are exhausted
//! the operation fails with `CheckpointError`, which the engine treats as
//! fatal for the current step.

use std::time::Duration;

use draftline_types::checkpoint::{
    Checkpoint, CheckpointMetadata, PendingTask, ThreadId, ThreadIdError, ThreadSummary,
};
use draftline_types::config::RetryConfig;
use draftline_types::error::RepositoryError;
use draftline_types::workflow::WorkflowState;
use uuid::Uuid;

use crate::repository::{CheckpointStore, ListOptions};
use crate::resilience::compute_backoff;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Everything besides the state that goes into a new checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointWrite {
    pub parent: Option<Uuid>,
    pub metadata: CheckpointMetadata,
    pub next: Vec<String>,
    pub tasks: Vec<PendingTask>,
}

/// Generic over `S: CheckpointStore` so it works with SQLite or the in-memory store.
pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
    retry: RetryConfig,
    config_snapshot: serde_json::Value,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    /// `config_snapshot` is stored with every checkpoint this manager writes.
    pub fn new(store: S, retry: RetryConfig, config_snapshot: serde_json::Value) -> Self {
        Self {
            store,
            retry,
            config_snapshot,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate a raw thread id without touching storage.
    pub fn validate_thread_id(thread_id: &str) -> Result<ThreadId, CheckpointError> {
        Ok(ThreadId::parse(thread_id)?)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Serialize `state` into a new checkpoint and persist it.
    pub async fn put(
        &self,
        thread_id: &str,
        state: &WorkflowState,
        write: CheckpointWrite,
    ) -> Result<Checkpoint, CheckpointError> {
        let thread_id = Self::validate_thread_id(thread_id)?;
        let checkpoint = Checkpoint::new(
            thread_id,
            write.parent,
            state,
            write.metadata,
            write.next,
            self.config_snapshot.clone(),
        )
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?
        .with_tasks(write.tasks);

        self.with_retry("put", &checkpoint.thread_id, || self.store.put(&checkpoint))
            .await?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            parent = ?checkpoint.parent_checkpoint_id,
            step = ?checkpoint.metadata.step,
            next = ?checkpoint.next,
            "checkpoint written"
        );

        Ok(checkpoint)
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<u64, CheckpointError> {
        let thread_id = Self::validate_thread_id(thread_id)?;
        let removed = self
            .with_retry("delete_thread", &thread_id, || self.store.delete_thread(&thread_id))
            .await?;
        tracing::info!(thread_id = %thread_id, removed, "deleted thread checkpoints");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, thread_id: &str, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, CheckpointError> {
        let thread_id = Self::validate_thread_id(thread_id)?;
        self.with_retry("get", &thread_id, || self.store.get(&thread_id, checkpoint_id))
            .await
    }

    pub async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let thread_id = Self::validate_thread_id(thread_id)?;
        self.with_retry("get_latest", &thread_id, || self.store.get_latest(&thread_id))
            .await
    }

    /// Latest checkpoint and its decoded state. Missing thread is an error.
    pub async fn load_latest(&self, thread_id: &str) -> Result<(Checkpoint, WorkflowState), CheckpointError> {
        let checkpoint = self
            .get_latest(thread_id)
            .await?
            .ok_or_else(|| CheckpointError::ThreadNotFound(thread_id.to_string()))?;
        let state = checkpoint
            .state()
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok((checkpoint, state))
    }

    pub async fn list(&self, thread_id: &str, options: ListOptions) -> Result<Vec<Checkpoint>, CheckpointError> {
        let thread_id = Self::validate_thread_id(thread_id)?;
        self.with_retry("list", &thread_id, || self.store.list(&thread_id, options))
            .await
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>, CheckpointError> {
        let mut attempt = 0;
        loop {
            match self.store.list_threads().await {
                Ok(threads) => return Ok(threads),
                Err(e) => self.backoff_or_fail("list_threads", "*", &mut attempt, e).await?,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, thread_id: &ThreadId, mut op: F) -> Result<T, CheckpointError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.backoff_or_fail(operation, thread_id.as_str(), &mut attempt, e)
                        .await?
                }
            }
        }
    }

    /// Sleep before the next attempt, or convert `error` into the final failure.
    async fn backoff_or_fail(
        &self,
        operation: &'static str,
        thread_id: &str,
        attempt: &mut u32,
        error: RepositoryError,
    ) -> Result<(), CheckpointError> {
        if !error.is_transient() || *attempt >= self.retry.max_attempts {
            tracing::error!(
                operation,
                thread_id,
                attempts = *attempt + 1,
                error = %error,
                "checkpoint operation failed"
            );
            return Err(CheckpointError::Storage {
                operation,
                attempts: *attempt + 1,
                source: error,
            });
        }

        let delay = compute_backoff(
            *attempt,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        );
        tracing::warn!(
            operation,
            thread_id,
            attempt = *attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "transient checkpoint failure, retrying"
        );
        tokio::time::sleep(delay).await;
        *attempt += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("invalid thread id: {0}")]
    InvalidThreadId(#[from] ThreadIdError),

    #[error("checkpoint {operation} failed after {attempts} attempt(s): {source}")]
    Storage {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: RepositoryError,
    },

    #[error("checkpoint serialization failed: {0}")]
    Serialization(String),

    #[error("no checkpoint found for thread '{0}'")]
    ThreadNotFound(String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use draftline_types::checkpoint::CheckpointSource;
    use draftline_types::status::ProcessingStatus;
    use draftline_types::workflow::SectionRecord;

    use super::*;
    use crate::repository::InMemoryCheckpointStore;

    /// Counts calls and fails the first `fail_first` of them with `error`.
    struct FlakyStore {
        inner: InMemoryCheckpointStore,
        calls: AtomicU32,
        fail_first: u32,
        transient: bool,
    }

    impl FlakyStore {
        fn new(fail_first: u32, transient: bool) -> Self {
            Self {
                inner: InMemoryCheckpointStore::new(),
                calls: AtomicU32::new(0),
                fail_first,
                transient,
            }
        }

        fn check(&self) -> Result<(), RepositoryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.transient {
                    return Err(RepositoryError::Connection("database is locked".into()));
                }
                return Err(RepositoryError::Query("disk I/O error".into()));
            }
            Ok(())
        }
    }

    impl CheckpointStore for FlakyStore {
        async fn put(&self, checkpoint: &Checkpoint) -> Result<Uuid, RepositoryError> {
            self.check()?;
            self.inner.put(checkpoint).await
        }

        async fn get(&self, thread_id: &ThreadId, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
            self.check()?;
            self.inner.get(thread_id, checkpoint_id).await
        }

        async fn get_latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
            self.check()?;
            self.inner.get_latest(thread_id).await
        }

        async fn list(&self, thread_id: &ThreadId, options: ListOptions) -> Result<Vec<Checkpoint>, RepositoryError> {
            self.check()?;
            self.inner.list(thread_id, options).await
        }

        async fn delete_thread(&self, thread_id: &ThreadId) -> Result<u64, RepositoryError> {
            self.check()?;
            self.inner.delete_thread(thread_id).await
        }

        async fn list_threads(&self) -> Result<Vec<ThreadSummary>, RepositoryError> {
            self.check()?;
            self.inner.list_threads().await
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.2,
        }
    }

    fn manager(store: Arc<FlakyStore>) -> CheckpointManager<Arc<FlakyStore>> {
        CheckpointManager::new(store, fast_retry(), serde_json::json!({"retry": "fast"}))
    }

    fn sample_state() -> WorkflowState {
        let mut state = WorkflowState::new("doc-42", "Proposal 42", "proposal");
        state.sections = state
            .sections
            .merge([SectionRecord::new("introduction", "Introduction").with_status(ProcessingStatus::Queued)])
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_put_then_get_latest_returns_identical_values() {
        let store = Arc::new(FlakyStore::new(0, true));
        let mgr = manager(store);
        let state = sample_state();

        let written = mgr
            .put("proposal_42", &state, CheckpointWrite {
                next: vec!["generateSection".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        let latest = mgr.get_latest("proposal_42").await.unwrap().unwrap();
        assert_eq!(latest.values, written.values);
        assert_eq!(latest.state().unwrap(), state);
        assert_eq!(latest.config, serde_json::json!({"retry": "fast"}));
    }

    #[tokio::test]
    async fn test_malformed_thread_id_fails_without_io() {
        let store = Arc::new(FlakyStore::new(0, true));
        let mgr = manager(store.clone());

        for bad in ["", "proposal", "proposal 42", "42_proposal", "a_b_c_d"] {
            let err = mgr
                .put(bad, &sample_state(), CheckpointWrite::default())
                .await
                .unwrap_err();
            assert!(matches!(err, CheckpointError::InvalidThreadId(_)), "{bad}");
            assert!(matches!(
                mgr.get_latest(bad).await,
                Err(CheckpointError::InvalidThreadId(_))
            ));
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2, true));
        let mgr = manager(store.clone());

        mgr.put("proposal_1", &sample_state(), CheckpointWrite::default())
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_without_commit() {
        let store = Arc::new(FlakyStore::new(10, true));
        let mgr = manager(store.clone());

        let err = mgr
            .put("proposal_1", &sample_state(), CheckpointWrite::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Storage { attempts: 4, .. }));
        assert!(
            store
                .inner
                .get_latest(&ThreadId::parse("proposal_1").unwrap())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let store = Arc::new(FlakyStore::new(1, false));
        let mgr = manager(store.clone());

        let err = mgr
            .put("proposal_1", &sample_state(), CheckpointWrite::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Storage { attempts: 1, .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_chain_and_metadata() {
        let mgr = manager(Arc::new(FlakyStore::new(0, true)));
        let state = sample_state();

        let first = mgr
            .put("proposal_7", &state, CheckpointWrite::default())
            .await
            .unwrap();
        let second = mgr
            .put("proposal_7", &state, CheckpointWrite {
                parent: Some(first.checkpoint_id),
                metadata: CheckpointMetadata {
                    source: CheckpointSource::Step,
                    step: Some("research".into()),
                    step_count: 1,
                    ..Default::default()
                },
                next: vec!["solutionAnalysis".into()],
                tasks: vec![],
            })
            .await
            .unwrap();

        let history = mgr.list("proposal_7", ListOptions::ascending()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].parent_checkpoint_id, Some(first.checkpoint_id));
        assert_eq!(history[1].metadata.step.as_deref(), Some("research"));
        assert_eq!(
            mgr.get("proposal_7", second.checkpoint_id).await.unwrap(),
            Some(second)
        );
    }

    #[tokio::test]
    async fn test_load_latest_missing_thread() {
        let mgr = manager(Arc::new(FlakyStore::new(0, true)));
        assert!(matches!(
            mgr.load_latest("proposal_404").await,
            Err(CheckpointError::ThreadNotFound(_))
        ));
    }
}
