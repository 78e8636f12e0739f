//! SQLite checkpoint store.
//!
//! Implements `CheckpointStore` from `draftline-core`. Each checkpoint is one
//! row; state, metadata, pending tasks and the config snapshot are JSON text
//! columns. Write order is the autoincrement `seq` column, so "latest" never
//! depends on clock resolution.

use chrono::{DateTime, SecondsFormat, Utc};
use draftline_core::repository::SortOrder;
use draftline_core::repository::checkpoint::{CheckpointStore, ListOptions};
use draftline_types::checkpoint::{Checkpoint, ThreadId, ThreadSummary};
use draftline_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct CheckpointRow {
    thread_id: String,
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    state: String,
    metadata: String,
    next_steps: String,
    tasks: String,
    config: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            checkpoint_id: row.try_get("checkpoint_id")?,
            parent_checkpoint_id: row.try_get("parent_checkpoint_id")?,
            state: row.try_get("state")?,
            metadata: row.try_get("metadata")?,
            next_steps: row.try_get("next_steps")?,
            tasks: row.try_get("tasks")?,
            config: row.try_get("config")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        Ok(Checkpoint {
            thread_id: ThreadId::parse(&self.thread_id)
                .map_err(|e| RepositoryError::Query(format!("invalid thread id '{}': {e}", self.thread_id)))?,
            checkpoint_id: parse_uuid(&self.checkpoint_id)?,
            parent_checkpoint_id: self.parent_checkpoint_id.as_deref().map(parse_uuid).transpose()?,
            values: parse_json(&self.state, "state")?,
            metadata: parse_json(&self.metadata, "metadata")?,
            next: parse_json(&self.next_steps, "next_steps")?,
            tasks: parse_json(&self.tasks, "tasks")?,
            config: parse_json(&self.config, "config")?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct ThreadSummaryRow {
    thread_id: String,
    checkpoint_count: i64,
    checkpoint_id: String,
    created_at: String,
}

impl ThreadSummaryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            checkpoint_count: row.try_get("checkpoint_count")?,
            checkpoint_id: row.try_get("checkpoint_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_summary(self) -> Result<ThreadSummary, RepositoryError> {
        Ok(ThreadSummary {
            thread_id: ThreadId::parse(&self.thread_id)
                .map_err(|e| RepositoryError::Query(format!("invalid thread id '{}': {e}", self.thread_id)))?,
            checkpoint_count: self.checkpoint_count.max(0) as u64,
            latest_checkpoint_id: parse_uuid(&self.checkpoint_id)?,
            latest_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid UUID '{s}': {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, column: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Serialization(format!("invalid {column} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

/// Lock contention and pool exhaustion are connection-level and retryable;
/// a duplicate checkpoint id is a conflict; everything else is a query error.
fn map_sqlx_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection(e.to_string())
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(db.message().to_string()),
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            if message.contains("locked") || message.contains("busy") {
                RepositoryError::Connection(e.to_string())
            } else {
                RepositoryError::Query(e.to_string())
            }
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

fn row_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<Uuid, RepositoryError> {
        let state = to_json(&checkpoint.values)?;
        let metadata = to_json(&checkpoint.metadata)?;
        let next_steps = to_json(&checkpoint.next)?;
        let tasks = to_json(&checkpoint.tasks)?;
        let config = to_json(&checkpoint.config)?;

        sqlx::query(
            r#"INSERT INTO checkpoints
               (thread_id, checkpoint_id, parent_checkpoint_id, state, metadata, next_steps, tasks, config, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(checkpoint.thread_id.as_str())
        .bind(checkpoint.checkpoint_id.to_string())
        .bind(checkpoint.parent_checkpoint_id.map(|id| id.to_string()))
        .bind(state)
        .bind(metadata)
        .bind(next_steps)
        .bind(tasks)
        .bind(config)
        .bind(format_datetime(&checkpoint.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            "checkpoint row inserted"
        );
        Ok(checkpoint.checkpoint_id)
    }

    async fn get(&self, thread_id: &ThreadId, checkpoint_id: Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?")
            .bind(thread_id.as_str())
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| CheckpointRow::from_row(&r).map_err(row_error)?.into_checkpoint())
            .transpose()
    }

    async fn get_latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY seq DESC LIMIT 1")
            .bind(thread_id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| CheckpointRow::from_row(&r).map_err(row_error)?.into_checkpoint())
            .transpose()
    }

    async fn list(&self, thread_id: &ThreadId, options: ListOptions) -> Result<Vec<Checkpoint>, RepositoryError> {
        let sql = match options.order {
            SortOrder::Asc => "SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY seq ASC LIMIT ?",
            SortOrder::Desc => "SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY seq DESC LIMIT ?",
        };
        // SQLite treats a negative LIMIT as unbounded.
        let limit = options.limit.map(i64::from).unwrap_or(-1);

        let rows = sqlx::query(sql)
            .bind(thread_id.as_str())
            .bind(limit)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|r| CheckpointRow::from_row(r).map_err(row_error)?.into_checkpoint())
            .collect()
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT c.thread_id, t.checkpoint_count, c.checkpoint_id, c.created_at
               FROM checkpoints c
               JOIN (SELECT thread_id, COUNT(*) AS checkpoint_count, MAX(seq) AS max_seq
                     FROM checkpoints GROUP BY thread_id) t
                 ON c.seq = t.max_seq
               ORDER BY c.seq DESC"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|r| ThreadSummaryRow::from_row(r).map_err(row_error)?.into_summary())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use draftline_types::checkpoint::{CheckpointMetadata, CheckpointSource, PendingTask};
    use draftline_types::status::{ProcessingStatus, RunStatus};
    use draftline_types::workflow::{SectionRecord, WorkflowState};

    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteCheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open_in(dir.path()).await.unwrap();
        (dir, SqliteCheckpointStore::new(pool))
    }

    fn thread(raw: &str) -> ThreadId {
        ThreadId::parse(raw).unwrap()
    }

    fn checkpoint(thread_id: &str, parent: Option<Uuid>, step: &str) -> Checkpoint {
        let mut state = WorkflowState::new(thread_id, "Grant", "proposal");
        state.sections = state
            .sections
            .merge([SectionRecord::new("introduction", "Introduction").with_status(ProcessingStatus::AwaitingReview)])
            .unwrap();
        Checkpoint::new(
            thread(thread_id),
            parent,
            &state,
            CheckpointMetadata {
                source: CheckpointSource::Step,
                step: Some(step.to_string()),
                step_count: 1,
                run_status: RunStatus::Interrupted,
            },
            vec![step.to_string()],
            serde_json::json!({"max_steps": 50}),
        )
        .unwrap()
        .with_tasks(vec![PendingTask {
            step: step.to_string(),
            interrupt: Some(format!("{step}:introduction")),
        }])
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, store) = store().await;
        let original = checkpoint("proposal_42", None, "write_section");

        let id = store.put(&original).await.unwrap();
        assert_eq!(id, original.checkpoint_id);

        let loaded = store.get(&original.thread_id, id).await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(
            loaded.state().unwrap().sections.get("introduction").unwrap().status,
            ProcessingStatus::AwaitingReview
        );
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, store) = store().await;
        assert!(store.get(&thread("proposal_1"), Uuid::now_v7()).await.unwrap().is_none());
        assert!(store.get_latest(&thread("proposal_1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_conflict() {
        let (_dir, store) = store().await;
        let cp = checkpoint("proposal_42", None, "research");
        store.put(&cp).await.unwrap();

        let err = store.put(&cp).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)), "got {err:?}");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_latest_follows_write_order() {
        let (_dir, store) = store().await;
        let first = checkpoint("proposal_42", None, "research");
        let mut second = checkpoint("proposal_42", Some(first.checkpoint_id), "write_section");
        // Clock skew must not reorder history.
        second.created_at = first.created_at - chrono::Duration::seconds(5);

        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        let latest = store.get_latest(&first.thread_id).await.unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);
        assert_eq!(latest.parent_checkpoint_id, Some(first.checkpoint_id));
    }

    #[tokio::test]
    async fn test_list_order_and_limit() {
        let (_dir, store) = store().await;
        let mut parent = None;
        let mut ids = Vec::new();
        for step in ["research", "analysis", "write_section"] {
            let cp = checkpoint("proposal_42", parent, step);
            parent = Some(cp.checkpoint_id);
            ids.push(store.put(&cp).await.unwrap());
        }
        store.put(&checkpoint("proposal_7", None, "research")).await.unwrap();

        let thread_id = thread("proposal_42");
        let asc = store.list(&thread_id, ListOptions::ascending()).await.unwrap();
        assert_eq!(asc.iter().map(|c| c.checkpoint_id).collect::<Vec<_>>(), ids);

        let desc = store
            .list(&thread_id, ListOptions::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(desc.iter().map(|c| c.checkpoint_id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn test_delete_thread_only_touches_that_thread() {
        let (_dir, store) = store().await;
        store.put(&checkpoint("proposal_42", None, "research")).await.unwrap();
        store.put(&checkpoint("proposal_42", None, "analysis")).await.unwrap();
        store.put(&checkpoint("proposal_7", None, "research")).await.unwrap();

        assert_eq!(store.delete_thread(&thread("proposal_42")).await.unwrap(), 2);
        assert_eq!(store.delete_thread(&thread("proposal_42")).await.unwrap(), 0);
        assert!(store.get_latest(&thread("proposal_42")).await.unwrap().is_none());
        assert!(store.get_latest(&thread("proposal_7")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_threads_most_recent_first() {
        let (_dir, store) = store().await;
        store.put(&checkpoint("proposal_42", None, "research")).await.unwrap();
        store.put(&checkpoint("proposal_7", None, "research")).await.unwrap();
        let last = checkpoint("proposal_42", None, "analysis");
        store.put(&last).await.unwrap();

        let threads = store.list_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread_id.as_str(), "proposal_42");
        assert_eq!(threads[0].checkpoint_count, 2);
        assert_eq!(threads[0].latest_checkpoint_id, last.checkpoint_id);
        assert_eq!(threads[1].thread_id.as_str(), "proposal_7");
        assert_eq!(threads[1].checkpoint_count, 1);
    }

    #[tokio::test]
    async fn test_checkpoints_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint("proposal_42", None, "research");
        {
            let store = SqliteCheckpointStore::new(DatabasePool::open_in(dir.path()).await.unwrap());
            store.put(&cp).await.unwrap();
        }
        let store = SqliteCheckpointStore::new(DatabasePool::open_in(dir.path()).await.unwrap());
        let loaded = store.get_latest(&cp.thread_id).await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, cp.checkpoint_id);
    }
}
