//! Application state for CLI commands.
//!
//! Pins the generic checkpoint manager to the SQLite store.

use std::path::PathBuf;

use anyhow::Context;
use draftline_core::workflow::CheckpointManager;
use draftline_infra::config::load_engine_config;
use draftline_infra::criteria::load_criteria;
use draftline_infra::filesystem::{criteria_dir, resolve_data_dir};
use draftline_infra::sqlite::{DatabasePool, SqliteCheckpointStore};
use draftline_types::config::EngineConfig;
use draftline_types::evaluation::CriteriaRegistry;

pub type ConcreteCheckpointManager = CheckpointManager<SqliteCheckpointStore>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub criteria: CriteriaRegistry,
    pub checkpoints: ConcreteCheckpointManager,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_in(resolve_data_dir()).await
    }

    /// Open the database under `data_dir` and load config and criteria from it.
    pub async fn init_in(data_dir: PathBuf) -> anyhow::Result<Self> {
        let pool = DatabasePool::open_in(&data_dir)
            .await
            .with_context(|| format!("failed to open database in {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let criteria_path = criteria_dir(&data_dir, config.criteria_dir.as_deref());
        let criteria = load_criteria(&criteria_path)
            .await
            .with_context(|| format!("failed to read criteria from {}", criteria_path.display()))?;

        let snapshot = serde_json::to_value(&config).context("failed to snapshot engine config")?;
        let checkpoints = CheckpointManager::new(
            SqliteCheckpointStore::new(pool),
            config.checkpoint_retry.clone(),
            snapshot,
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            data_dir,
            config,
            criteria,
            checkpoints,
        })
    }
}
