//! Workflow engine: step dispatch, retry, review interrupts and resume.
//!
//! Executes one step at a time per thread. Every step outcome is committed as
//! a checkpoint before the next routing decision, so a crash loses at most
//! the step that was in flight.
//!
//! # Execution flow
//!
//! 1. Dispatch: the step's target artifact moves `queued -> running`
//!    (approved targets are skipped; a target awaiting review fails the run).
//! 2. Run with retry: failures are classified and retried per `RetryPolicy`;
//!    exhaustion records an `ErrorEvent`, moves the artifact to `error` and
//!    fails the run.
//! 3. Commit: the step's `StateUpdate` is merged. Review steps move the
//!    artifact to `awaiting_review`, raise the interrupt and return.
//! 4. Route and checkpoint, then repeat until `END`, an interrupt,
//!    cancellation or the step budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use draftline_types::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource, PendingTask, ThreadId};
use draftline_types::config::EngineConfig;
use draftline_types::error::ErrorCategory;
use draftline_types::evaluation::CriteriaRegistry;
use draftline_types::event::EngineEvent;
use draftline_types::feedback::{FeedbackAction, HumanFeedback};
use draftline_types::message::Message;
use draftline_types::status::{ProcessingStatus, RunStatus};
use draftline_types::workflow::{ErrorEvent, InterruptStatus, StateError, WorkflowState};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager, CheckpointWrite};
use super::feedback::{FeedbackError, apply_feedback};
use super::graph::{GraphError, Route, WorkflowGraph};
use super::readiness::AssemblyReadiness;
use super::router;
use super::staleness::{StaleMark, StalenessTracker};
use super::step::{BoxStep, StepContext, StepError, apply_update};
use crate::context::ContextBudgetManager;
use crate::event::EventBus;
use crate::llm::BoxLlmClient;
use crate::repository::CheckpointStore;
use crate::resilience::{RetryPolicy, classify};

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// Where a run stopped.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub thread_id: ThreadId,
    pub status: RunStatus,
    pub state: WorkflowState,
    /// Latest checkpoint written for the thread.
    pub checkpoint_id: Uuid,
    pub steps_executed: u32,
    /// Interrupt point when `status` is `Interrupted`.
    pub interrupt: Option<String>,
    /// Surfaced failure when `status` is `Failed`.
    pub error: Option<ErrorEvent>,
}

/// Result of [`WorkflowEngine::edit_artifact`].
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub checkpoint_id: Uuid,
    pub version: u32,
    pub stale: Vec<StaleMark>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error("thread '{0}' already exists; resume or continue it instead")]
    ThreadExists(String),

    #[error("thread '{0}' is already running")]
    ThreadBusy(String),

    #[error("thread '{0}' is not waiting for feedback")]
    NotInterrupted(String),

    #[error("thread '{thread_id}' is waiting for feedback at '{point}'")]
    AwaitingFeedback { thread_id: String, point: String },

    #[error("artifact '{artifact}' is {status} and cannot be edited")]
    ArtifactBusy { artifact: String, status: ProcessingStatus },

    #[error("'{0}' does not resolve a stale artifact; use regenerate or keep_current")]
    InvalidResolution(FeedbackAction),

    #[error("no step to resume for thread '{0}'")]
    NoResumeStep(String),

    #[error("thread '{thread_id}' is waiting for feedback on '{expected}', not '{actual}'")]
    FeedbackTarget {
        thread_id: String,
        expected: String,
        actual: String,
    },

    #[error("artifact '{artifact}' is {status} and cannot be dispatched")]
    NotDispatchable { artifact: String, status: ProcessingStatus },
}

// ---------------------------------------------------------------------------
// Active-run bookkeeping
// ---------------------------------------------------------------------------

/// Marks a thread as running until dropped.
struct ActiveRun<'a> {
    active: &'a DashMap<ThreadId, CancellationToken>,
    thread_id: ThreadId,
    token: CancellationToken,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.thread_id);
    }
}

/// Position of a run within its thread's checkpoint chain.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    parent: Uuid,
    /// Steps executed over the thread's lifetime.
    step_count: u32,
    /// Steps executed by this call.
    executed: u32,
}

fn write(
    cursor: Cursor,
    source: CheckpointSource,
    step: Option<&str>,
    run_status: RunStatus,
    next: Vec<String>,
) -> CheckpointWrite {
    CheckpointWrite {
        parent: Some(cursor.parent),
        metadata: CheckpointMetadata {
            source,
            step: step.map(str::to_string),
            step_count: cursor.step_count,
            run_status,
        },
        next,
        tasks: Vec::new(),
    }
}

/// Walk an artifact to `running` along allowed edges.
///
/// Artifacts awaiting review or already approved are never dispatched.
fn ensure_running(state: &mut WorkflowState, artifact: &str) -> Result<(), EngineError> {
    match state.artifact_status(artifact) {
        None | Some(ProcessingStatus::Running) => return Ok(()),
        Some(ProcessingStatus::Queued) => {}
        Some(
            ProcessingStatus::NotStarted
            | ProcessingStatus::NeedsRevision
            | ProcessingStatus::Error
            | ProcessingStatus::Stale,
        ) => {
            state.set_artifact_status(artifact, ProcessingStatus::Queued)?;
        }
        Some(status @ (ProcessingStatus::AwaitingReview | ProcessingStatus::Approved)) => {
            return Err(EngineError::NotDispatchable {
                artifact: artifact.to_string(),
                status,
            });
        }
    }
    state.set_artifact_status(artifact, ProcessingStatus::Running)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes a [`WorkflowGraph`] against threads persisted in `S`.
pub struct WorkflowEngine<S: CheckpointStore> {
    graph: Arc<WorkflowGraph>,
    checkpoints: CheckpointManager<S>,
    llm: Arc<BoxLlmClient>,
    context: Arc<ContextBudgetManager>,
    criteria: Arc<CriteriaRegistry>,
    retry: RetryPolicy,
    staleness: StalenessTracker,
    event_bus: EventBus,
    step_timeout: Duration,
    max_steps: u32,
    /// Cancellation tokens of threads currently executing.
    active: DashMap<ThreadId, CancellationToken>,
}

impl<S: CheckpointStore> WorkflowEngine<S> {
    /// Fails if `config` cannot be snapshotted for checkpoint metadata.
    pub fn new(
        graph: WorkflowGraph,
        store: S,
        llm: Arc<BoxLlmClient>,
        criteria: Arc<CriteriaRegistry>,
        config: EngineConfig,
        event_bus: EventBus,
    ) -> Result<Self, EngineError> {
        let snapshot = serde_json::to_value(&config).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(Self {
            graph: Arc::new(graph),
            checkpoints: CheckpointManager::new(store, config.checkpoint_retry.clone(), snapshot),
            context: Arc::new(ContextBudgetManager::new(
                config.context.clone(),
                Arc::clone(&llm),
                event_bus.clone(),
            )),
            llm,
            criteria,
            retry: RetryPolicy::new(config.retry.clone()),
            staleness: StalenessTracker::new(config.dependencies.clone()),
            event_bus,
            step_timeout: Duration::from_secs(config.step_timeout_secs),
            max_steps: config.max_steps_per_run,
            active: DashMap::new(),
        })
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Whether a run is currently executing on `thread_id`.
    pub fn is_active(&self, thread_id: &str) -> bool {
        ThreadId::parse(thread_id).is_ok_and(|id| self.active.contains_key(&id))
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Start a new thread from `initial` at the graph's entry step.
    #[tracing::instrument(name = "workflow_run", skip(self, initial), fields(thread_id = %thread_id))]
    pub async fn run(&self, thread_id: &str, initial: WorkflowState) -> Result<RunOutcome, EngineError> {
        let thread_id = CheckpointManager::<S>::validate_thread_id(thread_id)?;
        let guard = self.acquire(&thread_id)?;

        if self.checkpoints.get_latest(thread_id.as_str()).await?.is_some() {
            return Err(EngineError::ThreadExists(thread_id.to_string()));
        }
        initial.sections.validate().map_err(StateError::from)?;

        let mut state = initial;
        state.document.status = RunStatus::Running;
        let entry = self.graph.entry().to_string();

        let input = self
            .commit(
                &thread_id,
                &state,
                CheckpointWrite {
                    parent: None,
                    metadata: CheckpointMetadata {
                        source: CheckpointSource::Input,
                        step: None,
                        step_count: 0,
                        run_status: RunStatus::Running,
                    },
                    next: vec![entry.clone()],
                    tasks: Vec::new(),
                },
            )
            .await?;

        tracing::info!(
            thread_id = %thread_id,
            entry = entry.as_str(),
            sections = state.sections.len(),
            "starting workflow run"
        );

        let cursor = Cursor {
            parent: input.checkpoint_id,
            step_count: 0,
            executed: 0,
        };
        self.execute(&thread_id, state, cursor, Some(entry), &guard.token).await
    }

    /// Apply reviewer feedback to an interrupted thread and continue it.
    #[tracing::instrument(
        name = "workflow_resume",
        skip(self, feedback),
        fields(thread_id = %thread_id, artifact = %feedback.target_artifact, action = %feedback.action)
    )]
    pub async fn resume(&self, thread_id: &str, feedback: HumanFeedback) -> Result<RunOutcome, EngineError> {
        let thread_id = CheckpointManager::<S>::validate_thread_id(thread_id)?;
        let guard = self.acquire(&thread_id)?;
        let (latest, state) = self.checkpoints.load_latest(thread_id.as_str()).await?;

        if !state.interrupt.is_interrupted {
            return Err(EngineError::NotInterrupted(thread_id.to_string()));
        }
        let expected = state
            .interrupt
            .point
            .as_deref()
            .and_then(|point| point.split_once(':'))
            .map(|(_, artifact)| artifact);
        if let Some(expected) = expected.filter(|artifact| *artifact != feedback.target_artifact) {
            return Err(EngineError::FeedbackTarget {
                thread_id: thread_id.to_string(),
                expected: expected.to_string(),
                actual: feedback.target_artifact.clone(),
            });
        }

        let resume_step = latest
            .tasks
            .first()
            .map(|task| task.step.clone())
            .or_else(|| {
                state
                    .interrupt
                    .point
                    .as_deref()
                    .and_then(|point| point.split_once(':'))
                    .map(|(step, _)| step.to_string())
            })
            .or_else(|| {
                self.graph
                    .producer_for(&feedback.target_artifact, &state)
                    .map(str::to_string)
            })
            .filter(|step| self.graph.contains(step))
            .ok_or_else(|| EngineError::NoResumeStep(thread_id.to_string()))?;

        let criteria = self.criteria.get(&state.document.content_type);
        let outcome = apply_feedback(&state, &feedback, criteria)?;
        let mut state = outcome.state;
        state.interrupt.feedback = Some(feedback.clone());
        state.interrupt.clear();

        if let Some(source) = outcome.propagate_from.as_deref() {
            self.staleness
                .propagate(&mut state, source, thread_id.as_str(), &self.event_bus);
        }

        let decision = router::route(&self.graph, &resume_step, &state)?;
        let next = match decision.destination {
            Route::Step(name) => Some(name),
            Route::End => None,
        };
        let run_status = if next.is_some() {
            RunStatus::Running
        } else {
            RunStatus::Completed
        };
        state.document.status = run_status;

        let cursor = Cursor {
            parent: latest.checkpoint_id,
            step_count: latest.metadata.step_count,
            executed: 0,
        };
        let resumed = self
            .commit(
                &thread_id,
                &state,
                write(
                    cursor,
                    CheckpointSource::Resume,
                    Some(&resume_step),
                    run_status,
                    next.iter().cloned().collect(),
                ),
            )
            .await?;

        tracing::info!(
            thread_id = %thread_id,
            artifact = feedback.target_artifact.as_str(),
            action = %feedback.action,
            status = ?state.artifact_status(&feedback.target_artifact),
            next = ?next,
            "feedback applied, resuming"
        );

        let cursor = Cursor {
            parent: resumed.checkpoint_id,
            ..cursor
        };
        self.execute(&thread_id, state, cursor, next, &guard.token).await
    }

    /// Continue a thread that is not waiting for feedback (after a crash,
    /// failure or cancellation) from its latest checkpoint.
    ///
    /// Artifacts in `error` are re-queued first. An artifact left in
    /// `awaiting_review` without a pending interrupt gets its interrupt back.
    #[tracing::instrument(name = "workflow_continue", skip(self), fields(thread_id = %thread_id))]
    pub async fn continue_thread(&self, thread_id: &str) -> Result<RunOutcome, EngineError> {
        let thread_id = CheckpointManager::<S>::validate_thread_id(thread_id)?;
        let guard = self.acquire(&thread_id)?;
        let (latest, mut state) = self.checkpoints.load_latest(thread_id.as_str()).await?;

        if state.interrupt.is_interrupted {
            return Err(EngineError::AwaitingFeedback {
                thread_id: thread_id.to_string(),
                point: state.interrupt.point.clone().unwrap_or_default(),
            });
        }

        let cursor = Cursor {
            parent: latest.checkpoint_id,
            step_count: latest.metadata.step_count,
            executed: 0,
        };
        let unreviewed = state
            .artifact_ids()
            .into_iter()
            .find(|id| state.artifact_status(id) == Some(ProcessingStatus::AwaitingReview));
        if let Some(artifact) = unreviewed {
            let step = self
                .graph
                .producer_for(&artifact, &state)
                .map(str::to_string)
                .or_else(|| latest.next.first().cloned())
                .ok_or_else(|| EngineError::NoResumeStep(thread_id.to_string()))?;
            tracing::warn!(
                thread_id = %thread_id,
                artifact = artifact.as_str(),
                step = step.as_str(),
                "artifact awaiting review without an interrupt, raising it again"
            );
            return self.interrupt(&thread_id, state, cursor, &step, &artifact).await;
        }

        let failed: Vec<String> = state
            .artifact_ids()
            .into_iter()
            .filter(|id| state.artifact_status(id) == Some(ProcessingStatus::Error))
            .collect();
        for artifact in &failed {
            state.set_artifact_status(artifact, ProcessingStatus::Queued)?;
        }

        let next = latest.next.first().cloned().or_else(|| {
            failed
                .iter()
                .find_map(|artifact| self.graph.producer_for(artifact, &state).map(str::to_string))
        });

        if next.is_none() {
            tracing::info!(thread_id = %thread_id, "nothing left to run");
            return Ok(RunOutcome {
                thread_id,
                status: state.document.status,
                state,
                checkpoint_id: latest.checkpoint_id,
                steps_executed: 0,
                interrupt: None,
                error: None,
            });
        }

        state.document.status = RunStatus::Running;
        let checkpoint = self
            .commit(
                &thread_id,
                &state,
                write(
                    cursor,
                    CheckpointSource::Update,
                    None,
                    RunStatus::Running,
                    next.iter().cloned().collect(),
                ),
            )
            .await?;

        tracing::info!(
            thread_id = %thread_id,
            next = ?next,
            requeued = failed.len(),
            "continuing thread"
        );

        let cursor = Cursor {
            parent: checkpoint.checkpoint_id,
            ..cursor
        };
        self.execute(&thread_id, state, cursor, next, &guard.token).await
    }

    /// Request cancellation of a running thread. Takes effect between steps.
    ///
    /// Returns `false` if the thread is not running.
    pub fn cancel(&self, thread_id: &str) -> bool {
        let Ok(thread_id) = ThreadId::parse(thread_id) else {
            return false;
        };
        match self.active.get(&thread_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(thread_id = %thread_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Replace an artifact's content outside a run and mark its dependents stale.
    #[tracing::instrument(name = "edit_artifact", skip(self, content), fields(thread_id = %thread_id))]
    pub async fn edit_artifact(
        &self,
        thread_id: &str,
        artifact: &str,
        content: serde_json::Value,
    ) -> Result<EditOutcome, EngineError> {
        let thread_id = CheckpointManager::<S>::validate_thread_id(thread_id)?;
        let _guard = self.acquire(&thread_id)?;
        let (latest, mut state) = self.checkpoints.load_latest(thread_id.as_str()).await?;

        let status = state
            .artifact_status(artifact)
            .ok_or_else(|| StateError::UnknownArtifact(artifact.to_string()))?;
        if status.is_in_flight() {
            return Err(EngineError::ArtifactBusy {
                artifact: artifact.to_string(),
                status,
            });
        }

        let version = state.replace_artifact_content(artifact, content)?;
        let stale = self
            .staleness
            .propagate(&mut state, artifact, thread_id.as_str(), &self.event_bus);

        let checkpoint = self.commit_update(&thread_id, &latest, &state, latest.next.clone()).await?;
        tracing::info!(
            thread_id = %thread_id,
            artifact,
            version,
            stale = stale.len(),
            "artifact edited"
        );

        Ok(EditOutcome {
            checkpoint_id: checkpoint.checkpoint_id,
            version,
            stale,
        })
    }

    /// Resolve a stale artifact by regenerating it or keeping the current version.
    ///
    /// Regeneration only queues the artifact; `continue_thread` runs it.
    #[tracing::instrument(name = "resolve_stale", skip(self), fields(thread_id = %thread_id))]
    pub async fn resolve_stale(
        &self,
        thread_id: &str,
        artifact: &str,
        action: FeedbackAction,
    ) -> Result<Checkpoint, EngineError> {
        if !matches!(action, FeedbackAction::Regenerate | FeedbackAction::KeepCurrent) {
            return Err(EngineError::InvalidResolution(action));
        }
        let thread_id = CheckpointManager::<S>::validate_thread_id(thread_id)?;
        let _guard = self.acquire(&thread_id)?;
        let (latest, state) = self.checkpoints.load_latest(thread_id.as_str()).await?;

        if state.interrupt.is_interrupted {
            return Err(EngineError::AwaitingFeedback {
                thread_id: thread_id.to_string(),
                point: state.interrupt.point.clone().unwrap_or_default(),
            });
        }
        if state.artifact_status(artifact) != Some(ProcessingStatus::Stale) {
            return Err(FeedbackError::NotApplicable {
                artifact: artifact.to_string(),
                status: state
                    .artifact_status(artifact)
                    .ok_or_else(|| StateError::UnknownArtifact(artifact.to_string()))?,
                action,
            }
            .into());
        }

        let feedback = HumanFeedback {
            target_artifact: artifact.to_string(),
            action,
            comments: None,
            scores: None,
        };
        let state = apply_feedback(&state, &feedback, None)?.state;

        let mut next = latest.next.clone();
        if action == FeedbackAction::Regenerate && next.is_empty() {
            if let Some(producer) = self.graph.producer_for(artifact, &state) {
                next.push(producer.to_string());
            }
        }

        let checkpoint = self.commit_update(&thread_id, &latest, &state, next).await?;
        tracing::info!(thread_id = %thread_id, artifact, action = %action, "stale artifact resolved");
        Ok(checkpoint)
    }

    /// Latest committed state of a thread.
    pub async fn state(&self, thread_id: &str) -> Result<WorkflowState, EngineError> {
        Ok(self.checkpoints.load_latest(thread_id).await?.1)
    }

    pub async fn readiness(&self, thread_id: &str) -> Result<AssemblyReadiness, EngineError> {
        Ok(AssemblyReadiness::check(&self.state(thread_id).await?))
    }

    // -----------------------------------------------------------------------
    // Execution loop
    // -----------------------------------------------------------------------

    async fn execute(
        &self,
        thread_id: &ThreadId,
        mut state: WorkflowState,
        mut cursor: Cursor,
        mut next: Option<String>,
        token: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        loop {
            let Some(step_name) = next.take() else {
                return self.finish(thread_id, state, cursor).await;
            };

            if token.is_cancelled() {
                return self.cancelled(thread_id, state, cursor, step_name).await;
            }
            if cursor.executed >= self.max_steps {
                let event = ErrorEvent::new(
                    ErrorCategory::Unknown,
                    format!("step budget of {} steps per run exhausted", self.max_steps),
                    &step_name,
                    0,
                    true,
                );
                return self.fail(thread_id, state, cursor, &step_name, None, event).await;
            }

            let step = self.graph.step(&step_name).ok_or_else(|| GraphError::UnknownStep {
                from: "route".into(),
                to: step_name.clone(),
            })?;
            let target = step.target(&state);
            let skip = target.as_deref().and_then(|a| state.artifact_status(a)) == Some(ProcessingStatus::Approved);

            let mut committed = if skip {
                tracing::debug!(
                    thread_id = %thread_id,
                    step = step_name.as_str(),
                    target = ?target,
                    "target already approved, skipping step"
                );
                state.clone()
            } else {
                if let Some(artifact) = target.as_deref() {
                    if let Err(e) = ensure_running(&mut state, artifact) {
                        let event = ErrorEvent::new(ErrorCategory::Unknown, e.to_string(), &step_name, 0, true);
                        return self
                            .fail(thread_id, state, cursor, &step_name, target.as_deref(), event)
                            .await;
                    }
                }
                match self.run_step(thread_id, &step, &state, target.as_deref()).await {
                    Ok(updated) => updated,
                    Err(event) => {
                        return self
                            .fail(thread_id, state, cursor, &step_name, target.as_deref(), event)
                            .await;
                    }
                }
            };
            cursor.executed += 1;
            cursor.step_count += 1;

            if let (false, Some(artifact)) = (skip, target.as_deref()) {
                // A step may have created its own target section.
                if let Err(e) = ensure_running(&mut committed, artifact) {
                    let event = ErrorEvent::new(ErrorCategory::Unknown, e.to_string(), &step_name, 0, true);
                    return self.fail(thread_id, state, cursor, &step_name, Some(artifact), event).await;
                }
                let awaiting_actions = self.graph.action_step_for(&step_name).is_some()
                    && committed.last_message().is_some_and(Message::has_pending_actions);
                if !awaiting_actions {
                    if step.requires_review() {
                        return self
                            .interrupt(thread_id, committed, cursor, &step_name, artifact)
                            .await;
                    }
                    committed.set_artifact_status(artifact, ProcessingStatus::Approved)?;
                }
            }

            let decision = router::route(&self.graph, &step_name, &committed)?;
            self.event_bus.publish(EngineEvent::RouteSelected {
                thread_id: thread_id.to_string(),
                from: step_name.clone(),
                destination: decision.destination.to_string(),
                reason: decision.reason.to_string(),
                target: decision.target.clone(),
                target_status: decision.target_status,
                document_status: committed.document.status,
                message_count: committed.messages.len(),
            });
            next = match decision.destination {
                Route::Step(name) => Some(name),
                Route::End => None,
            };

            let run_status = if next.is_some() {
                RunStatus::Running
            } else {
                RunStatus::Completed
            };
            committed.document.status = run_status;
            let checkpoint = self
                .commit(
                    thread_id,
                    &committed,
                    write(
                        cursor,
                        CheckpointSource::Step,
                        Some(&step_name),
                        run_status,
                        next.iter().cloned().collect(),
                    ),
                )
                .await?;
            cursor.parent = checkpoint.checkpoint_id;
            state = committed;
        }
    }

    /// Run one step with retry. On exhaustion returns the surfaced error event.
    async fn run_step(
        &self,
        thread_id: &ThreadId,
        step: &BoxStep,
        state: &WorkflowState,
        target: Option<&str>,
    ) -> Result<WorkflowState, ErrorEvent> {
        let ctx = StepContext::new(
            thread_id.clone(),
            Arc::clone(&self.llm),
            Arc::clone(&self.context),
            Arc::clone(&self.criteria),
            self.step_timeout,
        );
        let mut retries = 0;

        loop {
            self.event_bus.publish(EngineEvent::StepStarted {
                thread_id: thread_id.to_string(),
                step: step.name().to_string(),
                attempt: retries + 1,
            });
            tracing::info!(
                thread_id = %thread_id,
                step = step.name(),
                attempt = retries + 1,
                target = ?target,
                target_status = ?target.and_then(|a| state.artifact_status(a)),
                messages = state.messages.len(),
                "invoking step"
            );

            let started = Instant::now();
            let result = step
                .run(state, &ctx)
                .await
                .and_then(|update| apply_update(state, target, update).map_err(StepError::from));

            let error = match result {
                Ok(updated) => {
                    self.event_bus.publish(EngineEvent::StepCompleted {
                        thread_id: thread_id.to_string(),
                        step: step.name().to_string(),
                        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    });
                    return Ok(updated);
                }
                Err(error) => error,
            };

            let category = classify(&error);
            let event = ErrorEvent::new(category, error.to_string(), step.name(), retries, error.is_fatal());
            if !self.retry.should_retry(&event, retries) {
                return Err(ErrorEvent { fatal: true, ..event });
            }

            let delay = self.retry.delay_for(retries);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                thread_id = %thread_id,
                step = step.name(),
                category = %category,
                attempt = retries + 1,
                delay_ms,
                error = %error,
                "step failed, retrying"
            );
            self.event_bus.publish(EngineEvent::StepRetrying {
                thread_id: thread_id.to_string(),
                step: step.name().to_string(),
                attempt: retries + 1,
                category,
                delay_ms,
            });
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    async fn interrupt(
        &self,
        thread_id: &ThreadId,
        mut state: WorkflowState,
        cursor: Cursor,
        step_name: &str,
        artifact: &str,
    ) -> Result<RunOutcome, EngineError> {
        if state.artifact_status(artifact) != Some(ProcessingStatus::AwaitingReview) {
            state.set_artifact_status(artifact, ProcessingStatus::AwaitingReview)?;
        }
        let point = format!("{step_name}:{artifact}");
        state.interrupt = InterruptStatus::raise(point.clone());
        state.document.status = RunStatus::Interrupted;

        let mut checkpoint_write = write(cursor, CheckpointSource::Step, Some(step_name), RunStatus::Interrupted, Vec::new());
        checkpoint_write.tasks = vec![PendingTask {
            step: step_name.to_string(),
            interrupt: Some(point.clone()),
        }];
        let checkpoint = self.commit(thread_id, &state, checkpoint_write).await?;

        self.event_bus.publish(EngineEvent::RunInterrupted {
            thread_id: thread_id.to_string(),
            point: point.clone(),
        });
        tracing::info!(
            thread_id = %thread_id,
            step = step_name,
            artifact,
            steps = cursor.executed,
            "awaiting review"
        );

        Ok(RunOutcome {
            thread_id: thread_id.clone(),
            status: RunStatus::Interrupted,
            state,
            checkpoint_id: checkpoint.checkpoint_id,
            steps_executed: cursor.executed,
            interrupt: Some(point),
            error: None,
        })
    }

    async fn fail(
        &self,
        thread_id: &ThreadId,
        mut state: WorkflowState,
        cursor: Cursor,
        step_name: &str,
        target: Option<&str>,
        event: ErrorEvent,
    ) -> Result<RunOutcome, EngineError> {
        tracing::error!(
            thread_id = %thread_id,
            step = step_name,
            category = %event.category,
            retry_count = event.retry_count,
            error = event.message.as_str(),
            "step failed"
        );

        if let Some(artifact) = target.filter(|a| state.artifact_status(a) == Some(ProcessingStatus::Running)) {
            if let Err(e) = state.set_artifact_status(artifact, ProcessingStatus::Error) {
                tracing::warn!(thread_id = %thread_id, artifact, error = %e, "could not mark artifact as failed");
            }
        }
        state.record_error(event.clone());
        state.document.status = RunStatus::Failed;

        let checkpoint = self
            .commit(
                thread_id,
                &state,
                write(
                    cursor,
                    CheckpointSource::Step,
                    Some(step_name),
                    RunStatus::Failed,
                    vec![step_name.to_string()],
                ),
            )
            .await?;

        self.event_bus.publish(EngineEvent::StepFailed {
            thread_id: thread_id.to_string(),
            step: step_name.to_string(),
            category: event.category,
            error: event.message.clone(),
            retry_count: event.retry_count,
        });
        self.event_bus.publish(EngineEvent::RunFailed {
            thread_id: thread_id.to_string(),
            error: event.user_message(),
        });

        Ok(RunOutcome {
            thread_id: thread_id.clone(),
            status: RunStatus::Failed,
            state,
            checkpoint_id: checkpoint.checkpoint_id,
            steps_executed: cursor.executed,
            interrupt: None,
            error: Some(event),
        })
    }

    async fn cancelled(
        &self,
        thread_id: &ThreadId,
        mut state: WorkflowState,
        cursor: Cursor,
        step_name: String,
    ) -> Result<RunOutcome, EngineError> {
        state.document.status = RunStatus::Cancelled;
        let checkpoint = self
            .commit(
                thread_id,
                &state,
                write(cursor, CheckpointSource::Step, None, RunStatus::Cancelled, vec![step_name]),
            )
            .await?;

        self.event_bus.publish(EngineEvent::RunCancelled {
            thread_id: thread_id.to_string(),
        });
        tracing::info!(thread_id = %thread_id, steps = cursor.executed, "run cancelled");

        Ok(RunOutcome {
            thread_id: thread_id.clone(),
            status: RunStatus::Cancelled,
            state,
            checkpoint_id: checkpoint.checkpoint_id,
            steps_executed: cursor.executed,
            interrupt: None,
            error: None,
        })
    }

    async fn finish(&self, thread_id: &ThreadId, mut state: WorkflowState, cursor: Cursor) -> Result<RunOutcome, EngineError> {
        let checkpoint_id = if state.document.status == RunStatus::Completed {
            cursor.parent
        } else {
            state.document.status = RunStatus::Completed;
            self.commit(
                thread_id,
                &state,
                write(cursor, CheckpointSource::Step, None, RunStatus::Completed, Vec::new()),
            )
            .await?
            .checkpoint_id
        };

        self.event_bus.publish(EngineEvent::RunCompleted {
            thread_id: thread_id.to_string(),
            steps: cursor.executed,
        });
        tracing::info!(thread_id = %thread_id, steps = cursor.executed, "run completed");

        Ok(RunOutcome {
            thread_id: thread_id.clone(),
            status: RunStatus::Completed,
            state,
            checkpoint_id,
            steps_executed: cursor.executed,
            interrupt: None,
            error: None,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn acquire(&self, thread_id: &ThreadId) -> Result<ActiveRun<'_>, EngineError> {
        match self.active.entry(thread_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::ThreadBusy(thread_id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(ActiveRun {
                    active: &self.active,
                    thread_id: thread_id.clone(),
                    token,
                })
            }
        }
    }

    /// Persist a checkpoint. Failure is fatal for the current step.
    async fn commit(
        &self,
        thread_id: &ThreadId,
        state: &WorkflowState,
        checkpoint_write: CheckpointWrite,
    ) -> Result<Checkpoint, EngineError> {
        let step = checkpoint_write.metadata.step.clone();
        match self.checkpoints.put(thread_id.as_str(), state, checkpoint_write).await {
            Ok(checkpoint) => {
                self.event_bus.publish(EngineEvent::CheckpointWritten {
                    thread_id: thread_id.to_string(),
                    checkpoint_id: checkpoint.checkpoint_id,
                    step,
                });
                Ok(checkpoint)
            }
            Err(e) => {
                tracing::error!(
                    thread_id = %thread_id,
                    step = ?step,
                    error = %e,
                    "checkpoint write failed, aborting run"
                );
                self.event_bus.publish(EngineEvent::StepFailed {
                    thread_id: thread_id.to_string(),
                    step: step.unwrap_or_default(),
                    category: ErrorCategory::CheckpointError,
                    error: e.to_string(),
                    retry_count: 0,
                });
                self.event_bus.publish(EngineEvent::RunFailed {
                    thread_id: thread_id.to_string(),
                    error: ErrorCategory::CheckpointError.user_message().to_string(),
                });
                Err(EngineError::Checkpoint(e))
            }
        }
    }

    /// Checkpoint an out-of-run change, keeping the thread's pending work.
    async fn commit_update(
        &self,
        thread_id: &ThreadId,
        latest: &Checkpoint,
        state: &WorkflowState,
        next: Vec<String>,
    ) -> Result<Checkpoint, EngineError> {
        let cursor = Cursor {
            parent: latest.checkpoint_id,
            step_count: latest.metadata.step_count,
            executed: 0,
        };
        let mut checkpoint_write = write(cursor, CheckpointSource::Update, None, state.document.status, next);
        checkpoint_write.tasks = latest.tasks.clone();
        self.commit(thread_id, state, checkpoint_write).await
    }
}

impl<S: CheckpointStore> std::fmt::Debug for WorkflowEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("graph", &self.graph)
            .field("active_threads", &self.active.len())
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}
