//! Step trait, its dynamic-dispatch wrapper and the per-call context.
//!
//! A step reads the current `WorkflowState` and returns a `StateUpdate`; it
//! never mutates state directly. The engine applies updates through
//! [`apply_update`] and owns every status transition.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use draftline_types::checkpoint::ThreadId;
use draftline_types::error::LlmError;
use draftline_types::evaluation::{CriteriaRegistry, EvaluationCriteria, EvaluationResult};
use draftline_types::message::Message;
use draftline_types::workflow::{SectionRecord, StateError, WorkflowState};

use crate::context::{ContextBudgetManager, ContextError};
use crate::llm::{BoxLlmClient, GenerateRequest};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("summarization failed: {0}")]
    Summarization(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Errors that no retry can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::State(_))
    }
}

// ---------------------------------------------------------------------------
// StateUpdate
// ---------------------------------------------------------------------------

/// Changes a step asks the engine to commit.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// New content for the step's target artifact.
    pub content: Option<serde_json::Value>,
    pub evaluation: Option<EvaluationResult>,
    /// Sections to insert or replace.
    pub sections: Vec<SectionRecord>,
    /// Appended to the message history.
    pub messages: Vec<Message>,
}

impl StateUpdate {
    pub fn content(content: impl Into<serde_json::Value>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationResult) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_sections(mut self, sections: Vec<SectionRecord>) -> Self {
        self.sections = sections;
        self
    }

    /// Whether the last appended message requests actions.
    pub fn requests_actions(&self) -> bool {
        self.messages.last().is_some_and(Message::has_pending_actions)
    }
}

/// Commit `update` onto `state`, returning the new state.
///
/// Sections merge first (so a step may create its own target), then the
/// target's content and evaluation are replaced and messages appended.
/// The target's status stays with the engine: a record for it keeps the
/// status it had before the step.
pub fn apply_update(
    state: &WorkflowState,
    target: Option<&str>,
    update: StateUpdate,
) -> Result<WorkflowState, StateError> {
    let mut next = state.clone();
    if !update.sections.is_empty() {
        let mut sections = update.sections;
        if let Some(target) = target {
            let owned = state.artifact_status(target).unwrap_or_default();
            for record in sections.iter_mut().filter(|r| r.id == target) {
                record.status = owned;
            }
        }
        next.sections = next.sections.merge(sections)?;
    }
    if let Some(target) = target {
        if let Some(content) = update.content {
            next.replace_artifact_content(target, content)?;
        }
        if update.evaluation.is_some() {
            next.set_evaluation(target, update.evaluation)?;
        }
    }
    next.messages.extend(update.messages);
    next.updated_at = chrono::Utc::now();
    Ok(next)
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Collaborators available to a running step.
#[derive(Clone)]
pub struct StepContext {
    pub thread_id: ThreadId,
    llm: Arc<BoxLlmClient>,
    context: Arc<ContextBudgetManager>,
    criteria: Arc<CriteriaRegistry>,
    call_timeout: Duration,
}

impl StepContext {
    pub fn new(
        thread_id: ThreadId,
        llm: Arc<BoxLlmClient>,
        context: Arc<ContextBudgetManager>,
        criteria: Arc<CriteriaRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            thread_id,
            llm,
            context,
            criteria,
            call_timeout,
        }
    }

    /// Budget `messages` for `model` and call the generator under the call timeout.
    pub async fn generate(&self, model: &str, prompt: &str, messages: &[Message]) -> Result<String, StepError> {
        let prepared = self.context.prepare_messages(messages, model).await?;
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            messages: prepared.messages,
        };
        match tokio::time::timeout(self.call_timeout, self.llm.generate(&request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StepError::Llm(LlmError::Timeout(
                u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            ))),
        }
    }

    pub fn criteria_for(&self, content_type: &str) -> Option<&EvaluationCriteria> {
        self.criteria.get(content_type)
    }

    pub fn context_manager(&self) -> &ContextBudgetManager {
        &self.context
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("thread_id", &self.thread_id)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One node of the workflow graph.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Artifact this invocation writes, if any. Evaluated against the current state.
    fn target(&self, state: &WorkflowState) -> Option<String>;

    /// Whether a successful run pauses for human review.
    fn requires_review(&self) -> bool {
        true
    }

    fn run(
        &self,
        state: &WorkflowState,
        ctx: &StepContext,
    ) -> impl Future<Output = Result<StateUpdate, StepError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`Step`].
pub trait StepDyn: Send + Sync {
    fn name(&self) -> &str;
    fn target(&self, state: &WorkflowState) -> Option<String>;
    fn requires_review(&self) -> bool;
    fn run_boxed<'a>(
        &'a self,
        state: &'a WorkflowState,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<StateUpdate, StepError>>;
}

impl<T: Step> StepDyn for T {
    fn name(&self) -> &str {
        Step::name(self)
    }

    fn target(&self, state: &WorkflowState) -> Option<String> {
        Step::target(self, state)
    }

    fn requires_review(&self) -> bool {
        Step::requires_review(self)
    }

    fn run_boxed<'a>(
        &'a self,
        state: &'a WorkflowState,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<StateUpdate, StepError>> {
        Box::pin(self.run(state, ctx))
    }
}

/// Type-erased step stored in the graph.
pub struct BoxStep {
    inner: Box<dyn StepDyn>,
}

impl BoxStep {
    pub fn new<T: Step + 'static>(step: T) -> Self {
        Self { inner: Box::new(step) }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn target(&self, state: &WorkflowState) -> Option<String> {
        self.inner.target(state)
    }

    pub fn requires_review(&self) -> bool {
        self.inner.requires_review()
    }

    pub async fn run(&self, state: &WorkflowState, ctx: &StepContext) -> Result<StateUpdate, StepError> {
        self.inner.run_boxed(state, ctx).await
    }
}

impl std::fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStep").field("name", &self.name()).finish()
    }
}
