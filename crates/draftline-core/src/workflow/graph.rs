//! Workflow graph: named steps, edges, and build-time validation.
//!
//! Edges may form loops (an action step returning to its caller, a step
//! re-running after revision), so validation checks references and
//! reachability with `petgraph` rather than requiring a DAG.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use draftline_types::workflow::WorkflowState;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::step::{BoxStep, Step};

/// Where execution goes after a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Step(String),
    End,
}

impl Route {
    pub fn step(name: impl Into<String>) -> Self {
        Route::Step(name.into())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Step(name) => f.write_str(name),
            Route::End => f.write_str("END"),
        }
    }
}

/// Pure routing function evaluated against the committed state.
pub type RouterFn = Arc<dyn Fn(&WorkflowState) -> Route + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Edge {
    Direct(Route),
    Conditional { router: RouterFn, targets: Vec<Route> },
}

impl Edge {
    fn targets(&self) -> Vec<&Route> {
        match self {
            Edge::Direct(route) => vec![route],
            Edge::Conditional { targets, .. } => targets.iter().collect(),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(route) => f.debug_tuple("Direct").field(route).finish(),
            Edge::Conditional { targets, .. } => f.debug_struct("Conditional").field("targets", targets).finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate step '{0}'")]
    DuplicateStep(String),

    #[error("graph has no entry step")]
    MissingEntry,

    #[error("edge from '{from}' references unknown step '{to}'")]
    UnknownStep { from: String, to: String },

    #[error("step '{0}' is unreachable from the entry step")]
    Unreachable(String),

    #[error("step '{0}' has no outgoing edge")]
    NoEdge(String),

    #[error("router for '{from}' returned undeclared destination '{destination}'")]
    UndeclaredDestination { from: String, destination: Route },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct GraphBuilder {
    steps: Vec<BoxStep>,
    edges: HashMap<String, Edge>,
    actions: HashMap<String, String>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step<T: Step + 'static>(mut self, step: T) -> Self {
        self.steps.push(BoxStep::new(step));
        self
    }

    pub fn add_boxed_step(mut self, step: BoxStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: Route) -> Self {
        self.edges.insert(from.into(), Edge::Direct(to));
        self
    }

    /// `targets` lists every destination `router` may return.
    pub fn add_conditional_edge<F>(mut self, from: impl Into<String>, targets: Vec<Route>, router: F) -> Self
    where
        F: Fn(&WorkflowState) -> Route + Send + Sync + 'static,
    {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                targets,
            },
        );
        self
    }

    /// When `step` leaves pending actions in the last message, run `action_step` next.
    pub fn with_actions(mut self, step: impl Into<String>, action_step: impl Into<String>) -> Self {
        self.actions.insert(step.into(), action_step.into());
        self
    }

    pub fn set_entry(mut self, step: impl Into<String>) -> Self {
        self.entry = Some(step.into());
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<WorkflowGraph, GraphError> {
        let mut order = Vec::with_capacity(self.steps.len());
        let mut steps = HashMap::with_capacity(self.steps.len());
        for step in self.steps {
            let name = step.name().to_string();
            if steps.contains_key(&name) {
                return Err(GraphError::DuplicateStep(name));
            }
            order.push(name.clone());
            steps.insert(name, Arc::new(step));
        }

        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if !steps.contains_key(&entry) {
            return Err(GraphError::UnknownStep {
                from: "START".into(),
                to: entry,
            });
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let nodes: HashMap<&str, NodeIndex> = order.iter().map(|n| (n.as_str(), graph.add_node(n.as_str()))).collect();

        let mut link = |from: &str, to: &Route| -> Result<(), GraphError> {
            if let Route::Step(name) = to {
                let target = nodes.get(name.as_str()).ok_or_else(|| GraphError::UnknownStep {
                    from: from.to_string(),
                    to: name.clone(),
                })?;
                graph.add_edge(nodes[from], *target, ());
            }
            Ok(())
        };

        for (from, edge) in &self.edges {
            if !nodes.contains_key(from.as_str()) {
                return Err(GraphError::UnknownStep {
                    from: "edge".into(),
                    to: from.clone(),
                });
            }
            for target in edge.targets() {
                link(from, target)?;
            }
        }
        for (from, action_step) in &self.actions {
            if !nodes.contains_key(from.as_str()) {
                return Err(GraphError::UnknownStep {
                    from: "actions".into(),
                    to: from.clone(),
                });
            }
            link(from, &Route::Step(action_step.clone()))?;
        }

        for name in &order {
            if !self.edges.contains_key(name) {
                return Err(GraphError::NoEdge(name.clone()));
            }
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, nodes[entry.as_str()]);
        while let Some(node) = dfs.next(&graph) {
            reached.insert(graph[node]);
        }
        if let Some(orphan) = order.iter().find(|n| !reached.contains(n.as_str())) {
            return Err(GraphError::Unreachable(orphan.clone()));
        }

        Ok(WorkflowGraph {
            steps,
            order,
            edges: self.edges,
            actions: self.actions,
            entry,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// Validated, immutable workflow definition.
pub struct WorkflowGraph {
    steps: HashMap<String, Arc<BoxStep>>,
    order: Vec<String>,
    edges: HashMap<String, Edge>,
    actions: HashMap<String, String>,
    entry: String,
}

impl WorkflowGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, name: &str) -> Option<Arc<BoxStep>> {
        self.steps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Step names in registration order.
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    pub fn action_step_for(&self, step: &str) -> Option<&str> {
        self.actions.get(step).map(String::as_str)
    }

    /// First step (in registration order) whose target for `state` is `artifact`.
    pub fn producer_for(&self, artifact: &str, state: &WorkflowState) -> Option<&str> {
        self.order
            .iter()
            .find(|name| self.steps[name.as_str()].target(state).as_deref() == Some(artifact))
            .map(String::as_str)
    }
}

impl fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("entry", &self.entry)
            .field("steps", &self.order)
            .field("edges", &self.edges)
            .field("actions", &self.actions)
            .finish()
    }
}
