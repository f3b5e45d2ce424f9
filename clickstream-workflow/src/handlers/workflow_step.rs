//! Workflow step handler, invoked once per node by the workflow state
//! machine.
//!
//! The state machine feeds each node to this handler, then branches on the
//! returned `Type`:
//!
//! - `Stack`: the node comes back with its references resolved and is
//!   started as a stack action execution.
//! - `Pass`: the stack is described and its output persisted here.
//! - `Parallel`: one `Serial` node per branch comes back, fanned out through
//!   a Map state.
//! - `Serial`: the branch's states come back in execution order, run one at
//!   a time through a Map state.
//!
//! Map iterations call the same state machine with
//! `{MapRun: true, Token, Data: <node>}`; the wrapper is stripped here and
//! the node is handled as if it came in directly.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::callback::CallbackBridge;
use crate::client::{SharedObjectStore, SharedRegionalServices};
use crate::error::WorkflowError;
use crate::resolver::OutputResolver;
use crate::workflow::{Branch, MapKind, SerialNode, StackNode, WorkflowNode};

/// The input of a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowEvent {
    /// A node wrapped by a Map iteration
    MapRun(MapRunEvent),
    Node(WorkflowNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRunEvent {
    #[serde(rename = "MapRun")]
    pub map_run: bool,
    #[serde(rename = "Token", default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(rename = "Data")]
    pub data: WorkflowNode,
}

impl WorkflowEvent {
    pub fn is_map_run(&self) -> bool {
        matches!(self, Self::MapRun(event) if event.map_run)
    }

    pub fn into_node(self) -> WorkflowNode {
        match self {
            Self::MapRun(event) => event.data,
            Self::Node(node) => node,
        }
    }
}

/// Nodes handed to a Map state, one per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapIteration {
    #[serde(rename = "Type")]
    pub kind: MapKind,
    #[serde(rename = "Data")]
    pub items: Vec<WorkflowNode>,
}

/// The output of a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowStepOutput {
    Iteration(MapIteration),
    Node(WorkflowNode),
}

/// Runs one workflow node.
pub struct WorkflowStepHandler {
    services: SharedRegionalServices,
    bridge: CallbackBridge,
}

impl WorkflowStepHandler {
    /// Creates a handler. `objects` is the store holding output documents.
    pub fn new(services: SharedRegionalServices, objects: SharedObjectStore) -> Self {
        Self {
            services,
            bridge: CallbackBridge::new(objects),
        }
    }

    pub async fn handle(&self, event: WorkflowEvent) -> Result<WorkflowStepOutput, WorkflowError> {
        let map_run = event.is_map_run();
        let node = event.into_node();
        info!(node = ?node.name(), map_run = map_run, "Running workflow step");

        match node {
            WorkflowNode::Stack(stack) => {
                let resolved = self.resolve_stack(stack).await?;
                Ok(WorkflowStepOutput::Node(WorkflowNode::Stack(resolved)))
            }
            WorkflowNode::Pass(stack) => {
                self.persist_pass_output(&stack).await?;
                Ok(WorkflowStepOutput::Node(WorkflowNode::Pass(stack)))
            }
            WorkflowNode::Parallel(parallel) => {
                let items = parallel
                    .branches
                    .into_iter()
                    .map(|branch| -> Result<WorkflowNode, WorkflowError> {
                        branch.ordered_states()?;
                        Ok(WorkflowNode::Serial(SerialNode::new(branch)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(fan_out(MapKind::Parallel, items))
            }
            WorkflowNode::Serial(serial) => {
                let items = ordered_nodes(&serial.data)?;
                Ok(fan_out(MapKind::Serial, items))
            }
        }
    }

    /// Resolves the node's parameter and tag references.
    async fn resolve_stack(&self, mut stack: StackNode) -> Result<StackNode, WorkflowError> {
        let location = stack.callback()?.clone();
        let mut resolver = OutputResolver::new(self.bridge.clone(), location);

        let input = &mut stack.data.input;
        input.parameters = resolver.resolve_parameters(&input.parameters).await?;
        if let Some(tags) = &input.tags {
            input.tags = Some(resolver.resolve_tags(tags).await?);
        }
        Ok(stack)
    }

    /// Describes the stack and persists its output document.
    ///
    /// A stack that cannot be described is persisted as `{}` so references
    /// to it resolve to nothing instead of failing.
    async fn persist_pass_output(&self, stack: &StackNode) -> Result<(), WorkflowError> {
        let location = stack.callback()?;
        let input = &stack.data.input;
        let stacks = self.services.stacks(&input.region);

        let description = match stacks.describe_stack(&input.stack_name).await {
            Ok(description) => Some(description),
            Err(error) => {
                warn!(
                    stack_name = %input.stack_name,
                    error = %error,
                    "Cannot describe stack, persisting an empty output"
                );
                None
            }
        };
        self.bridge
            .write_output(location, &input.stack_name, description.as_ref())
            .await?;
        Ok(())
    }
}

fn ordered_nodes(branch: &Branch) -> Result<Vec<WorkflowNode>, WorkflowError> {
    Ok(branch
        .ordered_states()?
        .into_iter()
        .map(|(_, node)| node.clone())
        .collect())
}

fn fan_out(kind: MapKind, items: Vec<WorkflowNode>) -> WorkflowStepOutput {
    info!(
        kind = ?kind,
        items = items.len(),
        max_concurrency = kind.max_concurrency(),
        "Fanning out workflow nodes"
    );
    WorkflowStepOutput::Iteration(MapIteration { kind, items })
}
