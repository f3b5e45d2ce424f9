//! The declarative workflow tree walked by the workflow state machine.
//!
//! A workflow is a tree of [`WorkflowNode`]s. `Stack` and `Pass` nodes are
//! leaves that each name one CloudFormation stack; `Parallel` nodes hold
//! branches whose relative order is unspecified; `Serial` nodes hold exactly
//! one branch whose states run strictly in `StartAt → Next` order.
//!
//! Nested nodes are not executed in-process: the workflow state machine fans
//! them out through Map states that call back into the same state machine,
//! with a concurrency bound given by [`MapKind::max_concurrency`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::stack::{CallbackLocation, StackAction, StackInput};

/// The persisted workflow of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Solution version the workflow was generated for
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Root node of the tree
    #[serde(rename = "Workflow")]
    pub workflow: WorkflowNode,
}

/// One node of a workflow tree, dispatched on its `Type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum WorkflowNode {
    /// Create/update/delete a stack through the stack action state machine.
    Stack(StackNode),
    /// Describe an existing stack and persist its outputs without mutating it.
    Pass(StackNode),
    /// Run every branch, with no ordering between branches.
    Parallel(ParallelNode),
    /// Run the states of one branch strictly in order.
    Serial(SerialNode),
}

/// Fields shared by `Stack` and `Pass` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackNode {
    /// Stack input and callback location
    #[serde(rename = "Data")]
    pub data: StackNodeData,
    /// State name in the enclosing branch
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Next state in the enclosing branch
    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Marks the last state of the enclosing branch
    #[serde(rename = "End", default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

/// The `Data` of a `Stack` or `Pass` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackNodeData {
    /// The stack to act on
    #[serde(rename = "Input")]
    pub input: StackInput,
    /// Where the stack's output document is persisted
    #[serde(rename = "Callback", default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackLocation>,
}

impl StackNode {
    /// The action this node asks the stack action state machine to perform.
    pub fn action(&self) -> Result<StackAction, WorkflowError> {
        self.data.input.action.ok_or_else(|| {
            WorkflowError::validation(format!(
                "Stack node {} has no Input.Action",
                self.data.input.stack_name
            ))
        })
    }

    /// The callback location, required by every node that persists output.
    pub fn callback(&self) -> Result<&CallbackLocation, WorkflowError> {
        self.data.callback.as_ref().ok_or_else(|| {
            WorkflowError::validation(format!(
                "Stack node {} has no Data.Callback",
                self.data.input.stack_name
            ))
        })
    }
}

/// Branches fanned out together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelNode {
    /// Branches run with no ordering between them
    #[serde(rename = "Branches", default)]
    pub branches: Vec<Branch>,
    /// State name in the enclosing branch
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Next state in the enclosing branch
    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Marks the last state of the enclosing branch
    #[serde(rename = "End", default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

/// One branch whose states run one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialNode {
    /// The single branch run in order
    #[serde(rename = "Data")]
    pub data: Branch,
    /// State name in the enclosing branch
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Next state in the enclosing branch
    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Marks the last state of the enclosing branch
    #[serde(rename = "End", default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

impl SerialNode {
    pub fn new(branch: Branch) -> Self {
        Self {
            data: branch,
            name: None,
            next: None,
            end: None,
        }
    }
}

/// A named set of states entered at `StartAt` and chained through `Next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Name of the first state
    #[serde(rename = "StartAt")]
    pub start_at: String,
    /// States keyed by name
    #[serde(rename = "States")]
    pub states: BTreeMap<String, WorkflowNode>,
}

impl Branch {
    /// Returns the states in execution order.
    ///
    /// Fails if `StartAt` or a `Next` names an unknown state, if the chain
    /// loops, if a non-terminal state has no `Next`, or if any state is
    /// unreachable from `StartAt`.
    pub fn ordered_states(&self) -> Result<Vec<(&str, &WorkflowNode)>, WorkflowError> {
        let mut ordered = Vec::with_capacity(self.states.len());
        let mut visited = HashSet::new();
        let mut current = self.start_at.as_str();

        loop {
            let (name, node) = self.states.get_key_value(current).ok_or_else(|| {
                WorkflowError::validation(format!("Branch references unknown state '{}'", current))
            })?;
            if !visited.insert(name.as_str()) {
                return Err(WorkflowError::validation(format!(
                    "Branch loops back to state '{}'",
                    name
                )));
            }
            ordered.push((name.as_str(), node));

            if node.is_end() {
                break;
            }
            current = node.next().ok_or_else(|| {
                WorkflowError::validation(format!(
                    "State '{}' is neither terminal nor names a Next state",
                    name
                ))
            })?;
        }

        if ordered.len() != self.states.len() {
            let unreachable: Vec<&str> = self
                .states
                .keys()
                .map(String::as_str)
                .filter(|name| !visited.contains(name))
                .collect();
            return Err(WorkflowError::validation(format!(
                "Unreachable states: {}",
                unreachable.join(", ")
            )));
        }

        Ok(ordered)
    }

    /// States in execution order when the chain is valid, otherwise in
    /// name order. Used for read-only walks over stored workflows.
    fn states_for_walk(&self) -> Vec<(&str, &WorkflowNode)> {
        self.ordered_states().unwrap_or_else(|_| {
            self.states
                .iter()
                .map(|(name, node)| (name.as_str(), node))
                .collect()
        })
    }
}

/// The two kinds of Map state a node can fan out into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapKind {
    Parallel,
    Serial,
}

impl MapKind {
    /// The `MaxConcurrency` of the corresponding Map state.
    pub fn max_concurrency(&self) -> usize {
        match self {
            Self::Parallel => 40,
            Self::Serial => 1,
        }
    }
}

/// A `Stack` node found while walking a workflow tree.
#[derive(Debug, Clone, Copy)]
pub struct StackRef<'a> {
    /// The node's state name within its branch
    pub state_name: Option<&'a str>,
    pub input: &'a StackInput,
}

impl WorkflowNode {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Stack(node) | Self::Pass(node) => node.name.as_deref(),
            Self::Parallel(node) => node.name.as_deref(),
            Self::Serial(node) => node.name.as_deref(),
        }
    }

    pub fn next(&self) -> Option<&str> {
        match self {
            Self::Stack(node) | Self::Pass(node) => node.next.as_deref(),
            Self::Parallel(node) => node.next.as_deref(),
            Self::Serial(node) => node.next.as_deref(),
        }
    }

    pub fn is_end(&self) -> bool {
        let end = match self {
            Self::Stack(node) | Self::Pass(node) => node.end,
            Self::Parallel(node) => node.end,
            Self::Serial(node) => node.end,
        };
        end.unwrap_or(false)
    }

    /// Every `Stack` node in this subtree, branches walked in execution order.
    ///
    /// `Pass` nodes are excluded: they observe stacks the workflow does not own.
    pub fn stacks(&self) -> Vec<StackRef<'_>> {
        let mut found = Vec::new();
        self.collect_stacks(None, &mut found);
        found
    }

    fn collect_stacks<'a>(&'a self, state_name: Option<&'a str>, found: &mut Vec<StackRef<'a>>) {
        match self {
            Self::Stack(node) => found.push(StackRef {
                state_name: node.name.as_deref().or(state_name),
                input: &node.data.input,
            }),
            Self::Pass(_) => {}
            Self::Parallel(node) => {
                for branch in &node.branches {
                    for (name, child) in branch.states_for_walk() {
                        child.collect_stacks(Some(name), found);
                    }
                }
            }
            Self::Serial(node) => {
                for (name, child) in node.data.states_for_walk() {
                    child.collect_stacks(Some(name), found);
                }
            }
        }
    }
}
