//! # Clickstream stack orchestration workflow engine
//!
//! The engine behind the pipeline workflows of Clickstream Analytics on AWS.
//! A pipeline is deployed as a tree of CloudFormation stacks; two Step
//! Functions state machines walk that tree and the handlers in this crate
//! do the work of each step.
//!
//! - [`WorkflowStepHandler`] runs one node of the workflow tree: it resolves
//!   output references of `Stack` nodes, persists the outputs of `Pass`
//!   nodes and fans `Parallel`/`Serial` nodes out into Map iterations.
//! - [`StackActionHandler`] performs one CloudFormation step of a stack
//!   action (create, update, upgrade, delete, describe or callback).
//! - [`ExecutionStatusHandler`] records workflow execution status on the
//!   pipeline record and tears the pipeline down after a delete.
//!
//! Stacks pass outputs to each other through output documents persisted by
//! the [`CallbackBridge`] and read back by the [`OutputResolver`].
//!
//! Every AWS service sits behind a trait in [`client`], with SDK-backed
//! implementations in [`aws`].

pub mod aws;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lambda;
pub mod pipeline;
pub mod reference;
pub mod resolver;
pub mod stack;
pub mod workflow;

pub use aws::{
    AwsRegionalServices, CloudFormationStackService, DynamoMetadataStore, EventBridgeRuleService,
    S3ObjectStore, SnsTopicService,
};
pub use callback::CallbackBridge;
pub use client::{
    MetadataStore, ObjectStore, RegionalServices, RuleService, SharedMetadataStore,
    SharedObjectStore, SharedRegionalServices, SharedRuleService, SharedStackService,
    SharedTopicService, StackRequest, StackService, TopicService,
};
pub use config::{ListenerConfig, StackActionConfig};
pub use error::{ServiceError, WorkflowError};
pub use handlers::{
    ExecutionStatusHandler, MapIteration, MapRunEvent, StackActionHandler, WorkflowEvent,
    WorkflowStepHandler, WorkflowStepOutput,
};
pub use lambda::{ExecutionStatusEvent, EXECUTION_STATUS_CHANGE};
pub use pipeline::{ExecutionDetail, ExecutionStatus, PipelineRecord, RecordKey, StackDetail};
pub use reference::{OutputReference, ReferenceKind};
pub use resolver::OutputResolver;
pub use stack::{
    CallbackLocation, Parameter, StackAction, StackActionEvent, StackDescription, StackInput,
    StackOutput, Tag,
};
pub use workflow::{Branch, MapKind, StackNode, WorkflowDefinition, WorkflowNode};
