//! Handlers behind the workflow engine's Lambda functions.
//!
//! Each handler is constructed with its service clients and exposes one
//! async `handle` method taking the function's event.

pub mod execution_status;
pub mod stack_action;
pub mod workflow_step;

pub use execution_status::{Clock, ExecutionStatusHandler};
pub use stack_action::StackActionHandler;
pub use workflow_step::{
    MapIteration, MapRunEvent, WorkflowEvent, WorkflowStepHandler, WorkflowStepOutput,
};
