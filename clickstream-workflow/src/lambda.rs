//! Lambda event types of the workflow engine's functions.
//!
//! `sfn-action` receives a [`StackActionEvent`] and `sfn-workflow` a
//! [`WorkflowEvent`], both straight from a Step Functions task.
//! `listen-stack-status` receives an EventBridge event whose detail is an
//! [`ExecutionDetail`].

use aws_lambda_events::event::eventbridge::EventBridgeEvent;

use crate::pipeline::ExecutionDetail;

pub use crate::handlers::{WorkflowEvent, WorkflowStepOutput};
pub use crate::stack::StackActionEvent;

/// `detail-type` of the events the listener subscribes to.
pub const EXECUTION_STATUS_CHANGE: &str = "Step Functions Execution Status Change";

/// A "Step Functions Execution Status Change" event.
pub type ExecutionStatusEvent = EventBridgeEvent<ExecutionDetail>;
