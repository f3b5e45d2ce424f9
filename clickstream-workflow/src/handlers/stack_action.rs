//! Stack action handler, invoked by every task of the stack action state
//! machine.
//!
//! The state machine drives one stack through
//! `Execute → (End?) → Wait 30 Seconds → Describe → (in progress?) → Callback`.
//! Each invocation performs exactly one step and returns the event with the
//! next `Action`; nothing here waits for CloudFormation to finish.

use tracing::{debug, info, warn};

use crate::callback::CallbackBridge;
use crate::client::{SharedObjectStore, SharedRegionalServices, SharedStackService, StackRequest};
use crate::config::StackActionConfig;
use crate::error::{ServiceError, WorkflowError};
use crate::stack::{status, StackAction, StackActionEvent, StackDescription};

/// Executes one step of a stack action.
pub struct StackActionHandler {
    services: SharedRegionalServices,
    bridge: CallbackBridge,
    config: StackActionConfig,
}

impl StackActionHandler {
    /// Creates a handler. `objects` is the store holding output documents.
    pub fn new(
        services: SharedRegionalServices,
        objects: SharedObjectStore,
        config: StackActionConfig,
    ) -> Self {
        Self {
            services,
            bridge: CallbackBridge::new(objects),
            config,
        }
    }

    /// Executes `event.Action` and returns the event for the next step.
    ///
    /// Mutations return `Action = Describe` with an in-progress result,
    /// `Describe` returns `Action = Callback` with the fresh description and
    /// `Callback` returns the event unchanged. A `Delete` of a stack that
    /// does not exist returns `Action = End`.
    pub async fn handle(&self, event: StackActionEvent) -> Result<StackActionEvent, WorkflowError> {
        info!(
            stack_name = %event.input.stack_name,
            region = %event.input.region,
            action = %event.action,
            "Executing stack action"
        );
        let stacks = self.services.stacks(&event.input.region);

        match event.action {
            StackAction::Create => self.create(&stacks, event).await,
            StackAction::Update => self.update(&stacks, event, false).await,
            StackAction::Upgrade => self.update(&stacks, event, true).await,
            StackAction::Delete => self.delete(&stacks, event).await,
            StackAction::Describe => self.describe(&stacks, event).await,
            StackAction::Callback => self.callback(event).await,
            StackAction::End => Ok(event),
        }
    }

    fn request(&self, event: &StackActionEvent) -> StackRequest {
        StackRequest {
            stack_name: event.input.stack_name.clone(),
            parameters: event.input.parameters.clone(),
            tags: event.input.tags().to_vec(),
            capabilities: self.config.capabilities.clone(),
            ..Default::default()
        }
    }

    async fn create(
        &self,
        stacks: &SharedStackService,
        event: StackActionEvent,
    ) -> Result<StackActionEvent, WorkflowError> {
        let request = StackRequest {
            template_url: Some(required_template_url(&event)?),
            ..self.request(&event)
        };

        let stack_id = match stacks.create_stack(&request).await {
            Ok(stack_id) => stack_id,
            Err(error) if error.is_already_exists() => {
                info!(stack_name = %request.stack_name, "Stack already exists, polling it instead");
                String::new()
            }
            Err(error) => return Err(error.into()),
        };

        let result = StackDescription::in_progress(
            stack_id,
            &request.stack_name,
            status::CREATE_IN_PROGRESS,
        );
        Ok(event.advance(StackAction::Describe, result))
    }

    async fn update(
        &self,
        stacks: &SharedStackService,
        event: StackActionEvent,
        upgrade: bool,
    ) -> Result<StackActionEvent, WorkflowError> {
        let mut request = self.request(&event);
        if upgrade {
            request.template_url = Some(required_template_url(&event)?);
        } else {
            request.use_previous_template = true;
        }

        let stack_id = match stacks.update_stack(&request).await {
            Ok(stack_id) => stack_id,
            Err(error) if error.is_update_in_progress() => {
                info!(stack_name = %request.stack_name, "Stack is busy, polling it instead");
                String::new()
            }
            Err(error) if error.requires_disable_rollback() => {
                warn!(
                    stack_name = %request.stack_name,
                    "Stack is in a failed state, retrying update with rollback disabled"
                );
                request.disable_rollback = true;
                request.retain_except_on_create = true;
                stacks.update_stack(&request).await?
            }
            Err(error) => return Err(error.into()),
        };

        let result = StackDescription::in_progress(
            stack_id,
            &request.stack_name,
            status::UPDATE_IN_PROGRESS,
        );
        Ok(event.advance(StackAction::Describe, result))
    }

    async fn delete(
        &self,
        stacks: &SharedStackService,
        event: StackActionEvent,
    ) -> Result<StackActionEvent, WorkflowError> {
        let description = match stacks.describe_stack(event.stack_identifier()).await {
            Ok(description) => description,
            Err(error) if error.is_stack_missing() => {
                info!(stack_name = %event.input.stack_name, "Stack does not exist, nothing to delete");
                let result = StackDescription::in_progress(
                    "",
                    &event.input.stack_name,
                    status::DELETE_COMPLETE,
                );
                return Ok(event.advance(StackAction::End, result));
            }
            Err(error) => return Err(error.into()),
        };

        let stack_id = if description.stack_id.is_empty() {
            event.stack_identifier().to_string()
        } else {
            description.stack_id
        };

        ignore_locked_protection(stacks.disable_termination_protection(&stack_id).await)?;
        ignore_locked_protection(stacks.delete_stack(&stack_id).await)?;

        let result = StackDescription::in_progress(
            stack_id,
            &event.input.stack_name,
            status::DELETE_IN_PROGRESS,
        );
        Ok(event.advance(StackAction::Describe, result))
    }

    async fn describe(
        &self,
        stacks: &SharedStackService,
        event: StackActionEvent,
    ) -> Result<StackActionEvent, WorkflowError> {
        let description = stacks.describe_stack(event.stack_identifier()).await?;
        debug!(
            stack_name = %description.stack_name,
            status = %description.stack_status,
            "Described stack"
        );
        Ok(event.advance(StackAction::Callback, description))
    }

    /// Persists the output document, then fails on a failure-class status.
    async fn callback(&self, event: StackActionEvent) -> Result<StackActionEvent, WorkflowError> {
        let result = event.result.as_ref().ok_or_else(|| {
            WorkflowError::validation(format!(
                "Callback for {} has no Result",
                event.input.stack_name
            ))
        })?;

        self.bridge
            .write_output(&event.callback, &event.input.stack_name, Some(result))
            .await?;

        if result.is_failed() {
            warn!(
                stack_name = %event.input.stack_name,
                status = %result.stack_status,
                "Stack action failed"
            );
            return Err(WorkflowError::StackFailed {
                stack_name: event.input.stack_name.clone(),
                status: result.stack_status.clone(),
                reason: result
                    .stack_status_reason
                    .clone()
                    .unwrap_or_else(|| result.stack_status.clone()),
            });
        }

        Ok(event)
    }
}

fn required_template_url(event: &StackActionEvent) -> Result<String, WorkflowError> {
    event.input.template_url.clone().ok_or_else(|| {
        WorkflowError::validation(format!(
            "{} of {} requires Input.TemplateURL",
            event.action, event.input.stack_name
        ))
    })
}

/// Termination protection cannot change while a stack is mid-transition.
/// The stack is then already on its way out, so the error is ignored.
fn ignore_locked_protection(result: Result<(), ServiceError>) -> Result<(), ServiceError> {
    match result {
        Err(error) if error.is_termination_protection_locked() => {
            debug!(message = %error.message, "Ignoring termination protection error");
            Ok(())
        }
        other => other,
    }
}
