//! Execution status listener.
//!
//! Reacts to "Step Functions Execution Status Change" events for pipeline
//! workflows:
//!
//! 1. The execution detail is saved on the pipeline record, guarded by the
//!    record's `updateAt` version. A lost race re-reads the record and
//!    retries, up to `max_update_retries` times.
//! 2. Nothing more happens while the execution is running.
//! 3. A successful `Delete` tears the pipeline down: project records, the
//!    stack-event rule and the stack-event topic.
//! 4. Any other finished execution refreshes `stackDetails` from a describe
//!    of every stack in the workflow.
//!
//! Events are delivered at least once, so every step tolerates a repeat.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{
    SharedMetadataStore, SharedRegionalServices, SharedRuleService, SharedTopicService,
};
use crate::config::ListenerConfig;
use crate::error::{ServiceError, WorkflowError};
use crate::pipeline::{
    partition, ExecutionDetail, ExecutionStatus, PipelineRecord, RecordKey, StackDetail,
};

/// Source of `updateAt` versions, in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Persists execution status and performs pipeline teardown.
pub struct ExecutionStatusHandler {
    store: SharedMetadataStore,
    services: SharedRegionalServices,
    config: ListenerConfig,
    clock: Clock,
}

impl ExecutionStatusHandler {
    pub fn new(
        store: SharedMetadataStore,
        services: SharedRegionalServices,
        config: ListenerConfig,
    ) -> Self {
        Self {
            store,
            services,
            config,
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replaces the clock used to stamp new versions.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub async fn handle(&self, detail: ExecutionDetail) -> Result<(), WorkflowError> {
        let pipeline_id = detail.pipeline_id()?;
        info!(
            pipeline_id = %pipeline_id,
            status = %detail.status,
            execution_arn = %detail.execution_arn,
            "Execution status changed"
        );

        let pipeline = match self.save_execution_detail(&pipeline_id, &detail).await {
            Ok(pipeline) => pipeline,
            Err(WorkflowError::PipelineNotFound { .. }) => {
                warn!(pipeline_id = %pipeline_id, "Pipeline not found, ignoring event");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        if detail.status.is_running() {
            return Ok(());
        }

        if pipeline.is_deleting() && detail.status == ExecutionStatus::Succeeded {
            self.delete_pipeline(&pipeline_id, &pipeline, &detail).await
        } else {
            self.refresh_stack_details(&pipeline_id, &pipeline).await
        }
    }

    async fn find_pipeline(&self, pipeline_id: &str) -> Result<PipelineRecord, WorkflowError> {
        self.store
            .find_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| WorkflowError::PipelineNotFound {
                pipeline_id: pipeline_id.to_string(),
            })
    }

    /// Writes `executionDetail` with optimistic concurrency and returns the
    /// record the successful write was based on.
    async fn save_execution_detail(
        &self,
        pipeline_id: &str,
        detail: &ExecutionDetail,
    ) -> Result<PipelineRecord, WorkflowError> {
        let max_attempts = 1 + self.config.max_update_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let pipeline = self.find_pipeline(pipeline_id).await?;
            let key = pipeline.key(pipeline_id);
            let version = (self.clock)();

            match self
                .store
                .update_execution_detail(&key, detail, pipeline.update_at, version)
                .await
            {
                Ok(()) => {
                    debug!(pipeline_id = %pipeline_id, version = version, "Saved execution detail");
                    return Ok(pipeline);
                }
                Err(error) if error.is_conditional_check_failed() && attempt < max_attempts => {
                    warn!(
                        pipeline_id = %pipeline_id,
                        attempt = attempt,
                        "Pipeline record changed concurrently, retrying"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Describes every stack of the workflow and stores the results.
    async fn refresh_stack_details(
        &self,
        pipeline_id: &str,
        pipeline: &PipelineRecord,
    ) -> Result<(), WorkflowError> {
        let Some(workflow) = &pipeline.workflow else {
            debug!(pipeline_id = %pipeline_id, "Pipeline has no workflow, skipping stack details");
            return Ok(());
        };

        let stacks = workflow.workflow.stacks();
        let mut handles = Vec::with_capacity(stacks.len());
        for stack in stacks {
            let client = self.services.stacks(&stack.input.region);
            let stack_name = stack.input.stack_name.clone();
            let stack_type = stack.state_name.unwrap_or_default().to_string();

            handles.push(tokio::spawn(async move {
                let result = client.describe_stack(&stack_name).await;
                (stack_name, stack_type, result)
            }));
        }

        let mut details = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((_, stack_type, Ok(description))) => {
                    details.push(StackDetail::from_description(stack_type, description));
                }
                Ok((stack_name, _, Err(error))) if error.is_stack_missing() => {
                    debug!(stack_name = %stack_name, "Stack does not exist, omitting it");
                }
                Ok((_, _, Err(error))) => return Err(error.into()),
                Err(error) => warn!(error = %error, "Describe task did not complete"),
            }
        }

        info!(pipeline_id = %pipeline_id, stacks = details.len(), "Refreshed stack details");
        self.store
            .update_stack_details(&pipeline.key(pipeline_id), &details)
            .await?;
        Ok(())
    }

    /// Removes everything a deleted pipeline leaves behind.
    ///
    /// The three cleanup tasks run concurrently and independently. Only a
    /// failure to delete the metadata records fails the event, so that
    /// redelivery retries it; leftover rules and topics are logged.
    async fn delete_pipeline(
        &self,
        pipeline_id: &str,
        pipeline: &PipelineRecord,
        detail: &ExecutionDetail,
    ) -> Result<(), WorkflowError> {
        info!(pipeline_id = %pipeline_id, project_id = %pipeline.project_id, "Tearing down pipeline");

        let rules = self.services.rules(&pipeline.region);
        let topics = self.services.topics(&pipeline.region);
        let rule_name = self.config.rule_name(pipeline_id);
        let pipeline_key = pipeline.key(pipeline_id);
        let (records, rule, topic) = tokio::join!(
            self.delete_project_records(&pipeline.project_id, &pipeline_key),
            delete_rule(&rules, &rule_name),
            self.delete_topic(&topics, pipeline_id, pipeline, detail),
        );

        let mut failures = Vec::new();
        for (task, result) in [("rule", rule), ("topic", topic)] {
            if let Err(error) = result {
                warn!(pipeline_id = %pipeline_id, task = task, error = %error, "Cleanup task failed");
                failures.push(format!("{}: {}", task, error));
            }
        }

        match records {
            Ok(deleted) => {
                info!(
                    pipeline_id = %pipeline_id,
                    records = deleted,
                    failures = failures.len(),
                    "Pipeline torn down"
                );
                Ok(())
            }
            Err(error) => {
                failures.insert(0, format!("metadata: {}", error));
                Err(WorkflowError::Cleanup {
                    pipeline_id: pipeline_id.to_string(),
                    failures,
                })
            }
        }
    }

    /// Deletes every record of the project, one transaction per chunk.
    ///
    /// The pipeline's own record goes in the last chunk. While any chunk
    /// fails the record survives, so a redelivered event still finds the
    /// pipeline and resumes the deletion.
    async fn delete_project_records(
        &self,
        project_id: &str,
        pipeline_key: &RecordKey,
    ) -> Result<usize, ServiceError> {
        let mut keys = self.store.list_project_records(project_id).await?;
        keys.sort_by_key(|key| key == pipeline_key);
        for chunk in keys.chunks(self.config.max_items_per_transaction.max(1)) {
            self.store.delete_records(chunk).await?;
        }
        Ok(keys.len())
    }

    async fn delete_topic(
        &self,
        topics: &SharedTopicService,
        pipeline_id: &str,
        pipeline: &PipelineRecord,
        detail: &ExecutionDetail,
    ) -> Result<(), ServiceError> {
        let account_id = detail.account_id().ok_or_else(|| {
            ServiceError::new(
                "DeleteTopic",
                "InvalidArn",
                format!("no account id in {}", detail.execution_arn),
            )
        })?;
        let topic_arn = format!(
            "arn:{}:sns:{}:{}:{}",
            partition(&pipeline.region),
            pipeline.region,
            account_id,
            self.config.topic_name(pipeline_id)
        );

        let subscriptions = match topics.list_subscriptions(&topic_arn).await {
            Ok(subscriptions) => subscriptions,
            Err(error) if error.is_not_found() => {
                debug!(topic_arn = %topic_arn, "Topic already deleted");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        let mut first_error = None;
        for subscription in &subscriptions {
            if let Err(error) = topics.unsubscribe(subscription).await {
                warn!(subscription = %subscription, error = %error, "Unsubscribe failed");
                first_error.get_or_insert(error);
            }
        }
        topics.delete_topic(&topic_arn).await?;

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Removes all targets of the rule, then the rule itself.
async fn delete_rule(rules: &SharedRuleService, rule_name: &str) -> Result<(), ServiceError> {
    let targets = match rules.list_targets(rule_name).await {
        Ok(targets) => targets,
        Err(error) if error.is_not_found() => {
            debug!(rule_name = %rule_name, "Rule already deleted");
            return Ok(());
        }
        Err(error) => return Err(error),
    };

    if !targets.is_empty() {
        rules.remove_targets(rule_name, &targets).await?;
    }
    rules.delete_rule(rule_name).await
}
