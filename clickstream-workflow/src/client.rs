//! Service clients for the workflow engine.
//!
//! Each AWS service the handlers talk to sits behind an `async_trait` trait,
//! so handlers receive their clients by injection and tests can substitute
//! mocks. The AWS SDK implementations live in [`crate::aws`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::pipeline::{ExecutionDetail, PipelineRecord, RecordKey, StackDetail};
use crate::stack::{Parameter, StackDescription, Tag};

/// A `CreateStack`/`UpdateStack` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackRequest {
    pub stack_name: String,
    /// Absent for `Update`, which reuses the deployed template
    pub template_url: Option<String>,
    pub use_previous_template: bool,
    pub parameters: Vec<Parameter>,
    pub tags: Vec<Tag>,
    pub capabilities: Vec<String>,
    pub disable_rollback: bool,
    pub retain_except_on_create: bool,
}

/// CloudFormation operations used by the engine.
#[async_trait]
pub trait StackService: Send + Sync {
    /// Creates a stack and returns its id.
    async fn create_stack(&self, request: &StackRequest) -> Result<String, ServiceError>;

    /// Updates a stack and returns its id.
    async fn update_stack(&self, request: &StackRequest) -> Result<String, ServiceError>;

    /// Describes one stack by name or id.
    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription, ServiceError>;

    /// Sets `EnableTerminationProtection=false`.
    async fn disable_termination_protection(&self, stack_name: &str) -> Result<(), ServiceError>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ServiceError>;
}

/// Object storage for the persisted output documents.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: String) -> Result<(), ServiceError>;

    /// Returns `None` when the object does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>, ServiceError>;
}

/// The control plane's metadata table.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Finds the latest record of a pipeline.
    async fn find_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineRecord>, ServiceError>;

    /// Writes `executionDetail` if the record's `updateAt` still equals
    /// `expected_version`, advancing it to `new_version`.
    ///
    /// Fails with `ConditionalCheckFailedException` when another writer got
    /// there first.
    async fn update_execution_detail(
        &self,
        key: &RecordKey,
        detail: &ExecutionDetail,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), ServiceError>;

    /// Writes the refreshed `stackDetails` attribute.
    async fn update_stack_details(
        &self,
        key: &RecordKey,
        details: &[StackDetail],
    ) -> Result<(), ServiceError>;

    /// Lists the keys of every record belonging to a project.
    async fn list_project_records(&self, project_id: &str) -> Result<Vec<RecordKey>, ServiceError>;

    /// Deletes records in one transaction.
    async fn delete_records(&self, keys: &[RecordKey]) -> Result<(), ServiceError>;
}

/// EventBridge rule operations used during pipeline teardown.
#[async_trait]
pub trait RuleService: Send + Sync {
    /// Returns the target ids of a rule.
    async fn list_targets(&self, rule_name: &str) -> Result<Vec<String>, ServiceError>;

    async fn remove_targets(&self, rule_name: &str, target_ids: &[String]) -> Result<(), ServiceError>;

    async fn delete_rule(&self, rule_name: &str) -> Result<(), ServiceError>;
}

/// SNS topic operations used during pipeline teardown.
#[async_trait]
pub trait TopicService: Send + Sync {
    /// Returns the subscription ARNs of a topic.
    async fn list_subscriptions(&self, topic_arn: &str) -> Result<Vec<String>, ServiceError>;

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), ServiceError>;

    async fn delete_topic(&self, topic_arn: &str) -> Result<(), ServiceError>;
}

/// Type alias for a shared StackService.
pub type SharedStackService = Arc<dyn StackService>;

/// Type alias for a shared ObjectStore.
pub type SharedObjectStore = Arc<dyn ObjectStore>;

/// Type alias for a shared MetadataStore.
pub type SharedMetadataStore = Arc<dyn MetadataStore>;

/// Type alias for a shared RuleService.
pub type SharedRuleService = Arc<dyn RuleService>;

/// Type alias for a shared TopicService.
pub type SharedTopicService = Arc<dyn TopicService>;

/// Builds clients bound to a pipeline's region.
///
/// Pipelines are deployed into their own region, which is usually not the
/// region the control plane runs in.
pub trait RegionalServices: Send + Sync {
    fn stacks(&self, region: &str) -> SharedStackService;

    fn rules(&self, region: &str) -> SharedRuleService;

    fn topics(&self, region: &str) -> SharedTopicService;
}

/// Type alias for a shared RegionalServices factory.
pub type SharedRegionalServices = Arc<dyn RegionalServices>;
