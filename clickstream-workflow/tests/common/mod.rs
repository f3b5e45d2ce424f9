//! Shared mock clients for the integration tests.
//!
//! Each mock records every call it receives. Scripted responses are served
//! first-in first-out; once a queue is empty the mock falls back to a
//! successful default.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use clickstream_workflow::{
    ExecutionDetail, MetadataStore, ObjectStore, PipelineRecord, RecordKey, RegionalServices,
    RuleService, ServiceError, SharedRuleService, SharedStackService, SharedTopicService,
    StackDescription, StackDetail, StackRequest, StackService, TopicService,
};

pub const PIPELINE_ID: &str = "6972c135cb864885b25c5b7ebe584fdf";
pub const PROJECT_ID: &str = "6666-6666";
pub const ACCOUNT_ID: &str = "555555555555";
pub const REGION: &str = "ap-southeast-1";

pub fn stack_id(stack_name: &str) -> String {
    format!(
        "arn:aws:cloudformation:{}:{}:stack/{}/5b6971e0-f261-11ed-a7e3-02a848659f60",
        REGION, ACCOUNT_ID, stack_name
    )
}

// =============================================================================
// CloudFormation
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StackCall {
    Create(StackRequest),
    Update(StackRequest),
    Describe(String),
    DisableTerminationProtection(String),
    Delete(String),
}

type Queue<T> = Mutex<VecDeque<Result<T, ServiceError>>>;

#[derive(Default)]
pub struct MockStackService {
    create_responses: Queue<String>,
    update_responses: Queue<String>,
    describe_responses: Queue<StackDescription>,
    protection_responses: Queue<()>,
    delete_responses: Queue<()>,
    /// Fixed describe results per stack, checked before the queue
    stacks: Mutex<HashMap<String, Result<StackDescription, ServiceError>>>,
    calls: Mutex<Vec<StackCall>>,
}

impl MockStackService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_response(self, response: Result<String, ServiceError>) -> Self {
        self.create_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_update_response(self, response: Result<String, ServiceError>) -> Self {
        self.update_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_describe_response(self, response: Result<StackDescription, ServiceError>) -> Self {
        self.describe_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_stack(self, stack_name: &str, response: Result<StackDescription, ServiceError>) -> Self {
        self.stacks
            .lock()
            .unwrap()
            .insert(stack_name.to_string(), response);
        self
    }

    pub fn with_protection_response(self, response: Result<(), ServiceError>) -> Self {
        self.protection_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_delete_response(self, response: Result<(), ServiceError>) -> Self {
        self.delete_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn get_calls(&self) -> Vec<StackCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_update_requests(&self) -> Vec<StackRequest> {
        self.get_calls()
            .into_iter()
            .filter_map(|call| match call {
                StackCall::Update(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn count_describes(&self) -> usize {
        self.get_calls()
            .iter()
            .filter(|call| matches!(call, StackCall::Describe(_)))
            .count()
    }

    fn record(&self, call: StackCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next<T>(queue: &Queue<T>, default: impl FnOnce() -> T) -> Result<T, ServiceError> {
    queue.lock().unwrap().pop_front().unwrap_or_else(|| Ok(default()))
}

#[async_trait]
impl StackService for MockStackService {
    async fn create_stack(&self, request: &StackRequest) -> Result<String, ServiceError> {
        self.record(StackCall::Create(request.clone()));
        next(&self.create_responses, || stack_id(&request.stack_name))
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<String, ServiceError> {
        self.record(StackCall::Update(request.clone()));
        next(&self.update_responses, || stack_id(&request.stack_name))
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription, ServiceError> {
        self.record(StackCall::Describe(stack_name.to_string()));
        if let Some(response) = self.stacks.lock().unwrap().get(stack_name) {
            return response.clone();
        }
        next(&self.describe_responses, || {
            StackDescription::in_progress(stack_id(stack_name), stack_name, "CREATE_COMPLETE")
        })
    }

    async fn disable_termination_protection(&self, stack_name: &str) -> Result<(), ServiceError> {
        self.record(StackCall::DisableTerminationProtection(stack_name.to_string()));
        next(&self.protection_responses, || ())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ServiceError> {
        self.record(StackCall::Delete(stack_name.to_string()));
        next(&self.delete_responses, || ())
    }
}

// =============================================================================
// S3
// =============================================================================

#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<(String, String), String>>,
    puts: Mutex<Vec<(String, String, String)>>,
    gets: Mutex<Vec<(String, String)>>,
    put_errors: Mutex<VecDeque<ServiceError>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<String>) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.into());
        self
    }

    pub fn with_put_error(self, error: ServiceError) -> Self {
        self.put_errors.lock().unwrap().push_back(error);
        self
    }

    /// `(bucket, key, body)` of every put, in order.
    pub fn get_puts(&self) -> Vec<(String, String, String)> {
        self.puts.lock().unwrap().clone()
    }

    pub fn get_gets(&self) -> Vec<(String, String)> {
        self.gets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: String) -> Result<(), ServiceError> {
        self.puts
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), body.clone()));
        if let Some(error) = self.put_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>, ServiceError> {
        self.gets
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }
}

// =============================================================================
// DynamoDB
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDetailUpdate {
    pub key: RecordKey,
    pub detail: ExecutionDetail,
    pub expected_version: i64,
    pub new_version: i64,
}

/// An in-memory metadata table that enforces the `updateAt` condition.
#[derive(Default)]
pub struct MockMetadataStore {
    pipelines: Mutex<HashMap<String, PipelineRecord>>,
    project_records: Mutex<Vec<RecordKey>>,
    /// Versions written by a competing writer just before the next update
    interfering_writes: Mutex<VecDeque<i64>>,
    /// Outcomes of the next `delete_records` calls; `None` succeeds
    delete_results: Mutex<VecDeque<Option<ServiceError>>>,
    find_calls: Mutex<usize>,
    detail_updates: Mutex<Vec<ExecutionDetailUpdate>>,
    failed_updates: Mutex<usize>,
    stack_detail_updates: Mutex<Vec<(RecordKey, Vec<StackDetail>)>>,
    list_calls: Mutex<Vec<String>>,
    delete_batches: Mutex<Vec<Vec<RecordKey>>>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(self, pipeline_id: &str, record: PipelineRecord) -> Self {
        self.pipelines
            .lock()
            .unwrap()
            .insert(pipeline_id.to_string(), record);
        self
    }

    pub fn with_project_records(self, keys: Vec<RecordKey>) -> Self {
        self.project_records.lock().unwrap().extend(keys);
        self
    }

    /// Makes a competing writer advance the record to `version` right
    /// before the next conditional update.
    pub fn with_interfering_write(self, version: i64) -> Self {
        self.interfering_writes.lock().unwrap().push_back(version);
        self
    }

    pub fn with_delete_success(self) -> Self {
        self.delete_results.lock().unwrap().push_back(None);
        self
    }

    pub fn with_delete_error(self, error: ServiceError) -> Self {
        self.delete_results.lock().unwrap().push_back(Some(error));
        self
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Option<PipelineRecord> {
        self.pipelines.lock().unwrap().get(pipeline_id).cloned()
    }

    pub fn find_count(&self) -> usize {
        *self.find_calls.lock().unwrap()
    }

    /// Successful conditional updates.
    pub fn get_detail_updates(&self) -> Vec<ExecutionDetailUpdate> {
        self.detail_updates.lock().unwrap().clone()
    }

    pub fn failed_update_count(&self) -> usize {
        *self.failed_updates.lock().unwrap()
    }

    pub fn get_stack_detail_updates(&self) -> Vec<(RecordKey, Vec<StackDetail>)> {
        self.stack_detail_updates.lock().unwrap().clone()
    }

    pub fn get_list_calls(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn get_delete_batches(&self) -> Vec<Vec<RecordKey>> {
        self.delete_batches.lock().unwrap().clone()
    }

    pub fn remaining_project_records(&self) -> Vec<RecordKey> {
        self.project_records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn find_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineRecord>, ServiceError> {
        *self.find_calls.lock().unwrap() += 1;
        Ok(self.pipeline(pipeline_id))
    }

    async fn update_execution_detail(
        &self,
        key: &RecordKey,
        detail: &ExecutionDetail,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), ServiceError> {
        let mut pipelines = self.pipelines.lock().unwrap();
        let record = pipelines
            .iter_mut()
            .find(|(pipeline_id, record)| record.key(pipeline_id) == *key)
            .map(|(_, record)| record)
            .ok_or_else(|| {
                ServiceError::new("UpdateItem", "ConditionalCheckFailedException", "no such record")
            })?;

        if let Some(version) = self.interfering_writes.lock().unwrap().pop_front() {
            record.update_at = version;
        }
        if record.update_at != expected_version {
            *self.failed_updates.lock().unwrap() += 1;
            return Err(ServiceError::new(
                "UpdateItem",
                "ConditionalCheckFailedException",
                "The conditional request failed",
            ));
        }

        record.update_at = new_version;
        record.execution_detail = Some(detail.clone());
        self.detail_updates.lock().unwrap().push(ExecutionDetailUpdate {
            key: key.clone(),
            detail: detail.clone(),
            expected_version,
            new_version,
        });
        Ok(())
    }

    async fn update_stack_details(
        &self,
        key: &RecordKey,
        details: &[StackDetail],
    ) -> Result<(), ServiceError> {
        self.stack_detail_updates
            .lock()
            .unwrap()
            .push((key.clone(), details.to_vec()));
        Ok(())
    }

    async fn list_project_records(&self, project_id: &str) -> Result<Vec<RecordKey>, ServiceError> {
        self.list_calls.lock().unwrap().push(project_id.to_string());
        Ok(self
            .project_records
            .lock()
            .unwrap()
            .iter()
            .filter(|key| key.id == project_id)
            .cloned()
            .collect())
    }

    async fn delete_records(&self, keys: &[RecordKey]) -> Result<(), ServiceError> {
        self.delete_batches.lock().unwrap().push(keys.to_vec());
        if let Some(error) = self.delete_results.lock().unwrap().pop_front().flatten() {
            return Err(error);
        }
        self.project_records
            .lock()
            .unwrap()
            .retain(|key| !keys.contains(key));
        self.pipelines
            .lock()
            .unwrap()
            .retain(|pipeline_id, record| !keys.contains(&record.key(pipeline_id)));
        Ok(())
    }
}

// =============================================================================
// EventBridge
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RuleCall {
    ListTargets(String),
    RemoveTargets(String, Vec<String>),
    DeleteRule(String),
}

#[derive(Default)]
pub struct MockRuleService {
    rules: Mutex<HashMap<String, Vec<String>>>,
    delete_errors: Mutex<VecDeque<ServiceError>>,
    calls: Mutex<Vec<RuleCall>>,
}

impl MockRuleService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(self, rule_name: &str, target_ids: &[&str]) -> Self {
        self.rules.lock().unwrap().insert(
            rule_name.to_string(),
            target_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn with_delete_error(self, error: ServiceError) -> Self {
        self.delete_errors.lock().unwrap().push_back(error);
        self
    }

    pub fn get_calls(&self) -> Vec<RuleCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuleService for MockRuleService {
    async fn list_targets(&self, rule_name: &str) -> Result<Vec<String>, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push(RuleCall::ListTargets(rule_name.to_string()));
        self.rules.lock().unwrap().get(rule_name).cloned().ok_or_else(|| {
            ServiceError::new(
                "ListTargetsByRule",
                "ResourceNotFoundException",
                format!("Rule {} does not exist.", rule_name),
            )
        })
    }

    async fn remove_targets(&self, rule_name: &str, target_ids: &[String]) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(RuleCall::RemoveTargets(
            rule_name.to_string(),
            target_ids.to_vec(),
        ));
        if let Some(targets) = self.rules.lock().unwrap().get_mut(rule_name) {
            targets.retain(|target| !target_ids.contains(target));
        }
        Ok(())
    }

    async fn delete_rule(&self, rule_name: &str) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push(RuleCall::DeleteRule(rule_name.to_string()));
        if let Some(error) = self.delete_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.rules.lock().unwrap().remove(rule_name);
        Ok(())
    }
}

// =============================================================================
// SNS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TopicCall {
    ListSubscriptions(String),
    Unsubscribe(String),
    DeleteTopic(String),
}

#[derive(Default)]
pub struct MockTopicService {
    topics: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<TopicCall>>,
}

impl MockTopicService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(self, topic_arn: &str, subscription_arns: &[&str]) -> Self {
        self.topics.lock().unwrap().insert(
            topic_arn.to_string(),
            subscription_arns.iter().map(|arn| arn.to_string()).collect(),
        );
        self
    }

    pub fn get_calls(&self) -> Vec<TopicCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TopicService for MockTopicService {
    async fn list_subscriptions(&self, topic_arn: &str) -> Result<Vec<String>, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push(TopicCall::ListSubscriptions(topic_arn.to_string()));
        self.topics.lock().unwrap().get(topic_arn).cloned().ok_or_else(|| {
            ServiceError::new("ListSubscriptionsByTopic", "NotFound", "Topic does not exist")
        })
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push(TopicCall::Unsubscribe(subscription_arn.to_string()));
        for subscriptions in self.topics.lock().unwrap().values_mut() {
            subscriptions.retain(|arn| arn != subscription_arn);
        }
        Ok(())
    }

    async fn delete_topic(&self, topic_arn: &str) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push(TopicCall::DeleteTopic(topic_arn.to_string()));
        self.topics.lock().unwrap().remove(topic_arn);
        Ok(())
    }
}

// =============================================================================
// Regional factory
// =============================================================================

/// Hands out the same mocks for every region and records which regions
/// were asked for.
#[derive(Default)]
pub struct MockRegionalServices {
    pub stacks: Arc<MockStackService>,
    pub rules: Arc<MockRuleService>,
    pub topics: Arc<MockTopicService>,
    regions: Mutex<Vec<(&'static str, String)>>,
}

impl MockRegionalServices {
    pub fn new(stacks: MockStackService) -> Self {
        Self {
            stacks: Arc::new(stacks),
            ..Default::default()
        }
    }

    pub fn with_rules(mut self, rules: MockRuleService) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_topics(mut self, topics: MockTopicService) -> Self {
        self.topics = Arc::new(topics);
        self
    }

    /// `(service, region)` of every client handed out.
    pub fn get_regions(&self) -> Vec<(&'static str, String)> {
        self.regions.lock().unwrap().clone()
    }

    fn record(&self, service: &'static str, region: &str) {
        self.regions
            .lock()
            .unwrap()
            .push((service, region.to_string()));
    }
}

impl RegionalServices for MockRegionalServices {
    fn stacks(&self, region: &str) -> SharedStackService {
        self.record("cloudformation", region);
        self.stacks.clone()
    }

    fn rules(&self, region: &str) -> SharedRuleService {
        self.record("events", region);
        self.rules.clone()
    }

    fn topics(&self, region: &str) -> SharedTopicService {
        self.record("sns", region);
        self.topics.clone()
    }
}
