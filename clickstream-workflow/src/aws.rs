//! AWS SDK implementations of the service clients.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::primitives::DateTimeFormat;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{json, Map, Number, Value};

use crate::client::{
    MetadataStore, ObjectStore, RegionalServices, RuleService, SharedRuleService,
    SharedStackService, SharedTopicService, StackRequest, StackService, TopicService,
};
use crate::config::ListenerConfig;
use crate::error::ServiceError;
use crate::pipeline::{
    ExecutionDetail, PipelineRecord, RecordKey, StackDetail, PIPELINE_RECORD_PREFIX,
};
use crate::stack::{StackDescription, StackOutput, Tag};

/// Maps an SDK error to a [`ServiceError`] carrying the service's code.
fn service_error<E>(operation: &str, error: E) -> ServiceError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let code = error.code().unwrap_or("Unknown").to_string();
    let message = error
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    ServiceError::new(operation, code, message)
}

fn build_error(operation: &str, error: impl std::fmt::Display) -> ServiceError {
    ServiceError::new(operation, "InvalidRequest", error.to_string())
}

/// Builds per-region clients from one shared SDK configuration.
#[derive(Clone)]
pub struct AwsRegionalServices {
    sdk_config: SdkConfig,
}

impl AwsRegionalServices {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }
}

impl RegionalServices for AwsRegionalServices {
    fn stacks(&self, region: &str) -> SharedStackService {
        let config = aws_sdk_cloudformation::config::Builder::from(&self.sdk_config)
            .region(aws_sdk_cloudformation::config::Region::new(region.to_string()))
            .build();
        Arc::new(CloudFormationStackService::new(
            aws_sdk_cloudformation::Client::from_conf(config),
        ))
    }

    fn rules(&self, region: &str) -> SharedRuleService {
        let config = aws_sdk_eventbridge::config::Builder::from(&self.sdk_config)
            .region(aws_sdk_eventbridge::config::Region::new(region.to_string()))
            .build();
        Arc::new(EventBridgeRuleService::new(
            aws_sdk_eventbridge::Client::from_conf(config),
        ))
    }

    fn topics(&self, region: &str) -> SharedTopicService {
        let config = aws_sdk_sns::config::Builder::from(&self.sdk_config)
            .region(aws_sdk_sns::config::Region::new(region.to_string()))
            .build();
        Arc::new(SnsTopicService::new(aws_sdk_sns::Client::from_conf(config)))
    }
}

// =============================================================================
// CloudFormation
// =============================================================================

pub struct CloudFormationStackService {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationStackService {
    pub fn new(client: aws_sdk_cloudformation::Client) -> Self {
        Self { client }
    }

    fn parameters(request: &StackRequest) -> Vec<aws_sdk_cloudformation::types::Parameter> {
        request
            .parameters
            .iter()
            .map(|parameter| {
                aws_sdk_cloudformation::types::Parameter::builder()
                    .parameter_key(&parameter.key)
                    .parameter_value(&parameter.value)
                    .build()
            })
            .collect()
    }

    fn tags(request: &StackRequest) -> Vec<aws_sdk_cloudformation::types::Tag> {
        request
            .tags
            .iter()
            .map(|tag| {
                aws_sdk_cloudformation::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
            })
            .collect()
    }

    fn capabilities(request: &StackRequest) -> Vec<aws_sdk_cloudformation::types::Capability> {
        request
            .capabilities
            .iter()
            .map(|capability| aws_sdk_cloudformation::types::Capability::from(capability.as_str()))
            .collect()
    }

    fn description(stack: &aws_sdk_cloudformation::types::Stack) -> StackDescription {
        StackDescription {
            stack_id: stack.stack_id().unwrap_or_default().to_string(),
            stack_name: stack.stack_name().unwrap_or_default().to_string(),
            stack_status: stack
                .stack_status()
                .map(|status| status.as_str().to_string())
                .unwrap_or_default(),
            stack_status_reason: stack.stack_status_reason().map(str::to_string),
            outputs: stack
                .outputs()
                .iter()
                .map(|output| StackOutput {
                    key: output.output_key().unwrap_or_default().to_string(),
                    value: output.output_value().unwrap_or_default().to_string(),
                    description: output.description().map(str::to_string),
                    export_name: output.export_name().map(str::to_string),
                })
                .collect(),
            tags: stack
                .tags()
                .iter()
                .map(|tag| {
                    Tag::new(
                        tag.key().unwrap_or_default(),
                        tag.value().unwrap_or_default(),
                    )
                })
                .collect(),
            enable_termination_protection: stack.enable_termination_protection(),
            extra: Self::description_extra(stack),
        }
    }

    /// The untyped remainder of a description, keyed as `DescribeStacks` names it.
    fn description_extra(stack: &aws_sdk_cloudformation::types::Stack) -> Map<String, Value> {
        let mut extra = Map::new();
        if let Some(description) = stack.description() {
            extra.insert("Description".to_string(), Value::from(description));
        }
        let times = [
            ("CreationTime", stack.creation_time()),
            ("LastUpdatedTime", stack.last_updated_time()),
            ("DeletionTime", stack.deletion_time()),
        ];
        for (name, time) in times {
            if let Some(time) = time.and_then(|time| time.fmt(DateTimeFormat::DateTime).ok()) {
                extra.insert(name.to_string(), Value::from(time));
            }
        }
        if !stack.parameters().is_empty() {
            let parameters = stack
                .parameters()
                .iter()
                .map(|parameter| {
                    json!({
                        "ParameterKey": parameter.parameter_key().unwrap_or_default(),
                        "ParameterValue": parameter.parameter_value().unwrap_or_default(),
                    })
                })
                .collect();
            extra.insert("Parameters".to_string(), Value::Array(parameters));
        }
        if !stack.capabilities().is_empty() {
            let capabilities = stack
                .capabilities()
                .iter()
                .map(|capability| Value::from(capability.as_str()))
                .collect();
            extra.insert("Capabilities".to_string(), Value::Array(capabilities));
        }
        if let Some(disable_rollback) = stack.disable_rollback() {
            extra.insert("DisableRollback".to_string(), Value::Bool(disable_rollback));
        }
        if let Some(role_arn) = stack.role_arn() {
            extra.insert("RoleARN".to_string(), Value::from(role_arn));
        }
        extra
    }
}

#[async_trait]
impl StackService for CloudFormationStackService {
    async fn create_stack(&self, request: &StackRequest) -> Result<String, ServiceError> {
        let output = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .set_template_url(request.template_url.clone())
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .set_capabilities(Some(Self::capabilities(request)))
            .send()
            .await
            .map_err(|error| service_error("CreateStack", error))?;
        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<String, ServiceError> {
        let mut builder = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .set_template_url(request.template_url.clone())
            .use_previous_template(request.use_previous_template)
            .disable_rollback(request.disable_rollback)
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .set_capabilities(Some(Self::capabilities(request)));
        if request.retain_except_on_create {
            builder = builder.retain_except_on_create(true);
        }
        let output = builder
            .send()
            .await
            .map_err(|error| service_error("UpdateStack", error))?;
        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription, ServiceError> {
        let output = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|error| service_error("DescribeStacks", error))?;
        output
            .stacks()
            .first()
            .map(Self::description)
            .ok_or_else(|| {
                ServiceError::validation(
                    "DescribeStacks",
                    format!("Stack with id {} does not exist", stack_name),
                )
            })
    }

    async fn disable_termination_protection(&self, stack_name: &str) -> Result<(), ServiceError> {
        self.client
            .update_termination_protection()
            .stack_name(stack_name)
            .enable_termination_protection(false)
            .send()
            .await
            .map_err(|error| service_error("UpdateTerminationProtection", error))?;
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ServiceError> {
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|error| service_error("DeleteStack", error))?;
        Ok(())
    }
}

// =============================================================================
// S3
// =============================================================================

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Creates a store in the configuration's default region.
    pub fn from_conf(sdk_config: &SdkConfig) -> Self {
        Self::new(aws_sdk_s3::Client::new(sdk_config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: String) -> Result<(), ServiceError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(aws_sdk_s3::primitives::ByteStream::from(body.into_bytes()))
            .send()
            .await
            .map_err(|error| service_error("PutObject", error))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>, ServiceError> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(error) if error.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None)
            }
            Err(error) => return Err(service_error("GetObject", error)),
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|error| ServiceError::new("GetObject", "ReadError", error.to_string()))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|error| ServiceError::new("GetObject", "InvalidUtf8", error.to_string()))
    }
}

// =============================================================================
// DynamoDB
// =============================================================================

/// The metadata table, accessed through DynamoDB.
pub struct DynamoMetadataStore {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
    index_name: String,
}

impl DynamoMetadataStore {
    pub fn new(client: aws_sdk_dynamodb::Client, config: &ListenerConfig) -> Self {
        Self {
            client,
            table_name: config.table_name.clone(),
            index_name: config.pipeline_index_name.clone(),
        }
    }

    pub fn from_conf(sdk_config: &SdkConfig, config: &ListenerConfig) -> Self {
        Self::new(aws_sdk_dynamodb::Client::new(sdk_config), config)
    }

    fn key(key: &RecordKey) -> HashMap<String, AttributeValue> {
        HashMap::from([
            ("id".to_string(), AttributeValue::S(key.id.clone())),
            ("type".to_string(), AttributeValue::S(key.record_type.clone())),
        ])
    }
}

#[async_trait]
impl MetadataStore for DynamoMetadataStore {
    async fn find_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineRecord>, ServiceError> {
        let record_type = format!("{}#{}#latest", PIPELINE_RECORD_PREFIX, pipeline_id);
        let mut start_key = None;
        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(&self.index_name)
                .key_condition_expression("#prefix = :prefix")
                .filter_expression("#type = :type")
                .expression_attribute_names("#prefix", "prefix")
                .expression_attribute_names("#type", "type")
                .expression_attribute_values(":prefix", AttributeValue::S(PIPELINE_RECORD_PREFIX.to_string()))
                .expression_attribute_values(":type", AttributeValue::S(record_type.clone()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|error| service_error("Query", error))?;

            if let Some(item) = output.items().first() {
                let record = serde_json::from_value(item_to_json(item))
                    .map_err(|error| ServiceError::new("Query", "InvalidItem", error.to_string()))?;
                return Ok(Some(record));
            }
            match output.last_evaluated_key().filter(|key| !key.is_empty()) {
                Some(key) => start_key = Some(key.clone()),
                None => return Ok(None),
            }
        }
    }

    async fn update_execution_detail(
        &self,
        key: &RecordKey,
        detail: &ExecutionDetail,
        expected_version: i64,
        new_version: i64,
    ) -> Result<(), ServiceError> {
        let detail = serde_json::to_value(detail)
            .map_err(|error| build_error("UpdateItem", error))?;
        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(key)))
            .condition_expression("#ConditionVersion = :ConditionVersionValue")
            .update_expression(
                "SET #executionDetail = :executionDetail, #ConditionVersion = :updateAt",
            )
            .expression_attribute_names("#ConditionVersion", "updateAt")
            .expression_attribute_names("#executionDetail", "executionDetail")
            .expression_attribute_values(":executionDetail", json_to_attribute(&detail))
            .expression_attribute_values(
                ":ConditionVersionValue",
                AttributeValue::N(expected_version.to_string()),
            )
            .expression_attribute_values(":updateAt", AttributeValue::N(new_version.to_string()))
            .send()
            .await
            .map_err(|error| service_error("UpdateItem", error))?;
        Ok(())
    }

    async fn update_stack_details(
        &self,
        key: &RecordKey,
        details: &[StackDetail],
    ) -> Result<(), ServiceError> {
        let details = serde_json::to_value(details)
            .map_err(|error| build_error("UpdateItem", error))?;
        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key(key)))
            .update_expression("SET #stackDetails = :stackDetails")
            .expression_attribute_names("#stackDetails", "stackDetails")
            .expression_attribute_values(":stackDetails", json_to_attribute(&details))
            .send()
            .await
            .map_err(|error| service_error("UpdateItem", error))?;
        Ok(())
    }

    async fn list_project_records(&self, project_id: &str) -> Result<Vec<RecordKey>, ServiceError> {
        let mut keys = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("#id = :id")
                .projection_expression("#id, #type")
                .expression_attribute_names("#id", "id")
                .expression_attribute_names("#type", "type")
                .expression_attribute_values(":id", AttributeValue::S(project_id.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|error| service_error("Scan", error))?;

            for item in output.items() {
                if let (Some(AttributeValue::S(id)), Some(AttributeValue::S(record_type))) =
                    (item.get("id"), item.get("type"))
                {
                    keys.push(RecordKey::new(id, record_type));
                }
            }
            match output.last_evaluated_key().filter(|key| !key.is_empty()) {
                Some(key) => start_key = Some(key.clone()),
                None => return Ok(keys),
            }
        }
    }

    async fn delete_records(&self, keys: &[RecordKey]) -> Result<(), ServiceError> {
        if keys.is_empty() {
            return Ok(());
        }
        let items = keys
            .iter()
            .map(|key| {
                let delete = aws_sdk_dynamodb::types::Delete::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(Self::key(key)))
                    .build()
                    .map_err(|error| build_error("TransactWriteItems", error))?;
                Ok(aws_sdk_dynamodb::types::TransactWriteItem::builder()
                    .delete(delete)
                    .build())
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|error| service_error("TransactWriteItems", error))?;
        Ok(())
    }
}

/// Converts a JSON value to a DynamoDB attribute.
pub fn json_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(flag) => AttributeValue::Bool(*flag),
        Value::Number(number) => AttributeValue::N(number.to_string()),
        Value::String(text) => AttributeValue::S(text.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_attribute).collect()),
        Value::Object(entries) => AttributeValue::M(
            entries
                .iter()
                .map(|(name, value)| (name.clone(), json_to_attribute(value)))
                .collect(),
        ),
    }
}

/// Converts a DynamoDB attribute to a JSON value.
///
/// Binary attributes have no JSON form and become null.
pub fn attribute_to_json(attribute: &AttributeValue) -> Value {
    match attribute {
        AttributeValue::S(text) => Value::String(text.clone()),
        AttributeValue::N(number) => number_to_json(number),
        AttributeValue::Bool(flag) => Value::Bool(*flag),
        AttributeValue::L(items) => Value::Array(items.iter().map(attribute_to_json).collect()),
        AttributeValue::M(entries) => item_to_json(entries),
        AttributeValue::Ss(texts) => Value::Array(texts.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(numbers) => {
            Value::Array(numbers.iter().map(|number| number_to_json(number)).collect())
        }
        _ => Value::Null,
    }
}

fn item_to_json(item: &HashMap<String, AttributeValue>) -> Value {
    Value::Object(
        item.iter()
            .map(|(name, attribute)| (name.clone(), attribute_to_json(attribute)))
            .collect(),
    )
}

fn number_to_json(number: &str) -> Value {
    if let Ok(integer) = number.parse::<i64>() {
        return Value::Number(integer.into());
    }
    number
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(number.to_string()))
}

// =============================================================================
// EventBridge
// =============================================================================

pub struct EventBridgeRuleService {
    client: aws_sdk_eventbridge::Client,
}

impl EventBridgeRuleService {
    pub fn new(client: aws_sdk_eventbridge::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RuleService for EventBridgeRuleService {
    async fn list_targets(&self, rule_name: &str) -> Result<Vec<String>, ServiceError> {
        let mut target_ids = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .client
                .list_targets_by_rule()
                .rule(rule_name)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|error| service_error("ListTargetsByRule", error))?;
            target_ids.extend(output.targets().iter().map(|target| target.id().to_string()));
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(target_ids),
            }
        }
    }

    async fn remove_targets(&self, rule_name: &str, target_ids: &[String]) -> Result<(), ServiceError> {
        self.client
            .remove_targets()
            .rule(rule_name)
            .set_ids(Some(target_ids.to_vec()))
            .send()
            .await
            .map_err(|error| service_error("RemoveTargets", error))?;
        Ok(())
    }

    async fn delete_rule(&self, rule_name: &str) -> Result<(), ServiceError> {
        self.client
            .delete_rule()
            .name(rule_name)
            .send()
            .await
            .map_err(|error| service_error("DeleteRule", error))?;
        Ok(())
    }
}

// =============================================================================
// SNS
// =============================================================================

pub struct SnsTopicService {
    client: aws_sdk_sns::Client,
}

impl SnsTopicService {
    pub fn new(client: aws_sdk_sns::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TopicService for SnsTopicService {
    async fn list_subscriptions(&self, topic_arn: &str) -> Result<Vec<String>, ServiceError> {
        let mut subscription_arns = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .client
                .list_subscriptions_by_topic()
                .topic_arn(topic_arn)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|error| service_error("ListSubscriptionsByTopic", error))?;
            subscription_arns.extend(
                output
                    .subscriptions()
                    .iter()
                    .filter_map(|subscription| subscription.subscription_arn())
                    // unconfirmed subscriptions cannot be unsubscribed
                    .filter(|arn| arn.starts_with("arn:"))
                    .map(str::to_string),
            );
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(subscription_arns),
            }
        }
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), ServiceError> {
        self.client
            .unsubscribe()
            .subscription_arn(subscription_arn)
            .send()
            .await
            .map_err(|error| service_error("Unsubscribe", error))?;
        Ok(())
    }

    async fn delete_topic(&self, topic_arn: &str) -> Result<(), ServiceError> {
        self.client
            .delete_topic()
            .topic_arn(topic_arn)
            .send()
            .await
            .map_err(|error| service_error("DeleteTopic", error))?;
        Ok(())
    }
}
