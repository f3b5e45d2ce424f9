//! The control plane's pipeline record and the execution status it tracks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;
use crate::stack::{StackDescription, StackOutput};
use crate::workflow::WorkflowDefinition;

/// Sort-key prefix of pipeline records.
pub const PIPELINE_RECORD_PREFIX: &str = "PIPELINE";

/// Primary key of a metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
}

impl RecordKey {
    pub fn new(id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
        }
    }

    /// The key of a pipeline's latest record: `(projectId, PIPELINE#<pipelineId>#latest)`.
    pub fn pipeline(project_id: &str, pipeline_id: &str) -> Self {
        Self::new(
            project_id,
            format!("{}#{}#latest", PIPELINE_RECORD_PREFIX, pipeline_id),
        )
    }
}

/// A pipeline as stored in the metadata table.
///
/// Only the attributes the engine reads are typed. `updateAt` is the
/// optimistic-concurrency version: every write of `executionDetail` is
/// conditioned on it and advances it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRecord {
    #[serde(default)]
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    #[serde(default)]
    pub update_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_detail: Option<ExecutionDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_details: Vec<StackDetail>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineRecord {
    pub fn key(&self, pipeline_id: &str) -> RecordKey {
        RecordKey::pipeline(&self.project_id, pipeline_id)
    }

    /// Returns true if the pipeline's last requested action was a deletion.
    pub fn is_deleting(&self) -> bool {
        self.last_action.as_deref() == Some("Delete")
    }
}

/// The state of a Step Functions execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
    PendingRedrive,
}

impl ExecutionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Aborted => "ABORTED",
            Self::PendingRedrive => "PENDING_REDRIVE",
        };
        f.write_str(name)
    }
}

/// The detail of a "Step Functions Execution Status Change" event, stored
/// verbatim as the pipeline's `executionDetail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetail {
    pub execution_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: ExecutionStatus,
}

impl ExecutionDetail {
    /// The pipeline id encoded in the execution.
    ///
    /// Executions are named `main-<pipelineId>-<suffix>`. When the event
    /// carries no name, the last segment of the execution ARN is used.
    pub fn pipeline_id(&self) -> Result<String, WorkflowError> {
        let name = match self.name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => name,
            None => self.execution_arn.rsplit(':').next().unwrap_or_default(),
        };
        name.split('-')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::InvalidExecution {
                message: format!("cannot derive a pipeline id from '{}'", name),
            })
    }

    /// The account id field of the execution ARN.
    pub fn account_id(&self) -> Option<&str> {
        self.execution_arn
            .split(':')
            .nth(4)
            .filter(|account| !account.is_empty())
    }
}

/// The partition of a region.
pub fn partition(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

/// A stack's state as reported on the pipeline record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDetail {
    pub stack_name: String,
    /// The state name of the stack's node in the workflow
    pub stack_type: String,
    pub stack_status: String,
    #[serde(default)]
    pub stack_status_reason: String,
    #[serde(default)]
    pub stack_template_version: String,
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
}

impl StackDetail {
    pub fn from_description(stack_type: impl Into<String>, description: StackDescription) -> Self {
        let stack_template_version = description.tag("Version").unwrap_or_default().to_string();
        Self {
            stack_type: stack_type.into(),
            stack_template_version,
            stack_name: description.stack_name,
            stack_status: description.stack_status,
            stack_status_reason: description.stack_status_reason.unwrap_or_default(),
            outputs: description.outputs,
        }
    }
}
