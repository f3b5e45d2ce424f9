//! CloudFormation stack types shared by every handler.
//!
//! The field names follow the wire format produced by the state machines
//! (PascalCase, as CloudFormation itself uses), so these types round-trip
//! through Step Functions payloads unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of the stack action state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackAction {
    Create,
    Update,
    Upgrade,
    Delete,
    Describe,
    Callback,
    End,
}

impl std::fmt::Display for StackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Upgrade => "Upgrade",
            Self::Delete => "Delete",
            Self::Describe => "Describe",
            Self::Callback => "Callback",
            Self::End => "End",
        };
        f.write_str(name)
    }
}

/// A CloudFormation stack parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name, suffixed with `.$` or `.#` when the value is a reference
    #[serde(rename = "ParameterKey")]
    pub key: String,
    /// Literal value, or an output reference
    #[serde(rename = "ParameterValue", default)]
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A CloudFormation stack tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key, possibly an output reference
    #[serde(rename = "Key")]
    pub key: String,
    /// Tag value, possibly an output reference
    #[serde(rename = "Value", default)]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Object-store location under which a node persists its stack output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackLocation {
    /// Bucket holding the output documents
    #[serde(rename = "BucketName")]
    pub bucket_name: String,
    /// Key prefix under which each stack gets its own folder
    #[serde(rename = "BucketPrefix")]
    pub bucket_prefix: String,
}

impl CallbackLocation {
    pub fn new(bucket_name: impl Into<String>, bucket_prefix: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            bucket_prefix: bucket_prefix.into(),
        }
    }

    /// The key of the persisted output document for `stack_name`.
    pub fn output_key(&self, stack_name: &str) -> String {
        let prefix = self.bucket_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            format!("{}/output.json", stack_name)
        } else {
            format!("{}/{}/output.json", prefix, stack_name)
        }
    }
}

/// The stack a state-machine step operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackInput {
    /// Region the stack is deployed in
    #[serde(rename = "Region")]
    pub region: String,
    /// CloudFormation stack name
    #[serde(rename = "StackName")]
    pub stack_name: String,
    /// Template location, required by `Create` and `Upgrade`
    #[serde(rename = "TemplateURL", default, skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
    /// Stack parameters, possibly holding output references
    #[serde(rename = "Parameters", default)]
    pub parameters: Vec<Parameter>,
    /// Stack tags; absent and empty are distinct on the wire
    #[serde(rename = "Tags", default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
    /// The requested action, present when the input is embedded in a workflow node.
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<StackAction>,
}

impl StackInput {
    pub fn new(region: impl Into<String>, stack_name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            stack_name: stack_name.into(),
            template_url: None,
            parameters: Vec::new(),
            tags: None,
            action: None,
        }
    }

    /// Tags as a slice, empty when none were supplied.
    pub fn tags(&self) -> &[Tag] {
        self.tags.as_deref().unwrap_or_default()
    }
}

/// A CloudFormation stack output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    /// Output name as declared by the template
    #[serde(rename = "OutputKey", default)]
    pub key: String,
    /// Output value
    #[serde(rename = "OutputValue", default)]
    pub value: String,
    /// Output description
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Cross-stack export name, if exported
    #[serde(rename = "ExportName", default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

/// A CloudFormation stack description, as returned by `DescribeStacks`.
///
/// Only the fields the engine reads are typed. Other fields, such as
/// `CreationTime`, `Parameters` and `Capabilities`, are kept in `extra` and
/// reach the persisted output document unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDescription {
    /// Stack ARN
    #[serde(rename = "StackId", default)]
    pub stack_id: String,
    /// Stack name
    #[serde(rename = "StackName", default)]
    pub stack_name: String,
    /// Current status, such as `CREATE_COMPLETE`
    #[serde(rename = "StackStatus", default)]
    pub stack_status: String,
    /// Why the stack is in its current status
    #[serde(rename = "StackStatusReason", default, skip_serializing_if = "Option::is_none")]
    pub stack_status_reason: Option<String>,
    /// Stack outputs
    #[serde(rename = "Outputs", default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StackOutput>,
    /// Stack tags
    #[serde(rename = "Tags", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Whether termination protection is on
    #[serde(rename = "EnableTerminationProtection", default, skip_serializing_if = "Option::is_none")]
    pub enable_termination_protection: Option<bool>,
    /// Every other field of the description
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StackDescription {
    /// A synthetic in-progress description for a mutation that was just issued.
    pub fn in_progress(
        stack_id: impl Into<String>,
        stack_name: impl Into<String>,
        status: &str,
    ) -> Self {
        Self {
            stack_id: stack_id.into(),
            stack_name: stack_name.into(),
            stack_status: status.to_string(),
            ..Default::default()
        }
    }

    /// Returns true while CloudFormation is still working on the stack.
    pub fn is_in_progress(&self) -> bool {
        status::is_in_progress(&self.stack_status)
    }

    /// Returns true if the stack ended in a failure-class status.
    pub fn is_failed(&self) -> bool {
        status::is_failure(&self.stack_status)
    }

    /// Looks up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }
}

/// Stack status constants and classification.
pub mod status {
    pub const CREATE_IN_PROGRESS: &str = "CREATE_IN_PROGRESS";
    pub const UPDATE_IN_PROGRESS: &str = "UPDATE_IN_PROGRESS";
    pub const DELETE_IN_PROGRESS: &str = "DELETE_IN_PROGRESS";
    pub const DELETE_COMPLETE: &str = "DELETE_COMPLETE";

    /// Matches the state machine's `*_IN_PROGRESS` wait condition.
    pub fn is_in_progress(status: &str) -> bool {
        status.ends_with("_IN_PROGRESS")
    }

    /// `*_FAILED` and every `*ROLLBACK*` status.
    pub fn is_failure(status: &str) -> bool {
        status.ends_with("_FAILED") || status.contains("ROLLBACK")
    }
}

/// The payload passed between the steps of the stack action state machine.
///
/// `Result` is absent until a mutation or describe has produced a stack
/// description; `Token` is the parent workflow's task token, carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackActionEvent {
    /// The step to perform
    #[serde(rename = "Action")]
    pub action: StackAction,
    /// The stack the step operates on
    #[serde(rename = "Input")]
    pub input: StackInput,
    /// Where `Callback` persists the output document
    #[serde(rename = "Callback")]
    pub callback: CallbackLocation,
    /// Description produced by the previous step
    #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StackDescription>,
    /// Task token of the parent workflow
    #[serde(rename = "Token", default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StackActionEvent {
    /// The identifier to address the stack by: the known stack id, falling
    /// back to the stack name.
    pub fn stack_identifier(&self) -> &str {
        self.result
            .as_ref()
            .map(|result| result.stack_id.as_str())
            .filter(|stack_id| !stack_id.is_empty())
            .unwrap_or(self.input.stack_name.as_str())
    }

    /// Returns this event advanced to `action` with a new result.
    pub fn advance(self, action: StackAction, result: StackDescription) -> Self {
        Self {
            action,
            result: Some(result),
            ..self
        }
    }
}
