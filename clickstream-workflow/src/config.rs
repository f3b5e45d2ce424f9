//! Runtime configuration for the handlers.

use crate::error::WorkflowError;

/// Default prefix of stack, rule and topic names.
pub const DEFAULT_RESOURCE_PREFIX: &str = "Clickstream";

/// Capabilities acknowledged on every create and update.
pub const DEFAULT_CAPABILITIES: [&str; 3] = [
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

/// Configuration for the stack action handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackActionConfig {
    pub capabilities: Vec<String>,
}

impl Default for StackActionConfig {
    fn default() -> Self {
        Self {
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Configuration for the execution status listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// The control plane's metadata table
    pub table_name: String,
    /// Index keyed by record `prefix`, used to find pipelines
    pub pipeline_index_name: String,
    pub rule_name_prefix: String,
    pub topic_name_prefix: String,
    /// Conditional writes retried after a lost race, on top of the first attempt
    pub max_update_retries: u32,
    /// Records per `TransactWriteItems` call
    pub max_items_per_transaction: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            pipeline_index_name: "prefix-time-index".to_string(),
            rule_name_prefix: DEFAULT_RESOURCE_PREFIX.to_string(),
            topic_name_prefix: DEFAULT_RESOURCE_PREFIX.to_string(),
            max_update_retries: 1,
            max_items_per_transaction: 100,
        }
    }
}

impl ListenerConfig {
    /// Reads the configuration from the Lambda environment.
    ///
    /// `CLICKSTREAM_TABLE_NAME` is required; `PREFIX_TIME_GSI_NAME`,
    /// `RULE_NAME_PREFIX` and `TOPIC_NAME_PREFIX` fall back to defaults.
    pub fn from_env() -> Result<Self, WorkflowError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorkflowError> {
        let defaults = Self::default();
        let table_name = lookup("CLICKSTREAM_TABLE_NAME")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| WorkflowError::config("CLICKSTREAM_TABLE_NAME is not set"))?;
        let or_default = |name: &str, default: String| {
            lookup(name).filter(|value| !value.is_empty()).unwrap_or(default)
        };

        Ok(Self {
            table_name,
            pipeline_index_name: or_default("PREFIX_TIME_GSI_NAME", defaults.pipeline_index_name),
            rule_name_prefix: or_default("RULE_NAME_PREFIX", defaults.rule_name_prefix),
            topic_name_prefix: or_default("TOPIC_NAME_PREFIX", defaults.topic_name_prefix),
            ..defaults
        })
    }

    /// The EventBridge rule watching a pipeline's stacks.
    pub fn rule_name(&self, pipeline_id: &str) -> String {
        format!("{}-{}", self.rule_name_prefix, pipeline_id)
    }

    /// The SNS topic receiving a pipeline's stack events.
    pub fn topic_name(&self, pipeline_id: &str) -> String {
        format!("{}-{}", self.topic_name_prefix, pipeline_id)
    }
}

/// The maximum log level, from `LOG_LEVEL`. Defaults to `INFO`.
pub fn log_level() -> tracing::Level {
    parse_log_level(std::env::var("LOG_LEVEL").ok().as_deref())
}

fn parse_log_level(value: Option<&str>) -> tracing::Level {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(tracing::Level::INFO)
}
