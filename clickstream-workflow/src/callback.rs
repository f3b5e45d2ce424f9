//! Persisted stack outputs.
//!
//! Every `Stack` and `Pass` node writes an output document to
//! `<BucketName>/<BucketPrefix>/<StackName>/output.json`. The document is
//! always `{<StackName>: <stack description>}`, or `{<StackName>: {}}` when
//! the stack does not exist. Later nodes read it back to resolve `#.`
//! references without calling CloudFormation again.

use serde_json::{Map, Value};
use tracing::debug;

use crate::client::SharedObjectStore;
use crate::error::{ServiceError, WorkflowError};
use crate::stack::{CallbackLocation, StackDescription};

/// Reads and writes output documents through an object store.
#[derive(Clone)]
pub struct CallbackBridge {
    store: SharedObjectStore,
}

impl CallbackBridge {
    pub fn new(store: SharedObjectStore) -> Self {
        Self { store }
    }

    /// Builds the output document for `stack_name`.
    pub fn output_document(
        stack_name: &str,
        description: Option<&StackDescription>,
    ) -> Result<Value, WorkflowError> {
        let body = match description {
            Some(description) => serde_json::to_value(description)?,
            None => Value::Object(Map::new()),
        };
        let mut document = Map::new();
        document.insert(stack_name.to_string(), body);
        Ok(Value::Object(document))
    }

    /// Persists the output document of `stack_name` and returns it.
    pub async fn write_output(
        &self,
        location: &CallbackLocation,
        stack_name: &str,
        description: Option<&StackDescription>,
    ) -> Result<Value, WorkflowError> {
        let document = Self::output_document(stack_name, description)?;
        let key = location.output_key(stack_name);
        debug!(bucket = %location.bucket_name, key = %key, "Writing stack output");
        self.store
            .put_object(&location.bucket_name, &key, serde_json::to_string(&document)?)
            .await?;
        Ok(document)
    }

    /// Reads the output document of `stack_name`, if one was written.
    pub async fn read_output(
        &self,
        location: &CallbackLocation,
        stack_name: &str,
    ) -> Result<Option<Value>, WorkflowError> {
        let key = location.output_key(stack_name);
        let Some(body) = self.store.get_object(&location.bucket_name, &key).await? else {
            debug!(bucket = %location.bucket_name, key = %key, "No stack output");
            return Ok(None);
        };
        let document = serde_json::from_str(&body).map_err(|error| {
            ServiceError::new("GetObject", "InvalidJson", format!("{}: {}", key, error))
        })?;
        Ok(Some(document))
    }
}
