//! Resolution of output references in stack parameters and tags.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::callback::CallbackBridge;
use crate::error::WorkflowError;
use crate::reference::{OutputReference, ReferenceKind};
use crate::stack::{CallbackLocation, Parameter, Tag};

/// Resolves output references against persisted output documents.
///
/// Documents are loaded once per stack from the callback location and
/// cached for the lifetime of the resolver.
///
/// A reference whose stack, document or output is missing resolves to
/// nothing: parameters get an empty value and tags are dropped. Stacks that
/// were already deleted must not block a re-run of the workflow.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # use clickstream_workflow::{ObjectStore, ServiceError};
/// use clickstream_workflow::{CallbackBridge, CallbackLocation, OutputResolver, Parameter};
/// use serde_json::json;
///
/// # struct OutputStore;
/// # #[async_trait]
/// # impl ObjectStore for OutputStore {
/// #     async fn put_object(&self, _: &str, _: &str, _: String) -> Result<(), ServiceError> { Ok(()) }
/// #     async fn get_object(&self, _: &str, _: &str) -> Result<Option<String>, ServiceError> {
/// #         Ok(Some(json!({
/// #             "Clickstream-Ingestion": {
/// #                 "Outputs": [{"OutputKey": "xxIngestionServerUrl", "OutputValue": "http://example.com"}]
/// #             }
/// #         }).to_string()))
/// #     }
/// # }
/// # tokio_test::block_on(async {
/// // The store holds `prefix/Clickstream-Ingestion/output.json`.
/// let bridge = CallbackBridge::new(Arc::new(OutputStore));
/// let mut resolver = OutputResolver::new(bridge, CallbackLocation::new("bucket", "prefix"));
///
/// let resolved = resolver
///     .resolve_parameters(&[Parameter::new("ServerUrl.#", "#.Clickstream-Ingestion.ServerUrl")])
///     .await
///     .unwrap();
/// assert_eq!(resolved, vec![Parameter::new("ServerUrl", "http://example.com")]);
/// # });
/// ```
pub struct OutputResolver {
    bridge: CallbackBridge,
    location: CallbackLocation,
    documents: HashMap<String, Option<Value>>,
}

impl OutputResolver {
    pub fn new(bridge: CallbackBridge, location: CallbackLocation) -> Self {
        Self {
            bridge,
            location,
            documents: HashMap::new(),
        }
    }

    /// Resolves parameters whose key ends with `.$` or `.#`.
    ///
    /// The suffix is stripped from the key; other parameters pass through
    /// unchanged.
    pub async fn resolve_parameters(
        &mut self,
        parameters: &[Parameter],
    ) -> Result<Vec<Parameter>, WorkflowError> {
        let mut resolved = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let Some((kind, key)) = ReferenceKind::from_parameter_key(&parameter.key) else {
                resolved.push(parameter.clone());
                continue;
            };
            let reference = OutputReference::parse_as(kind, &parameter.value)?;
            let value = self.lookup(&reference).await?.unwrap_or_default();
            debug!(parameter = key, reference = %reference, "Resolved parameter");
            resolved.push(Parameter::new(key, value));
        }
        Ok(resolved)
    }

    /// Resolves tags whose key or value is a reference.
    ///
    /// A tag is dropped when either side resolves to nothing or to an empty
    /// string.
    pub async fn resolve_tags(&mut self, tags: &[Tag]) -> Result<Vec<Tag>, WorkflowError> {
        let mut resolved = Vec::with_capacity(tags.len());
        for tag in tags {
            let key = self.resolve_text(&tag.key).await?;
            let value = self.resolve_text(&tag.value).await?;
            match (key, value) {
                (Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => {
                    resolved.push(Tag::new(key, value))
                }
                _ => debug!(key = %tag.key, "Dropping unresolved tag"),
            }
        }
        Ok(resolved)
    }

    async fn resolve_text(&mut self, raw: &str) -> Result<Option<String>, WorkflowError> {
        match OutputReference::parse(raw)? {
            Some(reference) => self.lookup(&reference).await,
            None => Ok(Some(raw.to_string())),
        }
    }

    async fn lookup(&mut self, reference: &OutputReference) -> Result<Option<String>, WorkflowError> {
        let value = self
            .document(&reference.stack_name)
            .await?
            .and_then(|document| reference.evaluate(document));
        if value.is_none() {
            warn!(reference = %reference, "Output reference did not resolve");
        }
        Ok(value)
    }

    async fn document(&mut self, stack_name: &str) -> Result<Option<&Value>, WorkflowError> {
        if !self.documents.contains_key(stack_name) {
            let loaded = self.bridge.read_output(&self.location, stack_name).await?;
            self.documents.insert(stack_name.to_string(), loaded);
        }
        Ok(self.documents.get(stack_name).and_then(Option::as_ref))
    }
}
