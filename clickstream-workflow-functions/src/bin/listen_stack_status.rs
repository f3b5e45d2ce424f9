//! `listen-stack-status`: records workflow execution status changes.
//!
//! Subscribed through EventBridge to "Step Functions Execution Status
//! Change" events of the pipeline workflows.

use std::sync::Arc;

use clickstream_workflow::config::log_level;
use clickstream_workflow::{
    AwsRegionalServices, DynamoMetadataStore, ExecutionStatusEvent, ExecutionStatusHandler,
    ListenerConfig, EXECUTION_STATUS_CHANGE,
};
use lambda_runtime::{service_fn, LambdaEvent};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    tracing_subscriber::fmt()
        .with_max_level(log_level())
        .with_target(false)
        .init();

    let config = ListenerConfig::from_env()?;
    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let handler = ExecutionStatusHandler::new(
        Arc::new(DynamoMetadataStore::from_conf(&sdk_config, &config)),
        Arc::new(AwsRegionalServices::new(sdk_config.clone())),
        config,
    );
    let handler = &handler;

    lambda_runtime::run(service_fn(
        move |event: LambdaEvent<ExecutionStatusEvent>| async move {
            let event = event.payload;
            if event.detail_type != EXECUTION_STATUS_CHANGE {
                warn!(detail_type = %event.detail_type, "Ignoring unexpected event");
                return Ok::<(), lambda_runtime::Error>(());
            }
            handler
                .handle(event.detail)
                .await
                .map_err(lambda_runtime::Error::from)
        },
    ))
    .await
}
