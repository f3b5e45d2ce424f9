//! `sfn-workflow`: the task function of the workflow state machine.
//!
//! Invoked once per workflow node, directly or from inside a Map iteration.

use std::sync::Arc;

use clickstream_workflow::config::log_level;
use clickstream_workflow::{
    AwsRegionalServices, S3ObjectStore, WorkflowEvent, WorkflowStepHandler, WorkflowStepOutput,
};
use lambda_runtime::{service_fn, LambdaEvent};

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    tracing_subscriber::fmt()
        .with_max_level(log_level())
        .with_target(false)
        .init();

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let handler = WorkflowStepHandler::new(
        Arc::new(AwsRegionalServices::new(sdk_config.clone())),
        Arc::new(S3ObjectStore::from_conf(&sdk_config)),
    );
    let handler = &handler;

    lambda_runtime::run(service_fn(
        move |event: LambdaEvent<WorkflowEvent>| async move {
            let output: WorkflowStepOutput = handler
                .handle(event.payload)
                .await
                .map_err(lambda_runtime::Error::from)?;
            Ok::<_, lambda_runtime::Error>(output)
        },
    ))
    .await
}
