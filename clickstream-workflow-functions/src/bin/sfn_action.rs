//! `sfn-action`: the task function of the stack action state machine.
//!
//! Every task of the state machine invokes this function with the current
//! [`StackActionEvent`] and continues with the event it returns.

use std::sync::Arc;

use clickstream_workflow::config::log_level;
use clickstream_workflow::{
    AwsRegionalServices, S3ObjectStore, StackActionConfig, StackActionEvent, StackActionHandler,
};
use lambda_runtime::{service_fn, LambdaEvent};

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    tracing_subscriber::fmt()
        .with_max_level(log_level())
        .with_target(false)
        .init();

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let handler = StackActionHandler::new(
        Arc::new(AwsRegionalServices::new(sdk_config.clone())),
        Arc::new(S3ObjectStore::from_conf(&sdk_config)),
        StackActionConfig::default(),
    );
    let handler = &handler;

    lambda_runtime::run(service_fn(
        move |event: LambdaEvent<StackActionEvent>| async move {
            handler
                .handle(event.payload)
                .await
                .map_err(lambda_runtime::Error::from)
        },
    ))
    .await
}
