//! "Bare" server for the triggered Maypole functions.
//!
//! DynamoDB Streams and S3 hand us plain JSON events, so unlike the places
//! proxy these functions don't need any of the API Gateway "proxy event"
//! machinery. The invoked function ARN decides which handler runs:
//!
//! - `...-accountdeletion`: `users` table stream, runs the deletion cascade
//! - `...-notify`: `notifications` table stream, sends push messages
//! - `...-thumbnails`: S3 uploads, writes profile-picture variants
//! - `...-purgeuser`: direct invocation with `{"userId": ...}`
//!
//! Each function only needs the settings its own handler uses, so a missing
//! user pool or push platform is reported per invocation rather than at
//! startup.

use lambda_runtime::{run, service_fn, tracing, Error, LambdaEvent};
use serde_json::Value;

use maypole_functions::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, context) = event.into_parts();
        let request_id = context.request_id.clone();

        ref_svcs
            .dispatch(context.invoked_function_arn, Some(payload))
            .await
            .inspect_err(|e| tracing::error!("invocation {request_id} failed: {e}"))
    }))
    .await?;
    Ok(())
}
