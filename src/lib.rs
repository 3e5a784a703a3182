//! The AWS/Lambda-powered Maypole backend functions
//!
//! This library crate implements the serverless handlers behind the Maypole
//! app. The common codebase is compiled into three executables:
//! `maypole-functions-bare`, which serves the event-triggered functions
//! (DynamoDB Streams, S3 notifications, and direct operator invocations);
//! `maypole-functions-proxyevent`, which serves the places-autocomplete proxy
//! behind API Gateway; and `maypole-functions-oneshot`, which runs one
//! triggered function from the command line for local testing.
//!
//! None of the handlers talk to each other. Every one of them can be
//! re-delivered by Lambda, so each has to be safe to run twice on the same
//! event; see the individual modules for how they manage that.

use anyhow::Context;
use lambda_runtime::{tracing, Error};
use serde_json::Value;

pub mod cognito;
pub mod config;
pub mod deletion;
pub mod dynamo;
pub mod notify;
pub mod places;
pub mod records;
pub mod s3objects;
pub mod sns;
pub mod streams;
pub mod thumbnails;

pub const ENVIRONMENT: &str = "dev";

/// Install the log subscriber. CloudWatch timestamps every line itself.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false) // don't print the module name
        .without_time() // don't print time (CloudWatch has it)
        .init();
}

pub struct Services {
    settings: config::Settings,
    store: dynamo::DynamoStore,
    identity: Option<cognito::CognitoIdentity>,
    push: Option<sns::SnsGateway>,
    objects: s3objects::S3Objects,
}

impl Services {
    /// Create the process-wide state for the triggered Maypole services.
    pub async fn init() -> Result<Self, Error> {
        init_logging();

        let settings = config::Settings::from_env().context("bad function configuration")?;
        let config = aws_config::load_from_env().await;

        let store = dynamo::DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&config),
            settings.tables.clone(),
        );
        // Each deployed function only gets the settings it needs, so these
        // two are checked when a function that uses them is invoked.
        let identity = settings.user_pool_id.clone().map(|pool| {
            cognito::CognitoIdentity::new(aws_sdk_cognitoidentityprovider::Client::new(&config), pool)
        });
        let push = settings
            .push_platform_arn
            .clone()
            .map(|arn| sns::SnsGateway::new(aws_sdk_sns::Client::new(&config), arn));
        let objects = s3objects::S3Objects::new(aws_sdk_s3::Client::new(&config));

        tracing::info!("services ready for environment {}", settings.environment);

        Ok(Services {
            settings,
            store,
            identity,
            push,
            objects,
        })
    }

    /// Handle an invocation of one of the triggered functions.
    ///
    /// All of the triggered functions share one deployment package. We
    /// "know" which one is being invoked by looking at the suffix of the
    /// function ARN; the oneshot binary just passes the bare function name.
    pub async fn dispatch(&self, mut arn: String, payload: Option<Value>) -> Result<Value, Error> {
        // Local testing environment?
        if arn.ends_with(":test_function") {
            arn = self
                .settings
                .localtest_arn
                .clone()
                .ok_or_else(|| -> Error { "MAYPOLE_LOCALTEST_ARN must be set locally".into() })?;
        }

        if arn.ends_with("accountdeletion") {
            deletion::handler(payload, &self.store, self.identity()?).await
        } else if arn.ends_with("purgeuser") {
            deletion::purge_handler(payload, &self.store, self.identity()?).await
        } else if arn.ends_with("notify") {
            notify::handler(payload, &self.store, self.push()?).await
        } else if arn.ends_with("thumbnails") {
            thumbnails::handler(payload, &self.objects).await
        } else {
            Err(format!("unhandled function: {}", arn).into())
        }
    }

    fn identity(&self) -> Result<&cognito::CognitoIdentity, Error> {
        self.identity
            .as_ref()
            .ok_or_else(|| "MAYPOLE_USER_POOL_ID must be set for this function".into())
    }

    fn push(&self) -> Result<&sns::SnsGateway, Error> {
        self.push
            .as_ref()
            .ok_or_else(|| "MAYPOLE_PUSH_PLATFORM_ARN must be set for this function".into())
    }
}
