//! Push delivery through SNS mobile push.
//!
//! The app registers Firebase Cloud Messaging tokens on both Android and iOS,
//! so everything goes through one FCM platform application. Each token gets
//! an SNS platform endpoint (`CreatePlatformEndpoint` hands back the existing
//! one if the token is already registered) and we publish a JSON-structured
//! message carrying an FCM v1 payload with both Android and APNs sections.
//!
//! SNS disables an endpoint once FCM tells it that the token is
//! unregistered, so `EndpointDisabled` on publish is our only signal that a
//! token is dead for good.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sns::operation::publish::PublishError;
use lambda_runtime::tracing;
use serde_json::json;

use crate::notify::{Delivery, PushGateway, PushMessage};

pub struct SnsGateway {
    client: aws_sdk_sns::Client,
    platform_arn: String,
}

impl SnsGateway {
    pub fn new(client: aws_sdk_sns::Client, platform_arn: String) -> Self {
        SnsGateway {
            client,
            platform_arn,
        }
    }
}

/// Render the `MessageStructure=json` message body for SNS.
pub fn sns_envelope(message: &PushMessage) -> Result<String> {
    let fcm = json!({
        "fcmV1Message": {
            "message": {
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
                "android": {
                    "priority": "high",
                    "notification": {
                        "channel_id": message.android_channel,
                    },
                },
                "apns": {
                    "payload": {
                        "aps": {
                            "sound": "default",
                            "thread-id": message.thread_id,
                        },
                    },
                },
            },
        },
    });

    let envelope = json!({
        "default": message.body,
        "GCM": serde_json::to_string(&fcm)?,
    });

    serde_json::to_string(&envelope).context("could not serialize SNS envelope")
}

/// Whether a failed publish means the endpoint, and with it the token, is
/// dead for good. Every other failure is treated as transient.
fn publish_hit_dead_endpoint(err: &PublishError) -> bool {
    err.is_endpoint_disabled_exception()
}

#[async_trait]
impl PushGateway for SnsGateway {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<Delivery> {
        // Registration failures never condemn the token: SNS reports a bad
        // platform ARN and an attribute clash with the same
        // `InvalidParameter` it uses for a malformed token.
        let endpoint = self
            .client
            .create_platform_endpoint()
            .platform_application_arn(&self.platform_arn)
            .token(token)
            .send()
            .await
            .context("could not register push endpoint")?
            .endpoint_arn
            .context("CreatePlatformEndpoint returned no endpoint ARN")?;

        let result = self
            .client
            .publish()
            .target_arn(&endpoint)
            .message_structure("json")
            .message(sns_envelope(message)?)
            .send()
            .await;

        match result {
            Ok(_) => Ok(Delivery::Sent),

            Err(e) => {
                if !e.as_service_error().is_some_and(publish_hit_dead_endpoint) {
                    return Err(e.into());
                }

                // The endpoint is useless from here on; clean it up, but a
                // failure to do so doesn't change the verdict.
                if let Err(e) = self
                    .client
                    .delete_endpoint()
                    .endpoint_arn(&endpoint)
                    .send()
                    .await
                {
                    tracing::warn!("could not delete disabled endpoint {endpoint}: {e}");
                }

                Ok(Delivery::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_sns::types::error::{
        EndpointDisabledException, InvalidParameterException,
        PlatformApplicationDisabledException,
    };
    use serde_json::Value;
    use std::collections::BTreeMap;

    #[test]
    fn only_disabled_endpoints_condemn_a_token() {
        let disabled = PublishError::EndpointDisabledException(
            EndpointDisabledException::builder()
                .message("Endpoint is disabled")
                .build(),
        );
        assert!(publish_hit_dead_endpoint(&disabled));

        let invalid = PublishError::InvalidParameterException(
            InvalidParameterException::builder()
                .message("Invalid parameter: TargetArn")
                .build(),
        );
        assert!(!publish_hit_dead_endpoint(&invalid));

        let app_disabled = PublishError::PlatformApplicationDisabledException(
            PlatformApplicationDisabledException::builder()
                .message("Platform application is disabled")
                .build(),
        );
        assert!(!publish_hit_dead_endpoint(&app_disabled));
    }

    #[test]
    fn envelope_nests_fcm_payload_as_string() {
        let mut data = BTreeMap::new();
        data.insert("type".to_owned(), "dm".to_owned());
        data.insert("threadId".to_owned(), "t1".to_owned());

        let message = PushMessage {
            title: "bob".to_owned(),
            body: "hey".to_owned(),
            data,
            android_channel: "dm_messages",
            thread_id: "t1".to_owned(),
        };

        let envelope: Value = serde_json::from_str(&sns_envelope(&message).unwrap()).unwrap();
        assert_eq!(envelope["default"], "hey");

        let gcm: Value = serde_json::from_str(envelope["GCM"].as_str().unwrap()).unwrap();
        let m = &gcm["fcmV1Message"]["message"];
        assert_eq!(m["notification"]["title"], "bob");
        assert_eq!(m["data"]["threadId"], "t1");
        assert_eq!(m["android"]["notification"]["channel_id"], "dm_messages");
        assert_eq!(m["apns"]["payload"]["aps"]["thread-id"], "t1");
    }
}
