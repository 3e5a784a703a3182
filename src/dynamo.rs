//! DynamoDB-backed storage for the trigger handlers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, WriteRequest};
use std::{collections::HashMap, time::Duration};
use uuid::Uuid;

use crate::{
    config::Tables,
    deletion::AccountStore,
    notify::TokenStore,
    records::{DeletionFailure, DeletionFailureItem, PushTokens, UserRecord},
};

/// `BatchWriteItem` accepts at most this many requests per call.
const BATCH_WRITE_LIMIT: usize = 25;

/// How many times we resubmit unprocessed batch items before giving up.
const BATCH_WRITE_ATTEMPTS: u32 = 5;

/// Pause before resubmission number `attempt` (counting from 1): 50 ms,
/// doubling each time.
fn unprocessed_retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(50u64 << attempt.saturating_sub(1).min(10))
}

pub struct DynamoStore {
    client: aws_sdk_dynamodb::Client,
    tables: Tables,
}

impl DynamoStore {
    pub fn new(client: aws_sdk_dynamodb::Client, tables: Tables) -> Self {
        DynamoStore { client, tables }
    }

    fn user_key(user_id: &str) -> AttributeValue {
        AttributeValue::S(user_id.to_owned())
    }
}

#[async_trait]
impl AccountStore for DynamoStore {
    fn max_batch_size(&self) -> usize {
        BATCH_WRITE_LIMIT
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.tables.users)
            .key("userId", Self::user_key(user_id))
            .expression_attribute_names("#name", "username")
            .expression_attribute_names("#flag", "deletionRequested")
            .projection_expression("#name, #flag")
            .send()
            .await?;

        match result.item {
            Some(item) => Ok(Some(serde_dynamo::from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn list_notification_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stream = self
            .client
            .query()
            .table_name(&self.tables.notifications)
            .expression_attribute_names("#u", "userId")
            .expression_attribute_names("#n", "notificationId")
            .expression_attribute_values(":uid", Self::user_key(user_id))
            .key_condition_expression("#u = :uid")
            .projection_expression("#n")
            .into_paginator()
            .items()
            .send();

        let mut ids = Vec::new();

        while let Some(item) = stream.next().await {
            let item = item?;

            if let Some(AttributeValue::S(id)) = item.get("notificationId") {
                ids.push(id.clone());
            }
        }

        Ok(ids)
    }

    async fn delete_notifications(&self, user_id: &str, notification_ids: &[String]) -> Result<()> {
        if notification_ids.len() > BATCH_WRITE_LIMIT {
            bail!(
                "asked to delete {} notifications in one batch; the limit is {}",
                notification_ids.len(),
                BATCH_WRITE_LIMIT
            );
        }

        let mut requests = Vec::with_capacity(notification_ids.len());

        for id in notification_ids {
            let delete = DeleteRequest::builder()
                .key("userId", Self::user_key(user_id))
                .key("notificationId", AttributeValue::S(id.clone()))
                .build()?;
            requests.push(WriteRequest::builder().delete_request(delete).build());
        }

        let mut pending = HashMap::from([(self.tables.notifications.clone(), requests)]);

        // Throttled writes come back as "unprocessed" rather than as errors.
        for attempt in 0..BATCH_WRITE_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(unprocessed_retry_delay(attempt)).await;
            }

            let result = self
                .client
                .batch_write_item()
                .set_request_items(Some(pending))
                .send()
                .await?;

            match result.unprocessed_items {
                Some(rest) if !rest.is_empty() => pending = rest,
                _ => return Ok(()),
            }
        }

        bail!("notification deletes for user {user_id} still unprocessed after retrying")
    }

    async fn delete_username(&self, username_key: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.tables.usernames)
            .key("username", AttributeValue::S(username_key.to_owned()))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.tables.users)
            .key("userId", Self::user_key(user_id))
            .send()
            .await?;
        Ok(())
    }

    async fn record_deletion_failure(&self, failure: &DeletionFailure) -> Result<()> {
        let item = DeletionFailureItem {
            failure_id: Uuid::new_v4().to_string(),
            user_id: &failure.user_id,
            username: failure.username.as_deref(),
            error: &failure.error,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let item: HashMap<String, AttributeValue> =
            serde_dynamo::to_item(item).context("could not serialize deletion failure")?;

        self.client
            .put_item()
            .table_name(&self.tables.deletion_failures)
            .set_item(Some(item))
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for DynamoStore {
    async fn push_tokens(&self, user_id: &str) -> Result<PushTokens> {
        let result = self
            .client
            .get_item()
            .table_name(&self.tables.users)
            .key("userId", Self::user_key(user_id))
            .expression_attribute_names("#list", "fcmTokens")
            .expression_attribute_names("#legacy", "fcmToken")
            .projection_expression("#list, #legacy")
            .send()
            .await?;

        match result.item {
            Some(item) => Ok(serde_dynamo::from_item(item)?),
            None => Ok(PushTokens::default()),
        }
    }

    async fn remove_push_tokens(
        &self,
        user_id: &str,
        tokens: &[String],
        legacy: Option<&str>,
    ) -> Result<()> {
        // `fcmTokens` is a string set, so DELETE removes exactly these
        // members and leaves the rest alone.
        if !tokens.is_empty() {
            self.client
                .update_item()
                .table_name(&self.tables.users)
                .key("userId", Self::user_key(user_id))
                .update_expression("DELETE fcmTokens :dead")
                .expression_attribute_values(":dead", AttributeValue::Ss(tokens.to_vec()))
                .send()
                .await?;
        }

        let Some(legacy) = legacy else {
            return Ok(());
        };

        // The legacy field is only cleared if it still holds the dead token.
        let result = self
            .client
            .update_item()
            .table_name(&self.tables.users)
            .key("userId", Self::user_key(user_id))
            .update_expression("REMOVE fcmToken")
            .condition_expression("fcmToken = :legacy")
            .expression_attribute_values(":legacy", AttributeValue::S(legacy.to_owned()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),

            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Ok(())
            }

            Err(e) => Err(e.into()),
        }
    }
}
