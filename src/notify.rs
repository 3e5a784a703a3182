//! The push-notification dispatcher.
//!
//! Other parts of the app write `notifications` items; this handler is
//! attached to that table's stream and turns each newly inserted item into a
//! push message sent to every device the recipient has registered. Tokens
//! that the gateway reports as permanently dead are pruned from the user's
//! token set so that we stop paying to send to them.

use anyhow::Result;
use async_trait::async_trait;
use lambda_runtime::{tracing, Error};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::{
    records::{NotificationRecord, PushTokens},
    streams::{StreamEvent, StreamRecord},
};

pub const TAG_CHANNEL: &str = "tag_mentions";
pub const DM_CHANNEL: &str = "dm_messages";

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn push_tokens(&self, user_id: &str) -> Result<PushTokens>;

    /// Remove the given tokens from the user's token set in one update, and
    /// clear the legacy single-token field if it holds `legacy`.
    async fn remove_push_tokens(
        &self,
        user_id: &str,
        tokens: &[String],
        legacy: Option<&str>,
    ) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    Sent,
    /// The gateway says this token will never work again.
    InvalidToken,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<Delivery>;
}

/// A platform-neutral push message; the gateway adapter renders it into
/// whatever its wire format needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    pub android_channel: &'static str,
    pub thread_id: String,
}

impl PushMessage {
    /// Build the message for a notification, or `None` if its type isn't
    /// one we know how to present.
    pub fn for_notification(n: &NotificationRecord) -> Option<Self> {
        let mut data = BTreeMap::new();
        data.insert("type".to_owned(), n.kind.clone());
        data.insert("threadId".to_owned(), n.thread_id.clone());
        data.insert("notificationId".to_owned(), n.notification_id.clone());

        let (title, android_channel) = match n.kind.as_str() {
            "tag" => {
                let maypole = n.maypole_name.clone().unwrap_or_default();
                let title = format!("{} tagged you in {}", n.sender_name, maypole);
                data.insert("maypoleName".to_owned(), maypole);
                (title, TAG_CHANNEL)
            }

            "dm" => (n.sender_name.clone(), DM_CHANNEL),

            _ => return None,
        };

        Some(PushMessage {
            title,
            body: n.message_body.clone(),
            data,
            android_channel,
            thread_id: n.thread_id.clone(),
        })
    }
}

/// The result of fanning one notification out.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DispatchReport {
    pub sent: usize,
    pub invalid: Vec<String>,
    pub failed: usize,
}

/// Handle a batch of `notifications` stream records. Never fails the event.
pub async fn handler(
    payload: Option<Value>,
    tokens: &dyn TokenStore,
    gateway: &dyn PushGateway,
) -> Result<Value, Error> {
    let event: StreamEvent = match payload.map(serde_json::from_value).transpose() {
        Ok(e) => e.unwrap_or_default(),
        Err(e) => {
            tracing::error!("undecodable notifications stream event: {e}");
            return Ok(json!({ "error": e.to_string() }));
        }
    };

    let mut total = DispatchReport::default();

    for record in &event.records {
        match handle_record(record, tokens, gateway).await {
            Ok(Some(report)) => {
                total.sent += report.sent;
                total.failed += report.failed;
                total.invalid.extend(report.invalid);
            }

            Ok(None) => {}

            Err(e) => tracing::error!("error sending notification: {e:#}"),
        }
    }

    Ok(json!({
        "sent": total.sent,
        "invalid": total.invalid.len(),
        "failed": total.failed,
    }))
}

/// Handle one stream record; `None` if nothing was attempted.
pub async fn handle_record(
    record: &StreamRecord,
    tokens: &dyn TokenStore,
    gateway: &dyn PushGateway,
) -> Result<Option<DispatchReport>> {
    if !record.is_insert() {
        return Ok(None);
    }

    let Some(notification) = record.new_image::<NotificationRecord>()? else {
        return Ok(None);
    };

    dispatch(&notification, tokens, gateway).await
}

/// Send one notification to every token its recipient has.
pub async fn dispatch(
    notification: &NotificationRecord,
    tokens: &dyn TokenStore,
    gateway: &dyn PushGateway,
) -> Result<Option<DispatchReport>> {
    let user_id = &notification.user_id;

    let Some(message) = PushMessage::for_notification(notification) else {
        tracing::info!(
            "skipping notification {} with unknown type {:?}",
            notification.notification_id,
            notification.kind
        );
        return Ok(None);
    };

    let stored = tokens.push_tokens(user_id).await?;
    let targets = stored.resolve();

    if targets.is_empty() {
        tracing::info!("no push tokens for user {user_id}");
        return Ok(None);
    }

    let mut report = DispatchReport::default();

    for token in &targets {
        match gateway.send(token, &message).await {
            Ok(Delivery::Sent) => report.sent += 1,
            Ok(Delivery::InvalidToken) => report.invalid.push(token.clone()),
            Err(e) => {
                tracing::warn!("push to one of user {user_id}'s devices failed: {e:#}");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        "sent {} of {} pushes for notification {}",
        report.sent,
        targets.len(),
        notification.notification_id
    );

    if !report.invalid.is_empty() {
        let listed: Vec<String> = report
            .invalid
            .iter()
            .filter(|t| stored.fcm_tokens.iter().flatten().any(|l| l == *t))
            .cloned()
            .collect();
        let legacy = stored
            .fcm_token
            .as_deref()
            .filter(|l| report.invalid.iter().any(|t| t.as_str() == *l));

        match tokens.remove_push_tokens(user_id, &listed, legacy).await {
            Ok(()) => tracing::info!(
                "removed {} invalid token(s) for user {user_id}",
                report.invalid.len()
            ),
            Err(e) => tracing::warn!("could not prune tokens for user {user_id}: {e:#}"),
        }
    }

    Ok(Some(report))
}
