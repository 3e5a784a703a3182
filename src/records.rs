//! The DynamoDB item shapes that the handlers read and write.
//!
//! These only name the attributes we actually use; everything else in an
//! item is ignored on the way in.

use serde::{Deserialize, Serialize};

/// The fields of a `users` item that matter to the deletion workflow.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub deletion_requested: Option<bool>,
}

impl UserRecord {
    pub fn deletion_requested(&self) -> bool {
        self.deletion_requested.unwrap_or(false)
    }

    /// The username, if it's present and non-empty.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Key attributes of a `users` stream record.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKey {
    pub user_id: String,
}

/// Push-delivery tokens on a `users` item. `fcmTokens` is a string set;
/// `fcmToken` is the single-token field written by older app builds.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushTokens {
    #[serde(default)]
    pub fcm_tokens: Option<Vec<String>>,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

impl PushTokens {
    /// The tokens to deliver to. The list wins whenever it has anything in
    /// it; the legacy field is only consulted otherwise.
    pub fn resolve(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();

        for t in self.fcm_tokens.iter().flatten() {
            if !t.is_empty() && !tokens.contains(t) {
                tokens.push(t.clone());
            }
        }

        if tokens.is_empty() {
            if let Some(t) = self.fcm_token.as_ref().filter(|t| !t.is_empty()) {
                tokens.push(t.clone());
            }
        }

        tokens
    }
}

/// A `notifications` item.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub user_id: String,
    pub notification_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub message_body: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub maypole_name: Option<String>,
}

/// What went wrong in a deletion cascade that escaped its per-step handling.
/// The store adds the record id and timestamp when it writes one of these.
#[derive(Clone, Debug, PartialEq)]
pub struct DeletionFailure {
    pub user_id: String,
    pub username: Option<String>,
    pub error: String,
}

/// The `deletion_failures` item as written.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionFailureItem<'a> {
    pub failure_id: String,
    pub user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    pub error: &'a str,
    pub timestamp: String,
}
