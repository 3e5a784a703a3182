//! The account deletion workflow.
//!
//! The app never deletes an account directly. Instead the client sets
//! `deletionRequested` on its own `users` item, and this handler, attached to
//! the table's stream, notices the flag flipping from false to true and
//! cleans up everything the user owns:
//!
//! 1. their notifications, in batches;
//! 2. their username reservation;
//! 3. their Cognito account;
//! 4. finally, the `users` item itself.
//!
//! These live in separate services with no shared transaction, so each of
//! the first three steps is allowed to fail on its own without stopping the
//! rest. The user item goes last: while it exists, cleanup is visibly
//! incomplete, and once it's gone the flag that triggers us is gone too, so
//! the cascade can't be re-entered.
//!
//! Anything that escapes the per-step handling ends up in the
//! `deletion_failures` table for an operator to look at. The `purgeuser`
//! function re-runs the cascade for one user id to finish such a cleanup by
//! hand.

use anyhow::Result;
use async_trait::async_trait;
use lambda_runtime::{tracing, Error};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    records::{DeletionFailure, UserKey, UserRecord},
    streams::{StreamEvent, StreamRecord},
};

/// The database operations the cascade needs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The largest number of deletes that may be committed together.
    fn max_batch_size(&self) -> usize;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    async fn list_notification_ids(&self, user_id: &str) -> Result<Vec<String>>;

    /// Delete the given notifications as a single batch commit.
    async fn delete_notifications(&self, user_id: &str, notification_ids: &[String]) -> Result<()>;

    async fn delete_username(&self, username_key: &str) -> Result<()>;

    async fn delete_user(&self, user_id: &str) -> Result<()>;

    async fn record_deletion_failure(&self, failure: &DeletionFailure) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccountRemoval {
    Deleted,
    NotFound,
}

/// The identity service that holds login accounts.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn delete_account(&self, user_id: &str) -> Result<AccountRemoval>;
}

/// What a single cascade run accomplished.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CascadeReport {
    pub notifications_deleted: usize,
    pub batches_committed: usize,
    pub username_released: bool,
    pub account: Option<AccountRemoval>,
    pub soft_errors: Vec<String>,
}

/// How a handled stream record turned out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Not a false→true transition of the flag.
    Ignored,
    Completed(CascadeReport),
    /// The cascade failed and the failure was logged for review.
    Failed(String),
}

/// True only on the edge where the flag goes from not-set to set.
pub fn deletion_newly_requested(before: Option<&UserRecord>, after: Option<&UserRecord>) -> bool {
    let Some(after) = after else {
        return false;
    };

    after.deletion_requested() && !before.is_some_and(UserRecord::deletion_requested)
}

/// Handle a batch of `users` stream records. Never returns an error: a
/// platform retry of a partially completed cascade does more harm than good.
pub async fn handler(
    payload: Option<Value>,
    store: &dyn AccountStore,
    identity: &dyn IdentityService,
) -> Result<Value, Error> {
    let event: StreamEvent = match payload.map(serde_json::from_value).transpose() {
        Ok(e) => e.unwrap_or_default(),
        Err(e) => {
            tracing::error!("undecodable users stream event: {e}");
            return Ok(json!({ "error": e.to_string() }));
        }
    };

    let mut cascades = 0;
    let mut failures = 0;

    for record in &event.records {
        match handle_record(record, store, identity).await {
            Outcome::Ignored => {}
            Outcome::Completed(_) => cascades += 1,
            Outcome::Failed(_) => failures += 1,
        }
    }

    Ok(json!({
        "records": event.records.len(),
        "cascades": cascades,
        "failures": failures,
    }))
}

/// Handle one `users` stream record.
pub async fn handle_record(
    record: &StreamRecord,
    store: &dyn AccountStore,
    identity: &dyn IdentityService,
) -> Outcome {
    if !record.is_modify() {
        return Outcome::Ignored;
    }

    // We can't know whether this is a cascade until we've decoded the
    // images, so a decoding failure only gets logged as a deletion failure
    // if the new image at least looks like a deletion request.
    let key: Result<UserKey> = record.keys();
    let before: Result<Option<UserRecord>> = record.old_image();
    let after: Result<Option<UserRecord>> = record.new_image();

    let (key, before, after) = match (key, before, after) {
        (Ok(k), Ok(b), Ok(a)) => (k, b, a),

        (key, _, after) => {
            let user_id = key.map(|k| k.user_id).unwrap_or_default();
            let requested = after
                .as_ref()
                .ok()
                .and_then(|a| a.as_ref())
                .map(UserRecord::deletion_requested);

            if requested == Some(false) {
                return Outcome::Ignored;
            }

            let username = after
                .ok()
                .flatten()
                .and_then(|a| a.username().map(str::to_owned));
            let error = format!("could not decode users stream record for `{user_id}`");
            return fail(store, user_id, username, error).await;
        }
    };

    if !deletion_newly_requested(before.as_ref(), after.as_ref()) {
        return Outcome::Ignored;
    }

    let username = after.as_ref().and_then(|a| a.username()).map(str::to_owned);

    tracing::info!(
        "account deletion requested for user {} (username: {:?})",
        key.user_id,
        username
    );

    run_guarded(store, identity, key.user_id, username).await
}

/// Operator payload for `purgeuser`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    username: Option<String>,
}

/// Run the cascade for one user id regardless of its flag. Used to finish
/// off deletions that landed in `deletion_failures`.
pub async fn purge_handler(
    payload: Option<Value>,
    store: &dyn AccountStore,
    identity: &dyn IdentityService,
) -> Result<Value, Error> {
    let request: PurgeRequest = match payload.map(serde_json::from_value).transpose() {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(json!({ "error": "payload is required" })),
        Err(e) => return Ok(json!({ "error": format!("bad purge request: {e}") })),
    };

    if request.user_id.is_empty() {
        return Ok(json!({ "error": "userId is required" }));
    }

    let username = match request.username.filter(|u| !u.is_empty()) {
        Some(u) => Some(u),

        None => match store.get_user(&request.user_id).await {
            Ok(user) => user.and_then(|u| u.username().map(str::to_owned)),
            Err(e) => {
                tracing::warn!(
                    "could not look up user {} before purge: {e:#}",
                    request.user_id
                );
                None
            }
        },
    };

    tracing::info!("purging user {} (username: {:?})", request.user_id, username);

    let user_id = request.user_id.clone();

    Ok(
        match run_guarded(store, identity, request.user_id, username).await {
            Outcome::Completed(report) => json!({
                "userId": user_id,
                "notificationsDeleted": report.notifications_deleted,
                "batchesCommitted": report.batches_committed,
                "usernameReleased": report.username_released,
                "accountFound": report.account == Some(AccountRemoval::Deleted),
                "softErrors": report.soft_errors,
            }),
            Outcome::Failed(e) => json!({ "userId": user_id, "error": e }),
            Outcome::Ignored => json!({ "userId": user_id }),
        },
    )
}

/// The outer fault boundary around a cascade.
async fn run_guarded(
    store: &dyn AccountStore,
    identity: &dyn IdentityService,
    user_id: String,
    username: Option<String>,
) -> Outcome {
    match run_cascade(store, identity, &user_id, username.as_deref()).await {
        Ok(report) => {
            if report.soft_errors.is_empty() {
                tracing::info!("completed cleanup for user {user_id}");
            } else {
                tracing::warn!(
                    "completed cleanup for user {user_id} with {} soft error(s)",
                    report.soft_errors.len()
                );
            }
            Outcome::Completed(report)
        }

        Err(e) => fail(store, user_id, username, format!("{e:#}")).await,
    }
}

async fn fail(
    store: &dyn AccountStore,
    user_id: String,
    username: Option<String>,
    error: String,
) -> Outcome {
    tracing::error!("account deletion failed for user {user_id}: {error}");

    let failure = DeletionFailure {
        user_id,
        username,
        error,
    };

    match store.record_deletion_failure(&failure).await {
        Ok(()) => tracing::info!("logged deletion failure for manual review"),
        Err(e) => tracing::error!("could not log deletion failure: {e:#}"),
    }

    Outcome::Failed(failure.error)
}

/// Run the four cleanup steps in order. Only a failure of the final step is
/// returned as an error; the others are collected in the report.
pub async fn run_cascade(
    store: &dyn AccountStore,
    identity: &dyn IdentityService,
    user_id: &str,
    username: Option<&str>,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();

    match delete_notifications(store, user_id, &mut report).await {
        Ok(()) => {
            if report.notifications_deleted > 0 {
                tracing::info!(
                    "deleted {} notifications for user {user_id} in {} batch(es)",
                    report.notifications_deleted,
                    report.batches_committed
                );
            }
        }

        Err(e) => {
            tracing::warn!("error deleting notifications for user {user_id}: {e:#}");
            report.soft_errors.push(format!("notifications: {e:#}"));
        }
    }

    if let Some(username) = username.filter(|u| !u.is_empty()) {
        match store.delete_username(&username.to_lowercase()).await {
            Ok(()) => {
                tracing::info!("deleted username reservation for {username}");
                report.username_released = true;
            }

            Err(e) => {
                tracing::warn!("error deleting username reservation for {username}: {e:#}");
                report.soft_errors.push(format!("username: {e:#}"));
            }
        }
    }

    match identity.delete_account(user_id).await {
        Ok(AccountRemoval::Deleted) => {
            tracing::info!("deleted auth account for {user_id}");
            report.account = Some(AccountRemoval::Deleted);
        }

        Ok(AccountRemoval::NotFound) => {
            tracing::info!("auth account for {user_id} already deleted");
            report.account = Some(AccountRemoval::NotFound);
        }

        Err(e) => {
            tracing::warn!("error deleting auth account for {user_id}: {e:#}");
            report.soft_errors.push(format!("auth account: {e:#}"));
        }
    }

    store.delete_user(user_id).await?;
    tracing::info!("deleted user record for {user_id}");

    Ok(report)
}

/// Delete every notification under the user, committing batches of at most
/// `max_batch_size()` in sequence.
async fn delete_notifications(
    store: &dyn AccountStore,
    user_id: &str,
    report: &mut CascadeReport,
) -> Result<()> {
    let ids = store.list_notification_ids(user_id).await?;
    let batch_size = usize::max(store.max_batch_size(), 1);

    for batch in ids.chunks(batch_size) {
        store.delete_notifications(user_id, batch).await?;
        report.batches_committed += 1;
        report.notifications_deleted += batch.len();
    }

    Ok(())
}
