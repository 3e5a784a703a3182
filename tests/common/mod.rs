//! In-memory stand-ins for the AWS services, shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use maypole_functions::{
    deletion::{AccountRemoval, AccountStore, IdentityService},
    notify::{Delivery, PushGateway, PushMessage, TokenStore},
    records::{DeletionFailure, PushTokens, UserRecord},
    thumbnails::ObjectStore,
};

#[derive(Default)]
pub struct StoreState {
    pub users: HashMap<String, UserRecord>,
    pub notifications: HashMap<String, Vec<String>>,
    pub usernames: HashSet<String>,
    pub commits: Vec<usize>,
    pub failures: Vec<DeletionFailure>,
    pub tokens: HashMap<String, PushTokens>,
    pub token_removals: Vec<Vec<String>>,
    pub user_lookups: usize,
    pub username_deletes: Vec<String>,
}

pub struct MemoryStore {
    pub batch_size: usize,
    pub fail_listing: bool,
    pub fail_username: bool,
    pub fail_user_delete: bool,
    pub fail_failure_log: bool,
    pub state: Mutex<StoreState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            batch_size: 500,
            fail_listing: false,
            fail_username: false,
            fail_user_delete: false,
            fail_failure_log: false,
            state: Mutex::new(StoreState::default()),
        }
    }
}

impl MemoryStore {
    /// A store holding one user with the given username and notification
    /// count, and the matching username reservation.
    pub fn with_user(user_id: &str, username: &str, n_notifications: usize) -> Self {
        let store = MemoryStore::default();

        {
            let mut st = store.state.lock().unwrap();
            st.users.insert(
                user_id.to_owned(),
                UserRecord {
                    username: Some(username.to_owned()),
                    deletion_requested: Some(false),
                },
            );
            st.notifications.insert(
                user_id.to_owned(),
                (0..n_notifications).map(|i| format!("n{i}")).collect(),
            );
            st.usernames.insert(username.to_lowercase());
        }

        store
    }

    pub fn set_tokens(&self, user_id: &str, tokens: PushTokens) {
        self.state
            .lock()
            .unwrap()
            .tokens
            .insert(user_id.to_owned(), tokens);
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.state.lock().unwrap().users.contains_key(user_id)
    }

    pub fn commits(&self) -> Vec<usize> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn failures(&self) -> Vec<DeletionFailure> {
        self.state.lock().unwrap().failures.clone()
    }

    pub fn notification_count(&self, user_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .notifications
            .get(user_id)
            .map_or(0, Vec::len)
    }

    pub fn has_username(&self, key: &str) -> bool {
        self.state.lock().unwrap().usernames.contains(key)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let mut st = self.state.lock().unwrap();
        st.user_lookups += 1;
        Ok(st.users.get(user_id).cloned())
    }

    async fn list_notification_ids(&self, user_id: &str) -> Result<Vec<String>> {
        if self.fail_listing {
            bail!("simulated database outage");
        }

        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_notifications(&self, user_id: &str, ids: &[String]) -> Result<()> {
        let mut st = self.state.lock().unwrap();

        if ids.len() > self.batch_size {
            bail!("batch of {} exceeds limit", ids.len());
        }

        if let Some(existing) = st.notifications.get_mut(user_id) {
            existing.retain(|n| !ids.contains(n));
        }

        st.commits.push(ids.len());
        Ok(())
    }

    async fn delete_username(&self, key: &str) -> Result<()> {
        if self.fail_username {
            bail!("simulated username table outage");
        }

        let mut st = self.state.lock().unwrap();
        st.username_deletes.push(key.to_owned());
        st.usernames.remove(key);
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        if self.fail_user_delete {
            bail!("simulated users table outage");
        }

        self.state.lock().unwrap().users.remove(user_id);
        Ok(())
    }

    async fn record_deletion_failure(&self, failure: &DeletionFailure) -> Result<()> {
        if self.fail_failure_log {
            bail!("simulated failure-log outage");
        }

        self.state.lock().unwrap().failures.push(failure.clone());
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn push_tokens(&self, user_id: &str) -> Result<PushTokens> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tokens
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_push_tokens(
        &self,
        user_id: &str,
        tokens: &[String],
        legacy: Option<&str>,
    ) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.token_removals.push(tokens.to_vec());

        if let Some(t) = st.tokens.get_mut(user_id) {
            if let Some(list) = t.fcm_tokens.as_mut() {
                list.retain(|x| !tokens.contains(x));
            }

            if legacy.is_some() && t.fcm_token.as_deref() == legacy {
                t.fcm_token = None;
            }
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    pub accounts: Mutex<HashSet<String>>,
    pub fail: bool,
    pub calls: Mutex<usize>,
}

impl FakeIdentity {
    pub fn with_account(user_id: &str) -> Self {
        let id = FakeIdentity::default();
        id.accounts.lock().unwrap().insert(user_id.to_owned());
        id
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn delete_account(&self, user_id: &str) -> Result<AccountRemoval> {
        *self.calls.lock().unwrap() += 1;

        if self.fail {
            return Err(anyhow!("simulated identity outage"));
        }

        if self.accounts.lock().unwrap().remove(user_id) {
            Ok(AccountRemoval::Deleted)
        } else {
            Ok(AccountRemoval::NotFound)
        }
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub invalid: HashSet<String>,
    pub broken: HashSet<String>,
    pub sent: Mutex<Vec<(String, PushMessage)>>,
}

impl FakeGateway {
    pub fn sent_tokens(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl PushGateway for FakeGateway {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<Delivery> {
        if self.broken.contains(token) {
            bail!("simulated transient push failure");
        }

        if self.invalid.contains(token) {
            return Ok(Delivery::InvalidToken);
        }

        self.sent
            .lock()
            .unwrap()
            .push((token.to_owned(), message.clone()));
        Ok(Delivery::Sent)
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    pub objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    pub calls: Mutex<Vec<String>>,
}

impl MemoryObjects {
    pub fn put(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), (data, content_type.to_owned()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn content_type(&self, _bucket: &str, key: &str) -> Result<Option<String>> {
        self.calls.lock().unwrap().push(format!("head {key}"));
        Ok(self.get(key).map(|(_, ct)| ct))
    }

    async fn fetch(&self, _bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(format!("get {key}"));
        self.get(key)
            .map(|(data, _)| data)
            .ok_or_else(|| anyhow!("no such key {key}"))
    }

    async fn publish(
        &self,
        _bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(format!("put {key}"));
        self.put(key, data, content_type);
        Ok(())
    }
}

/// Encode a flat JSON object as a DynamoDB item image.
pub fn dynamo_image(fields: Value) -> Value {
    let mut out = Map::new();

    if let Value::Object(map) = fields {
        for (k, v) in map {
            let attr = match v {
                Value::Bool(b) => json!({ "BOOL": b }),
                Value::Null => json!({ "NULL": true }),
                Value::Number(n) => json!({ "N": n.to_string() }),
                Value::String(s) => json!({ "S": s }),
                Value::Array(a) => json!({ "SS": a }),
                Value::Object(_) => panic!("nested maps not needed here"),
            };
            out.insert(k, attr);
        }
    }

    Value::Object(out)
}

/// A single-record DynamoDB Streams event.
pub fn stream_event(event_name: &str, keys: Value, old: Option<Value>, new: Option<Value>) -> Value {
    let mut change = Map::new();
    change.insert("Keys".to_owned(), dynamo_image(keys));

    if let Some(old) = old {
        change.insert("OldImage".to_owned(), dynamo_image(old));
    }

    if let Some(new) = new {
        change.insert("NewImage".to_owned(), dynamo_image(new));
    }

    json!({
        "Records": [{
            "eventID": "1",
            "eventName": event_name,
            "eventSource": "aws:dynamodb",
            "dynamodb": Value::Object(change),
        }]
    })
}
