//! Just enough of the Lambda event shapes for our triggers.
//!
//! DynamoDB Streams records carry their images in DynamoDB's JSON attribute
//! encoding (`{"S": "..."}` and friends), which `serde_dynamo::Item` already
//! knows how to read. We then pull our own record types out of those items
//! with `serde_dynamo::from_item`.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize};
use serde_dynamo::Item;

#[derive(Debug, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: String,

    #[serde(rename = "dynamodb", default)]
    pub change: StreamChange,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamChange {
    #[serde(default)]
    pub keys: Option<Item>,
    #[serde(default)]
    pub old_image: Option<Item>,
    #[serde(default)]
    pub new_image: Option<Item>,
}

impl StreamRecord {
    pub fn is_insert(&self) -> bool {
        self.event_name == "INSERT"
    }

    pub fn is_modify(&self) -> bool {
        self.event_name == "MODIFY"
    }

    pub fn keys<T: DeserializeOwned>(&self) -> Result<T> {
        let keys = self
            .change
            .keys
            .clone()
            .context("stream record has no Keys")?;
        serde_dynamo::from_item(keys).context("undecodable stream record Keys")
    }

    pub fn old_image<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode_image(self.change.old_image.as_ref()).context("undecodable OldImage")
    }

    pub fn new_image<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode_image(self.change.new_image.as_ref()).context("undecodable NewImage")
    }
}

fn decode_image<T: DeserializeOwned>(image: Option<&Item>) -> Result<Option<T>> {
    match image {
        Some(item) => Ok(Some(serde_dynamo::from_item(item.clone())?)),
        None => Ok(None),
    }
}

/// An S3 event notification.
#[derive(Debug, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3Object {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl S3EventRecord {
    /// The object key, decoded. S3 URL-encodes keys in event notifications,
    /// with `+` standing in for a space.
    pub fn object_key(&self) -> Result<String> {
        let plussed = self.s3.object.key.replace('+', " ");
        Ok(urlencoding::decode(&plussed)
            .with_context(|| format!("bad S3 key encoding: {}", self.s3.object.key))?
            .into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{UserKey, UserRecord};
    use serde_json::json;

    #[test]
    fn decode_modify_record() {
        let event: StreamEvent = serde_json::from_value(json!({
            "Records": [{
                "eventName": "MODIFY",
                "dynamodb": {
                    "Keys": { "userId": { "S": "u1" } },
                    "OldImage": {
                        "userId": { "S": "u1" },
                        "username": { "S": "Alice" }
                    },
                    "NewImage": {
                        "userId": { "S": "u1" },
                        "username": { "S": "Alice" },
                        "deletionRequested": { "BOOL": true },
                        "bio": { "S": "hi" }
                    }
                }
            }]
        }))
        .unwrap();

        let rec = &event.records[0];
        assert!(rec.is_modify());
        let key: UserKey = rec.keys().unwrap();
        assert_eq!(key.user_id, "u1");

        let old: UserRecord = rec.old_image().unwrap().unwrap();
        assert_eq!(old.deletion_requested, None);

        let new: UserRecord = rec.new_image().unwrap().unwrap();
        assert!(new.deletion_requested());
        assert_eq!(new.username(), Some("Alice"));
    }

    #[test]
    fn missing_images_are_none() {
        let event: StreamEvent = serde_json::from_value(json!({
            "Records": [{
                "eventName": "MODIFY",
                "dynamodb": { "Keys": { "userId": { "S": "u1" } } }
            }]
        }))
        .unwrap();

        let rec = &event.records[0];
        assert!(rec.new_image::<UserRecord>().unwrap().is_none());
        assert!(rec.old_image::<UserRecord>().unwrap().is_none());
    }

    #[test]
    fn s3_keys_are_url_decoded() {
        let event: S3Event = serde_json::from_value(json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "media" },
                    "object": { "key": "profile_pictures/u1/my+photo%281%29.png", "size": 10 }
                }
            }]
        }))
        .unwrap();

        assert_eq!(
            event.records[0].object_key().unwrap(),
            "profile_pictures/u1/my photo(1).png"
        );
    }
}
