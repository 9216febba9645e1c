//! Object-created notifications as delivered by S3 (directly, or relayed through SNS/EventBridge).
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::BlobLocation;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("notification contains no records")]
    Empty,
    #[error("object key {0} is not valid percent-encoded UTF-8")]
    InvalidKey(String),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct S3Object {
    /// URL-encoded object key, with spaces encoded as `+`.
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl S3EventRecord {
    /// Whether this record announces a new object. Relays that drop the event name only forward
    /// creations.
    pub fn is_object_created(&self) -> bool {
        self.event_name.is_empty() || self.event_name.starts_with("ObjectCreated:")
    }
}

impl S3Event {
    /// Decoded locations of every object in the notification, in delivery order.
    pub fn locations(&self) -> Result<Vec<BlobLocation>, EventError> {
        if self.records.is_empty() {
            return Err(EventError::Empty);
        }

        self.records
            .iter()
            .map(|record| {
                let key = decode_key(&record.s3.object.key)?;
                Ok(BlobLocation::new(record.s3.bucket.name.clone(), key))
            })
            .collect()
    }
}

fn decode_key(raw: &str) -> Result<String, EventError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| EventError::InvalidKey(raw.to_owned()))
}
