//! Wire formats consumed by the catalog and the domain events decoded from
//! them.
//!
//! Storage changes arrive as a queue envelope whose `Message` field holds a
//! JSON-encoded storage notification, which in turn holds a list of provider
//! change records. Metadata updates arrive as a small JSON body with the
//! attribute type carried in a message header.

use crate::error::CatalogError;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Header carrying the attribute type of a metadata update
pub const METADATA_TYPE_HEADER: &str = "metadata_type";

const CREATED_PREFIX: &str = "ObjectCreated";
const REMOVED_PREFIX: &str = "ObjectRemoved";

/// Kind of storage change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Removed,
}

impl ChangeKind {
    /// Classify a provider event name such as `ObjectCreated:Put`
    pub fn from_event_name(event_name: &str) -> Option<Self> {
        if event_name.starts_with(CREATED_PREFIX) {
            Some(ChangeKind::Created)
        } else if event_name.starts_with(REMOVED_PREFIX) {
            Some(ChangeKind::Removed)
        } else {
            None
        }
    }
}

/// A single storage change, decoded from an upload envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Decoded object key; doubles as the image name
    pub object_key: String,
    pub bucket_id: String,
}

impl ChangeEvent {
    pub fn created(bucket_id: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Created,
            object_key: object_key.into(),
            bucket_id: bucket_id.into(),
        }
    }

    pub fn removed(bucket_id: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            object_key: object_key.into(),
            bucket_id: bucket_id.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StorageNotification {
    #[serde(rename = "Records", default)]
    records: Vec<StorageRecord>,
}

#[derive(Debug, Deserialize)]
struct StorageRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: StorageBucket,
    object: StorageObject,
}

#[derive(Debug, Deserialize)]
struct StorageBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StorageObject {
    key: String,
}

/// Unwrap an upload envelope into its change events.
///
/// Records with event names other than `ObjectCreated*` / `ObjectRemoved*`
/// are skipped. A notification without `Records` (such as a provider test
/// event) yields no events.
pub fn decode_upload_envelope(payload: &[u8]) -> Result<Vec<ChangeEvent>, CatalogError> {
    let envelope: QueueEnvelope = serde_json::from_slice(payload)
        .map_err(|e| CatalogError::Envelope(format!("queue envelope: {}", e)))?;

    let notification: StorageNotification = serde_json::from_str(&envelope.message)
        .map_err(|e| CatalogError::Envelope(format!("storage notification: {}", e)))?;

    let events = notification
        .records
        .into_iter()
        .filter_map(|record| {
            let Some(kind) = ChangeKind::from_event_name(&record.event_name) else {
                debug!(event_name = %record.event_name, "Ignoring unsupported storage event");
                return None;
            };

            Some(ChangeEvent {
                kind,
                object_key: decode_object_key(&record.s3.object.key),
                bucket_id: record.s3.bucket.name,
            })
        })
        .collect();

    Ok(events)
}

/// Decode a URL-encoded object key, treating `+` as a space
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Allow-listed metadata attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Caption,
    Date,
    Photographer,
}

impl AttributeType {
    pub const ALL: [AttributeType; 3] = [
        AttributeType::Caption,
        AttributeType::Date,
        AttributeType::Photographer,
    ];

    /// Tag as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Caption => "Caption",
            AttributeType::Date => "Date",
            AttributeType::Photographer => "Photographer",
        }
    }

    /// Record field holding this attribute
    pub fn field_name(&self) -> &'static str {
        match self {
            AttributeType::Caption => "caption",
            AttributeType::Date => "date",
            AttributeType::Photographer => "photographer",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = CatalogError;

    /// Case-sensitive: `caption` is not `Caption`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeType::ALL
            .into_iter()
            .find(|attribute| attribute.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownAttribute(s.to_string()))
    }
}

/// Body of a metadata update message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBody {
    /// Target image name
    pub id: String,
    pub value: String,
}

/// A validated metadata update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub attribute: AttributeType,
    pub target_key: String,
    pub value: String,
}

impl UpdateEvent {
    /// Validate a raw attribute tag against the allow-list and attach the body
    pub fn from_parts(metadata_type: &str, body: UpdateBody) -> Result<Self, CatalogError> {
        Ok(Self {
            attribute: metadata_type.parse()?,
            target_key: body.id,
            value: body.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(records: serde_json::Value) -> Vec<u8> {
        let notification = serde_json::json!({ "Records": records }).to_string();
        serde_json::to_vec(&serde_json::json!({ "Type": "Notification", "Message": notification }))
            .unwrap()
    }

    fn record(event_name: &str, key: &str) -> serde_json::Value {
        serde_json::json!({
            "eventName": event_name,
            "s3": {
                "bucket": { "name": "album-images" },
                "object": { "key": key, "size": 1024 }
            }
        })
    }

    #[test]
    fn test_decode_created_and_removed() {
        let payload = envelope(serde_json::json!([
            record("ObjectCreated:Put", "vacation.png"),
            record("ObjectRemoved:Delete", "old.jpeg"),
        ]));

        let events = decode_upload_envelope(&payload).unwrap();

        assert_eq!(
            events,
            vec![
                ChangeEvent::created("album-images", "vacation.png"),
                ChangeEvent::removed("album-images", "old.jpeg"),
            ]
        );
    }

    #[test]
    fn test_decode_url_encoded_key() {
        let payload = envelope(serde_json::json!([record(
            "ObjectCreated:CompleteMultipartUpload",
            "summer+trip/beach%20day%281%29.jpg"
        )]));

        let events = decode_upload_envelope(&payload).unwrap();

        assert_eq!(events[0].object_key, "summer trip/beach day(1).jpg");
    }

    #[test]
    fn test_unsupported_event_names_are_skipped() {
        let payload = envelope(serde_json::json!([
            record("ObjectRestore:Completed", "vacation.png"),
            record("ObjectCreated:Copy", "copy.png"),
        ]));

        let events = decode_upload_envelope(&payload).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_key, "copy.png");
    }

    #[test]
    fn test_notification_without_records() {
        let message = serde_json::json!({ "Event": "s3:TestEvent" }).to_string();
        let payload = serde_json::to_vec(&serde_json::json!({ "Message": message })).unwrap();

        assert!(decode_upload_envelope(&payload).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_envelope() {
        assert!(matches!(
            decode_upload_envelope(b"not json"),
            Err(CatalogError::Envelope(_))
        ));

        let payload = serde_json::to_vec(&serde_json::json!({ "Message": "{broken" })).unwrap();
        assert!(matches!(
            decode_upload_envelope(&payload),
            Err(CatalogError::Envelope(_))
        ));
    }

    #[test]
    fn test_attribute_type_is_case_sensitive() {
        assert_eq!("Caption".parse::<AttributeType>().unwrap(), AttributeType::Caption);
        assert_eq!(
            "Photographer".parse::<AttributeType>().unwrap(),
            AttributeType::Photographer
        );
        assert!("caption".parse::<AttributeType>().is_err());
        assert!("Location".parse::<AttributeType>().is_err());
        assert!("".parse::<AttributeType>().is_err());
    }

    #[test]
    fn test_field_names() {
        assert_eq!(AttributeType::Caption.field_name(), "caption");
        assert_eq!(AttributeType::Date.field_name(), "date");
        assert_eq!(AttributeType::Photographer.field_name(), "photographer");
    }

    #[test]
    fn test_update_event_from_parts() {
        let body = UpdateBody {
            id: "vacation.png".to_string(),
            value: "Sunset".to_string(),
        };

        let event = UpdateEvent::from_parts("Caption", body.clone()).unwrap();
        assert_eq!(event.attribute, AttributeType::Caption);
        assert_eq!(event.target_key, "vacation.png");

        assert!(matches!(
            UpdateEvent::from_parts("Colour", body),
            Err(CatalogError::UnknownAttribute(tag)) if tag == "Colour"
        ));
    }
}
