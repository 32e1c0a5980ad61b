//! In-memory stand-ins for the catalog's external dependencies

#![allow(dead_code)]

use album_pipeline::{IncomingMessage, MessageMetadata};
use anyhow::Result;
use async_trait::async_trait;
use catalog_service::config::NotifierConfig;
use catalog_service::events::AttributeType;
use catalog_service::metadata_store::{MetadataRecord, MetadataStore};
use catalog_service::object_store::ObjectStore;
use catalog_service::rejection_notifier::{EmailMessage, Notifier, RejectionNotice};
use catalog_service::RejectionSink;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const BUCKET: &str = "album-images";
pub const UPLOADS: &str = "album.uploads";
pub const UPLOADS_DLQ: &str = "album.uploads.dlq";
pub const REJECTIONS: &str = "album.rejections";
pub const METADATA_UPDATES: &str = "album.metadata-updates";

#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<String, MetadataRecord>>,
}

impl InMemoryMetadataStore {
    pub fn record(&self, image_name: &str) -> Option<MetadataRecord> {
        self.records.lock().unwrap().get(image_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn put_image(&self, image_name: &str) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .entry(image_name.to_string())
            .or_insert_with(|| MetadataRecord::new(image_name));
        Ok(())
    }

    async fn delete_image(&self, image_name: &str) -> Result<()> {
        self.records.lock().unwrap().remove(image_name);
        Ok(())
    }

    async fn set_attribute(
        &self,
        image_name: &str,
        attribute: AttributeType,
        value: &str,
    ) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .entry(image_name.to_string())
            .or_insert_with(|| MetadataRecord::new(image_name))
            .set_attribute(attribute, value);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashSet<(String, String)>>,
}

impl InMemoryObjectStore {
    pub fn put(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains(&(bucket.to_string(), key.to_string())))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct CapturingSink {
    published: Mutex<Vec<RejectionNotice>>,
}

impl CapturingSink {
    pub fn published(&self) -> Vec<RejectionNotice> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl RejectionSink for CapturingSink {
    async fn publish(&self, notice: &RejectionNotice) -> Result<()> {
        self.published.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub fn notifier_config() -> NotifierConfig {
    NotifierConfig {
        sender: "album@example.com".to_string(),
        recipient: "owner@example.com".to_string(),
        region: "eu-west-1".to_string(),
    }
}

pub fn message(topic: &str, payload: Vec<u8>, headers: &[(&str, &str)]) -> IncomingMessage {
    IncomingMessage {
        payload,
        metadata: MessageMetadata {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: None,
            timestamp: None,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
    }
}

/// Queue envelope around a storage notification with one record per change
pub fn upload_envelope(changes: &[(&str, &str)]) -> Vec<u8> {
    let records: Vec<_> = changes
        .iter()
        .map(|(event_name, key)| {
            serde_json::json!({
                "eventName": event_name,
                "s3": { "bucket": { "name": BUCKET }, "object": { "key": key } }
            })
        })
        .collect();
    let notification = serde_json::json!({ "Records": records }).to_string();
    serde_json::to_vec(&serde_json::json!({ "Type": "Notification", "Message": notification }))
        .unwrap()
}

pub fn update_body(id: &str, value: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "id": id, "value": value })).unwrap()
}
