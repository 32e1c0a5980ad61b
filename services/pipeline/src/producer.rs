//! Kafka producer wrapper for the album pipeline.
//!
//! Publishes JSON payloads with headers, and wraps messages that exhausted
//! their delivery budget into dead letters.

use crate::config::KafkaConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Errors that can occur during message production
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to serialize message: {0}")]
    SerializationError(String),

    #[error("Failed to send message to topic {topic}: {message}")]
    SendError { topic: String, message: String },

    #[error("Producer timeout after {0:?}")]
    Timeout(Duration),
}

/// Result of a successful message delivery
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
}

/// Message to be sent to Kafka
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub topic: String,
    /// Partitioning key
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutgoingMessage {
    /// Create a new outgoing message with a JSON payload
    pub fn new_json<T: Serialize>(
        topic: impl Into<String>,
        message: &T,
    ) -> Result<Self, ProducerError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| ProducerError::SerializationError(e.to_string()))?;
        Ok(Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: Vec::new(),
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_message_type(self, msg_type: impl Into<String>) -> Self {
        self.with_header("message-type", msg_type)
    }

    fn kafka_headers(&self) -> OwnedHeaders {
        self.headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            })
    }
}

/// A message that failed on its primary topic after exhausting its attempts.
///
/// The original payload is kept verbatim (base64) so a downstream consumer
/// can recover the envelope that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original_topic: String,
    pub original_message_base64: String,
    pub error: String,
    #[serde(default)]
    pub attempts: u32,
    /// Items of the original message that failed; empty when the failure
    /// covered the whole message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_items: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(original_topic: &str, original_message: &[u8], error: &str, attempts: u32) -> Self {
        Self {
            original_topic: original_topic.to_string(),
            original_message_base64: STANDARD.encode(original_message),
            error: error.to_string(),
            attempts,
            failed_items: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_failed_items(mut self, failed_items: &[String]) -> Self {
        self.failed_items = failed_items.to_vec();
        self
    }

    /// Decode the original payload
    pub fn original_message(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.original_message_base64)
    }
}

/// High-level Kafka producer wrapper
pub struct AlbumProducer {
    producer: FutureProducer,
    default_timeout: Duration,
}

impl AlbumProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, ProducerError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            "Creating Kafka producer"
        );

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ProducerError::CreationError(e.to_string()))?;

        Ok(Self {
            producer,
            default_timeout: config.request_timeout(),
        })
    }

    /// Send a message and wait for delivery confirmation
    #[instrument(skip(self, message), fields(topic = %message.topic, key = ?message.key))]
    pub async fn send(&self, message: OutgoingMessage) -> Result<DeliveryResult, ProducerError> {
        let headers = message.kafka_headers();
        let mut record = FutureRecord::to(&message.topic)
            .payload(&message.payload)
            .headers(headers);

        if let Some(ref k) = message.key {
            record = record.key(k);
        }

        debug!(size_bytes = message.payload.len(), "Sending message");

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.default_timeout))
            .await
            .map_err(|(e, _)| ProducerError::SendError {
                topic: message.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Message delivered");

        Ok(DeliveryResult {
            topic: message.topic,
            partition,
            offset,
            key: message.key,
        })
    }

    /// Wrap a failed message into a [`DeadLetter`] and publish it
    pub async fn send_to_dlq(
        &self,
        dead_letter_topic: &str,
        original_topic: &str,
        original_message: &[u8],
        error: &str,
        failed_items: &[String],
        attempts: u32,
    ) -> Result<DeliveryResult, ProducerError> {
        let dead_letter = DeadLetter::new(original_topic, original_message, error, attempts)
            .with_failed_items(failed_items);

        let message = OutgoingMessage::new_json(dead_letter_topic, &dead_letter)?
            .with_key(Uuid::new_v4().to_string())
            .with_message_type("dead_letter")
            .with_header("original-topic", original_topic)
            .with_header("error-reason", error);

        self.send(message).await
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| ProducerError::Timeout(timeout))
    }
}

impl Drop for AlbumProducer {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}
