//! Kafka consumer wrapper for the album pipeline.
//!
//! Each consumer owns one consumer group, hands every message to a
//! [`MessageHandler`] under the [`DeliveryPolicy`], dead-letters messages that
//! fail terminally (when a dead-letter topic is wired) and commits the offset
//! once the message has reached a terminal outcome.

use crate::config::KafkaConfig;
use crate::delivery::{DeliveryOutcome, DeliveryPolicy};
use crate::producer::AlbumProducer;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as KafkaMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to create consumer: {0}")]
    CreationError(String),

    #[error("Failed to subscribe to topics: {0}")]
    SubscriptionError(String),

    #[error("Failed to deserialize message: {0}")]
    DeserializationError(String),

    #[error("Message processing error: {0}")]
    ProcessingError(String),

    /// Some items carried by the message failed; the rest were handled
    #[error("Processing failed for {}: {reason}", failed.join(", "))]
    PartialFailure { failed: Vec<String>, reason: String },

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Message processing exceeded {0:?}")]
    Timeout(Duration),
}

impl ConsumerError {
    /// Whether redelivering the same message could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsumerError::ProcessingError(_)
                | ConsumerError::PartialFailure { .. }
                | ConsumerError::Timeout(_)
        )
    }

    /// Identifiers of the items that failed, when the handler reported them
    pub fn failed_items(&self) -> &[String] {
        match self {
            ConsumerError::PartialFailure { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Metadata about a received message
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

/// A received message with payload and metadata
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub payload: Vec<u8>,
    pub metadata: MessageMetadata,
}

impl IncomingMessage {
    /// Deserialize the payload as JSON
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConsumerError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ConsumerError::DeserializationError(e.to_string()))
    }

    pub fn key_str(&self) -> Option<String> {
        self.metadata
            .key
            .as_ref()
            .and_then(|k| String::from_utf8(k.clone()).ok())
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.metadata.headers.get(key).map(|s| s.as_str())
    }

    pub fn message_type(&self) -> Option<&str> {
        self.header("message-type")
    }
}

/// Handler trait for processing messages
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a single message
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError>;

    /// Called once when a message has failed terminally
    async fn on_error(&self, message: &IncomingMessage, error: &ConsumerError) {
        warn!(
            topic = %message.metadata.topic,
            partition = message.metadata.partition,
            offset = message.metadata.offset,
            error = %error,
            "Message processing failed"
        );
    }
}

struct DeadLetterRoute {
    producer: Arc<AlbumProducer>,
    topic: String,
}

/// High-level Kafka consumer wrapper
pub struct AlbumConsumer {
    consumer: StreamConsumer,
    name: String,
    policy: DeliveryPolicy,
    shutdown_tx: broadcast::Sender<()>,
    dead_letter: Option<DeadLetterRoute>,
}

impl AlbumConsumer {
    /// Create a consumer in the group `{group_prefix}-{name}`
    pub fn new(config: &KafkaConfig, name: impl Into<String>) -> Result<Self, ConsumerError> {
        let name = name.into();

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group = %config.group_id(&name),
            "Creating Kafka consumer"
        );

        let consumer: StreamConsumer = config
            .build_consumer_config(&name)
            .create()
            .map_err(|e| ConsumerError::CreationError(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            consumer,
            name,
            policy: DeliveryPolicy::from(&config.delivery),
            shutdown_tx,
            dead_letter: None,
        })
    }

    /// Route terminally failed messages to `topic`
    pub fn with_dead_letter(mut self, producer: Arc<AlbumProducer>, topic: impl Into<String>) -> Self {
        self.dead_letter = Some(DeadLetterRoute {
            producer,
            topic: topic.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ConsumerError> {
        info!(consumer = %self.name, ?topics, "Subscribing to topics");
        self.consumer
            .subscribe(topics)
            .map_err(|e| ConsumerError::SubscriptionError(e.to_string()))
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to stop consuming
    pub fn shutdown(&self) {
        info!(consumer = %self.name, "Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Consume messages until shutdown, processing them with `handler`
    #[instrument(skip(self, handler), fields(consumer = %self.name))]
    pub async fn run<H>(&self, handler: Arc<H>) -> Result<(), ConsumerError>
    where
        H: MessageHandler + ?Sized,
    {
        use tokio_stream::StreamExt;

        let mut shutdown_rx = self.shutdown_receiver();
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        info!("Starting message consumption loop");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                message_result = stream.next() => {
                    match message_result {
                        Some(Ok(borrowed_message)) => {
                            let incoming = convert_message(&borrowed_message);

                            debug!(
                                topic = %incoming.metadata.topic,
                                partition = incoming.metadata.partition,
                                offset = incoming.metadata.offset,
                                "Received message"
                            );

                            let outcome = self.policy.deliver(handler.as_ref(), &incoming).await;
                            self.settle(handler.as_ref(), &incoming, outcome).await;

                            if let Err(e) = self
                                .consumer
                                .commit_message(&borrowed_message, CommitMode::Async)
                            {
                                warn!(error = %e, "Failed to commit offset");
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Kafka consumer error");
                            metrics::counter!("pipeline.kafka.errors").increment(1);
                        }
                        None => {
                            debug!("Stream ended");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            warn!(error = %e, "Failed to commit on shutdown");
        }

        Ok(())
    }

    /// Act on the terminal outcome of one message
    async fn settle<H>(&self, handler: &H, message: &IncomingMessage, outcome: DeliveryOutcome)
    where
        H: MessageHandler + ?Sized,
    {
        let attempts = outcome.attempts();
        let error = match outcome {
            DeliveryOutcome::Processed { .. } => {
                debug!(attempts, "Message processed");
                metrics::counter!("pipeline.messages.processed").increment(1);
                return;
            }
            DeliveryOutcome::Failed { error, .. } => error,
        };

        handler.on_error(message, &error).await;

        let Some(ref route) = self.dead_letter else {
            warn!(
                offset = message.metadata.offset,
                attempts,
                "No dead-letter topic wired, dropping message"
            );
            metrics::counter!("pipeline.messages.dropped").increment(1);
            return;
        };

        match route
            .producer
            .send_to_dlq(
                &route.topic,
                &message.metadata.topic,
                &message.payload,
                &error.to_string(),
                error.failed_items(),
                attempts,
            )
            .await
        {
            Ok(result) => {
                info!(
                    dead_letter_topic = %result.topic,
                    offset = message.metadata.offset,
                    attempts,
                    "Message dead-lettered"
                );
                metrics::counter!("pipeline.messages.dead_lettered").increment(1);
            }
            Err(e) => {
                error!(error = %e, offset = message.metadata.offset, "Failed to send to DLQ");
                metrics::counter!("pipeline.messages.dropped").increment(1);
            }
        }
    }
}

/// Convert a borrowed Kafka message to an owned [`IncomingMessage`]
fn convert_message<M: KafkaMessage>(msg: &M) -> IncomingMessage {
    let payload = msg.payload().unwrap_or(&[]).to_vec();
    let key = msg.key().map(|k| k.to_vec());

    let mut headers = HashMap::new();
    if let Some(h) = msg.headers() {
        for header in h.iter() {
            if let Some(value) = header.value {
                if let Ok(v) = String::from_utf8(value.to_vec()) {
                    headers.insert(header.key.to_string(), v);
                }
            }
        }
    }

    IncomingMessage {
        payload,
        metadata: MessageMetadata {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            timestamp: msg.timestamp().to_millis(),
            headers,
        },
    }
}

pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_headers(headers: HashMap<String, String>) -> IncomingMessage {
        IncomingMessage {
            payload: br#"{"id":"vacation.png","value":"Sunset"}"#.to_vec(),
            metadata: MessageMetadata {
                topic: "album.metadata-updates".to_string(),
                partition: 0,
                offset: 100,
                key: Some(b"vacation.png".to_vec()),
                timestamp: Some(1234567890),
                headers,
            },
        }
    }

    #[test]
    fn test_incoming_message_headers() {
        let mut headers = HashMap::new();
        headers.insert("metadata_type".to_string(), "Caption".to_string());
        headers.insert("message-type".to_string(), "metadata_update".to_string());

        let message = message_with_headers(headers);

        assert_eq!(message.header("metadata_type"), Some("Caption"));
        assert_eq!(message.message_type(), Some("metadata_update"));
        assert_eq!(message.key_str(), Some("vacation.png".to_string()));
    }

    #[test]
    fn test_decode_json() {
        let message = message_with_headers(HashMap::new());
        let body: serde_json::Value = message.decode_json().unwrap();
        assert_eq!(body["value"], "Sunset");

        let broken = IncomingMessage {
            payload: b"not json".to_vec(),
            ..message
        };
        let err = broken.decode_json::<serde_json::Value>().unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ConsumerError::ProcessingError("x".into()).is_retryable());
        assert!(ConsumerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ConsumerError::PartialFailure {
            failed: vec!["a.png".into()],
            reason: "down".into(),
        }
        .is_retryable());
        assert!(!ConsumerError::Rejected("x".into()).is_retryable());
        assert!(!ConsumerError::DeserializationError("x".into()).is_retryable());
    }

    #[test]
    fn test_partial_failure_names_failed_items() {
        let error = ConsumerError::PartialFailure {
            failed: vec!["a.png".into(), "b.jpg".into()],
            reason: "object store error".into(),
        };

        assert_eq!(error.failed_items(), ["a.png", "b.jpg"]);
        assert!(error.to_string().contains("a.png, b.jpg"));
        assert!(ConsumerError::ProcessingError("x".into()).failed_items().is_empty());
    }
}
