//! Album Pipeline - Kafka delivery layer for the photo album services
//!
//! Wraps rdkafka with the delivery contract the album consumers rely on:
//!
//! - one consumer group per handler, so every handler sees every message
//! - a bounded number of attempts per message, each under a wall-clock budget
//! - optional dead-letter routing for messages that fail terminally
//! - manual offset commits once a message reached a terminal outcome
//!
//! # Example
//!
//! ```rust,no_run
//! use album_pipeline::prelude::*;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl MessageHandler for Printer {
//!     async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError> {
//!         println!("{} bytes", message.payload.len());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = KafkaConfig::new("localhost:9092");
//!     let producer = Arc::new(AlbumProducer::new(&config)?);
//!     let consumer = AlbumConsumer::new(&config, "printer")?
//!         .with_dead_letter(producer, config.topics.uploads_dead_letter.clone());
//!     consumer.subscribe(&[config.topics.uploads.as_str()])?;
//!     consumer.run(Arc::new(Printer)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod producer;

pub use config::{
    AuthConfig, ConfigError, ConsumerConfig, DeliveryConfig, KafkaConfig, ProducerConfig,
    SecurityProtocol, TopicConfig,
};
pub use consumer::{
    async_trait, AlbumConsumer, ConsumerError, IncomingMessage, MessageHandler, MessageMetadata,
};
pub use delivery::{DeliveryOutcome, DeliveryPolicy};
pub use producer::{AlbumProducer, DeadLetter, DeliveryResult, OutgoingMessage, ProducerError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::KafkaConfig;
    pub use crate::consumer::{
        async_trait, AlbumConsumer, ConsumerError, IncomingMessage, MessageHandler,
    };
    pub use crate::producer::{AlbumProducer, OutgoingMessage, ProducerError};
}
