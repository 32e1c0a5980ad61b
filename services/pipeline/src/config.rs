//! Kafka configuration for the album delivery layer.
//!
//! Connection settings, per-consumer delivery budgets and the topic layout of
//! the album pipeline: uploads in, rejections and dead letters out, metadata
//! updates from the extraction source.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Security protocol for Kafka connections
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

/// SASL/SSL credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Path to CA certificate file
    pub ssl_ca_location: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    #[serde(default = "default_sasl_mechanism")]
    pub sasl_mechanism: String,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
}

fn default_sasl_mechanism() -> String {
    "PLAIN".to_string()
}

/// How a consumer redelivers a message before giving up on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Total handler invocations per message, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts; attempt `n` waits `n * retry_backoff_ms`
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Wall-clock budget for one handler invocation
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_processing_timeout_ms() -> u64 {
    30000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            processing_timeout_ms: default_processing_timeout_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }
}

/// Consumer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Prefix for consumer group IDs; each handler appends its own suffix
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,
    /// Auto offset reset: earliest, latest, none
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
    /// Maximum poll interval in milliseconds
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
}

fn default_group_prefix() -> String {
    "album".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout() -> u64 {
    30000
}

fn default_max_poll_interval() -> u64 {
    300000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_prefix: default_group_prefix(),
            auto_offset_reset: default_auto_offset_reset(),
            session_timeout_ms: default_session_timeout(),
            max_poll_interval_ms: default_max_poll_interval(),
        }
    }
}

/// Producer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Required acknowledgments: 0, 1, or all
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_true")]
    pub enable_idempotence: bool,
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            acks: default_acks(),
            enable_idempotence: true,
        }
    }
}

/// Topic layout of the album pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Storage change envelopes
    #[serde(default = "default_uploads_topic")]
    pub uploads: String,
    /// Upload envelopes that exhausted their delivery budget
    #[serde(default = "default_uploads_dlq_topic")]
    pub uploads_dead_letter: String,
    /// Rejection notices produced by the image processor
    #[serde(default = "default_rejections_topic")]
    pub rejections: String,
    /// Out-of-band metadata updates
    #[serde(default = "default_metadata_updates_topic")]
    pub metadata_updates: String,
}

fn default_uploads_topic() -> String {
    "album.uploads".to_string()
}

fn default_uploads_dlq_topic() -> String {
    "album.uploads.dlq".to_string()
}

fn default_rejections_topic() -> String {
    "album.rejections".to_string()
}

fn default_metadata_updates_topic() -> String {
    "album.metadata-updates".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            uploads: default_uploads_topic(),
            uploads_dead_letter: default_uploads_dlq_topic(),
            rejections: default_rejections_topic(),
            metadata_updates: default_metadata_updates_topic(),
        }
    }
}

/// Main Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses
    pub bootstrap_servers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub security_protocol: SecurityProtocol,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    /// Additional librdkafka properties
    #[serde(default)]
    pub extra_properties: HashMap<String, String>,
}

fn default_client_id() -> String {
    "album-catalog".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: default_client_id(),
            security_protocol: SecurityProtocol::default(),
            auth: AuthConfig::default(),
            consumer: ConsumerConfig::default(),
            producer: ProducerConfig::default(),
            delivery: DeliveryConfig::default(),
            topics: TopicConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    fn build_base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("security.protocol", self.security_protocol.as_str());

        if let Some(ref ca) = self.auth.ssl_ca_location {
            config.set("ssl.ca.location", ca);
        }

        if self.security_protocol.uses_sasl() {
            config.set("sasl.mechanism", &self.auth.sasl_mechanism);
            if let Some(ref username) = self.auth.sasl_username {
                config.set("sasl.username", username);
            }
            if let Some(ref password) = self.auth.sasl_password {
                config.set("sasl.password", password);
            }
        }

        for (key, value) in &self.extra_properties {
            config.set(key, value);
        }

        config
    }

    /// Build a producer ClientConfig
    pub fn build_producer_config(&self) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("acks", &self.producer.acks);
        config.set(
            "request.timeout.ms",
            self.producer.request_timeout_ms.to_string(),
        );
        if self.producer.enable_idempotence {
            config.set("enable.idempotence", "true");
        }

        config
    }

    /// Build a consumer ClientConfig for the given group suffix.
    ///
    /// Offsets are always committed manually, after a message has reached a
    /// terminal outcome (processed, dead-lettered or dropped).
    pub fn build_consumer_config(&self, group_suffix: &str) -> ClientConfig {
        let mut config = self.build_base_config();

        config.set("group.id", self.group_id(group_suffix));
        config.set("auto.offset.reset", &self.consumer.auto_offset_reset);
        config.set("enable.auto.commit", "false");
        config.set(
            "session.timeout.ms",
            self.consumer.session_timeout_ms.to_string(),
        );
        config.set(
            "max.poll.interval.ms",
            self.consumer.max_poll_interval_ms.to_string(),
        );

        config
    }

    /// Consumer group ID for a handler. Distinct groups give every handler
    /// its own copy of each message.
    pub fn group_id(&self, group_suffix: &str) -> String {
        format!("{}-{}", self.consumer.group_prefix, group_suffix)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.producer.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "kafka.bootstrap_servers".to_string(),
            ));
        }

        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "kafka.delivery.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.security_protocol.uses_sasl() && self.auth.sasl_username.is_none() {
            return Err(ConfigError::MissingRequired(
                "kafka.auth.sasl_username (required for SASL)".to_string(),
            ));
        }

        Ok(())
    }
}
