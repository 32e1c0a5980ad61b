//! Kafka message handlers wiring the delivery layer to the catalog processors.
//!
//! - [`UploadHandler`] consumes upload envelopes and routes rejections
//! - [`MetadataUpdateHandler`] consumes attribute updates
//! - [`RejectionHandler`] consumes rejection notices and dead-lettered uploads

use crate::error::CatalogError;
use crate::events::{
    decode_upload_envelope, AttributeType, ChangeKind, UpdateBody, METADATA_TYPE_HEADER,
};
use crate::image_processor::ImageProcessor;
use crate::ingestion_filter::{FilterDecision, IngestionFilter};
use crate::patch_processor::{MetadataPatchProcessor, PatchOutcome};
use crate::rejection_notifier::{RejectionNotice, RejectionNotifier};
use album_pipeline::{
    async_trait, AlbumProducer, ConsumerError, DeadLetter, IncomingMessage, MessageHandler,
    OutgoingMessage,
};
use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const REJECTION_MESSAGE_TYPE: &str = "rejection_notice";

/// Destination for rejection notices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RejectionSink: Send + Sync {
    async fn publish(&self, notice: &RejectionNotice) -> anyhow::Result<()>;
}

/// Publishes rejection notices to the rejections topic, keyed by object key
pub struct KafkaRejectionSink {
    producer: Arc<AlbumProducer>,
    topic: String,
}

impl KafkaRejectionSink {
    pub fn new(producer: Arc<AlbumProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl RejectionSink for KafkaRejectionSink {
    async fn publish(&self, notice: &RejectionNotice) -> anyhow::Result<()> {
        let message = OutgoingMessage::new_json(&self.topic, notice)?
            .with_key(&notice.subject_key)
            .with_message_type(REJECTION_MESSAGE_TYPE);

        let result = self
            .producer
            .send(message)
            .await
            .context("Failed to publish rejection notice")?;

        debug!(
            topic = %result.topic,
            partition = result.partition,
            offset = result.offset,
            "Rejection notice published"
        );
        Ok(())
    }
}

/// Handles upload envelopes from the storage notification topic.
///
/// Every event in the envelope is processed. When any of them failed
/// transiently the whole message is failed, naming the failed keys, so the
/// delivery layer redelivers it. Rejections are only routed once the envelope
/// went through cleanly, and all rejections of one envelope travel as a single
/// notice: routing either happens once or not at all, so a redelivery never
/// mails the same rejection twice.
pub struct UploadHandler {
    processor: Arc<ImageProcessor>,
    rejections: Arc<dyn RejectionSink>,
}

impl UploadHandler {
    pub fn new(processor: Arc<ImageProcessor>, rejections: Arc<dyn RejectionSink>) -> Self {
        Self {
            processor,
            rejections,
        }
    }
}

#[async_trait]
impl MessageHandler for UploadHandler {
    #[instrument(skip(self, message), fields(offset = message.metadata.offset))]
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError> {
        let events = decode_upload_envelope(&message.payload)?;

        if events.is_empty() {
            debug!("Envelope carries no storage changes");
            return Ok(());
        }

        let report = self.processor.process_batch(events).await;

        if report.has_failures() {
            let (failed, reasons): (Vec<String>, Vec<String>) = report
                .failures()
                .map(|(event, e)| (event.object_key.clone(), e.to_string()))
                .unzip();
            return Err(ConsumerError::PartialFailure {
                failed,
                reason: reasons.join("; "),
            });
        }

        if let Some(notice) = RejectionNotice::combine(report.rejections()) {
            self.rejections
                .publish(&notice)
                .await
                .map_err(|e| CatalogError::Routing(format!("{:#}", e)))?;
        }

        info!(events = report.len(), "Upload envelope processed");
        Ok(())
    }
}

/// Handles single-attribute updates from the metadata extraction topic
pub struct MetadataUpdateHandler {
    processor: Arc<MetadataPatchProcessor>,
}

impl MetadataUpdateHandler {
    pub fn new(processor: Arc<MetadataPatchProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl MessageHandler for MetadataUpdateHandler {
    #[instrument(skip(self, message), fields(offset = message.metadata.offset))]
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError> {
        let Some(metadata_type) = message
            .header(METADATA_TYPE_HEADER)
            .filter(|tag| tag.parse::<AttributeType>().is_ok())
        else {
            warn!(
                metadata_type = ?message.header(METADATA_TYPE_HEADER),
                "Metadata update outside the attribute allow-list, dropping"
            );
            metrics::counter!("catalog.metadata.dropped").increment(1);
            return Ok(());
        };

        let body: UpdateBody = match message.decode_json() {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Malformed metadata update, dropping");
                metrics::counter!("catalog.metadata.dropped").increment(1);
                return Ok(());
            }
        };

        match self.processor.apply(metadata_type, body).await? {
            PatchOutcome::Applied { .. } => {}
            PatchOutcome::Dropped { reason } => debug!(%reason, "Metadata update dropped"),
        }

        Ok(())
    }
}

/// Turns rejection notices and dead-lettered uploads into rejection mail.
///
/// Notification is best effort: a failed send is logged and the message is
/// still acknowledged.
pub struct RejectionHandler {
    notifier: Arc<RejectionNotifier>,
    filter: IngestionFilter,
    rejections_topic: String,
    dead_letter_topic: String,
}

impl RejectionHandler {
    /// `filter` must be the one the upload path applies, so that rejections
    /// withheld from a dead-lettered envelope are recognised again
    pub fn new(
        notifier: Arc<RejectionNotifier>,
        filter: IngestionFilter,
        rejections_topic: impl Into<String>,
        dead_letter_topic: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            filter,
            rejections_topic: rejections_topic.into(),
            dead_letter_topic: dead_letter_topic.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for RejectionHandler {
    #[instrument(skip(self, message), fields(topic = %message.metadata.topic, offset = message.metadata.offset))]
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError> {
        let topic = message.metadata.topic.as_str();

        let notice = if topic == self.rejections_topic {
            match message.decode_json::<RejectionNotice>() {
                Ok(notice) => Some(notice),
                Err(e) => {
                    warn!(error = %e, "Unreadable rejection notice, sending generic mail");
                    None
                }
            }
        } else if topic == self.dead_letter_topic {
            notice_from_dead_letter(&message, &self.filter)
        } else {
            warn!("Message from unexpected topic, ignoring");
            return Ok(());
        };

        // Send failures are already logged and counted by the notifier
        let _ = self.notifier.notify(notice.as_ref()).await;

        Ok(())
    }
}

/// Build the notice for a dead-lettered upload envelope.
///
/// Names the uploads that failed the filter (their notice was withheld while
/// the envelope was being retried) and the uploads that could not be
/// processed. When the dead letter lists failed keys only those are named;
/// uploads of the same envelope that were stored are left out. Returns `None`
/// when the envelope cannot be attributed to any upload, in which case the
/// generic mail is sent.
fn notice_from_dead_letter(
    message: &IncomingMessage,
    filter: &IngestionFilter,
) -> Option<RejectionNotice> {
    let dead_letter: DeadLetter = match message.decode_json() {
        Ok(dead_letter) => dead_letter,
        Err(e) => {
            warn!(error = %e, "Unreadable dead letter");
            return None;
        }
    };

    warn!(
        original_topic = %dead_letter.original_topic,
        attempts = dead_letter.attempts,
        failed = ?dead_letter.failed_items,
        error = %dead_letter.error,
        "Upload envelope was dead-lettered"
    );

    let original = dead_letter.original_message().ok()?;
    let events = decode_upload_envelope(&original).ok()?;

    let mut notices: Vec<RejectionNotice> = Vec::new();
    let mut unprocessed: Vec<&str> = Vec::new();

    for event in events.iter().filter(|event| event.kind == ChangeKind::Created) {
        if let FilterDecision::Reject(reason) = filter.evaluate(event) {
            notices.push(reason.into());
        } else if dead_letter.failed_items.is_empty()
            || dead_letter.failed_items.contains(&event.object_key)
        {
            unprocessed.push(&event.object_key);
        }
    }

    if !unprocessed.is_empty() {
        notices.push(RejectionNotice::new(
            unprocessed.join(", "),
            format!(
                "File {} could not be processed after {} attempts.",
                unprocessed.join(", "),
                dead_letter.attempts
            ),
        ));
    } else if notices.is_empty() && !dead_letter.failed_items.is_empty() {
        // Only removals failed
        notices.push(RejectionNotice::new(
            "",
            format!(
                "A storage change could not be processed after {} attempts.",
                dead_letter.attempts
            ),
        ));
    }

    RejectionNotice::combine(&notices)
}
