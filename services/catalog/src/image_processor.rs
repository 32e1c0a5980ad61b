use crate::error::CatalogError;
use crate::events::{ChangeEvent, ChangeKind};
use crate::ingestion_filter::{FilterDecision, IngestionFilter};
use crate::metadata_store::MetadataStore;
use crate::object_store::ObjectStore;
use crate::rejection_notifier::RejectionNotice;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Result of processing one accepted or rejected change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The record exists (it may have existed before)
    Stored { image_name: String },
    /// The record no longer exists (it may never have existed)
    Removed { image_name: String },
    /// The upload failed the ingestion filter; the store was not touched
    Rejected(RejectionNotice),
}

/// Per-event results for one envelope, in receipt order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(ChangeEvent, Result<ProcessOutcome, CatalogError>)>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn rejections(&self) -> impl Iterator<Item = &RejectionNotice> {
        self.results.iter().filter_map(|(_, result)| match result {
            Ok(ProcessOutcome::Rejected(notice)) => Some(notice),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ChangeEvent, &CatalogError)> {
        self.results
            .iter()
            .filter_map(|(event, result)| result.as_ref().err().map(|e| (event, e)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Turns storage change events into metadata store mutations
pub struct ImageProcessor {
    filter: IngestionFilter,
    metadata_store: Arc<dyn MetadataStore>,
    object_store: Arc<dyn ObjectStore>,
}

impl ImageProcessor {
    pub fn new(
        filter: IngestionFilter,
        metadata_store: Arc<dyn MetadataStore>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            filter,
            metadata_store,
            object_store,
        }
    }

    /// Process one change event.
    ///
    /// Rejections are returned as an outcome, not an error: the caller routes
    /// them to the rejection path. Errors are transient dependency failures.
    #[instrument(skip(self, event), fields(image_name = %event.object_key, bucket = %event.bucket_id, kind = ?event.kind))]
    pub async fn process(&self, event: &ChangeEvent) -> Result<ProcessOutcome, CatalogError> {
        if let FilterDecision::Reject(reason) = self.filter.evaluate(event) {
            info!(reason = %reason.message, "Upload rejected");
            metrics::counter!("catalog.uploads.rejected").increment(1);
            return Ok(ProcessOutcome::Rejected(reason.into()));
        }

        match event.kind {
            ChangeKind::Created => self.store(event).await,
            ChangeKind::Removed => self.remove(event).await,
        }
    }

    /// Process every event of an envelope independently
    pub async fn process_batch(&self, events: Vec<ChangeEvent>) -> BatchReport {
        let mut report = BatchReport::default();

        for event in events {
            let result = self.process(&event).await;
            report.results.push((event, result));
        }

        report
    }

    async fn store(&self, event: &ChangeEvent) -> Result<ProcessOutcome, CatalogError> {
        let exists = self
            .object_store
            .object_exists(&event.bucket_id, &event.object_key)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to read uploaded object");
                CatalogError::object_store(e)
            })?;

        if !exists {
            warn!("Uploaded object is not readable yet");
            return Err(CatalogError::ObjectNotFound {
                bucket: event.bucket_id.clone(),
                key: event.object_key.clone(),
            });
        }

        self.metadata_store
            .put_image(&event.object_key)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to store image metadata");
                CatalogError::store(e)
            })?;

        info!("Image metadata stored");
        metrics::counter!("catalog.images.stored").increment(1);

        Ok(ProcessOutcome::Stored {
            image_name: event.object_key.clone(),
        })
    }

    async fn remove(&self, event: &ChangeEvent) -> Result<ProcessOutcome, CatalogError> {
        self.metadata_store
            .delete_image(&event.object_key)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to delete image metadata");
                CatalogError::store(e)
            })?;

        info!("Image metadata deleted");
        metrics::counter!("catalog.images.removed").increment(1);

        Ok(ProcessOutcome::Removed {
            image_name: event.object_key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::MockMetadataStore;
    use crate::object_store::MockObjectStore;
    use mockall::predicate::eq;

    fn processor(store: MockMetadataStore, objects: MockObjectStore) -> ImageProcessor {
        ImageProcessor::new(IngestionFilter::default(), Arc::new(store), Arc::new(objects))
    }

    #[tokio::test]
    async fn test_readable_upload_is_stored() {
        let mut objects = MockObjectStore::new();
        objects
            .expect_object_exists()
            .with(eq("album-images"), eq("vacation.png"))
            .times(1)
            .returning(|_, _| Ok(true));

        let mut store = MockMetadataStore::new();
        store
            .expect_put_image()
            .with(eq("vacation.png"))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = processor(store, objects)
            .process(&ChangeEvent::created("album-images", "vacation.png"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProcessOutcome::Stored {
                image_name: "vacation.png".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_upload_does_not_touch_stores() {
        let objects = MockObjectStore::new();
        let store = MockMetadataStore::new();

        let outcome = processor(store, objects)
            .process(&ChangeEvent::created("album-images", "vacation.gif"))
            .await
            .unwrap();

        match outcome {
            ProcessOutcome::Rejected(notice) => {
                assert_eq!(notice.subject_key, "vacation.gif");
                assert!(notice.reason.contains("not a JPEG or PNG"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_object_is_retryable() {
        let mut objects = MockObjectStore::new();
        objects.expect_object_exists().returning(|_, _| Ok(false));
        let mut store = MockMetadataStore::new();
        store.expect_put_image().never();

        let err = processor(store, objects)
            .process(&ChangeEvent::created("album-images", "vacation.png"))
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::ObjectNotFound { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let mut objects = MockObjectStore::new();
        objects.expect_object_exists().returning(|_, _| Ok(true));
        let mut store = MockMetadataStore::new();
        store
            .expect_put_image()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        let err = processor(store, objects)
            .process(&ChangeEvent::created("album-images", "vacation.png"))
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::Store(ref msg) if msg.contains("connection refused")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_removal_skips_filter_and_object_check() {
        let objects = MockObjectStore::new();
        let mut store = MockMetadataStore::new();
        store
            .expect_delete_image()
            .with(eq("legacy.gif"))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = processor(store, objects)
            .process(&ChangeEvent::removed("album-images", "legacy.gif"))
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Removed { image_name } if image_name == "legacy.gif"));
    }

    #[tokio::test]
    async fn test_batch_reports_each_event_independently() {
        let mut objects = MockObjectStore::new();
        objects
            .expect_object_exists()
            .with(eq("album-images"), eq("a.png"))
            .returning(|_, _| Err(anyhow::anyhow!("timeout")));
        objects
            .expect_object_exists()
            .with(eq("album-images"), eq("b.jpg"))
            .returning(|_, _| Ok(true));

        let mut store = MockMetadataStore::new();
        store
            .expect_put_image()
            .with(eq("b.jpg"))
            .times(1)
            .returning(|_| Ok(()));

        let report = processor(store, objects)
            .process_batch(vec![
                ChangeEvent::created("album-images", "a.png"),
                ChangeEvent::created("album-images", "b.jpg"),
                ChangeEvent::created("album-images", "c.bmp"),
            ])
            .await;

        assert_eq!(report.len(), 3);
        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.rejections().count(), 1);
        assert!(matches!(report.results[1].1, Ok(ProcessOutcome::Stored { .. })));
    }
}
