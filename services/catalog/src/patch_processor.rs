use crate::error::CatalogError;
use crate::events::{AttributeType, UpdateBody, UpdateEvent};
use crate::metadata_store::MetadataStore;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Result of applying one metadata update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied {
        image_name: String,
        attribute: AttributeType,
    },
    /// The update can never be applied; it was logged and discarded
    Dropped { reason: String },
}

/// Applies single-attribute updates from the metadata extraction source.
///
/// Updates do not check whether the target record exists: an update that
/// arrives before its upload creates a partial record, which the upload later
/// leaves intact.
pub struct MetadataPatchProcessor {
    metadata_store: Arc<dyn MetadataStore>,
}

impl MetadataPatchProcessor {
    pub fn new(metadata_store: Arc<dyn MetadataStore>) -> Self {
        Self { metadata_store }
    }

    /// Validate the attribute tag and apply the update.
    ///
    /// Unknown tags are dropped, not failed: redelivery cannot fix them.
    pub async fn apply(
        &self,
        metadata_type: &str,
        body: UpdateBody,
    ) -> Result<PatchOutcome, CatalogError> {
        match UpdateEvent::from_parts(metadata_type, body) {
            Ok(update) => self.apply_event(&update).await,
            Err(e) => {
                error!(metadata_type, "Invalid metadata type");
                metrics::counter!("catalog.metadata.dropped").increment(1);
                Ok(PatchOutcome::Dropped {
                    reason: e.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self, update), fields(image_name = %update.target_key, attribute = %update.attribute))]
    pub async fn apply_event(&self, update: &UpdateEvent) -> Result<PatchOutcome, CatalogError> {
        self.metadata_store
            .set_attribute(&update.target_key, update.attribute, &update.value)
            .await
            .map_err(|e| {
                error!(error = %e, "Error updating metadata");
                CatalogError::store(e)
            })?;

        info!("Metadata updated");
        metrics::counter!("catalog.metadata.updated").increment(1);

        Ok(PatchOutcome::Applied {
            image_name: update.target_key.clone(),
            attribute: update.attribute,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::MockMetadataStore;
    use mockall::predicate::eq;

    fn body(id: &str, value: &str) -> UpdateBody {
        UpdateBody {
            id: id.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_allowed_attribute_sets_single_field() {
        let mut store = MockMetadataStore::new();
        store
            .expect_set_attribute()
            .with(eq("vacation.png"), eq(AttributeType::Caption), eq("Sunset"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = MetadataPatchProcessor::new(Arc::new(store))
            .apply("Caption", body("vacation.png", "Sunset"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PatchOutcome::Applied {
                image_name: "vacation.png".to_string(),
                attribute: AttributeType::Caption,
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_attribute_is_dropped_without_mutation() {
        let mut store = MockMetadataStore::new();
        store.expect_set_attribute().never();
        let processor = MetadataPatchProcessor::new(Arc::new(store));

        for tag in ["Location", "caption", ""] {
            let outcome = processor.apply(tag, body("vacation.png", "x")).await.unwrap();
            assert!(matches!(outcome, PatchOutcome::Dropped { .. }), "{}", tag);
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_retryable() {
        let mut store = MockMetadataStore::new();
        store
            .expect_set_attribute()
            .returning(|_, _, _| Err(anyhow::anyhow!("throttled")));

        let err = MetadataPatchProcessor::new(Arc::new(store))
            .apply("Photographer", body("vacation.png", "Ansel"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
