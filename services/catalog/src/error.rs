use album_pipeline::ConsumerError;
use thiserror::Error;

/// Errors raised while processing catalog events
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("object {bucket}/{key} is not readable yet")]
    ObjectNotFound { bucket: String, key: String },

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("metadata store error: {0}")]
    Store(String),

    #[error("failed to route rejection: {0}")]
    Routing(String),

    #[error("failed to send notification: {0}")]
    Notify(String),

    #[error("invalid envelope: {0}")]
    Envelope(String),

    #[error("unknown metadata type: {0:?}")]
    UnknownAttribute(String),
}

impl CatalogError {
    /// Transient dependency failures may succeed on redelivery; validation
    /// failures never will.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::ObjectNotFound { .. }
                | CatalogError::ObjectStore(_)
                | CatalogError::Store(_)
                | CatalogError::Routing(_)
        )
    }

    pub(crate) fn store(error: anyhow::Error) -> Self {
        CatalogError::Store(format!("{:#}", error))
    }

    pub(crate) fn object_store(error: anyhow::Error) -> Self {
        CatalogError::ObjectStore(format!("{:#}", error))
    }
}

impl From<CatalogError> for ConsumerError {
    fn from(error: CatalogError) -> Self {
        if error.is_retryable() {
            ConsumerError::ProcessingError(error.to_string())
        } else {
            ConsumerError::Rejected(error.to_string())
        }
    }
}
