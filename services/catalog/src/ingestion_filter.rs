use crate::events::{ChangeEvent, ChangeKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::trace;

/// Extensions accepted for uploads, compared case-insensitively
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Why an upload was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionReason {
    pub message: String,
    pub object_key: String,
}

/// Decision on whether a change event may be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(RejectionReason),
}

/// Admission check for storage change events.
///
/// Only uploads are filtered. Removals always pass so that a record stored
/// under an older, looser policy can still be cleaned up.
#[derive(Debug, Clone)]
pub struct IngestionFilter {
    allowed_extensions: Vec<String>,
}

impl IngestionFilter {
    pub fn new<I, S>(allowed_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn evaluate(&self, event: &ChangeEvent) -> FilterDecision {
        match event.kind {
            ChangeKind::Removed => FilterDecision::Accept,
            ChangeKind::Created => self.evaluate_upload(&event.object_key),
        }
    }

    fn evaluate_upload(&self, object_key: &str) -> FilterDecision {
        if object_key.is_empty() {
            return FilterDecision::Reject(RejectionReason {
                message: "Upload has an empty object key.".to_string(),
                object_key: String::new(),
            });
        }

        let extension = file_extension(object_key);
        trace!(object_key, ?extension, "Evaluating upload extension");

        match extension {
            Some(ext) if self.allowed_extensions.iter().any(|allowed| *allowed == ext) => {
                FilterDecision::Accept
            }
            _ => FilterDecision::Reject(RejectionReason {
                message: format!("File {} is not a JPEG or PNG.", object_key),
                object_key: object_key.to_string(),
            }),
        }
    }
}

impl Default for IngestionFilter {
    fn default() -> Self {
        Self::new(ALLOWED_EXTENSIONS)
    }
}

/// Lower-cased extension of the last path segment. Dotfiles such as `.png`
/// have no extension.
fn file_extension(object_key: &str) -> Option<String> {
    Path::new(object_key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
