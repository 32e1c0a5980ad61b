//! Album Catalog Service
//!
//! Keeps the photo album's image metadata in step with object storage.
//! Upload notifications are filtered by file type, accepted uploads get a
//! metadata record, removals delete it, extracted attributes are patched onto
//! records one field at a time, and rejected uploads are reported by mail.
//!
//! ## Architecture
//!
//! ```text
//! album.uploads           album.metadata-updates
//! ┌──────────────┐        ┌──────────────┐
//! │ Upload       │        │ Metadata     │
//! │ Handler      │        │ Update       │
//! └──────────────┘        │ Handler      │
//!        │                └──────────────┘
//!        ▼                       │
//! ┌──────────────┐               ▼
//! │ Ingestion    │        ┌──────────────┐
//! │ Filter       │        │ Patch        │
//! └──────────────┘        │ Processor    │
//!   │ accept   │ reject   └──────────────┘
//!   ▼          ▼                 │
//! ┌────────┐ ┌───────────┐       ▼
//! │ Image  │ │ album.    │  ┌──────────────┐
//! │ Proc.  │─┼▶rejections│  │ PostgreSQL   │
//! └────────┘ └───────────┘  │ images       │
//!   │  │  exhausted │       └──────────────┘
//!   │  └─▶ album.uploads.dlq     ▲
//!   │            │               │
//!   └────────────┼───────────────┘
//!                ▼
//!         ┌──────────────┐
//!         │ Rejection    │───▶ SES
//!         │ Notifier     │
//!         └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod health;
pub mod image_processor;
pub mod ingestion_filter;
pub mod metadata_store;
pub mod object_store;
pub mod patch_processor;
pub mod rejection_notifier;

pub use config::Config;
pub use error::CatalogError;
pub use events::{AttributeType, ChangeEvent, ChangeKind, UpdateBody, UpdateEvent};
pub use handlers::{
    KafkaRejectionSink, MetadataUpdateHandler, RejectionHandler, RejectionSink, UploadHandler,
};
pub use health::AppState;
pub use image_processor::{BatchReport, ImageProcessor, ProcessOutcome};
pub use ingestion_filter::{FilterDecision, IngestionFilter, RejectionReason};
pub use metadata_store::{MetadataRecord, MetadataStore, PgMetadataStore};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use patch_processor::{MetadataPatchProcessor, PatchOutcome};
pub use rejection_notifier::{
    EmailMessage, Notifier, RejectionNotice, RejectionNotifier, SesNotifier,
};
