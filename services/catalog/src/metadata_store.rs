use crate::config::DatabaseConfig;
use crate::events::AttributeType;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

/// Metadata kept for one stored image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Object key of the image; primary key
    pub image_name: String,
    pub caption: Option<String>,
    pub date: Option<String>,
    pub photographer: Option<String>,
}

impl MetadataRecord {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, attribute: AttributeType) -> Option<&str> {
        match attribute {
            AttributeType::Caption => self.caption.as_deref(),
            AttributeType::Date => self.date.as_deref(),
            AttributeType::Photographer => self.photographer.as_deref(),
        }
    }

    pub fn set_attribute(&mut self, attribute: AttributeType, value: impl Into<String>) {
        let slot = match attribute {
            AttributeType::Caption => &mut self.caption,
            AttributeType::Date => &mut self.date,
            AttributeType::Photographer => &mut self.photographer,
        };
        *slot = Some(value.into());
    }
}

/// Keyed record store behind the image and metadata processors.
///
/// Every mutation is idempotent and touches at most one field, so concurrent
/// writers need no locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create an empty record unless one already exists. Attributes written
    /// by earlier updates are kept.
    async fn put_image(&self, image_name: &str) -> Result<()>;

    /// Delete a record. Deleting a missing record succeeds.
    async fn delete_image(&self, image_name: &str) -> Result<()>;

    /// Set one attribute, creating the record if it does not exist yet
    async fn set_attribute(
        &self,
        image_name: &str,
        attribute: AttributeType,
        value: &str,
    ) -> Result<()>;
}

/// PostgreSQL-backed metadata store
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Round-trip to the database (for readiness checks)
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self))]
    async fn put_image(&self, image_name: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO images (image_name)
            VALUES ($1)
            ON CONFLICT (image_name) DO NOTHING
            "#,
        )
        .bind(image_name)
        .execute(&self.pool)
        .await
        .context("Failed to insert image record")?;

        debug!(created = result.rows_affected() == 1, "Image record stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_image(&self, image_name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM images WHERE image_name = $1")
            .bind(image_name)
            .execute(&self.pool)
            .await
            .context("Failed to delete image record")?;

        debug!(deleted = result.rows_affected(), "Image record deleted");
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_attribute(
        &self,
        image_name: &str,
        attribute: AttributeType,
        value: &str,
    ) -> Result<()> {
        sqlx::query(&upsert_attribute_sql(attribute))
            .bind(image_name)
            .bind(value)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to set {} on image record", attribute))?;

        Ok(())
    }
}

/// Single-column upsert. The column name comes from the closed
/// [`AttributeType`] set, never from message content.
fn upsert_attribute_sql(attribute: AttributeType) -> String {
    let column = attribute.field_name();
    format!(
        r#"INSERT INTO images (image_name, "{column}") VALUES ($1, $2) ON CONFLICT (image_name) DO UPDATE SET "{column}" = EXCLUDED."{column}""#,
        column = column
    )
}
