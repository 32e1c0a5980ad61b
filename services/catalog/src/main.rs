use album_pipeline::{AlbumConsumer, AlbumProducer};
use anyhow::{Context, Result};
use catalog_service::config::Config;
use catalog_service::handlers::{
    KafkaRejectionSink, MetadataUpdateHandler, RejectionHandler, UploadHandler,
};
use catalog_service::health::{start_api_server, AppState};
use catalog_service::image_processor::ImageProcessor;
use catalog_service::ingestion_filter::IngestionFilter;
use catalog_service::metadata_store::PgMetadataStore;
use catalog_service::object_store::S3ObjectStore;
use catalog_service::patch_processor::MetadataPatchProcessor;
use catalog_service::rejection_notifier::{RejectionNotifier, SesNotifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing settings stop the service before anything is consumed
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Starting album catalog service");

    init_metrics(config.service.metrics_port)?;

    let metadata_store = Arc::new(
        PgMetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let ses = Arc::new(
        SesNotifier::new(&config.notifier)
            .await
            .context("Failed to initialize SES notifier")?,
    );

    let producer = Arc::new(
        AlbumProducer::new(&config.kafka).context("Failed to create Kafka producer")?,
    );

    let topics = &config.kafka.topics;
    let filter = IngestionFilter::default();

    // Uploads: store, remove or reject
    let image_processor = Arc::new(ImageProcessor::new(
        filter.clone(),
        metadata_store.clone(),
        object_store,
    ));
    let upload_handler = Arc::new(UploadHandler::new(
        image_processor,
        Arc::new(KafkaRejectionSink::new(producer.clone(), &topics.rejections)),
    ));
    let uploads = Arc::new(
        AlbumConsumer::new(&config.kafka, "uploads")
            .context("Failed to create uploads consumer")?
            .with_dead_letter(producer.clone(), &topics.uploads_dead_letter),
    );
    uploads.subscribe(&[topics.uploads.as_str()])?;

    // Metadata updates: one attribute per message
    let update_handler = Arc::new(MetadataUpdateHandler::new(Arc::new(
        MetadataPatchProcessor::new(metadata_store.clone()),
    )));
    let updates = Arc::new(
        AlbumConsumer::new(&config.kafka, "metadata-updates")
            .context("Failed to create metadata update consumer")?,
    );
    updates.subscribe(&[topics.metadata_updates.as_str()])?;

    // Rejections and exhausted uploads: one mail each
    let rejection_handler = Arc::new(RejectionHandler::new(
        Arc::new(RejectionNotifier::new(ses, &config.notifier)),
        filter,
        &topics.rejections,
        &topics.uploads_dead_letter,
    ));
    let rejections = Arc::new(
        AlbumConsumer::new(&config.kafka, "rejections")
            .context("Failed to create rejections consumer")?,
    );
    rejections.subscribe(&[
        topics.rejections.as_str(),
        topics.uploads_dead_letter.as_str(),
    ])?;

    let consumer_handles = vec![
        spawn_consumer(uploads.clone(), upload_handler),
        spawn_consumer(updates.clone(), update_handler),
        spawn_consumer(rejections.clone(), rejection_handler),
    ];

    let api_state = AppState {
        service_name: config.service.name.clone(),
        database: metadata_store.clone(),
    };
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Catalog service started successfully");

    shutdown_signal().await;

    info!("Shutting down catalog service");

    for consumer in [&uploads, &updates, &rejections] {
        consumer.shutdown();
    }
    for handle in consumer_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Consumer task panicked");
        }
    }

    api_handle.abort();

    if let Err(e) = producer.flush(Duration::from_secs(5)) {
        error!(error = %e, "Failed to flush producer");
    }

    info!("Catalog service stopped");

    Ok(())
}

fn spawn_consumer<H>(consumer: Arc<AlbumConsumer>, handler: Arc<H>) -> tokio::task::JoinHandle<()>
where
    H: album_pipeline::MessageHandler + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = consumer.run(handler).await {
            error!(consumer = %consumer.name(), error = %e, "Kafka consumer error");
        }
    })
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
