use crate::config::ApiConfig;
use crate::metadata_store::PgMetadataStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// A dependency the service cannot work without
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl ReadinessProbe for PgMetadataStore {
    async fn ping(&self) -> Result<()> {
        PgMetadataStore::ping(self).await
    }
}

/// Shared state for the health API
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub database: Arc<dyn ReadinessProbe>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness: the process is up
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name
    }))
}

/// Readiness: the metadata store answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.database.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": format!("{:#}", e)
            })),
        ),
    }
}

/// Serve the health API until the task is aborted
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting health API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct FixedProbe(bool);

    #[async_trait]
    impl ReadinessProbe for FixedProbe {
        async fn ping(&self) -> Result<()> {
            if self.0 {
                Ok(())
            } else {
                anyhow::bail!("connection refused")
            }
        }
    }

    fn router(database_up: bool) -> Router {
        create_router(AppState {
            service_name: "catalog-service".to_string(),
            database: Arc::new(FixedProbe(database_up)),
        })
    }

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_is_always_ok() {
        assert_eq!(get_status(router(false), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_follows_database() {
        assert_eq!(get_status(router(true), "/ready").await, StatusCode::OK);
        assert_eq!(
            get_status(router(false), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
