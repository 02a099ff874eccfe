//! HTTP surface of the demo: the upload page, result pages and a JSON API.

pub mod handlers;
pub mod pages;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogCache};
use crate::{traits::SegmentationModel, Segmenter};

/// Upload size accepted by the segment endpoints.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Shared server state. The only thing written after startup is the catalog
/// cache, and only on its first successful load.
pub struct AppState {
    pub segmenter: Segmenter<Arc<dyn SegmentationModel>>,
    catalog_path: PathBuf,
    catalogs: CatalogCache,
}

impl AppState {
    pub fn new(
        segmenter: Segmenter<Arc<dyn SegmentationModel>>,
        catalog_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            segmenter,
            catalog_path: catalog_path.into(),
            catalogs: CatalogCache::new(),
        }
    }

    /// The sample catalog, parsed on first use and shared afterwards.
    ///
    /// A missing or broken document gives an empty sidebar; the load is
    /// retried on the next request.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalogs
            .get_or_load(&self.catalog_path)
            .unwrap_or_else(|e| {
                warn!(error = %e, path = %self.catalog_path.display(), "sample catalog unavailable");
                Arc::new(Catalog::default())
            })
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/segment", post(handlers::segment_upload))
        .route("/api/segment", post(handlers::api_segment))
        .route("/samples/:category", get(handlers::list_samples))
        .route("/samples/:category/*id", post(handlers::segment_sample))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn serve(state: SharedState, bind: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving clothes segmentation demo");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
