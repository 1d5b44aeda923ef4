mod reads;
mod references;
mod service_info;
mod signal;

pub use reads::{get_coverage, get_reads};
pub use references::get_references;
pub use service_info::service_info;
pub use signal::{get_binned_signal, get_raw_signal, get_signal_stats};

use crate::query::{AlignmentArchive, ArchiveOptions, SignalArchive};
use crate::storage::{ArchiveKind, LocalStorage};
use crate::{Error, Result};
use axum::{Router, routing::get};
use moka::future::Cache;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Reference index used for names an archive does not know; queries on it
/// return no data.
pub(crate) const UNKNOWN_REFERENCE: usize = usize::MAX;

/// Open archive handles keyed by file id.
///
/// Handles parse their header and index once and are shared by every
/// request for the same id. Evicted handles are closed once the last
/// in-flight request drops them.
#[derive(Clone)]
pub struct ArchiveRegistry {
    storage: Arc<LocalStorage>,
    options: ArchiveOptions,
    alignments: Cache<String, Arc<AlignmentArchive>>,
    signals: Cache<String, Arc<SignalArchive>>,
}

impl ArchiveRegistry {
    pub fn new(storage: Arc<LocalStorage>, options: ArchiveOptions, capacity: u64) -> Self {
        Self {
            storage,
            options,
            alignments: Cache::builder().max_capacity(capacity).build(),
            signals: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub async fn alignment(&self, id: &str) -> Result<Arc<AlignmentArchive>> {
        let path = self
            .storage
            .archive_path(id, ArchiveKind::Alignment)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reads/{}", id)))?;
        let options = self.options;
        self.alignments
            .try_get_with(id.to_string(), async move {
                AlignmentArchive::open_path(&path, &options).await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn signal(&self, id: &str) -> Result<Arc<SignalArchive>> {
        let path = self
            .storage
            .archive_path(id, ArchiveKind::Signal)
            .await?
            .ok_or_else(|| Error::NotFound(format!("signal/{}", id)))?;
        let options = self.options;
        self.signals
            .try_get_with(id.to_string(), async move {
                SignalArchive::open_path(&path, &options).await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub archives: ArchiveRegistry,
    pub max_records: usize,
}

impl AppState {
    pub fn new(storage: Arc<LocalStorage>, options: ArchiveOptions, max_records: usize) -> Self {
        Self {
            archives: ArchiveRegistry::new(storage, options, 64),
            max_records,
        }
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/reads/:id", get(get_reads))
        .route("/coverage/:id", get(get_coverage))
        .route("/signal/:id", get(get_raw_signal))
        .route("/signal/:id/binned", get(get_binned_signal))
        .route("/signal/:id/stats", get(get_signal_stats))
        .route("/references/:kind/:id", get(get_references))
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
