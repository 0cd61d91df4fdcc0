//! Process-wide search service built lazily from [`Settings::load`]

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::Settings;
use crate::embedding::{EmbeddingBackend, OnnxBackend};
use crate::error::{Result, SearchError};
use crate::search::SearchService;

static DEFAULT_SERVICE: OnceCell<Arc<SearchService>> = OnceCell::const_new();

/// The shared, initialized service. The first caller loads settings, builds
/// and initializes it; concurrent callers wait for that single attempt. A
/// failed attempt is not cached, so a later call tries again.
pub async fn default_service() -> Result<Arc<SearchService>> {
  default_service_with(Arc::new(OnnxBackend::new())).await
}

/// Like [`default_service`], with the model backend used if this call is the
/// one that builds the service. Once built, `backend` is ignored.
pub async fn default_service_with(backend: Arc<dyn EmbeddingBackend>) -> Result<Arc<SearchService>> {
  DEFAULT_SERVICE
    .get_or_try_init(|| async {
      let settings = Settings::load()?;
      let service = SearchService::from_settings_with_backend(&settings, backend).await?;
      service.initialize().await?;
      Ok::<_, SearchError>(Arc::new(service))
    })
    .await
    .cloned()
}
