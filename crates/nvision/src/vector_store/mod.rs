//! Vector store abstraction for embedding storage and nearest-neighbour retrieval
//!
//! [`VectorIndex`] is the raw backend contract (remote Chroma server, local
//! LanceDB directory, or the in-process index). [`VectorStore`] wraps one
//! backend with connection state, a collection-handle cache and the
//! error-swallowing boundary the search service relies on.

mod adapter;
#[cfg(feature = "chroma")]
pub mod chroma;
pub mod filter;
#[cfg(feature = "lancedb")]
pub mod lancedb;
pub mod memory;
mod types;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Settings, StoreBackend, StoreSettings};
use crate::error::SearchError;

pub use adapter::VectorStore;
pub use filter::{Comparison, Filter};
pub use memory::MemoryIndex;
pub use types::{
  CollectionHandle, CollectionInfo, DistanceSpace, Embedding, EmbeddingBatch, GetRequest, GetResult, Include,
  Metadata, QueryRequest, QueryResult, UpdateBatch, DISTANCE_SPACE_KEY,
};

/// Backend interface for collection management and vector operations.
///
/// Implementations report every failure through `anyhow`; deciding which of
/// those failures are swallowed is left to [`VectorStore`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
  /// Human-readable location of the backend, used in log lines
  fn describe(&self) -> String;

  /// Verify the backend is reachable
  async fn heartbeat(&self) -> Result<()>;

  async fn get_or_create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionHandle>;

  /// `Ok(None)` when the backend has no collection with that name
  async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>>;

  /// Returns false when there was nothing to delete
  async fn delete_collection(&self, name: &str) -> Result<bool>;

  async fn list_collections(&self) -> Result<Vec<CollectionHandle>>;

  async fn add(&self, collection: &CollectionHandle, batch: EmbeddingBatch) -> Result<()>;

  async fn update(&self, collection: &CollectionHandle, batch: UpdateBatch) -> Result<()>;

  /// Unknown ids are ignored
  async fn delete(&self, collection: &CollectionHandle, ids: Vec<String>) -> Result<()>;

  async fn query(&self, collection: &CollectionHandle, request: QueryRequest) -> Result<QueryResult>;

  async fn get(&self, collection: &CollectionHandle, request: GetRequest) -> Result<GetResult>;

  async fn count(&self, collection: &CollectionHandle) -> Result<usize>;
}

/// Shared, type-erased backend handle
pub type SharedIndex = Arc<dyn VectorIndex>;

/// Build the backend the settings resolve to. Nothing is contacted until
/// [`VectorStore::connect`].
pub async fn open_index(settings: &Settings) -> crate::error::Result<SharedIndex> {
  let backend = settings.resolved_backend();
  bentley::verbose!(&format!("Opening {backend} vector store backend"));
  match backend {
    StoreBackend::Http => http_index(&settings.store),
    StoreBackend::Persistent => persistent_index(&settings.store).await,
    StoreBackend::Memory | StoreBackend::Auto => Ok(Arc::new(MemoryIndex::new())),
  }
}

#[cfg(feature = "chroma")]
fn http_index(settings: &StoreSettings) -> crate::error::Result<SharedIndex> {
  let index =
    chroma::ChromaHttpIndex::new(chroma_config(settings)).map_err(|e| SearchError::Connection(format!("{e:#}")))?;
  Ok(Arc::new(index))
}

#[cfg(feature = "chroma")]
fn chroma_config(settings: &StoreSettings) -> chroma::ClientConfig {
  chroma::ClientConfig {
    timeout_secs: settings.request_timeout_secs,
    max_retries: settings.max_retries,
    ..chroma::ClientConfig::for_host(&settings.host, settings.port)
  }
}

#[cfg(not(feature = "chroma"))]
fn http_index(_settings: &StoreSettings) -> crate::error::Result<SharedIndex> {
  Err(SearchError::Config("http backend requires the 'chroma' feature".to_string()))
}

#[cfg(feature = "lancedb")]
async fn persistent_index(settings: &StoreSettings) -> crate::error::Result<SharedIndex> {
  let dir = settings
    .persist_directory
    .clone()
    .ok_or_else(|| SearchError::Config("persistent backend needs a persist directory".to_string()))?;
  let index = self::lancedb::LanceDbIndex::open(dir).await.map_err(|e| SearchError::Connection(format!("{e:#}")))?;
  Ok(Arc::new(index))
}

#[cfg(not(feature = "lancedb"))]
async fn persistent_index(_settings: &StoreSettings) -> crate::error::Result<SharedIndex> {
  Err(SearchError::Config("persistent backend requires the 'lancedb' feature".to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_open_memory_index() {
    let mut settings = Settings::default();
    settings.store.backend = StoreBackend::Memory;
    let index = open_index(&settings).await.unwrap();
    assert_eq!(index.describe(), "in-memory index");
  }

  #[cfg(feature = "chroma")]
  #[test]
  fn test_chroma_config_follows_store_settings() {
    let settings = StoreSettings {
      host: "vectors.internal".to_string(),
      port: 9100,
      request_timeout_secs: 5,
      max_retries: 0,
      ..StoreSettings::default()
    };
    let config = chroma_config(&settings);
    assert_eq!(config.base_url, "http://vectors.internal:9100");
    assert_eq!(config.timeout_secs, 5);
    assert_eq!(config.max_retries, 0);
    assert_eq!(config.api_path, "/api/v1");
  }

  #[cfg(feature = "chroma")]
  #[tokio::test]
  async fn test_unreachable_http_store_fails_to_connect() {
    let mut settings = Settings::default();
    settings.store.backend = StoreBackend::Http;
    settings.store.host = "127.0.0.1".to_string();
    settings.store.port = 1;
    settings.store.request_timeout_secs = 2;
    settings.store.max_retries = 0;

    let index = open_index(&settings).await.unwrap();
    assert_eq!(index.describe(), "http://127.0.0.1:1");

    let store = VectorStore::new(index);
    let err = store.connect().await.unwrap_err();
    assert!(matches!(err, SearchError::Connection(ref m) if m.contains("127.0.0.1:1")));
    assert!(!store.is_connected().await);
  }

  #[cfg(not(feature = "lancedb"))]
  #[tokio::test]
  async fn test_persistent_without_feature_is_config_error() {
    let mut settings = Settings::default();
    settings.store.backend = StoreBackend::Persistent;
    assert!(matches!(open_index(&settings).await, Err(SearchError::Config(_))));
  }
}
