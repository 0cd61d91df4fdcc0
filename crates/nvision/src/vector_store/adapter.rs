use std::collections::HashMap;

use serde_json::json;
use tokio::sync::RwLock;

use super::filter::Filter;
use super::types::{
  CollectionHandle, CollectionInfo, DistanceSpace, Embedding, EmbeddingBatch, GetRequest, GetResult, Include,
  Metadata, QueryRequest, QueryResult, UpdateBatch, DISTANCE_SPACE_KEY,
};
use super::SharedIndex;
use crate::error::{Outcome, Result, SearchError};

/// Unwrap a resolved collection handle or return the non-`Done` outcome as-is
macro_rules! resolved {
  ($outcome:expr) => {
    match $outcome {
      Outcome::Done(handle) => handle,
      Outcome::Absent => return Ok(Outcome::Absent),
      Outcome::Failed(err) => return Ok(Outcome::Failed(err)),
    }
  };
}

/// Connection-aware facade over a [`super::VectorIndex`].
///
/// Every operation except `connect`/`disconnect` returns
/// `Err(SearchError::NotConnected)` before a successful `connect`. After that,
/// backend failures never surface as `Err`: they are logged and reported as
/// [`Outcome::Failed`], and missing collections as [`Outcome::Absent`].
pub struct VectorStore {
  index: SharedIndex,
  client: RwLock<Option<SharedIndex>>,
  collections: RwLock<HashMap<String, CollectionHandle>>,
  distance_space: DistanceSpace,
}

impl VectorStore {
  pub fn new(index: SharedIndex) -> Self {
    Self {
      index,
      client: RwLock::new(None),
      collections: RwLock::new(HashMap::new()),
      distance_space: DistanceSpace::Cosine,
    }
  }

  /// Distance space stamped on collections this store creates
  pub fn with_distance_space(mut self, distance_space: DistanceSpace) -> Self {
    self.distance_space = distance_space;
    self
  }

  pub fn distance_space(&self) -> DistanceSpace {
    self.distance_space
  }

  pub fn describe(&self) -> String {
    self.index.describe()
  }

  pub async fn connect(&self) -> Result<()> {
    if self.is_connected().await {
      return Ok(());
    }

    self.index.heartbeat().await.map_err(|e| {
      let message = format!("{}: {e:#}", self.index.describe());
      bentley::error!(&format!("Failed to connect to vector store at {message}"));
      SearchError::Connection(message)
    })?;

    *self.client.write().await = Some(self.index.clone());
    bentley::info!(&format!("Connected to vector store at {}", self.index.describe()));
    Ok(())
  }

  /// Drop the client handle and every cached collection handle
  pub async fn disconnect(&self) {
    let had_client = self.client.write().await.take().is_some();
    self.collections.write().await.clear();
    if had_client {
      bentley::info!("Disconnected from vector store");
    }
  }

  pub async fn is_connected(&self) -> bool {
    self.client.read().await.is_some()
  }

  /// Get-or-create a collection. The configured distance space is added to
  /// `metadata` unless it already names one.
  pub async fn create_collection(&self, name: &str, metadata: Option<Metadata>) -> Result<Outcome<CollectionHandle>> {
    let client = self.client().await?;

    let mut metadata = metadata.unwrap_or_default();
    metadata
      .entry(DISTANCE_SPACE_KEY)
      .or_insert_with(|| json!(self.distance_space.as_str()));

    match client.get_or_create_collection(name, metadata).await {
      Ok(handle) => {
        self.collections.write().await.insert(name.to_string(), handle.clone());
        bentley::info!(&format!("Collection '{name}' ready"));
        Ok(Outcome::Done(handle))
      }
      Err(e) => Ok(failed("create_collection", name, &e)),
    }
  }

  /// Cached handle if resolved earlier in this session, otherwise a fresh lookup
  pub async fn get_collection(&self, name: &str) -> Result<Outcome<CollectionHandle>> {
    let client = self.client().await?;

    if let Some(handle) = self.collections.read().await.get(name) {
      return Ok(Outcome::Done(handle.clone()));
    }

    match client.get_collection(name).await {
      Ok(Some(handle)) => {
        self.collections.write().await.insert(name.to_string(), handle.clone());
        Ok(Outcome::Done(handle))
      }
      Ok(None) => {
        bentley::warn!(&format!("Collection '{name}' not found"));
        Ok(Outcome::Absent)
      }
      Err(e) => Ok(failed("get_collection", name, &e)),
    }
  }

  pub async fn delete_collection(&self, name: &str) -> Result<Outcome<()>> {
    let client = self.client().await?;

    match client.delete_collection(name).await {
      Ok(existed) => {
        self.collections.write().await.remove(name);
        if existed {
          bentley::info!(&format!("Deleted collection '{name}'"));
          Ok(Outcome::Done(()))
        } else {
          bentley::warn!(&format!("Collection '{name}' not found, nothing to delete"));
          Ok(Outcome::Absent)
        }
      }
      Err(e) => Ok(failed("delete_collection", name, &e)),
    }
  }

  /// Store a batch of vectors, creating the collection when it does not exist yet.
  ///
  /// Without explicit ids, entries get positional ids `doc_0`, `doc_1`, ...
  pub async fn add_embeddings(
    &self,
    collection: &str,
    embeddings: Vec<Embedding>,
    documents: Vec<String>,
    metadatas: Option<Vec<Metadata>>,
    ids: Option<Vec<String>>,
  ) -> Result<Outcome<()>> {
    let client = self.client().await?;

    let count = embeddings.len();
    check_len("documents", documents.len(), count)?;
    if let Some(metadatas) = &metadatas {
      check_len("metadatas", metadatas.len(), count)?;
    }
    if let Some(ids) = &ids {
      check_len("ids", ids.len(), count)?;
    }

    if count == 0 {
      bentley::verbose!(&format!("Nothing to add to '{collection}'"));
      return Ok(Outcome::Done(()));
    }

    let ids = ids.unwrap_or_else(|| (0..count).map(|i| format!("doc_{i}")).collect());
    let handle = resolved!(self.ensure_collection(collection).await?);

    let batch = EmbeddingBatch { ids, embeddings, documents, metadatas };
    match client.add(&handle, batch).await {
      Ok(()) => {
        bentley::info!(&format!("Added {count} embeddings to collection '{collection}'"));
        Ok(Outcome::Done(()))
      }
      Err(e) => Ok(failed("add", collection, &e)),
    }
  }

  /// Nearest-neighbour query. An empty `query_embeddings` list turns the call
  /// into a filtered lookup of up to `n_results` stored entries (no distances).
  pub async fn query_embeddings(
    &self,
    collection: &str,
    query_embeddings: Vec<Embedding>,
    n_results: usize,
    filter: Option<Filter>,
    include: Option<Include>,
  ) -> Result<Outcome<QueryResult>> {
    self.client().await?;
    let include = include.unwrap_or_default();

    if query_embeddings.is_empty() {
      let request = GetRequest { ids: None, filter, limit: Some(n_results), include };
      return Ok(self.get_embeddings(collection, request).await?.map(QueryResult::from));
    }

    let handle = resolved!(self.get_collection(collection).await?);
    let client = self.client().await?;
    let request = QueryRequest { query_embeddings, n_results, filter, include };

    match client.query(&handle, request).await {
      Ok(result) => {
        bentley::verbose!(&format!(
          "Query on '{collection}' returned {} hits",
          result.ids.first().map(Vec::len).unwrap_or(0)
        ));
        Ok(Outcome::Done(result))
      }
      Err(e) => Ok(failed("query", collection, &e)),
    }
  }

  /// Direct lookup by ids and/or metadata filter
  pub async fn get_embeddings(&self, collection: &str, request: GetRequest) -> Result<Outcome<GetResult>> {
    let client = self.client().await?;
    let handle = resolved!(self.get_collection(collection).await?);

    match client.get(&handle, request).await {
      Ok(result) => Ok(Outcome::Done(result)),
      Err(e) => Ok(failed("get", collection, &e)),
    }
  }

  /// Partial update by id; fields passed as `None` are left unchanged
  pub async fn update_embeddings(
    &self,
    collection: &str,
    ids: Vec<String>,
    embeddings: Option<Vec<Embedding>>,
    documents: Option<Vec<String>>,
    metadatas: Option<Vec<Metadata>>,
  ) -> Result<Outcome<()>> {
    let client = self.client().await?;

    if let Some(embeddings) = &embeddings {
      check_len("embeddings", embeddings.len(), ids.len())?;
    }
    if let Some(documents) = &documents {
      check_len("documents", documents.len(), ids.len())?;
    }
    if let Some(metadatas) = &metadatas {
      check_len("metadatas", metadatas.len(), ids.len())?;
    }

    let handle = resolved!(self.get_collection(collection).await?);
    let count = ids.len();
    let batch = UpdateBatch { ids, embeddings, documents, metadatas };

    match client.update(&handle, batch).await {
      Ok(()) => {
        bentley::info!(&format!("Updated {count} embeddings in collection '{collection}'"));
        Ok(Outcome::Done(()))
      }
      Err(e) => Ok(failed("update", collection, &e)),
    }
  }

  pub async fn delete_embeddings(&self, collection: &str, ids: Vec<String>) -> Result<Outcome<()>> {
    let client = self.client().await?;
    let handle = resolved!(self.get_collection(collection).await?);
    let count = ids.len();

    match client.delete(&handle, ids).await {
      Ok(()) => {
        bentley::info!(&format!("Deleted {count} embeddings from collection '{collection}'"));
        Ok(Outcome::Done(()))
      }
      Err(e) => Ok(failed("delete", collection, &e)),
    }
  }

  pub async fn get_collection_info(&self, name: &str) -> Result<Outcome<CollectionInfo>> {
    let client = self.client().await?;
    let handle = resolved!(self.get_collection(name).await?);

    match client.count(&handle).await {
      Ok(count) => Ok(Outcome::Done(CollectionInfo { name: handle.name, count, metadata: handle.metadata })),
      Err(e) => Ok(failed("count", name, &e)),
    }
  }

  pub async fn list_collections(&self) -> Result<Outcome<Vec<String>>> {
    let client = self.client().await?;

    match client.list_collections().await {
      Ok(collections) => Ok(Outcome::Done(collections.into_iter().map(|c| c.name).collect())),
      Err(e) => Ok(failed("list_collections", "*", &e)),
    }
  }

  async fn ensure_collection(&self, name: &str) -> Result<Outcome<CollectionHandle>> {
    match self.get_collection(name).await? {
      Outcome::Absent => self.create_collection(name, None).await,
      resolved => Ok(resolved),
    }
  }

  async fn client(&self) -> Result<SharedIndex> {
    self.client.read().await.clone().ok_or(SearchError::NotConnected)
  }
}

fn check_len(field: &str, actual: usize, expected: usize) -> Result<()> {
  if actual != expected {
    return Err(SearchError::InvalidArgument(format!(
      "{field} has {actual} entries but {expected} were expected"
    )));
  }
  Ok(())
}

fn failed<T>(operation: &'static str, collection: &str, source: &anyhow::Error) -> Outcome<T> {
  let cause = SearchError::backend(operation, collection, source);
  bentley::error!(&cause.to_string());
  Outcome::Failed(cause)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use mockall::predicate::eq;

  use super::*;
  use crate::vector_store::MockVectorIndex;

  fn handle(name: &str) -> CollectionHandle {
    CollectionHandle { id: format!("{name}-id"), name: name.to_string(), metadata: Metadata::new() }
  }

  fn healthy_mock() -> MockVectorIndex {
    let mut mock = MockVectorIndex::new();
    mock.expect_describe().return_const("mock".to_string());
    mock.expect_heartbeat().returning(|| Ok(()));
    mock
  }

  async fn connected(mock: MockVectorIndex) -> VectorStore {
    let store = VectorStore::new(Arc::new(mock));
    store.connect().await.unwrap();
    store
  }

  #[tokio::test]
  async fn test_operations_require_connect() {
    let store = VectorStore::new(Arc::new(healthy_mock()));

    assert_eq!(store.get_collection("products").await.unwrap_err(), SearchError::NotConnected);
    assert_eq!(store.create_collection("products", None).await.unwrap_err(), SearchError::NotConnected);
    assert_eq!(store.list_collections().await.unwrap_err(), SearchError::NotConnected);
    assert_eq!(
      store.add_embeddings("products", vec![vec![1.0]], vec!["a".into()], None, None).await.unwrap_err(),
      SearchError::NotConnected
    );
    assert_eq!(
      store.query_embeddings("products", vec![vec![1.0]], 3, None, None).await.unwrap_err(),
      SearchError::NotConnected
    );
  }

  #[tokio::test]
  async fn test_connect_failure_is_connection_error() {
    let mut mock = MockVectorIndex::new();
    mock.expect_describe().return_const("http://nowhere:8000".to_string());
    mock.expect_heartbeat().returning(|| Err(anyhow::anyhow!("connection refused")));
    let store = VectorStore::new(Arc::new(mock));

    let err = store.connect().await.unwrap_err();
    assert!(matches!(err, SearchError::Connection(ref m) if m.contains("connection refused")));
    assert!(!store.is_connected().await);
  }

  #[tokio::test]
  async fn test_get_collection_caches_handle() {
    let mut mock = healthy_mock();
    mock
      .expect_get_collection()
      .with(eq("products"))
      .times(1)
      .returning(|name| Ok(Some(handle(name))));
    let store = connected(mock).await;

    assert_eq!(store.get_collection("products").await.unwrap().ok(), Some(handle("products")));
    assert_eq!(store.get_collection("products").await.unwrap().ok(), Some(handle("products")));
  }

  #[tokio::test]
  async fn test_disconnect_drops_cache() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().times(2).returning(|name| Ok(Some(handle(name))));
    let store = connected(mock).await;

    assert!(store.get_collection("reviews").await.unwrap().succeeded());
    store.disconnect().await;
    assert!(!store.is_connected().await);
    store.connect().await.unwrap();
    assert!(store.get_collection("reviews").await.unwrap().succeeded());
  }

  #[tokio::test]
  async fn test_missing_collection_is_absent_not_error() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|_| Ok(None));
    mock.expect_query().never();
    mock.expect_count().never();
    let store = connected(mock).await;

    assert_eq!(store.get_collection("nope").await.unwrap(), Outcome::Absent);
    assert_eq!(store.query_embeddings("nope", vec![vec![0.1]], 5, None, None).await.unwrap(), Outcome::Absent);
    assert_eq!(store.get_collection_info("nope").await.unwrap(), Outcome::Absent);
  }

  #[tokio::test]
  async fn test_add_generates_positional_ids_and_auto_creates() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|_| Ok(None));
    mock
      .expect_get_or_create_collection()
      .withf(|name, metadata| name == "products" && metadata[DISTANCE_SPACE_KEY] == "cosine")
      .times(1)
      .returning(|name, _| Ok(handle(name)));
    mock
      .expect_add()
      .withf(|collection, batch| {
        collection.name == "products" && batch.ids == vec!["doc_0", "doc_1", "doc_2"] && batch.metadatas.is_none()
      })
      .times(1)
      .returning(|_, _| Ok(()));
    let store = connected(mock).await;

    let outcome = store
      .add_embeddings(
        "products",
        vec![vec![0.1], vec![0.2], vec![0.3]],
        vec!["a".into(), "b".into(), "c".into()],
        None,
        None,
      )
      .await
      .unwrap();
    assert!(outcome.succeeded());
  }

  #[tokio::test]
  async fn test_add_rejects_mismatched_lengths() {
    let mut mock = healthy_mock();
    mock.expect_add().never();
    let store = connected(mock).await;

    let err = store
      .add_embeddings("products", vec![vec![0.1], vec![0.2]], vec!["only one".into()], None, None)
      .await
      .unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument(_)));

    let err = store
      .add_embeddings("products", vec![vec![0.1]], vec!["a".into()], None, Some(vec!["x".into(), "y".into()]))
      .await
      .unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument(_)));
  }

  #[tokio::test]
  async fn test_backend_failure_is_swallowed_with_cause() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|name| Ok(Some(handle(name))));
    mock.expect_add().returning(|_, _| Err(anyhow::anyhow!("disk full")));
    mock.expect_query().returning(|_, _| Err(anyhow::anyhow!("timeout")));
    let store = connected(mock).await;

    let added = store
      .add_embeddings("products", vec![vec![0.1]], vec!["a".into()], None, None)
      .await
      .unwrap();
    assert!(!added.succeeded());
    assert!(matches!(
      added.failure(),
      Some(SearchError::Backend { operation: "add", message, .. }) if message.contains("disk full")
    ));

    let queried = store.query_embeddings("products", vec![vec![0.1]], 3, None, None).await.unwrap();
    assert!(queried.is_failed());
    assert_eq!(queried.ok(), None);
  }

  #[tokio::test]
  async fn test_query_uses_default_include() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|name| Ok(Some(handle(name))));
    mock
      .expect_query()
      .withf(|_, request| request.include == Include::default() && request.n_results == 4)
      .times(1)
      .returning(|_, _| Ok(QueryResult { ids: vec![vec!["a".into()]], ..QueryResult::default() }));
    let store = connected(mock).await;

    let result = store.query_embeddings("products", vec![vec![1.0]], 4, None, None).await.unwrap();
    assert_eq!(result.ok().map(|r| r.ids), Some(vec![vec!["a".to_string()]]));
  }

  #[tokio::test]
  async fn test_empty_query_list_becomes_filtered_lookup() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|name| Ok(Some(handle(name))));
    mock.expect_query().never();
    mock
      .expect_get()
      .withf(|_, request| {
        request.filter == Some(Filter::eq("product_id", "p1"))
          && request.limit == Some(10)
          && request.include.embeddings
      })
      .times(1)
      .returning(|_, _| {
        Ok(GetResult { ids: vec!["product_p1".into()], embeddings: Some(vec![vec![0.6, 0.8]]), ..GetResult::default() })
      });
    let store = connected(mock).await;

    let result = store
      .query_embeddings("products", vec![], 10, Some(Filter::eq("product_id", "p1")), Some(Include::embeddings_only()))
      .await
      .unwrap()
      .ok()
      .unwrap();
    assert_eq!(result.first_embedding(), Some(&vec![0.6, 0.8]));
  }

  #[tokio::test]
  async fn test_delete_collection_evicts_and_reports_absence() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().times(2).returning(|name| Ok(Some(handle(name))));
    mock.expect_delete_collection().with(eq("products")).returning(|_| Ok(true));
    mock.expect_delete_collection().with(eq("ghost")).returning(|_| Ok(false));
    let store = connected(mock).await;

    assert!(store.get_collection("products").await.unwrap().succeeded());
    assert!(store.delete_collection("products").await.unwrap().succeeded());
    assert!(store.get_collection("products").await.unwrap().succeeded());
    assert_eq!(store.delete_collection("ghost").await.unwrap(), Outcome::Absent);
  }

  #[tokio::test]
  async fn test_collection_info_and_listing() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|name| Ok(Some(handle(name))));
    mock.expect_count().returning(|_| Ok(7));
    mock
      .expect_list_collections()
      .returning(|| Ok(vec![handle("products"), handle("reviews")]));
    let store = connected(mock).await;

    let info = store.get_collection_info("products").await.unwrap().ok().unwrap();
    assert_eq!(info.count, 7);
    assert_eq!(info.name, "products");
    assert_eq!(store.list_collections().await.unwrap().ok(), Some(vec!["products".into(), "reviews".into()]));
  }

  #[tokio::test]
  async fn test_update_checks_lengths_against_ids() {
    let mut mock = healthy_mock();
    mock.expect_get_collection().returning(|name| Ok(Some(handle(name))));
    mock
      .expect_update()
      .withf(|_, batch| batch.documents.is_none() && batch.embeddings.as_ref().map(Vec::len) == Some(1))
      .times(1)
      .returning(|_, _| Ok(()));
    let store = connected(mock).await;

    assert!(store
      .update_embeddings("products", vec!["product_p1".into()], Some(vec![vec![0.5]]), None, None)
      .await
      .unwrap()
      .succeeded());
    assert!(store
      .update_embeddings("products", vec!["product_p1".into()], None, Some(vec![]), None)
      .await
      .is_err());
  }
}
