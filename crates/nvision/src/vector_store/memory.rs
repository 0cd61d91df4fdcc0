//! In-process brute-force index
//!
//! Holds every collection in memory and scans all entries per query. Useful
//! for tests and small datasets; nothing survives the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{
  CollectionHandle, DistanceSpace, Embedding, EmbeddingBatch, GetRequest, GetResult, Metadata, QueryRequest,
  QueryResult, UpdateBatch,
};
use super::VectorIndex;

#[derive(Debug, Clone)]
struct Entry {
  id: String,
  embedding: Embedding,
  document: Option<String>,
  metadata: Option<Metadata>,
}

#[derive(Debug)]
struct MemoryCollection {
  handle: CollectionHandle,
  space: DistanceSpace,
  entries: Vec<Entry>,
}

impl MemoryCollection {
  fn dimension(&self) -> Option<usize> {
    self.entries.iter().map(|e| e.embedding.len()).find(|len| *len > 0)
  }

  fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
    match self.dimension() {
      Some(dimension) if dimension != embedding.len() => bail!(
        "embedding dimension {} does not match collection dimensionality {}",
        embedding.len(),
        dimension
      ),
      _ => Ok(()),
    }
  }

  fn position(&self, id: &str) -> Option<usize> {
    self.entries.iter().position(|e| e.id == id)
  }
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
  collections: RwLock<HashMap<String, MemoryCollection>>,
  next_id: AtomicU64,
}

impl MemoryIndex {
  pub fn new() -> Self {
    Self::default()
  }
}

fn missing(name: &str) -> anyhow::Error {
  anyhow!("collection '{name}' does not exist")
}

#[async_trait]
impl VectorIndex for MemoryIndex {
  fn describe(&self) -> String {
    "in-memory index".to_string()
  }

  async fn heartbeat(&self) -> Result<()> {
    Ok(())
  }

  async fn get_or_create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionHandle> {
    let mut collections = self.collections.write().await;
    if let Some(existing) = collections.get(name) {
      return Ok(existing.handle.clone());
    }

    let handle = CollectionHandle {
      id: format!("memory-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
      name: name.to_string(),
      metadata,
    };
    let space = DistanceSpace::from_metadata(&handle.metadata);
    collections.insert(name.to_string(), MemoryCollection { handle: handle.clone(), space, entries: Vec::new() });
    Ok(handle)
  }

  async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
    Ok(self.collections.read().await.get(name).map(|c| c.handle.clone()))
  }

  async fn delete_collection(&self, name: &str) -> Result<bool> {
    Ok(self.collections.write().await.remove(name).is_some())
  }

  async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
    let mut handles: Vec<CollectionHandle> =
      self.collections.read().await.values().map(|c| c.handle.clone()).collect();
    handles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(handles)
  }

  async fn add(&self, collection: &CollectionHandle, batch: EmbeddingBatch) -> Result<()> {
    let mut collections = self.collections.write().await;
    let target = collections.get_mut(&collection.name).ok_or_else(|| missing(&collection.name))?;

    let mut metadatas = batch.metadatas.map(Vec::into_iter);
    let rows = batch.ids.into_iter().zip(batch.embeddings).zip(batch.documents);
    for ((id, embedding), document) in rows {
      target.check_dimension(&embedding)?;
      let entry = Entry {
        id,
        embedding,
        document: Some(document),
        metadata: metadatas.as_mut().and_then(Iterator::next),
      };
      // Re-adding an id replaces the stored entry
      match target.position(&entry.id) {
        Some(index) => target.entries[index] = entry,
        None => target.entries.push(entry),
      }
    }
    Ok(())
  }

  async fn update(&self, collection: &CollectionHandle, batch: UpdateBatch) -> Result<()> {
    let mut collections = self.collections.write().await;
    let target = collections.get_mut(&collection.name).ok_or_else(|| missing(&collection.name))?;

    for (i, id) in batch.ids.iter().enumerate() {
      let Some(index) = target.position(id) else {
        continue;
      };
      if let Some(embedding) = batch.embeddings.as_ref().and_then(|e| e.get(i)) {
        target.check_dimension(embedding)?;
        target.entries[index].embedding = embedding.clone();
      }
      if let Some(document) = batch.documents.as_ref().and_then(|d| d.get(i)) {
        target.entries[index].document = Some(document.clone());
      }
      if let Some(metadata) = batch.metadatas.as_ref().and_then(|m| m.get(i)) {
        target.entries[index].metadata = Some(metadata.clone());
      }
    }
    Ok(())
  }

  async fn delete(&self, collection: &CollectionHandle, ids: Vec<String>) -> Result<()> {
    let mut collections = self.collections.write().await;
    let target = collections.get_mut(&collection.name).ok_or_else(|| missing(&collection.name))?;
    target.entries.retain(|e| !ids.contains(&e.id));
    Ok(())
  }

  async fn query(&self, collection: &CollectionHandle, request: QueryRequest) -> Result<QueryResult> {
    let collections = self.collections.read().await;
    let target = collections.get(&collection.name).ok_or_else(|| missing(&collection.name))?;
    let include = request.include;

    let mut result = QueryResult {
      ids: Vec::with_capacity(request.query_embeddings.len()),
      documents: include.documents.then(Vec::new),
      metadatas: include.metadatas.then(Vec::new),
      distances: include.distances.then(Vec::new),
      embeddings: include.embeddings.then(Vec::new),
    };

    for query in &request.query_embeddings {
      target.check_dimension(query)?;

      let mut hits: Vec<(f32, &Entry)> = target
        .entries
        .iter()
        .filter(|e| !e.embedding.is_empty())
        .filter(|e| request.filter.as_ref().map_or(true, |f| f.matches(e.metadata.as_ref())))
        .map(|e| (target.space.distance(query, &e.embedding), e))
        .collect();
      hits.sort_by(|a, b| a.0.total_cmp(&b.0));
      hits.truncate(request.n_results);

      result.ids.push(hits.iter().map(|(_, e)| e.id.clone()).collect());
      if let Some(documents) = result.documents.as_mut() {
        documents.push(hits.iter().map(|(_, e)| e.document.clone()).collect());
      }
      if let Some(metadatas) = result.metadatas.as_mut() {
        metadatas.push(hits.iter().map(|(_, e)| e.metadata.clone()).collect());
      }
      if let Some(distances) = result.distances.as_mut() {
        distances.push(hits.iter().map(|(d, _)| Some(*d)).collect());
      }
      if let Some(embeddings) = result.embeddings.as_mut() {
        embeddings.push(hits.iter().map(|(_, e)| e.embedding.clone()).collect());
      }
    }

    Ok(result)
  }

  async fn get(&self, collection: &CollectionHandle, request: GetRequest) -> Result<GetResult> {
    let collections = self.collections.read().await;
    let target = collections.get(&collection.name).ok_or_else(|| missing(&collection.name))?;
    let include = request.include;

    let selected: Vec<&Entry> = target
      .entries
      .iter()
      .filter(|e| request.ids.as_ref().map_or(true, |ids| ids.contains(&e.id)))
      .filter(|e| request.filter.as_ref().map_or(true, |f| f.matches(e.metadata.as_ref())))
      .take(request.limit.unwrap_or(usize::MAX))
      .collect();

    Ok(GetResult {
      ids: selected.iter().map(|e| e.id.clone()).collect(),
      documents: include.documents.then(|| selected.iter().map(|e| e.document.clone()).collect()),
      metadatas: include.metadatas.then(|| selected.iter().map(|e| e.metadata.clone()).collect()),
      embeddings: include.embeddings.then(|| selected.iter().map(|e| e.embedding.clone()).collect()),
    })
  }

  async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
    let collections = self.collections.read().await;
    let target = collections.get(&collection.name).ok_or_else(|| missing(&collection.name))?;
    Ok(target.entries.len())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::vector_store::{Filter, Include, DISTANCE_SPACE_KEY};

  fn metadata(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
  }

  async fn seeded(space: &str) -> (MemoryIndex, CollectionHandle) {
    let index = MemoryIndex::new();
    let handle = index
      .get_or_create_collection("products", metadata(json!({ DISTANCE_SPACE_KEY: space })))
      .await
      .unwrap();
    index
      .add(
        &handle,
        EmbeddingBatch {
          ids: vec!["product_p1".into(), "product_p2".into(), "product_p3".into()],
          embeddings: vec![vec![1.0, 0.0], vec![0.8, 0.6], vec![0.0, 1.0]],
          documents: vec!["first".into(), "second".into(), "third".into()],
          metadatas: Some(vec![
            metadata(json!({"product_id": "p1", "price": 10})),
            metadata(json!({"product_id": "p2", "price": 20})),
            metadata(json!({"product_id": "p3", "price": 30})),
          ]),
        },
      )
      .await
      .unwrap();
    (index, handle)
  }

  fn query(embedding: Embedding, n_results: usize, filter: Option<Filter>) -> QueryRequest {
    QueryRequest { query_embeddings: vec![embedding], n_results, filter, include: Include::default() }
  }

  #[tokio::test]
  async fn test_get_or_create_returns_existing() {
    let index = MemoryIndex::new();
    let first = index.get_or_create_collection("reviews", Metadata::new()).await.unwrap();
    let second = index.get_or_create_collection("reviews", metadata(json!({"x": 1}))).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(index.list_collections().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_query_sorts_by_cosine_distance() {
    let (index, handle) = seeded("cosine").await;
    let result = index.query(&handle, query(vec![1.0, 0.0], 3, None)).await.unwrap();

    assert_eq!(result.ids[0], vec!["product_p1", "product_p2", "product_p3"]);
    let distances: Vec<f32> = result.distances.unwrap()[0].iter().map(|d| d.unwrap()).collect();
    assert!(distances[0].abs() < 1e-6);
    assert!((distances[1] - 0.2).abs() < 1e-6);
    assert!((distances[2] - 1.0).abs() < 1e-6);
    assert_eq!(result.documents.unwrap()[0][0].as_deref(), Some("first"));
  }

  #[tokio::test]
  async fn test_query_honours_filter_and_limit() {
    let (index, handle) = seeded("cosine").await;
    let result = index
      .query(&handle, query(vec![1.0, 0.0], 1, Some(Filter::ne("product_id", "p1"))))
      .await
      .unwrap();
    assert_eq!(result.ids, vec![vec!["product_p2".to_string()]]);
  }

  #[tokio::test]
  async fn test_l2_space_uses_squared_distance() {
    let (index, handle) = seeded("l2").await;
    let result = index.query(&handle, query(vec![0.0, 1.0], 1, None)).await.unwrap();
    assert_eq!(result.ids[0], vec!["product_p3"]);
    assert_eq!(result.distances.unwrap()[0][0], Some(0.0));
  }

  #[tokio::test]
  async fn test_dimension_mismatch_is_rejected() {
    let (index, handle) = seeded("cosine").await;
    assert!(index.query(&handle, query(vec![1.0, 0.0, 0.0], 1, None)).await.is_err());

    let batch = EmbeddingBatch {
      ids: vec!["product_p4".into()],
      embeddings: vec![vec![1.0]],
      documents: vec!["fourth".into()],
      metadatas: None,
    };
    assert!(index.add(&handle, batch).await.is_err());
  }

  #[tokio::test]
  async fn test_get_by_filter_returns_embeddings() {
    let (index, handle) = seeded("cosine").await;
    let request = GetRequest {
      filter: Some(Filter::eq("product_id", "p2")),
      include: Include::embeddings_only(),
      ..GetRequest::default()
    };
    let result = index.get(&handle, request).await.unwrap();
    assert_eq!(result.ids, vec!["product_p2"]);
    assert_eq!(result.embeddings, Some(vec![vec![0.8, 0.6]]));
    assert!(result.documents.is_none());
  }

  #[tokio::test]
  async fn test_update_delete_and_count() {
    let (index, handle) = seeded("cosine").await;
    index
      .update(
        &handle,
        UpdateBatch {
          ids: vec!["product_p1".into(), "missing".into()],
          documents: Some(vec!["renamed".into(), "ignored".into()]),
          ..UpdateBatch::default()
        },
      )
      .await
      .unwrap();

    let request = GetRequest { ids: Some(vec!["product_p1".into()]), ..GetRequest::default() };
    let result = index.get(&handle, request).await.unwrap();
    assert_eq!(result.documents, Some(vec![Some("renamed".to_string())]));
    assert_eq!(result.metadatas.unwrap()[0].as_ref().unwrap()["price"], 10);

    index.delete(&handle, vec!["product_p1".into(), "unknown".into()]).await.unwrap();
    assert_eq!(index.count(&handle).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_deleted_collection_reports_errors() {
    let (index, handle) = seeded("cosine").await;
    assert!(index.delete_collection("products").await.unwrap());
    assert!(!index.delete_collection("products").await.unwrap());
    assert!(index.get_collection("products").await.unwrap().is_none());
    assert!(index.count(&handle).await.is_err());
  }
}
