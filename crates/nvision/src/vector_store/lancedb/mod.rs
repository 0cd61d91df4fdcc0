//! Persistent collections on a local LanceDB directory
//!
//! Each collection is one LanceDB table plus a small JSON descriptor carrying
//! the collection metadata. Metadata filters are evaluated on the rows after
//! the scan or search, so filtered searches read the whole table.

pub mod records;
pub mod search;
pub mod table_manager;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::types::{
  CollectionHandle, DistanceSpace, EmbeddingBatch, GetRequest, GetResult, Include, Metadata, QueryRequest,
  QueryResult, UpdateBatch,
};
use super::VectorIndex;
use records::StoredRow;
use search::{scan_rows, search_nearest_rows};
use table_manager::TableManager;

pub struct LanceDbIndex {
  tables: TableManager,
}

impl LanceDbIndex {
  pub async fn open(data_dir: PathBuf) -> Result<Self> {
    Ok(Self { tables: TableManager::open(data_dir).await? })
  }

  fn require(&self, collection: &CollectionHandle) -> Result<()> {
    match self.tables.load_collection(&collection.name)? {
      Some(_) => Ok(()),
      None => Err(anyhow!("collection '{}' does not exist", collection.name)),
    }
  }

  /// Rows matching the request's ids and filter, in storage order
  async fn select_rows(&self, collection: &CollectionHandle, request: &GetRequest) -> Result<Vec<StoredRow>> {
    let Some(table) = self.tables.open_table(&collection.name).await? else {
      return Ok(Vec::new());
    };
    let rows = scan_rows(&table).await?;
    Ok(
      rows
        .into_iter()
        .filter(|r| request.ids.as_ref().map_or(true, |ids| ids.contains(&r.id)))
        .filter(|r| request.filter.as_ref().map_or(true, |f| f.matches(r.metadata.as_ref())))
        .take(request.limit.unwrap_or(usize::MAX))
        .collect(),
    )
  }
}

#[async_trait]
impl VectorIndex for LanceDbIndex {
  fn describe(&self) -> String {
    format!("lancedb://{}", self.tables.data_dir().display())
  }

  async fn heartbeat(&self) -> Result<()> {
    self.tables.list_collections().map(|_| ())
  }

  async fn get_or_create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionHandle> {
    if let Some(existing) = self.tables.load_collection(name)? {
      return Ok(existing);
    }
    let handle = CollectionHandle {
      id: format!("{name}-{}", Utc::now().timestamp_millis()),
      name: name.to_string(),
      metadata,
    };
    self.tables.save_collection(&handle)?;
    Ok(handle)
  }

  async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
    self.tables.load_collection(name)
  }

  async fn delete_collection(&self, name: &str) -> Result<bool> {
    self.tables.remove_collection(name)
  }

  async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
    self.tables.list_collections()
  }

  async fn add(&self, collection: &CollectionHandle, batch: EmbeddingBatch) -> Result<()> {
    self.require(collection)?;

    let mut metadatas = batch.metadatas.map(Vec::into_iter);
    let rows: Vec<StoredRow> = batch
      .ids
      .into_iter()
      .zip(batch.embeddings)
      .zip(batch.documents)
      .map(|((id, embedding), document)| StoredRow {
        id,
        document: Some(document),
        metadata: metadatas.as_mut().and_then(Iterator::next),
        embedding,
        distance: None,
      })
      .collect();

    // Re-adding an id replaces the stored row
    if let Some(table) = self.tables.open_table(&collection.name).await? {
      let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
      self.tables.delete_ids(&table, &ids).await?;
    }
    self.tables.write_rows(&collection.name, &rows).await?;
    bentley::verbose!(&format!("Stored {} rows in table '{}'", rows.len(), collection.name));
    Ok(())
  }

  async fn update(&self, collection: &CollectionHandle, batch: UpdateBatch) -> Result<()> {
    self.require(collection)?;
    let Some(table) = self.tables.open_table(&collection.name).await? else {
      return Ok(());
    };

    let request = GetRequest { ids: Some(batch.ids.clone()), ..GetRequest::default() };
    let mut rows = self.select_rows(collection, &request).await?;
    if rows.is_empty() {
      return Ok(());
    }

    for row in rows.iter_mut() {
      let Some(i) = batch.ids.iter().position(|id| *id == row.id) else {
        continue;
      };
      if let Some(embedding) = batch.embeddings.as_ref().and_then(|e| e.get(i)) {
        row.embedding = embedding.clone();
      }
      if let Some(document) = batch.documents.as_ref().and_then(|d| d.get(i)) {
        row.document = Some(document.clone());
      }
      if let Some(metadata) = batch.metadatas.as_ref().and_then(|m| m.get(i)) {
        row.metadata = Some(metadata.clone());
      }
    }

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    self.tables.delete_ids(&table, &ids).await?;
    self.tables.write_rows(&collection.name, &rows).await
  }

  async fn delete(&self, collection: &CollectionHandle, ids: Vec<String>) -> Result<()> {
    self.require(collection)?;
    match self.tables.open_table(&collection.name).await? {
      Some(table) => self.tables.delete_ids(&table, &ids).await,
      None => Ok(()),
    }
  }

  async fn query(&self, collection: &CollectionHandle, request: QueryRequest) -> Result<QueryResult> {
    self.require(collection)?;
    let space = DistanceSpace::from_metadata(&collection.metadata);
    let table = self.tables.open_table(&collection.name).await?;

    let mut result = QueryResult::default();
    let include = request.include;
    for query in &request.query_embeddings {
      let hits = match &table {
        Some(table) => {
          let limit = match request.filter {
            Some(_) => table.count_rows(None).await?,
            None => request.n_results,
          };
          let mut rows = search_nearest_rows(table, query, limit.max(1), space).await?;
          if let Some(filter) = &request.filter {
            rows.retain(|r| filter.matches(r.metadata.as_ref()));
          }
          rows.truncate(request.n_results);
          rows
        }
        None => Vec::new(),
      };
      push_query_group(&mut result, hits, include);
    }
    Ok(result)
  }

  async fn get(&self, collection: &CollectionHandle, request: GetRequest) -> Result<GetResult> {
    self.require(collection)?;
    let rows = self.select_rows(collection, &request).await?;
    let include = request.include;

    Ok(GetResult {
      ids: rows.iter().map(|r| r.id.clone()).collect(),
      documents: include.documents.then(|| rows.iter().map(|r| r.document.clone()).collect()),
      metadatas: include.metadatas.then(|| rows.iter().map(|r| r.metadata.clone()).collect()),
      embeddings: include.embeddings.then(|| rows.iter().map(|r| r.embedding.clone()).collect()),
    })
  }

  async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
    self.require(collection)?;
    match self.tables.open_table(&collection.name).await? {
      Some(table) => Ok(table.count_rows(None).await?),
      None => Ok(0),
    }
  }
}

fn push_query_group(result: &mut QueryResult, rows: Vec<StoredRow>, include: Include) {
  result.ids.push(rows.iter().map(|r| r.id.clone()).collect());
  if include.documents {
    result.documents.get_or_insert_with(Vec::new).push(rows.iter().map(|r| r.document.clone()).collect());
  }
  if include.metadatas {
    result.metadatas.get_or_insert_with(Vec::new).push(rows.iter().map(|r| r.metadata.clone()).collect());
  }
  if include.distances {
    result.distances.get_or_insert_with(Vec::new).push(rows.iter().map(|r| r.distance).collect());
  }
  if include.embeddings {
    result.embeddings.get_or_insert_with(Vec::new).push(rows.into_iter().map(|r| r.embedding).collect());
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;
  use crate::vector_store::{Filter, DISTANCE_SPACE_KEY};

  async fn open_index() -> (TempDir, LanceDbIndex) {
    let dir = TempDir::new().unwrap();
    let index = LanceDbIndex::open(dir.path().join("store")).await.unwrap();
    (dir, index)
  }

  fn cosine_metadata() -> Metadata {
    json!({ DISTANCE_SPACE_KEY: "cosine" }).as_object().cloned().unwrap()
  }

  #[tokio::test]
  async fn test_collections_persist_through_descriptor() {
    let (_dir, index) = open_index().await;
    let created = index.get_or_create_collection("products", cosine_metadata()).await.unwrap();
    let again = index.get_or_create_collection("products", Metadata::new()).await.unwrap();
    assert_eq!(created, again);
    assert_eq!(index.list_collections().await.unwrap().len(), 1);
    assert_eq!(index.count(&created).await.unwrap(), 0);

    assert!(index.delete_collection("products").await.unwrap());
    assert!(index.get_collection("products").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_add_query_and_filter() {
    let (_dir, index) = open_index().await;
    let handle = index.get_or_create_collection("products", cosine_metadata()).await.unwrap();
    index
      .add(
        &handle,
        EmbeddingBatch {
          ids: vec!["product_p1".into(), "product_p2".into()],
          embeddings: vec![vec![1.0, 0.0], vec![0.6, 0.8]],
          documents: vec!["first".into(), "second".into()],
          metadatas: Some(vec![
            json!({"product_id": "p1"}).as_object().cloned().unwrap(),
            json!({"product_id": "p2"}).as_object().cloned().unwrap(),
          ]),
        },
      )
      .await
      .unwrap();
    assert_eq!(index.count(&handle).await.unwrap(), 2);

    let request = QueryRequest {
      query_embeddings: vec![vec![1.0, 0.0]],
      n_results: 5,
      filter: Some(Filter::ne("product_id", "p1")),
      include: Include::default(),
    };
    let result = index.query(&handle, request).await.unwrap();
    assert_eq!(result.ids, vec![vec!["product_p2".to_string()]]);

    let lookup = GetRequest {
      filter: Some(Filter::eq("product_id", "p1")),
      include: Include::embeddings_only(),
      ..GetRequest::default()
    };
    let found = index.get(&handle, lookup).await.unwrap();
    assert_eq!(found.embeddings, Some(vec![vec![1.0, 0.0]]));
  }
}
