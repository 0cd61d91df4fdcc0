//! Search orchestration: embeds records and queries, stores and retrieves them
//! through the vector store, and shapes raw hits into ranked results.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;

use crate::config::{CollectionSettings, Settings};
use crate::embedding::{Embedder, EmbeddingBackend, OnnxBackend};
use crate::error::{Outcome, Result, SearchError};
use crate::records::{CrmNote, Product, Record, RecordKind, Review};
use crate::similarity::distance_to_similarity;
use crate::vector_store::{self, Filter, GetRequest, Include, Metadata, QueryResult, VectorStore};

/// How many stored entries the recommendation lookup may scan for its target
const TARGET_LOOKUP_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
  pub id: String,
  pub document: String,
  pub metadata: Metadata,
  /// Raw store distance, when the store reported one
  pub distance: Option<f32>,
  /// `1 - distance`, or 0.0 without a distance. Not clamped.
  pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
  pub collection_name: String,
  pub count: usize,
  pub metadata: Metadata,
}

/// Composes an [`Embedder`] and a [`VectorStore`] over the three record collections.
///
/// Must be [`initialize`](SearchService::initialize)d before any ingest or
/// search call; until then those calls fail with `SearchError::NotInitialized`.
pub struct SearchService {
  store: Arc<VectorStore>,
  embedder: Arc<Embedder>,
  collections: CollectionSettings,
  initialized: AtomicBool,
}

impl SearchService {
  pub fn new(store: Arc<VectorStore>, embedder: Arc<Embedder>, collections: CollectionSettings) -> Self {
    Self { store, embedder, collections, initialized: AtomicBool::new(false) }
  }

  /// Build the store and embedder described by `settings`. Nothing is
  /// connected or loaded until `initialize`.
  pub async fn from_settings(settings: &Settings) -> Result<Self> {
    Self::from_settings_with_backend(settings, Arc::new(OnnxBackend::new())).await
  }

  /// Same as [`from_settings`](SearchService::from_settings) with a caller-supplied model backend
  pub async fn from_settings_with_backend(settings: &Settings, backend: Arc<dyn EmbeddingBackend>) -> Result<Self> {
    let index = vector_store::open_index(settings).await?;
    let store = VectorStore::new(index).with_distance_space(settings.store.distance_space);
    let embedder = Embedder::from_settings(&settings.embedding, backend);
    Ok(Self::new(Arc::new(store), Arc::new(embedder), settings.collections.clone()))
  }

  /// Connect the store, load the model and make sure every collection exists
  pub async fn initialize(&self) -> Result<()> {
    if self.is_initialized() {
      return Ok(());
    }

    self.store.connect().await?;
    self.embedder.load_model().await?;
    self.ensure_collections().await?;

    self.initialized.store(true, Ordering::Release);
    bentley::success!(&format!("Search service ready on {}", self.store.describe()));
    Ok(())
  }

  async fn ensure_collections(&self) -> Result<()> {
    for kind in RecordKind::ALL {
      let name = self.collection_name(kind);
      let mut metadata = Metadata::new();
      metadata.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
      if let Outcome::Failed(err) = self.store.create_collection(name, Some(metadata)).await? {
        return Err(err);
      }
    }
    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized.load(Ordering::Acquire)
  }

  fn ensure_initialized(&self) -> Result<()> {
    if self.is_initialized() {
      Ok(())
    } else {
      Err(SearchError::NotInitialized)
    }
  }

  pub fn collection_name(&self, kind: RecordKind) -> &str {
    self.collections.name(kind)
  }

  pub fn store(&self) -> &VectorStore {
    &self.store
  }

  pub fn embedder(&self) -> &Embedder {
    &self.embedder
  }

  /// Embed and store records of one kind in a single store call.
  ///
  /// Records without any text are skipped. Returns `Ok(false)` when nothing
  /// was left to store, and `Err` when the store rejected the batch.
  #[tracing::instrument(level = "debug", skip(self, records), fields(records = records.len()))]
  pub async fn add_records(&self, kind: RecordKind, records: &[Record], batch_size: usize) -> Result<bool> {
    self.ensure_initialized()?;
    if let Some(other) = records.iter().find(|r| r.kind() != kind) {
      return Err(SearchError::InvalidArgument(format!(
        "cannot add a {} record to the {} collection",
        other.kind(),
        kind
      )));
    }

    let encoded = self.embedder.encode_records(records, batch_size).await?;
    let generated_at = Utc::now();

    let mut ids = Vec::new();
    let mut embeddings = Vec::new();
    let mut documents = Vec::new();
    let mut metadatas = Vec::new();
    for (record, entry) in records.iter().zip(encoded) {
      if entry.embedding.is_empty() {
        bentley::warn!(&format!("Skipping {kind} record {:?} without text", record.natural_id()));
        continue;
      }
      ids.push(kind.entry_id(record.natural_id(), ids.len()));
      embeddings.push(entry.embedding);
      documents.push(entry.text);
      metadatas.push(record.metadata(generated_at));
    }

    if ids.is_empty() {
      bentley::warn!(&format!("No valid {kind} embeddings to add"));
      return Ok(false);
    }

    let name = self.collection_name(kind);
    match self.store.add_embeddings(name, embeddings, documents, Some(metadatas), Some(ids)).await? {
      Outcome::Done(()) => Ok(true),
      Outcome::Absent => Ok(false),
      Outcome::Failed(err) => Err(err),
    }
  }

  pub async fn add_product_embeddings(&self, products: &[Product], batch_size: usize) -> Result<bool> {
    let records: Vec<Record> = products.iter().cloned().map(Record::from).collect();
    self.add_records(RecordKind::Product, &records, batch_size).await
  }

  pub async fn add_review_embeddings(&self, reviews: &[Review], batch_size: usize) -> Result<bool> {
    let records: Vec<Record> = reviews.iter().cloned().map(Record::from).collect();
    self.add_records(RecordKind::Review, &records, batch_size).await
  }

  pub async fn add_crm_note_embeddings(&self, notes: &[CrmNote], batch_size: usize) -> Result<bool> {
    let records: Vec<Record> = notes.iter().cloned().map(Record::from).collect();
    self.add_records(RecordKind::CrmNote, &records, batch_size).await
  }

  /// Free-text search in one collection. A blank query yields no results.
  #[tracing::instrument(level = "debug", skip(self, filter))]
  pub async fn search(
    &self,
    kind: RecordKind,
    query_text: &str,
    n_results: usize,
    filter: Option<Filter>,
  ) -> Result<Vec<SearchResult>> {
    self.ensure_initialized()?;

    let query_embedding = self.embedder.encode_text(query_text).await?;
    if query_embedding.is_empty() {
      bentley::verbose!("Empty query, returning no results");
      return Ok(Vec::new());
    }

    let name = self.collection_name(kind);
    let raw = self
      .store
      .query_embeddings(name, vec![query_embedding], n_results, filter, None)
      .await?
      .into_result()?;
    Ok(format_results(raw.as_ref()))
  }

  pub async fn search_similar_products(
    &self,
    query_text: &str,
    n_results: usize,
    filter: Option<Filter>,
  ) -> Result<Vec<SearchResult>> {
    self.search(RecordKind::Product, query_text, n_results, filter).await
  }

  pub async fn search_similar_reviews(
    &self,
    query_text: &str,
    n_results: usize,
    filter: Option<Filter>,
  ) -> Result<Vec<SearchResult>> {
    self.search(RecordKind::Review, query_text, n_results, filter).await
  }

  pub async fn search_related_crm_notes(
    &self,
    query_text: &str,
    n_results: usize,
    filter: Option<Filter>,
  ) -> Result<Vec<SearchResult>> {
    self.search(RecordKind::CrmNote, query_text, n_results, filter).await
  }

  /// Entries similar to a stored record, excluding the record itself.
  ///
  /// First looks up the target's stored vector by its natural id, then queries
  /// with that vector under an `$ne` filter on the same id. At most
  /// `n_results` results are returned. An unknown target yields no results.
  #[tracing::instrument(level = "debug", skip(self))]
  pub async fn get_recommendations(
    &self,
    kind: RecordKind,
    target_id: &str,
    n_results: usize,
  ) -> Result<Vec<SearchResult>> {
    self.ensure_initialized()?;
    let name = self.collection_name(kind);
    let id_field = kind.id_field();

    let target = self
      .store
      .query_embeddings(
        name,
        Vec::new(),
        TARGET_LOOKUP_LIMIT,
        Some(Filter::eq(id_field, target_id)),
        Some(Include::embeddings_only()),
      )
      .await?
      .into_result()?;

    let Some(target_embedding) = target.as_ref().and_then(QueryResult::first_embedding).cloned() else {
      bentley::warn!(&format!("No stored {kind} found for {id_field} '{target_id}'"));
      return Ok(Vec::new());
    };

    let raw = self
      .store
      .query_embeddings(
        name,
        vec![target_embedding],
        n_results,
        Some(Filter::ne(id_field, target_id)),
        None,
      )
      .await?
      .into_result()?;
    Ok(format_results(raw.as_ref()))
  }

  pub async fn get_product_recommendations(&self, product_id: &str, n_results: usize) -> Result<Vec<SearchResult>> {
    self.get_recommendations(RecordKind::Product, product_id, n_results).await
  }

  /// Re-embed one record and overwrite its stored entry, adding it when absent.
  ///
  /// The record needs its natural id. Returns `Ok(false)` for a record with no text.
  pub async fn update_record(&self, record: &Record) -> Result<bool> {
    self.ensure_initialized()?;
    let kind = record.kind();
    let natural_id = record
      .natural_id()
      .filter(|id| !id.is_empty())
      .ok_or_else(|| SearchError::InvalidArgument(format!("{kind} record has no id to update")))?;

    let embedding = self.embedder.encode_record(record).await?;
    if embedding.is_empty() {
      bentley::warn!(&format!("Not updating {kind} '{natural_id}': record has no text"));
      return Ok(false);
    }

    let name = self.collection_name(kind);
    let entry_id = kind.entry_id(Some(natural_id), 0);
    let metadata = record.metadata(Utc::now());

    let lookup = GetRequest {
      ids: Some(vec![entry_id.clone()]),
      include: Include { documents: false, metadatas: false, distances: false, embeddings: false },
      ..GetRequest::default()
    };
    let exists = self
      .store
      .get_embeddings(name, lookup)
      .await?
      .into_result()?
      .is_some_and(|found| !found.ids.is_empty());

    let outcome = if exists {
      self
        .store
        .update_embeddings(name, vec![entry_id], Some(vec![embedding]), Some(vec![record.text()]), Some(vec![metadata]))
        .await?
    } else {
      self
        .store
        .add_embeddings(name, vec![embedding], vec![record.text()], Some(vec![metadata]), Some(vec![entry_id]))
        .await?
    };
    Ok(outcome.into_result()?.is_some())
  }

  /// Remove stored entries by natural id; unknown ids are ignored
  pub async fn delete_records(&self, kind: RecordKind, natural_ids: &[&str]) -> Result<bool> {
    self.ensure_initialized()?;
    if natural_ids.is_empty() {
      return Ok(false);
    }
    let ids = natural_ids.iter().map(|id| kind.entry_id(Some(id), 0)).collect();
    let outcome = self.store.delete_embeddings(self.collection_name(kind), ids).await?;
    Ok(outcome.into_result()?.is_some())
  }

  /// Entry counts and metadata per collection. Missing or unreadable
  /// collections report a count of 0 and empty metadata.
  pub async fn get_collection_stats(&self) -> Result<BTreeMap<RecordKind, CollectionStats>> {
    self.ensure_initialized()?;
    let lookups = RecordKind::ALL.into_iter().map(|kind| async move {
      let name = self.collection_name(kind);
      (kind, name, self.store.get_collection_info(name).await)
    });

    let mut stats = BTreeMap::new();
    for (kind, name, info) in join_all(lookups).await {
      let entry = match info? {
        Outcome::Done(info) => CollectionStats { collection_name: name.to_string(), count: info.count, metadata: info.metadata },
        other => {
          if let Some(err) = other.failure() {
            bentley::warn!(&format!("Stats unavailable for '{name}': {err}"));
          }
          CollectionStats { collection_name: name.to_string(), count: 0, metadata: Metadata::new() }
        }
      };
      stats.insert(kind, entry);
    }
    Ok(stats)
  }
}

/// Reshape the first query group of a raw result into search results.
///
/// Fields shorter than `ids` fall back to defaults at the missing positions.
/// An absent result yields no results.
pub fn format_results(raw: Option<&QueryResult>) -> Vec<SearchResult> {
  let Some(raw) = raw else {
    return Vec::new();
  };
  let Some(ids) = raw.ids.first() else {
    return Vec::new();
  };

  let documents = raw.documents.as_ref().and_then(|d| d.first());
  let metadatas = raw.metadatas.as_ref().and_then(|m| m.first());
  let distances = raw.distances.as_ref().and_then(|d| d.first());

  ids
    .iter()
    .enumerate()
    .map(|(i, id)| {
      let distance = distances.and_then(|d| d.get(i).copied().flatten());
      SearchResult {
        id: id.clone(),
        document: documents.and_then(|d| d.get(i).cloned().flatten()).unwrap_or_default(),
        metadata: metadatas.and_then(|m| m.get(i).cloned().flatten()).unwrap_or_default(),
        distance,
        similarity: distance.map(distance_to_similarity).unwrap_or(0.0),
      }
    })
    .collect()
}
