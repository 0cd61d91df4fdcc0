//! Data carried between the adapter and the index backends

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::Filter;
use crate::error::SearchError;
use crate::similarity;

/// Schema-light key/value attributes stored beside a vector
pub type Metadata = serde_json::Map<String, Value>;

/// Dense vector; an empty vector is the "no embedding" sentinel
pub type Embedding = Vec<f32>;

/// Collection metadata key selecting the distance function
pub const DISTANCE_SPACE_KEY: &str = "hnsw:space";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceSpace {
  /// Squared Euclidean distance
  #[default]
  L2,
  /// `1 - dot(a, b)`
  Ip,
  /// `1 - cos(a, b)`
  Cosine,
}

impl DistanceSpace {
  pub fn as_str(self) -> &'static str {
    match self {
      DistanceSpace::L2 => "l2",
      DistanceSpace::Ip => "ip",
      DistanceSpace::Cosine => "cosine",
    }
  }

  /// Read the space from collection metadata, defaulting to l2
  pub fn from_metadata(metadata: &Metadata) -> Self {
    metadata
      .get(DISTANCE_SPACE_KEY)
      .and_then(Value::as_str)
      .and_then(|space| space.parse().ok())
      .unwrap_or_default()
  }

  /// Distance between equal-length vectors
  pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
    match self {
      DistanceSpace::L2 => a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum(),
      DistanceSpace::Ip => 1.0 - a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>(),
      DistanceSpace::Cosine => 1.0 - similarity::cosine(a, b).unwrap_or(0.0),
    }
  }
}

impl FromStr for DistanceSpace {
  type Err = SearchError;

  fn from_str(space: &str) -> Result<Self, Self::Err> {
    match space.to_ascii_lowercase().as_str() {
      "l2" => Ok(DistanceSpace::L2),
      "ip" => Ok(DistanceSpace::Ip),
      "cosine" => Ok(DistanceSpace::Cosine),
      other => Err(SearchError::InvalidArgument(format!("unknown distance space: {other}"))),
    }
  }
}

impl fmt::Display for DistanceSpace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which optional fields a query or lookup returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
  pub documents: bool,
  pub metadatas: bool,
  pub distances: bool,
  pub embeddings: bool,
}

impl Default for Include {
  fn default() -> Self {
    Self { documents: true, metadatas: true, distances: true, embeddings: false }
  }
}

impl Include {
  pub fn embeddings_only() -> Self {
    Self { documents: false, metadatas: false, distances: false, embeddings: true }
  }

  pub fn all() -> Self {
    Self { documents: true, metadatas: true, distances: true, embeddings: true }
  }

  pub fn with_embeddings(mut self) -> Self {
    self.embeddings = true;
    self
  }

  /// Field names in the store's wire vocabulary
  pub fn fields(&self) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if self.documents {
      fields.push("documents");
    }
    if self.metadatas {
      fields.push("metadatas");
    }
    if self.distances {
      fields.push("distances");
    }
    if self.embeddings {
      fields.push("embeddings");
    }
    fields
  }
}

/// Resolved collection, cached by the adapter for the life of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionHandle {
  pub id: String,
  pub name: String,
  pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
  pub name: String,
  pub count: usize,
  pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
  pub ids: Vec<String>,
  pub embeddings: Vec<Embedding>,
  pub documents: Vec<String>,
  pub metadatas: Option<Vec<Metadata>>,
}

impl EmbeddingBatch {
  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }
}

/// Partial update by id; `None` fields are left unchanged
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateBatch {
  pub ids: Vec<String>,
  pub embeddings: Option<Vec<Embedding>>,
  pub documents: Option<Vec<String>>,
  pub metadatas: Option<Vec<Metadata>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
  pub query_embeddings: Vec<Embedding>,
  pub n_results: usize,
  pub filter: Option<Filter>,
  pub include: Include,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetRequest {
  pub ids: Option<Vec<String>>,
  pub filter: Option<Filter>,
  pub limit: Option<usize>,
  pub include: Include,
}

/// Nearest-neighbour hits, nested one level: outer index is the query index
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct QueryResult {
  pub ids: Vec<Vec<String>>,
  pub documents: Option<Vec<Vec<Option<String>>>>,
  pub metadatas: Option<Vec<Vec<Option<Metadata>>>>,
  pub distances: Option<Vec<Vec<Option<f32>>>>,
  pub embeddings: Option<Vec<Vec<Embedding>>>,
}

impl QueryResult {
  /// True when no query produced a single hit
  pub fn is_empty(&self) -> bool {
    self.ids.iter().all(Vec::is_empty)
  }

  /// First stored embedding of the first query group, if any was returned
  pub fn first_embedding(&self) -> Option<&Embedding> {
    self.embeddings.as_ref()?.first()?.first().filter(|e| !e.is_empty())
  }
}

/// Direct lookup result, flat (no query dimension)
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct GetResult {
  pub ids: Vec<String>,
  pub documents: Option<Vec<Option<String>>>,
  pub metadatas: Option<Vec<Option<Metadata>>>,
  pub embeddings: Option<Vec<Embedding>>,
}

impl From<GetResult> for QueryResult {
  fn from(result: GetResult) -> Self {
    QueryResult {
      ids: vec![result.ids],
      documents: result.documents.map(|d| vec![d]),
      metadatas: result.metadatas.map(|m| vec![m]),
      distances: None,
      embeddings: result.embeddings.map(|e| vec![e]),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_distance_spaces() {
    let a = [1.0, 0.0];
    let b = [0.0, 1.0];
    assert_eq!(DistanceSpace::L2.distance(&a, &b), 2.0);
    assert_eq!(DistanceSpace::Ip.distance(&a, &b), 1.0);
    assert_eq!(DistanceSpace::Cosine.distance(&a, &a), 0.0);
    assert_eq!(DistanceSpace::Cosine.distance(&a, &b), 1.0);
  }

  #[test]
  fn test_distance_space_from_metadata() {
    let mut metadata = Metadata::new();
    assert_eq!(DistanceSpace::from_metadata(&metadata), DistanceSpace::L2);
    metadata.insert(DISTANCE_SPACE_KEY.to_string(), json!("cosine"));
    assert_eq!(DistanceSpace::from_metadata(&metadata), DistanceSpace::Cosine);
    metadata.insert(DISTANCE_SPACE_KEY.to_string(), json!("manhattan"));
    assert_eq!(DistanceSpace::from_metadata(&metadata), DistanceSpace::L2);
  }

  #[test]
  fn test_include_fields() {
    assert_eq!(Include::default().fields(), vec!["documents", "metadatas", "distances"]);
    assert_eq!(Include::embeddings_only().fields(), vec!["embeddings"]);
    assert_eq!(Include::default().with_embeddings().fields().len(), 4);
  }

  #[test]
  fn test_get_result_wraps_into_single_query_group() {
    let get = GetResult {
      ids: vec!["product_p1".to_string()],
      documents: None,
      metadatas: None,
      embeddings: Some(vec![vec![0.5, 0.5]]),
    };
    let query: QueryResult = get.into();
    assert_eq!(query.ids, vec![vec!["product_p1".to_string()]]);
    assert_eq!(query.first_embedding(), Some(&vec![0.5, 0.5]));
    assert!(query.distances.is_none());
  }

  #[test]
  fn test_query_result_deserializes_store_json() {
    let raw = json!({
      "ids": [["a", "b"]],
      "documents": [["doc a", null]],
      "metadatas": [[{"k": 1}, null]],
      "distances": [[0.1, 0.3]],
      "embeddings": null,
      "included": ["documents", "metadatas", "distances"]
    });
    let result: QueryResult = serde_json::from_value(raw).unwrap();
    assert_eq!(result.ids[0].len(), 2);
    assert_eq!(result.documents.as_ref().unwrap()[0][1], None);
    assert_eq!(result.distances.as_ref().unwrap()[0][1], Some(0.3));
    assert!(result.embeddings.is_none());
    assert!(!result.is_empty());
    assert!(QueryResult::default().is_empty());
  }
}
