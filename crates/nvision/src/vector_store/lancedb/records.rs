//! Arrow RecordBatch conversion for stored rows
//!
//! Table layout: `id` (utf8), `document` (nullable utf8), `metadata`
//! (nullable utf8 holding a JSON object) and `embedding` (fixed-size list of
//! float32 whose width is taken from the first row written).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use arrow::array::{Array, ArrayRef, FixedSizeListArray, FixedSizeListBuilder, Float32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::vector_store::{Embedding, Metadata};

pub const DISTANCE_COLUMN: &str = "_distance";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
  pub id: String,
  pub document: Option<String>,
  pub metadata: Option<Metadata>,
  pub embedding: Embedding,
  /// Only set on rows coming back from a vector search
  pub distance: Option<f32>,
}

/// Convert rows to a RecordBatch. Every row must carry an embedding of the same width.
pub fn rows_to_arrow_batch(rows: &[StoredRow]) -> Result<RecordBatch> {
  let dimension = validate_rows(rows)?;
  let schema = create_row_schema(dimension);

  let ids = StringArray::from(rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>());
  let documents = StringArray::from(rows.iter().map(|r| r.document.as_deref()).collect::<Vec<_>>());
  let metadatas = StringArray::from(
    rows
      .iter()
      .map(|r| r.metadata.as_ref().map(serde_json::to_string).transpose())
      .collect::<std::result::Result<Vec<_>, _>>()?,
  );
  let embeddings = create_embedding_array(rows, dimension);

  let columns: Vec<ArrayRef> = vec![Arc::new(ids), Arc::new(documents), Arc::new(metadatas), Arc::new(embeddings)];
  RecordBatch::try_new(schema, columns).map_err(|e| anyhow!("Failed to create RecordBatch: {}", e))
}

fn validate_rows(rows: &[StoredRow]) -> Result<usize> {
  let first = rows.first().ok_or_else(|| anyhow!("Cannot create RecordBatch from empty rows"))?;
  let dimension = first.embedding.len();
  if dimension == 0 {
    return Err(anyhow!("Row '{}' has no embedding", first.id));
  }
  if let Some(row) = rows.iter().find(|r| r.embedding.len() != dimension) {
    return Err(anyhow!(
      "embedding dimension {} of '{}' does not match dimension {}",
      row.embedding.len(),
      row.id,
      dimension
    ));
  }
  Ok(dimension)
}

fn create_row_schema(dimension: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("document", DataType::Utf8, true),
    Field::new("metadata", DataType::Utf8, true),
    Field::new(
      "embedding",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dimension as i32),
      false,
    ),
  ]))
}

fn create_embedding_array(rows: &[StoredRow], dimension: usize) -> FixedSizeListArray {
  let mut builder = FixedSizeListBuilder::new(Float32Array::builder(dimension * rows.len()), dimension as i32);
  for row in rows {
    builder.values().append_slice(&row.embedding);
    builder.append(true);
  }
  builder.finish()
}

/// Read rows back out of a scan or search result batch
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<StoredRow>> {
  let ids = string_column(batch, "id")?;
  let documents = string_column(batch, "document")?;
  let metadatas = string_column(batch, "metadata")?;
  let embeddings = batch
    .column_by_name("embedding")
    .ok_or_else(|| anyhow!("Missing 'embedding' column"))?
    .as_any()
    .downcast_ref::<FixedSizeListArray>()
    .ok_or_else(|| anyhow!("Failed to cast 'embedding' column to FixedSizeListArray"))?;
  let distances = batch
    .column_by_name(DISTANCE_COLUMN)
    .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

  let mut rows = Vec::with_capacity(batch.num_rows());
  for i in 0..batch.num_rows() {
    let metadata = match optional_value(metadatas, i) {
      Some(raw) => Some(serde_json::from_str::<Metadata>(raw)?),
      None => None,
    };
    let values = embeddings.value(i);
    let embedding = values
      .as_any()
      .downcast_ref::<Float32Array>()
      .map(|floats| floats.values().to_vec())
      .unwrap_or_default();

    rows.push(StoredRow {
      id: ids.value(i).to_string(),
      document: optional_value(documents, i).map(str::to_string),
      metadata,
      embedding,
      distance: distances.filter(|d| !d.is_null(i)).map(|d| d.value(i)),
    });
  }
  Ok(rows)
}

fn string_column<'a>(batch: &'a RecordBatch, column_name: &str) -> Result<&'a StringArray> {
  batch
    .column_by_name(column_name)
    .ok_or_else(|| anyhow!("Missing '{}' column", column_name))?
    .as_any()
    .downcast_ref::<StringArray>()
    .ok_or_else(|| anyhow!("Failed to cast '{}' column to StringArray", column_name))
}

fn optional_value(array: &StringArray, i: usize) -> Option<&str> {
  (!array.is_null(i)).then(|| array.value(i))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn row(id: &str, embedding: Vec<f32>) -> StoredRow {
    StoredRow { id: id.to_string(), document: None, metadata: None, embedding, distance: None }
  }

  #[test]
  fn test_rows_survive_arrow_conversion() {
    let mut first = row("product_p1", vec![0.1, 0.2, 0.3]);
    first.document = Some("name: Wireless Earbuds".to_string());
    first.metadata = json!({"product_id": "p1", "price": 59.9}).as_object().cloned();
    let second = row("product_p2", vec![0.4, 0.5, 0.6]);

    let batch = rows_to_arrow_batch(&[first.clone(), second.clone()]).unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch_to_rows(&batch).unwrap(), vec![first, second]);
  }

  #[test]
  fn test_rejects_empty_and_ragged_rows() {
    assert!(rows_to_arrow_batch(&[]).is_err());
    assert!(rows_to_arrow_batch(&[row("a", vec![])]).is_err());
    assert!(rows_to_arrow_batch(&[row("a", vec![1.0, 2.0]), row("b", vec![1.0])]).is_err());
  }

  #[test]
  fn test_schema_width_follows_rows() {
    let batch = rows_to_arrow_batch(&[row("a", vec![1.0; 5])]).unwrap();
    let field = batch.schema().field_with_name("embedding").unwrap().clone();
    assert!(matches!(field.data_type(), DataType::FixedSizeList(_, 5)));
  }
}
