//! Vector search and table scans for LanceDB

use anyhow::{anyhow, Result};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};

use super::records::{batch_to_rows, StoredRow};
use crate::vector_store::DistanceSpace;

/// Nearest rows to `query_embedding`, ascending by distance
pub async fn search_nearest_rows(
  table: &Table,
  query_embedding: &[f32],
  limit: usize,
  space: DistanceSpace,
) -> Result<Vec<StoredRow>> {
  let batches: Vec<RecordBatch> = table
    .vector_search(query_embedding)?
    .column("embedding")
    .distance_type(distance_type_for(space))
    .limit(limit)
    .execute()
    .await
    .map_err(|e| anyhow!("Vector search failed: {}", e))?
    .try_collect()
    .await
    .map_err(|e| anyhow!("Error reading search results: {}", e))?;

  let rows = collect_rows(&batches)?;
  if rows.is_empty() {
    bentley::verbose!("No similar embeddings found");
  }
  Ok(rows)
}

/// Every row of the table, in storage order
pub async fn scan_rows(table: &Table) -> Result<Vec<StoredRow>> {
  let total = table.count_rows(None).await?;
  if total == 0 {
    return Ok(Vec::new());
  }

  let batches: Vec<RecordBatch> = table
    .query()
    .limit(total)
    .execute()
    .await
    .map_err(|e| anyhow!("Table scan failed: {}", e))?
    .try_collect()
    .await
    .map_err(|e| anyhow!("Error reading scan results: {}", e))?;

  collect_rows(&batches)
}

fn collect_rows(batches: &[RecordBatch]) -> Result<Vec<StoredRow>> {
  let mut rows = Vec::new();
  for batch in batches {
    rows.extend(batch_to_rows(batch)?);
  }
  Ok(rows)
}

/// Lance computes l2 as squared distance and dot as `1 - a.b`, matching the
/// collection distance spaces directly
fn distance_type_for(space: DistanceSpace) -> DistanceType {
  match space {
    DistanceSpace::L2 => DistanceType::L2,
    DistanceSpace::Ip => DistanceType::Dot,
    DistanceSpace::Cosine => DistanceType::Cosine,
  }
}
