//! Table and collection-file management for LanceDB

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use arrow::record_batch::RecordBatchIterator;
use lancedb::{Connection, Table};
use serde::{Deserialize, Serialize};

use super::records::{rows_to_arrow_batch, StoredRow};
use crate::vector_store::{CollectionHandle, Metadata};

/// Collection descriptor persisted next to the tables. A collection exists
/// once its descriptor is written; its table appears with the first add.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionFile {
  id: String,
  name: String,
  #[serde(default)]
  metadata: Metadata,
}

pub struct TableManager {
  connection: Connection,
  data_dir: PathBuf,
}

impl TableManager {
  /// Connect to the store directory, creating it on first use
  pub async fn open(data_dir: PathBuf) -> Result<Self> {
    std::fs::create_dir_all(&data_dir)
      .with_context(|| format!("Failed to create store directory {}", data_dir.display()))?;
    let connection = lancedb::connect(&data_dir.to_string_lossy())
      .execute()
      .await
      .with_context(|| format!("Failed to open LanceDB store at {}", data_dir.display()))?;
    Ok(Self { connection, data_dir })
  }

  pub fn data_dir(&self) -> &Path {
    &self.data_dir
  }

  fn collection_file(&self, name: &str) -> PathBuf {
    self.data_dir.join(format!("{name}.collection.json"))
  }

  pub fn load_collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
    let path = self.collection_file(name);
    if !path.exists() {
      return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: CollectionFile = serde_json::from_str(&raw)?;
    Ok(Some(CollectionHandle { id: file.id, name: file.name, metadata: file.metadata }))
  }

  pub fn save_collection(&self, handle: &CollectionHandle) -> Result<()> {
    let file = CollectionFile { id: handle.id.clone(), name: handle.name.clone(), metadata: handle.metadata.clone() };
    let path = self.collection_file(&handle.name);
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)
      .with_context(|| format!("Failed to write {}", path.display()))
  }

  pub fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
    let mut handles = Vec::new();
    for entry in std::fs::read_dir(&self.data_dir)? {
      let file_name = entry?.file_name();
      let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(".collection.json")) else {
        continue;
      };
      if let Some(handle) = self.load_collection(name)? {
        handles.push(handle);
      }
    }
    handles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(handles)
  }

  /// Remove the descriptor and the table directory; false if neither existed
  pub fn remove_collection(&self, name: &str) -> Result<bool> {
    let descriptor = self.collection_file(name);
    let table_dir = self.data_dir.join(format!("{name}.lance"));
    let existed = descriptor.exists();

    if table_dir.exists() {
      std::fs::remove_dir_all(&table_dir)?;
      bentley::info!(&format!("Deleted table directory: {}", table_dir.display()));
    }
    if existed {
      std::fs::remove_file(&descriptor)?;
    }
    Ok(existed)
  }

  pub async fn table_exists(&self, name: &str) -> Result<bool> {
    let tables = self
      .connection
      .table_names()
      .execute()
      .await
      .map_err(|e| anyhow!("Failed to list tables: {}", e))?;
    Ok(tables.iter().any(|t| t == name))
  }

  /// Open the collection's table; `None` until something has been written
  pub async fn open_table(&self, name: &str) -> Result<Option<Table>> {
    if !self.table_exists(name).await? {
      return Ok(None);
    }
    let table = self
      .connection
      .open_table(name)
      .execute()
      .await
      .map_err(|e| anyhow!("Failed to open table '{}': {}", name, e))?;
    Ok(Some(table))
  }

  /// Append rows, creating the table from the first batch
  pub async fn write_rows(&self, name: &str, rows: &[StoredRow]) -> Result<()> {
    let batch = rows_to_arrow_batch(rows)?;
    let schema = batch.schema();
    let batch_iter = RecordBatchIterator::new(vec![Ok(batch)], schema);

    match self.open_table(name).await? {
      Some(table) => {
        table
          .add(batch_iter)
          .execute()
          .await
          .map_err(|e| anyhow!("Failed to store embeddings: {}", e))?;
      }
      None => {
        self
          .connection
          .create_table(name, batch_iter)
          .execute()
          .await
          .map_err(|e| anyhow!("Failed to create table '{}': {}", name, e))?;
        bentley::info!(&format!("Created table '{name}'"));
      }
    }
    Ok(())
  }

  pub async fn delete_ids(&self, table: &Table, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    table
      .delete(&id_predicate(ids))
      .await
      .map_err(|e| anyhow!("Failed to delete embeddings: {}", e))?;
    Ok(())
  }
}

/// SQL predicate selecting the given ids
pub fn id_predicate(ids: &[String]) -> String {
  let quoted: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
  format!("id IN ({})", quoted.join(", "))
}
