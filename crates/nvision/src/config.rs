//! Read-only settings snapshot: built-in defaults, then an optional YAML file
//! named by `NVISION_CONFIG`, then `NVISION_*` environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::embedding::{DEFAULT_BATCH_SIZE, DEFAULT_DIMENSION, DEFAULT_MODEL_NAME};
use crate::error::{Result, SearchError};
use crate::records::RecordKind;
use crate::vector_store::DistanceSpace;

pub const CONFIG_ENV: &str = "NVISION_CONFIG";
const ENV_PREFIX: &str = "NVISION_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  /// Persistent directory store when available, otherwise the HTTP server
  #[default]
  Auto,
  Http,
  Persistent,
  Memory,
}

impl FromStr for StoreBackend {
  type Err = SearchError;

  fn from_str(value: &str) -> Result<Self> {
    match value.to_ascii_lowercase().as_str() {
      "auto" => Ok(StoreBackend::Auto),
      "http" => Ok(StoreBackend::Http),
      "persistent" => Ok(StoreBackend::Persistent),
      "memory" => Ok(StoreBackend::Memory),
      other => Err(SearchError::Config(format!("unknown store backend: {other}"))),
    }
  }
}

impl fmt::Display for StoreBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StoreBackend::Auto => "auto",
      StoreBackend::Http => "http",
      StoreBackend::Persistent => "persistent",
      StoreBackend::Memory => "memory",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
  pub backend: StoreBackend,
  pub host: String,
  pub port: u16,
  pub persist_directory: Option<PathBuf>,
  pub distance_space: DistanceSpace,
  pub request_timeout_secs: u64,
  pub max_retries: u32,
}

impl Default for StoreSettings {
  fn default() -> Self {
    Self {
      backend: StoreBackend::Auto,
      host: "localhost".to_string(),
      port: 8000,
      persist_directory: Some(PathBuf::from("./chroma_data")),
      distance_space: DistanceSpace::Cosine,
      request_timeout_secs: 30,
      max_retries: 2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
  pub model_name: String,
  pub dimension: usize,
  /// Detected (`cuda` or `cpu`) when unset
  pub device: Option<String>,
  pub batch_size: usize,
  pub normalize: bool,
}

impl Default for EmbeddingSettings {
  fn default() -> Self {
    Self {
      model_name: DEFAULT_MODEL_NAME.to_string(),
      dimension: DEFAULT_DIMENSION,
      device: None,
      batch_size: DEFAULT_BATCH_SIZE,
      normalize: true,
    }
  }
}

/// Physical collection names for the three logical collections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
  pub products: String,
  pub reviews: String,
  pub crm_notes: String,
}

impl Default for CollectionSettings {
  fn default() -> Self {
    Self {
      products: RecordKind::Product.collection_key().to_string(),
      reviews: RecordKind::Review.collection_key().to_string(),
      crm_notes: RecordKind::CrmNote.collection_key().to_string(),
    }
  }
}

impl CollectionSettings {
  pub fn name(&self, kind: RecordKind) -> &str {
    match kind {
      RecordKind::Product => &self.products,
      RecordKind::Review => &self.reviews,
      RecordKind::CrmNote => &self.crm_notes,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store: StoreSettings,
  pub embedding: EmbeddingSettings,
  pub collections: CollectionSettings,
}

impl Settings {
  /// Defaults, then the `NVISION_CONFIG` file if set, then environment overrides
  pub fn load() -> Result<Self> {
    let mut settings = match std::env::var(CONFIG_ENV) {
      Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
      _ => Self::default(),
    };
    settings.apply_overrides(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
      .map_err(|e| SearchError::Config(format!("cannot read {}: {e}", path.display())))?;
    Self::from_yaml_str(&raw)
  }

  pub fn from_yaml_str(raw: &str) -> Result<Self> {
    if raw.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(raw).map_err(|e| SearchError::Config(format!("invalid settings file: {e}")))
  }

  /// Apply `NVISION_*` overrides read through `lookup`
  pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

    if let Some(value) = get("STORE_BACKEND") {
      self.store.backend = value.parse()?;
    }
    if let Some(value) = get("CHROMA_HOST") {
      self.store.host = value;
    }
    if let Some(value) = get("CHROMA_PORT") {
      self.store.port = parse_value("CHROMA_PORT", &value)?;
    }
    if let Some(value) = get("CHROMA_PERSIST_DIRECTORY") {
      // An empty value switches persistence off
      self.store.persist_directory = (!value.trim().is_empty()).then(|| PathBuf::from(value));
    }
    if let Some(value) = get("DISTANCE_SPACE") {
      self.store.distance_space =
        value.parse().map_err(|e: SearchError| SearchError::Config(e.to_string()))?;
    }
    if let Some(value) = get("REQUEST_TIMEOUT_SECS") {
      self.store.request_timeout_secs = parse_value("REQUEST_TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = get("MAX_RETRIES") {
      self.store.max_retries = parse_value("MAX_RETRIES", &value)?;
    }
    if let Some(value) = get("EMBEDDING_MODEL_NAME") {
      self.embedding.model_name = value;
    }
    if let Some(value) = get("EMBEDDING_DIMENSION") {
      self.embedding.dimension = parse_value("EMBEDDING_DIMENSION", &value)?;
    }
    if let Some(value) = get("EMBEDDING_DEVICE") {
      self.embedding.device = (!value.trim().is_empty()).then_some(value);
    }
    if let Some(value) = get("EMBEDDING_BATCH_SIZE") {
      self.embedding.batch_size = parse_value("EMBEDDING_BATCH_SIZE", &value)?;
    }
    if let Some(value) = get("PRODUCTS_COLLECTION_NAME") {
      self.collections.products = value;
    }
    if let Some(value) = get("REVIEWS_COLLECTION_NAME") {
      self.collections.reviews = value;
    }
    if let Some(value) = get("CRM_NOTES_COLLECTION_NAME") {
      self.collections.crm_notes = value;
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<()> {
    if self.embedding.dimension == 0 {
      return Err(SearchError::Config("embedding dimension must be positive".to_string()));
    }
    if self.embedding.batch_size == 0 {
      return Err(SearchError::Config("embedding batch size must be positive".to_string()));
    }
    for kind in RecordKind::ALL {
      if self.collections.name(kind).trim().is_empty() {
        return Err(SearchError::Config(format!("collection name for {kind} is empty")));
      }
    }
    Ok(())
  }

  pub fn collection_name(&self, kind: RecordKind) -> &str {
    self.collections.name(kind)
  }

  /// Backend that `auto` resolves to for this build and configuration
  pub fn resolved_backend(&self) -> StoreBackend {
    match self.store.backend {
      StoreBackend::Auto => {
        if self.store.persist_directory.is_some() && cfg!(feature = "lancedb") {
          StoreBackend::Persistent
        } else if cfg!(feature = "chroma") {
          StoreBackend::Http
        } else {
          StoreBackend::Memory
        }
      }
      explicit => explicit,
    }
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
  T::Err: fmt::Display,
{
  value
    .trim()
    .parse()
    .map_err(|e| SearchError::Config(format!("{ENV_PREFIX}{key}={value:?}: {e}")))
}
