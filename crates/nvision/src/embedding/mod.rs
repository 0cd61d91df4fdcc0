//! Text embedding: turns record text into fixed-dimension vectors
//!
//! The [`Embedder`] owns the lazily-loaded model and the blank-text policy.
//! Loading and running the actual network is delegated to an
//! [`EmbeddingBackend`], so tests can drive the embedder with mocks.

pub mod onnx;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};

use crate::config::EmbeddingSettings;
use crate::error::{Result, SearchError};
use crate::records::Record;
use crate::similarity;
use crate::vector_store::Embedding;

pub use onnx::OnnxBackend;

pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_DIMENSION: usize = 384;
pub const DEFAULT_BATCH_SIZE: usize = 32;
/// Reported by `model_info` while the device is still to be detected
pub const AUTO_DEVICE: &str = "auto";

/// A loaded model ready to encode text
#[cfg_attr(test, mockall::automock)]
pub trait EncoderModel: Send {
  /// One vector per input text, in input order
  fn encode(&mut self, texts: &[String], batch_size: usize, normalize: bool) -> anyhow::Result<Vec<Embedding>>;
}

/// Resolves a model by name and loads it onto a device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
  async fn load_model(&self, model_name: &str, device: &str) -> anyhow::Result<Box<dyn EncoderModel>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
  pub model_name: String,
  pub dimension: usize,
  pub device: String,
  pub loaded: bool,
}

/// A record's canonical text paired with its vector (empty when the text is empty)
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
  pub text: String,
  pub embedding: Embedding,
}

pub struct Embedder {
  backend: Arc<dyn EmbeddingBackend>,
  model_name: String,
  dimension: usize,
  /// Set by `with_device`, otherwise detected on first load
  device: OnceCell<String>,
  batch_size: usize,
  normalize: bool,
  model: Mutex<Option<Box<dyn EncoderModel>>>,
  loaded: AtomicBool,
}

impl Embedder {
  pub fn new(backend: Arc<dyn EmbeddingBackend>, model_name: impl Into<String>, dimension: usize) -> Self {
    Self {
      backend,
      model_name: model_name.into(),
      dimension,
      device: OnceCell::new(),
      batch_size: DEFAULT_BATCH_SIZE,
      normalize: true,
      model: Mutex::new(None),
      loaded: AtomicBool::new(false),
    }
  }

  /// Embedder for the configured model; the device is detected when the settings leave it unset
  pub fn from_settings(settings: &EmbeddingSettings, backend: Arc<dyn EmbeddingBackend>) -> Self {
    let embedder = Self::new(backend, settings.model_name.clone(), settings.dimension)
      .with_encoding(settings.batch_size, settings.normalize);
    match &settings.device {
      Some(device) => embedder.with_device(device.clone()),
      None => embedder,
    }
  }

  pub fn with_device(mut self, device: impl Into<String>) -> Self {
    self.device = OnceCell::new_with(Some(device.into()));
    self
  }

  /// Batch size and normalization used by the record-level helpers
  pub fn with_encoding(mut self, batch_size: usize, normalize: bool) -> Self {
    self.batch_size = batch_size.max(1);
    self.normalize = normalize;
    self
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  /// Load the model if it is not loaded yet; later calls are no-ops
  pub async fn load_model(&self) -> Result<()> {
    let mut slot = self.model.lock().await;
    self.ensure_loaded(&mut slot).await
  }

  async fn ensure_loaded(&self, slot: &mut Option<Box<dyn EncoderModel>>) -> Result<()> {
    if slot.is_some() {
      return Ok(());
    }

    let device = self.device.get_or_init(|| async { detect_device() }).await;
    bentley::info!(&format!("Loading embedding model {} on {device}", self.model_name));
    let model = self.backend.load_model(&self.model_name, device).await.map_err(|e| {
      let err = SearchError::ModelLoad { model: self.model_name.clone(), reason: format!("{e:#}") };
      bentley::error!(&err.to_string());
      err
    })?;

    *slot = Some(model);
    self.loaded.store(true, Ordering::Release);
    bentley::success!(&format!("Embedding model {} loaded", self.model_name));
    Ok(())
  }

  /// Encode texts, dropping blank and whitespace-only entries first.
  ///
  /// The output can therefore be shorter than the input. When nothing is left
  /// to encode the result is empty and the model is not touched.
  pub async fn encode(&self, texts: &[String], batch_size: usize, normalize: bool) -> Result<Vec<Embedding>> {
    let valid: Vec<String> = texts.iter().filter(|t| !t.trim().is_empty()).cloned().collect();
    if valid.is_empty() {
      bentley::verbose!("No valid texts to encode");
      return Ok(Vec::new());
    }

    let mut slot = self.model.lock().await;
    self.ensure_loaded(&mut slot).await?;
    let mut model = slot.take().ok_or_else(|| SearchError::Embedding("model not loaded".to_string()))?;

    // Inference is CPU-bound; run it off the async workers and hand the model back
    let texts = valid.clone();
    let batch_size = batch_size.max(1);
    let joined = tokio::task::spawn_blocking(move || {
      let encoded = model.encode(&texts, batch_size, normalize);
      (model, encoded)
    })
    .await;
    let (model, encoded) = joined.map_err(|e| {
      self.loaded.store(false, Ordering::Release);
      SearchError::Embedding(format!("encoder task failed: {e}"))
    })?;
    *slot = Some(model);
    drop(slot);

    let embeddings = encoded.map_err(|e| SearchError::Embedding(format!("{e:#}")))?;

    if embeddings.len() != valid.len() {
      return Err(SearchError::Embedding(format!(
        "model returned {} vectors for {} texts",
        embeddings.len(),
        valid.len()
      )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
      return Err(SearchError::Embedding(format!(
        "model produced {}-dimensional vectors, expected {}",
        bad.len(),
        self.dimension
      )));
    }

    bentley::verbose!(&format!("Encoded {} texts", embeddings.len()));
    Ok(embeddings)
  }

  /// Single text; blank text yields the empty sentinel
  pub async fn encode_text(&self, text: &str) -> Result<Embedding> {
    let mut embeddings = self.encode(&[text.to_string()], 1, self.normalize).await?;
    Ok(embeddings.pop().unwrap_or_default())
  }

  /// Assemble the record's text and encode it
  pub async fn encode_record(&self, record: &Record) -> Result<Embedding> {
    let text = record.text();
    if text.is_empty() {
      bentley::warn!(&format!("No text content for {} record", record.kind()));
      return Ok(Embedding::new());
    }
    self.encode_text(&text).await
  }

  /// Encode many records in batches, keeping each record's text paired with its vector
  pub async fn encode_records(&self, records: &[Record], batch_size: usize) -> Result<Vec<EncodedRecord>> {
    let texts: Vec<String> = records.iter().map(Record::text).collect();
    let non_empty: Vec<String> = texts.iter().filter(|t| !t.is_empty()).cloned().collect();

    let mut vectors = Vec::with_capacity(non_empty.len());
    for chunk in non_empty.chunks(batch_size.max(1)) {
      vectors.extend(self.encode(chunk, batch_size, self.normalize).await?);
    }

    let mut vectors = vectors.into_iter();
    Ok(
      texts
        .into_iter()
        .map(|text| {
          let embedding = if text.is_empty() { Embedding::new() } else { vectors.next().unwrap_or_default() };
          EncodedRecord { text, embedding }
        })
        .collect(),
    )
  }

  pub fn model_info(&self) -> ModelInfo {
    ModelInfo {
      model_name: self.model_name.clone(),
      dimension: self.dimension,
      device: self.device.get().cloned().unwrap_or_else(|| AUTO_DEVICE.to_string()),
      loaded: self.loaded.load(Ordering::Acquire),
    }
  }

  pub fn calculate_similarity(&self, a: &[f32], b: &[f32], method: &str) -> Result<f32> {
    similarity::calculate_similarity(a, b, method)
  }
}

/// `cuda` when an NVIDIA driver answers, otherwise `cpu`
pub fn detect_device() -> String {
  let cuda = std::process::Command::new("nvidia-smi")
    .output()
    .map(|output| output.status.success())
    .unwrap_or(false);
  let device = if cuda { "cuda" } else { "cpu" };
  device.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::records::{CrmNote, Product, Review};

  fn strings(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| t.to_string()).collect()
  }

  /// Model that embeds each text as `[len, 1.0, 0.0]`
  fn length_model(calls: usize) -> MockEncoderModel {
    let mut model = MockEncoderModel::new();
    model
      .expect_encode()
      .times(calls)
      .returning(|texts, _, _| Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.0]).collect()));
    model
  }

  fn embedder_with(model: MockEncoderModel) -> Embedder {
    let mut backend = MockEmbeddingBackend::new();
    let mut model = Some(model);
    backend
      .expect_load_model()
      .times(1)
      .returning(move |_, _| Ok(Box::new(model.take().unwrap_or_else(MockEncoderModel::new)) as Box<dyn EncoderModel>));
    Embedder::new(Arc::new(backend), "test-model", 3).with_device("cpu")
  }

  fn idle_embedder() -> Embedder {
    let mut backend = MockEmbeddingBackend::new();
    backend.expect_load_model().never();
    Embedder::new(Arc::new(backend), "test-model", 3).with_device("cpu")
  }

  #[tokio::test]
  async fn test_blank_inputs_return_empty_without_loading() {
    let embedder = idle_embedder();
    assert!(embedder.encode(&[], 8, true).await.unwrap().is_empty());
    assert!(embedder.encode(&strings(&["", "   ", "\n\t"]), 8, true).await.unwrap().is_empty());
    assert!(!embedder.model_info().loaded);
  }

  #[tokio::test]
  async fn test_blank_texts_are_dropped_not_padded() {
    let mut model = MockEncoderModel::new();
    model
      .expect_encode()
      .withf(|texts, batch_size, normalize| texts == ["alpha", "beta"] && *batch_size == 4 && *normalize)
      .times(1)
      .returning(|texts, _, _| Ok(texts.iter().map(|_| vec![0.0, 1.0, 0.0]).collect()));
    let embedder = embedder_with(model);

    let vectors = embedder.encode(&strings(&["alpha", " ", "beta"]), 4, true).await.unwrap();
    assert_eq!(vectors.len(), 2);
  }

  #[tokio::test]
  async fn test_model_loads_once() {
    let embedder = embedder_with(length_model(2));
    embedder.load_model().await.unwrap();
    embedder.load_model().await.unwrap();
    embedder.encode(&strings(&["one"]), 1, true).await.unwrap();
    embedder.encode(&strings(&["two"]), 1, true).await.unwrap();
    assert!(embedder.model_info().loaded);
  }

  #[tokio::test]
  async fn test_model_load_failure_is_model_load_error() {
    let mut backend = MockEmbeddingBackend::new();
    backend.expect_load_model().returning(|_, _| Err(anyhow::anyhow!("repository not found")));
    let embedder = Embedder::new(Arc::new(backend), "missing/model", 3);

    let err = embedder.encode(&strings(&["text"]), 1, true).await.unwrap_err();
    assert!(matches!(
      err,
      SearchError::ModelLoad { ref model, ref reason } if model == "missing/model" && reason.contains("not found")
    ));
    assert!(!embedder.model_info().loaded);
  }

  #[tokio::test]
  async fn test_wrong_dimension_is_rejected() {
    let mut model = MockEncoderModel::new();
    model.expect_encode().returning(|_, _, _| Ok(vec![vec![1.0, 2.0]]));
    let embedder = embedder_with(model);

    let err = embedder.encode(&strings(&["text"]), 1, true).await.unwrap_err();
    assert!(matches!(err, SearchError::Embedding(ref m) if m.contains("expected 3")));
  }

  #[tokio::test]
  async fn test_encode_record_with_no_text_is_empty_sentinel() {
    let embedder = idle_embedder();
    assert!(embedder.encode_record(&Record::Product(Product::default())).await.unwrap().is_empty());
    assert!(embedder.encode_record(&Record::Review(Review::default())).await.unwrap().is_empty());
    assert!(embedder.encode_record(&Record::CrmNote(CrmNote::default())).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_encode_record_uses_assembled_text() {
    let mut model = MockEncoderModel::new();
    model
      .expect_encode()
      .withf(|texts, _, _| texts == ["name: Wired Earbuds"])
      .times(1)
      .returning(|_, _, _| Ok(vec![vec![0.5, 0.5, 0.0]]));
    let embedder = embedder_with(model);

    let product = Product { name: Some("Wired Earbuds".to_string()), ..Product::default() };
    assert_eq!(embedder.encode_record(&product.into()).await.unwrap(), vec![0.5, 0.5, 0.0]);
  }

  #[tokio::test]
  async fn test_encode_records_keeps_pairing_across_batches() {
    let embedder = embedder_with(length_model(2));
    let records: Vec<Record> = vec![
      Product { name: Some("a".into()), ..Product::default() }.into(),
      Product::default().into(),
      Product { name: Some("bbb".into()), ..Product::default() }.into(),
      Product { name: Some("cc".into()), ..Product::default() }.into(),
    ];

    let encoded = embedder.encode_records(&records, 2).await.unwrap();
    assert_eq!(encoded.len(), 4);
    assert_eq!(encoded[0].embedding[0], "name: a".len() as f32);
    assert!(encoded[1].embedding.is_empty());
    assert_eq!(encoded[1].text, "");
    assert_eq!(encoded[2].embedding[0], "name: bbb".len() as f32);
    assert_eq!(encoded[3].embedding[0], "name: cc".len() as f32);
  }

  #[tokio::test]
  async fn test_configured_device_skips_detection() {
    let mut backend = MockEmbeddingBackend::new();
    backend
      .expect_load_model()
      .withf(|_, device| device == "mps")
      .times(1)
      .returning(|_, _| Ok(Box::new(MockEncoderModel::new()) as Box<dyn EncoderModel>));
    let embedder = Embedder::new(Arc::new(backend), "test-model", 3).with_device("mps");

    assert_eq!(embedder.model_info().device, "mps");
    embedder.load_model().await.unwrap();
    assert_eq!(embedder.model_info().device, "mps");
  }

  #[tokio::test]
  async fn test_unset_device_is_detected_at_load() {
    let mut backend = MockEmbeddingBackend::new();
    backend
      .expect_load_model()
      .withf(|_, device| device == "cpu" || device == "cuda")
      .times(1)
      .returning(|_, _| Ok(Box::new(MockEncoderModel::new()) as Box<dyn EncoderModel>));
    let embedder = Embedder::new(Arc::new(backend), "test-model", 3);

    assert_eq!(embedder.model_info().device, AUTO_DEVICE);
    embedder.load_model().await.unwrap();
    assert!(["cpu", "cuda"].contains(&embedder.model_info().device.as_str()));
  }

  #[tokio::test]
  async fn test_concurrent_encodes_share_one_model() {
    let embedder = Arc::new(embedder_with(length_model(3)));
    let left = strings(&["left"]);
    let right = strings(&["right side"]);
    let (a, b) = tokio::join!(
      embedder.encode(&left, 1, true),
      embedder.encode(&right, 1, true)
    );
    assert_eq!(a.unwrap(), vec![vec![4.0, 1.0, 0.0]]);
    assert_eq!(b.unwrap(), vec![vec![10.0, 1.0, 0.0]]);

    // The model survives the round trip through the blocking pool
    assert_eq!(embedder.encode(&strings(&["x"]), 1, true).await.unwrap(), vec![vec![1.0, 1.0, 0.0]]);
    assert!(embedder.model_info().loaded);
  }

  #[test]
  fn test_model_info_is_pure() {
    let embedder = idle_embedder();
    let info = embedder.model_info();
    assert_eq!(
      info,
      ModelInfo { model_name: "test-model".into(), dimension: 3, device: "cpu".into(), loaded: false }
    );
    assert_eq!(embedder.calculate_similarity(&[1.0, 2.0, 3.0], &[2.0, 3.0, 4.0], "dot").unwrap(), 20.0);
  }
}
