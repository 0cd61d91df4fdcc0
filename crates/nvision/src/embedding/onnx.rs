//! Sentence-transformer models run through ONNX Runtime
//!
//! Model files come from the Hugging Face hub (`tokenizer.json` and
//! `onnx/model.onnx`). Token embeddings are mean-pooled over the attention
//! mask and optionally L2-normalized.

#[cfg(feature = "ml-features")]
pub use enabled::OnnxBackend;

#[cfg(not(feature = "ml-features"))]
pub use disabled::OnnxBackend;

/// Average token vectors of one sequence, counting only positions whose mask is set.
///
/// `data` is the flattened `[seq_len, hidden_size]` hidden state.
pub fn mean_pool(data: &[f32], seq_len: usize, hidden_size: usize, attention_mask: &[u32]) -> Vec<f32> {
  let mut pooled = vec![0.0f32; hidden_size];
  let mut counted = 0usize;

  for token_idx in 0..seq_len {
    if attention_mask.get(token_idx).copied().unwrap_or(1) == 0 {
      continue;
    }
    let start = token_idx * hidden_size;
    let Some(token) = data.get(start..start + hidden_size) else {
      break;
    };
    for (i, &value) in token.iter().enumerate() {
      pooled[i] += value;
    }
    counted += 1;
  }

  if counted > 0 {
    for value in pooled.iter_mut() {
      *value /= counted as f32;
    }
  }
  pooled
}

#[cfg(feature = "ml-features")]
mod enabled {
  use std::collections::HashMap;
  use std::path::PathBuf;

  use anyhow::{anyhow, Result};
  use async_trait::async_trait;
  use hf_hub::api::tokio::Api;
  use ndarray::Array2;
  use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProviderDispatch,
  };
  use ort::session::Session;
  use ort::value::Value;
  use tokenizers::Tokenizer;

  use super::mean_pool;
  use crate::embedding::{EmbeddingBackend, EncoderModel};
  use crate::similarity::normalize;
  use crate::vector_store::Embedding;

  const TOKENIZER_FILE: &str = "tokenizer.json";
  const MODEL_FILE: &str = "onnx/model.onnx";
  const MAX_SEQUENCE_LENGTH: usize = 512;

  /// Downloads models from the hub and runs them with ONNX Runtime
  #[derive(Debug, Default, Clone)]
  pub struct OnnxBackend;

  impl OnnxBackend {
    pub fn new() -> Self {
      Self
    }
  }

  struct ModelFiles {
    tokenizer_file: PathBuf,
    model_path: PathBuf,
  }

  struct OnnxModel {
    session: Session,
    tokenizer: Tokenizer,
  }

  #[async_trait]
  impl EmbeddingBackend for OnnxBackend {
    async fn load_model(&self, model_name: &str, device: &str) -> Result<Box<dyn EncoderModel>> {
      let files = download_model(model_name).await?;
      let tokenizer =
        Tokenizer::from_file(&files.tokenizer_file).map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
      let session = Session::builder()?
        .with_execution_providers(execution_providers(device))?
        .commit_from_file(&files.model_path)?;

      Ok(Box::new(OnnxModel { session, tokenizer }))
    }
  }

  async fn download_model(model_name: &str) -> Result<ModelFiles> {
    let api = Api::new().map_err(|e| anyhow!("HF API initialization failed: {}", e))?;
    let repo = api.model(model_name.to_string());

    let tokenizer_file =
      repo.get(TOKENIZER_FILE).await.map_err(|e| anyhow!("Failed to download tokenizer: {}", e))?;
    let model_path = repo.get(MODEL_FILE).await.map_err(|e| anyhow!("Failed to download ONNX model: {}", e))?;

    Ok(ModelFiles { tokenizer_file, model_path })
  }

  fn execution_providers(device: &str) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    match device {
      "cuda" => providers.push(CUDAExecutionProvider::default().build().error_on_failure()),
      "mps" | "coreml" => providers.push(CoreMLExecutionProvider::default().into()),
      _ => {}
    }
    providers.push(CPUExecutionProvider::default().into());
    providers
  }

  impl EncoderModel for OnnxModel {
    fn encode(&mut self, texts: &[String], batch_size: usize, normalize_output: bool) -> Result<Vec<Embedding>> {
      let mut embeddings = Vec::with_capacity(texts.len());
      for (batch_idx, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        bentley::verbose!(&format!("Encoding batch {} ({} texts)", batch_idx + 1, batch.len()));
        for text in batch {
          let embedding = self.embed(text)?;
          embeddings.push(if normalize_output { normalize(embedding) } else { embedding });
        }
      }
      Ok(embeddings)
    }
  }

  impl OnnxModel {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
      let encoding = self.tokenizer.encode(text, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
      let seq_len = encoding.get_ids().len().min(MAX_SEQUENCE_LENGTH);
      let attention_mask = &encoding.get_attention_mask()[..seq_len];

      let mut input = HashMap::new();
      input.insert("input_ids".to_string(), to_tensor(&encoding.get_ids()[..seq_len])?);
      input.insert("attention_mask".to_string(), to_tensor(attention_mask)?);

      let input_names: Vec<String> = self.session.inputs.iter().map(|input| input.name.to_string()).collect();
      if input_names.iter().any(|name| name == "token_type_ids") {
        input.insert("token_type_ids".to_string(), to_tensor(&encoding.get_type_ids()[..seq_len])?);
      }

      let output = self.session.run(input)?;
      let tensor = output
        .get("last_hidden_state")
        .or_else(|| output.get("0"))
        .ok_or_else(|| anyhow!("No output found from model - expected 'last_hidden_state' or '0'"))?;
      let (shape, data) = tensor.try_extract_tensor::<f32>()?;
      let shape: &[i64] = shape.as_ref();
      if shape.len() != 3 {
        return Err(anyhow!("Unexpected hidden state shape {:?}", shape));
      }

      Ok(mean_pool(data, shape[1] as usize, shape[2] as usize, attention_mask))
    }
  }

  fn to_tensor(values: &[u32]) -> Result<Value> {
    let ids: Vec<i64> = values.iter().map(|&x| x as i64).collect();
    let array: Array2<i64> = Array2::from_shape_vec((1, ids.len()), ids)?;
    let tensor: Value = Value::from_array(array)?.into();
    Ok(tensor)
  }
}

#[cfg(not(feature = "ml-features"))]
mod disabled {
  use anyhow::{anyhow, Result};
  use async_trait::async_trait;

  use crate::embedding::{EmbeddingBackend, EncoderModel};

  /// Stand-in used when the crate is built without `ml-features`
  #[derive(Debug, Default, Clone)]
  pub struct OnnxBackend;

  impl OnnxBackend {
    pub fn new() -> Self {
      Self
    }
  }

  #[async_trait]
  impl EmbeddingBackend for OnnxBackend {
    async fn load_model(&self, _model_name: &str, _device: &str) -> Result<Box<dyn EncoderModel>> {
      Err(anyhow!("ML features not available (built without the 'ml-features' feature)"))
    }
  }
}
