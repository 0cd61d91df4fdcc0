//! Vector similarity measures and the distance-to-similarity convention used
//! when formatting search results

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SearchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMethod {
  Cosine,
  Euclidean,
  Dot,
}

impl FromStr for SimilarityMethod {
  type Err = SearchError;

  fn from_str(method: &str) -> Result<Self> {
    match method {
      "cosine" => Ok(SimilarityMethod::Cosine),
      "euclidean" => Ok(SimilarityMethod::Euclidean),
      "dot" => Ok(SimilarityMethod::Dot),
      other => Err(SearchError::InvalidArgument(format!("unsupported similarity method: {other}"))),
    }
  }
}

impl fmt::Display for SimilarityMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SimilarityMethod::Cosine => "cosine",
      SimilarityMethod::Euclidean => "euclidean",
      SimilarityMethod::Dot => "dot",
    };
    f.write_str(name)
  }
}

/// Calculate similarity between two embeddings with a method given by name
pub fn calculate_similarity(a: &[f32], b: &[f32], method: &str) -> Result<f32> {
  similarity(a, b, method.parse()?)
}

pub fn similarity(a: &[f32], b: &[f32], method: SimilarityMethod) -> Result<f32> {
  match method {
    SimilarityMethod::Cosine => cosine(a, b),
    SimilarityMethod::Euclidean => euclidean_similarity(a, b),
    SimilarityMethod::Dot => dot(a, b),
  }
}

/// Cosine similarity; exactly 0.0 when either vector has zero magnitude
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
  ensure_same_dimension(a, b)?;

  let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
  let magnitude_a = magnitude(a);
  let magnitude_b = magnitude(b);

  if magnitude_a == 0.0 || magnitude_b == 0.0 {
    Ok(0.0)
  } else {
    Ok(dot_product / (magnitude_a * magnitude_b))
  }
}

/// `1 / (1 + ||a - b||)`, in (0, 1] and 1.0 only for identical vectors
pub fn euclidean_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
  ensure_same_dimension(a, b)?;

  let distance: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt();
  Ok(1.0 / (1.0 + distance))
}

/// Raw dot product, unbounded
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
  ensure_same_dimension(a, b)?;
  Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Display-layer conversion applied to store distances; not clamped
pub fn distance_to_similarity(distance: f32) -> f32 {
  1.0 - distance
}

pub fn magnitude(v: &[f32]) -> f32 {
  v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length; zero vectors are returned unchanged
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
  let norm = magnitude(&v);
  if norm < f32::EPSILON {
    return v;
  }
  for value in v.iter_mut() {
    *value /= norm;
  }
  v
}

fn ensure_same_dimension(a: &[f32], b: &[f32]) -> Result<()> {
  if a.len() != b.len() {
    return Err(SearchError::InvalidArgument(format!(
      "embedding dimension mismatch: {} vs {}",
      a.len(),
      b.len()
    )));
  }
  Ok(())
}
