//! Error taxonomy shared by the adapter, the embedder and the search service

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
  /// Backing store unreachable or misconfigured at `connect()`
  #[error("vector store connection failed: {0}")]
  Connection(String),

  /// Adapter operation attempted before a successful `connect()`
  #[error("vector store is not connected")]
  NotConnected,

  /// Search service used before `initialize()`
  #[error("search service is not initialized")]
  NotInitialized,

  #[error("failed to load embedding model '{model}': {reason}")]
  ModelLoad { model: String, reason: String },

  #[error("embedding generation failed: {0}")]
  Embedding(String),

  /// A single store call failed; the adapter reports it as `Outcome::Failed`
  #[error("vector store {operation} on '{collection}' failed: {message}")]
  Backend { operation: &'static str, collection: String, message: String },

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("invalid configuration: {0}")]
  Config(String),
}

impl SearchError {
  pub fn backend(operation: &'static str, collection: &str, source: &anyhow::Error) -> Self {
    SearchError::Backend {
      operation,
      collection: collection.to_string(),
      message: format!("{source:#}"),
    }
  }
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// Result of a store call whose backend failures are swallowed at the adapter boundary.
///
/// `Absent` means the collection (or target) does not exist, which is not a failure.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
  Done(T),
  Absent,
  Failed(SearchError),
}

impl<T> Outcome<T> {
  /// Boolean view used by mutation callers
  pub fn succeeded(&self) -> bool {
    matches!(self, Outcome::Done(_))
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, Outcome::Failed(_))
  }

  /// Optional view used by lookup callers; failures and absence both map to `None`
  pub fn ok(self) -> Option<T> {
    match self {
      Outcome::Done(value) => Some(value),
      Outcome::Absent | Outcome::Failed(_) => None,
    }
  }

  pub fn failure(&self) -> Option<&SearchError> {
    match self {
      Outcome::Failed(err) => Some(err),
      _ => None,
    }
  }

  /// Surface a swallowed failure as an error while keeping absence distinct
  pub fn into_result(self) -> Result<Option<T>> {
    match self {
      Outcome::Done(value) => Ok(Some(value)),
      Outcome::Absent => Ok(None),
      Outcome::Failed(err) => Err(err),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
    match self {
      Outcome::Done(value) => Outcome::Done(f(value)),
      Outcome::Absent => Outcome::Absent,
      Outcome::Failed(err) => Outcome::Failed(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_outcome_boolean_and_optional_views() {
    let done: Outcome<u32> = Outcome::Done(3);
    assert!(done.succeeded());
    assert_eq!(done.clone().ok(), Some(3));

    let absent: Outcome<u32> = Outcome::Absent;
    assert!(!absent.succeeded());
    assert!(!absent.is_failed());
    assert_eq!(absent.into_result(), Ok(None));

    let failed: Outcome<u32> = Outcome::Failed(SearchError::NotConnected);
    assert!(!failed.succeeded());
    assert_eq!(failed.failure(), Some(&SearchError::NotConnected));
    assert_eq!(failed.into_result(), Err(SearchError::NotConnected));
  }

  #[test]
  fn test_backend_error_keeps_context_chain() {
    let source = anyhow::anyhow!("socket closed").context("POST /query");
    let err = SearchError::backend("query", "products", &source);
    let text = err.to_string();
    assert!(text.contains("query on 'products'"));
    assert!(text.contains("POST /query"));
    assert!(text.contains("socket closed"));
  }
}
