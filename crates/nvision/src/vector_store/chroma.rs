//! HTTP client for a Chroma server's REST API
//!
//! Speaks the v1 route layout (`/api/v1/collections/...`) served by Chroma
//! 0.4 and 0.5. Chroma 1.x dropped those routes in favour of tenant- and
//! database-scoped v2 paths, so it is not supported. `ClientConfig::api_path`
//! only moves the v1 layout, e.g. behind a reverse proxy.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};

use super::filter::Filter;
use super::types::{
  CollectionHandle, Embedding, EmbeddingBatch, GetRequest, GetResult, Metadata, QueryRequest, QueryResult,
  UpdateBatch,
};
use super::VectorIndex;

/// Configuration for the Chroma HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
  /// Server root, e.g. "http://localhost:8000"
  pub base_url: String,
  /// Per-request timeout in seconds
  pub timeout_secs: u64,
  /// Extra attempts for read requests that fail or hit a 5xx
  pub max_retries: u32,
  /// Route prefix in front of every endpoint
  pub api_path: String,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
      timeout_secs: 30,
      max_retries: 2,
      api_path: "/api/v1".to_string(),
    }
  }
}

impl ClientConfig {
  pub fn for_host(host: &str, port: u16) -> Self {
    Self { base_url: format!("http://{host}:{port}"), ..Self::default() }
  }
}

pub struct ChromaHttpIndex {
  client: Client,
  config: ClientConfig,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest<'a> {
  name: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  metadata: Option<&'a Metadata>,
  get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct WireCollection {
  id: String,
  name: String,
  #[serde(default)]
  metadata: Option<Metadata>,
}

impl From<WireCollection> for CollectionHandle {
  fn from(wire: WireCollection) -> Self {
    CollectionHandle { id: wire.id, name: wire.name, metadata: wire.metadata.unwrap_or_default() }
  }
}

#[derive(Debug, Serialize)]
struct AddRequest<'a> {
  ids: &'a [String],
  embeddings: &'a [Embedding],
  documents: &'a [String],
  #[serde(skip_serializing_if = "Option::is_none")]
  metadatas: Option<&'a [Metadata]>,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
  ids: &'a [String],
  #[serde(skip_serializing_if = "Option::is_none")]
  embeddings: Option<&'a [Embedding]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  documents: Option<&'a [String]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  metadatas: Option<&'a [Metadata]>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
  ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct WireQueryRequest<'a> {
  query_embeddings: &'a [Embedding],
  n_results: usize,
  #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
  filter: Option<&'a Filter>,
  include: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireGetRequest<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  ids: Option<&'a [String]>,
  #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
  filter: Option<&'a Filter>,
  #[serde(skip_serializing_if = "Option::is_none")]
  limit: Option<usize>,
  include: Vec<&'static str>,
}

impl ChromaHttpIndex {
  pub fn new(config: ClientConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .context("Failed to create HTTP client")?;

    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    let api_path = self.config.api_path.trim_matches('/');
    let base = self.config.base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if api_path.is_empty() {
      format!("{base}/{path}")
    } else {
      format!("{base}/{api_path}/{path}")
    }
  }

  async fn send_once(&self, request: RequestBuilder) -> Result<Response> {
    let response = timeout(Duration::from_secs(self.config.timeout_secs), request.send()).await??;
    Ok(response)
  }

  /// Send a read request, retrying transport errors and 5xx responses
  async fn send_read<F>(&self, what: &str, build: F) -> Result<Response>
  where
    F: Fn() -> RequestBuilder,
  {
    let mut attempt = 0;
    loop {
      let result = self.send_once(build()).await;
      let retryable = match &result {
        Ok(response) => response.status().is_server_error(),
        Err(_) => true,
      };
      if !retryable || attempt >= self.config.max_retries {
        return result.with_context(|| format!("{what} request failed"));
      }
      attempt += 1;
      bentley::verbose!(&format!("Retrying {what} request (attempt {attempt})"));
      sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
    }
  }

  async fn send_write(&self, what: &str, request: RequestBuilder) -> Result<Response> {
    self.send_once(request).await.with_context(|| format!("{what} request failed"))
  }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
  if response.status().is_success() {
    return Ok(response);
  }
  let status = response.status();
  let error_text = response.text().await.unwrap_or_default();
  Err(anyhow!("Failed to {what}: HTTP {status}: {error_text}"))
}

/// Chroma answers lookups of unknown collections with 404 or with a 500
/// whose body says the collection does not exist
fn is_missing_collection(status: StatusCode, body: &str) -> bool {
  status == StatusCode::NOT_FOUND || body.contains("does not exist")
}

#[async_trait]
impl VectorIndex for ChromaHttpIndex {
  fn describe(&self) -> String {
    self.config.base_url.clone()
  }

  async fn heartbeat(&self) -> Result<()> {
    let response = self.send_read("heartbeat", || self.client.get(self.url("heartbeat"))).await?;
    ensure_success(response, "reach chroma server").await?;
    Ok(())
  }

  async fn get_or_create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionHandle> {
    // Chroma rejects an empty metadata object
    let body = CreateCollectionRequest {
      name,
      metadata: (!metadata.is_empty()).then_some(&metadata),
      get_or_create: true,
    };
    let request = self.client.post(self.url("collections")).json(&body);
    let response = self.send_write("create collection", request).await?;
    let wire: WireCollection = ensure_success(response, "create collection").await?.json().await?;
    Ok(wire.into())
  }

  async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>> {
    let path = format!("collections/{name}");
    let response = self.send_read("get collection", || self.client.get(self.url(&path))).await?;

    let status = response.status();
    if status.is_success() {
      let wire: WireCollection = response.json().await?;
      return Ok(Some(wire.into()));
    }

    let body = response.text().await.unwrap_or_default();
    if is_missing_collection(status, &body) {
      Ok(None)
    } else {
      Err(anyhow!("Failed to get collection: HTTP {status}: {body}"))
    }
  }

  async fn delete_collection(&self, name: &str) -> Result<bool> {
    let request = self.client.delete(self.url(&format!("collections/{name}")));
    let response = self.send_write("delete collection", request).await?;

    let status = response.status();
    if status.is_success() {
      return Ok(true);
    }

    let body = response.text().await.unwrap_or_default();
    if is_missing_collection(status, &body) {
      Ok(false)
    } else {
      Err(anyhow!("Failed to delete collection: HTTP {status}: {body}"))
    }
  }

  async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
    let response = self.send_read("list collections", || self.client.get(self.url("collections"))).await?;
    let wire: Vec<WireCollection> = ensure_success(response, "list collections").await?.json().await?;
    Ok(wire.into_iter().map(Into::into).collect())
  }

  async fn add(&self, collection: &CollectionHandle, batch: EmbeddingBatch) -> Result<()> {
    let body = AddRequest {
      ids: &batch.ids,
      embeddings: &batch.embeddings,
      documents: &batch.documents,
      metadatas: batch.metadatas.as_deref(),
    };
    let request = self.client.post(self.url(&format!("collections/{}/add", collection.id))).json(&body);
    let response = self.send_write("add", request).await?;
    ensure_success(response, "add embeddings").await?;
    Ok(())
  }

  async fn update(&self, collection: &CollectionHandle, batch: UpdateBatch) -> Result<()> {
    let body = UpdateRequest {
      ids: &batch.ids,
      embeddings: batch.embeddings.as_deref(),
      documents: batch.documents.as_deref(),
      metadatas: batch.metadatas.as_deref(),
    };
    let request = self.client.post(self.url(&format!("collections/{}/update", collection.id))).json(&body);
    let response = self.send_write("update", request).await?;
    ensure_success(response, "update embeddings").await?;
    Ok(())
  }

  async fn delete(&self, collection: &CollectionHandle, ids: Vec<String>) -> Result<()> {
    let body = DeleteRequest { ids: &ids };
    let request = self.client.post(self.url(&format!("collections/{}/delete", collection.id))).json(&body);
    let response = self.send_write("delete", request).await?;
    ensure_success(response, "delete embeddings").await?;
    Ok(())
  }

  async fn query(&self, collection: &CollectionHandle, request: QueryRequest) -> Result<QueryResult> {
    let body = WireQueryRequest {
      query_embeddings: &request.query_embeddings,
      n_results: request.n_results,
      filter: request.filter.as_ref(),
      include: request.include.fields(),
    };
    let url = self.url(&format!("collections/{}/query", collection.id));
    let response = self.send_read("query", || self.client.post(&url).json(&body)).await?;
    let result = ensure_success(response, "query collection").await?.json().await?;
    Ok(result)
  }

  async fn get(&self, collection: &CollectionHandle, request: GetRequest) -> Result<GetResult> {
    let body = WireGetRequest {
      ids: request.ids.as_deref(),
      filter: request.filter.as_ref(),
      limit: request.limit,
      include: request.include.fields().into_iter().filter(|f| *f != "distances").collect(),
    };
    let url = self.url(&format!("collections/{}/get", collection.id));
    let response = self.send_read("get", || self.client.post(&url).json(&body)).await?;
    let result = ensure_success(response, "get embeddings").await?.json().await?;
    Ok(result)
  }

  async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
    let url = self.url(&format!("collections/{}/count", collection.id));
    let response = self.send_read("count", || self.client.get(&url)).await?;
    let count = ensure_success(response, "count collection").await?.json().await?;
    Ok(count)
  }
}
