//! # NVision
//!
//! Semantic search over three record families (products, customer reviews and
//! CRM notes). Records are turned into text, embedded with a sentence model
//! and stored in a vector store collection per family. Free-text queries and
//! "more like this" recommendations come back as ranked [`SearchResult`]s.
//!
//! ## Layout
//!
//! - [`vector_store`]: backend contract, the connection-aware [`VectorStore`]
//!   facade and the Chroma, LanceDB and in-memory backends
//! - [`embedding`]: the [`Embedder`] and its ONNX backend
//! - [`search`]: the [`SearchService`] orchestrator
//! - [`similarity`]: vector math helpers
//! - [`config`]: layered [`Settings`]
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> nvision::Result<()> {
//! let service = nvision::default_service().await?;
//! for hit in service.search_similar_products("wireless earbuds", 5, None).await? {
//!   println!("{} {:.2}", hit.id, hit.similarity);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod records;
pub mod search;
pub mod shared;
pub mod similarity;
pub mod vector_store;

pub use config::Settings;
pub use embedding::Embedder;
pub use error::{Outcome, Result, SearchError};
pub use records::{CrmNote, Product, Record, RecordKind, Review};
pub use search::{format_results, CollectionStats, SearchResult, SearchService};
pub use shared::{default_service, default_service_with};
pub use vector_store::{Filter, VectorStore};
