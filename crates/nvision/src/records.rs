//! Business records that get embedded: products, reviews and CRM notes.
//!
//! Each kind assembles a single canonical text from its present, non-empty
//! fields in a fixed order. That text is both the embedding input and the
//! stored document, so the two can never drift apart.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::vector_store::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  Product,
  Review,
  CrmNote,
}

impl RecordKind {
  pub const ALL: [RecordKind; 3] = [RecordKind::Product, RecordKind::Review, RecordKind::CrmNote];

  /// Logical collection key, as used in configuration and stats
  pub fn collection_key(self) -> &'static str {
    match self {
      RecordKind::Product => "products",
      RecordKind::Review => "reviews",
      RecordKind::CrmNote => "crm_notes",
    }
  }

  /// Prefix of stored entry ids
  pub fn id_prefix(self) -> &'static str {
    match self {
      RecordKind::Product => "product",
      RecordKind::Review => "review",
      RecordKind::CrmNote => "crm",
    }
  }

  /// Metadata key holding the record's natural id
  pub fn id_field(self) -> &'static str {
    match self {
      RecordKind::Product => "product_id",
      RecordKind::Review => "review_id",
      RecordKind::CrmNote => "note_id",
    }
  }

  /// Stored entry id for a natural id, or a positional fallback.
  ///
  /// Positional ids share the namespace of natural ids: a record without an
  /// id at position 0 and a record whose id is `"0"` both map to
  /// `product_0`. Positions restart with every batch, so id-less records
  /// from separate batches overwrite each other. Give records natural ids
  /// when they must stay distinct.
  pub fn entry_id(self, natural_id: Option<&str>, position: usize) -> String {
    match natural_id.filter(|id| !id.is_empty()) {
      Some(id) => format!("{}_{id}", self.id_prefix()),
      None => format!("{}_{position}", self.id_prefix()),
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.collection_key())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
  pub product_id: Option<String>,
  pub name: Option<String>,
  pub description: Option<String>,
  pub category: Option<String>,
  pub brand: Option<String>,
  pub tags: Vec<String>,
  pub price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
  pub review_id: Option<String>,
  pub product_id: Option<String>,
  pub customer_id: Option<String>,
  pub title: Option<String>,
  pub content: Option<String>,
  pub rating: Option<u8>,
  pub sentiment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmNote {
  pub note_id: Option<String>,
  pub customer_id: Option<String>,
  pub subject: Option<String>,
  pub content: Option<String>,
  pub interaction_type: Option<String>,
  pub tags: Vec<String>,
  pub priority: Option<String>,
  pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
  Product(Product),
  Review(Review),
  CrmNote(CrmNote),
}

impl Record {
  pub fn kind(&self) -> RecordKind {
    match self {
      Record::Product(_) => RecordKind::Product,
      Record::Review(_) => RecordKind::Review,
      Record::CrmNote(_) => RecordKind::CrmNote,
    }
  }

  pub fn natural_id(&self) -> Option<&str> {
    match self {
      Record::Product(p) => p.product_id.as_deref(),
      Record::Review(r) => r.review_id.as_deref(),
      Record::CrmNote(n) => n.note_id.as_deref(),
    }
  }

  /// Canonical labelled text; empty when no text field is populated
  pub fn text(&self) -> String {
    match self {
      Record::Product(p) => build_product_text(p),
      Record::Review(r) => build_review_text(r),
      Record::CrmNote(n) => build_crm_text(n),
    }
  }

  /// Fixed metadata subset for the record's kind, stamped with `generated_at`
  pub fn metadata(&self, generated_at: DateTime<Utc>) -> Metadata {
    let created_at = generated_at.to_rfc3339();
    let value = match self {
      Record::Product(p) => json!({
        "product_id": or_blank(&p.product_id),
        "name": or_blank(&p.name),
        "category": or_blank(&p.category),
        "brand": or_blank(&p.brand),
        "price": p.price.unwrap_or(0.0),
        "created_at": created_at,
      }),
      Record::Review(r) => json!({
        "review_id": or_blank(&r.review_id),
        "product_id": or_blank(&r.product_id),
        "customer_id": or_blank(&r.customer_id),
        "rating": r.rating.unwrap_or(0),
        "sentiment": or_blank(&r.sentiment),
        "created_at": created_at,
      }),
      Record::CrmNote(n) => json!({
        "note_id": or_blank(&n.note_id),
        "customer_id": or_blank(&n.customer_id),
        "interaction_type": or_blank(&n.interaction_type),
        "priority": or_blank(&n.priority),
        "status": or_blank(&n.status),
        "created_at": created_at,
      }),
    };
    match value {
      Value::Object(map) => map,
      _ => Metadata::new(),
    }
  }
}

impl From<Product> for Record {
  fn from(product: Product) -> Self {
    Record::Product(product)
  }
}

impl From<Review> for Record {
  fn from(review: Review) -> Self {
    Record::Review(review)
  }
}

impl From<CrmNote> for Record {
  fn from(note: CrmNote) -> Self {
    Record::CrmNote(note)
  }
}

pub fn build_product_text(product: &Product) -> String {
  let mut parts = TextParts::default();
  parts.push("name", product.name.as_deref());
  parts.push("description", product.description.as_deref());
  parts.push("category", product.category.as_deref());
  parts.push("brand", product.brand.as_deref());
  parts.push_list("tags", &product.tags);
  parts.join()
}

pub fn build_review_text(review: &Review) -> String {
  let mut parts = TextParts::default();
  parts.push("title", review.title.as_deref());
  parts.push("content", review.content.as_deref());
  // A zero rating means "unrated"
  if let Some(rating) = review.rating.filter(|r| *r > 0) {
    parts.push("rating", Some(&rating.to_string()));
  }
  parts.join()
}

pub fn build_crm_text(note: &CrmNote) -> String {
  let mut parts = TextParts::default();
  parts.push("subject", note.subject.as_deref());
  parts.push("content", note.content.as_deref());
  parts.push("interaction type", note.interaction_type.as_deref());
  parts.push_list("tags", &note.tags);
  parts.join()
}

#[derive(Default)]
struct TextParts {
  parts: Vec<String>,
}

impl TextParts {
  fn push(&mut self, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
      self.parts.push(format!("{label}: {value}"));
    }
  }

  fn push_list(&mut self, label: &str, values: &[String]) {
    let present: Vec<&str> = values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    if !present.is_empty() {
      self.parts.push(format!("{label}: {}", present.join(", ")));
    }
  }

  fn join(self) -> String {
    self.parts.join(" ")
  }
}

fn or_blank(value: &Option<String>) -> &str {
  value.as_deref().unwrap_or("")
}
