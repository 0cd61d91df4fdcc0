//! Metadata where-filters in the store's operator vocabulary
//! (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$and`, `$or`).
//!
//! A filter serializes to the JSON `where` document sent to remote stores and
//! can be evaluated locally by backends that scan entries themselves.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::types::Metadata;
use crate::error::{Result, SearchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
  In,
  Nin,
}

impl Comparison {
  pub fn operator(self) -> &'static str {
    match self {
      Comparison::Eq => "$eq",
      Comparison::Ne => "$ne",
      Comparison::Gt => "$gt",
      Comparison::Gte => "$gte",
      Comparison::Lt => "$lt",
      Comparison::Lte => "$lte",
      Comparison::In => "$in",
      Comparison::Nin => "$nin",
    }
  }

  fn from_operator(operator: &str) -> Option<Self> {
    let comparison = match operator {
      "$eq" => Comparison::Eq,
      "$ne" => Comparison::Ne,
      "$gt" => Comparison::Gt,
      "$gte" => Comparison::Gte,
      "$lt" => Comparison::Lt,
      "$lte" => Comparison::Lte,
      "$in" => Comparison::In,
      "$nin" => Comparison::Nin,
      _ => return None,
    };
    Some(comparison)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
  Field { key: String, op: Comparison, value: Value },
  And(Vec<Filter>),
  Or(Vec<Filter>),
}

impl Filter {
  pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::field(key, Comparison::Eq, value)
  }

  pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::field(key, Comparison::Ne, value)
  }

  pub fn gt(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::field(key, Comparison::Gt, value)
  }

  pub fn gte(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::field(key, Comparison::Gte, value)
  }

  pub fn lt(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::field(key, Comparison::Lt, value)
  }

  pub fn lte(key: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::field(key, Comparison::Lte, value)
  }

  pub fn is_in<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    Self::field(key, Comparison::In, Value::Array(values))
  }

  pub fn not_in<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    Self::field(key, Comparison::Nin, Value::Array(values))
  }

  pub fn and(filters: Vec<Filter>) -> Self {
    Filter::And(filters)
  }

  pub fn or(filters: Vec<Filter>) -> Self {
    Filter::Or(filters)
  }

  /// Combine with another filter under `$and`, flattening nested conjunctions
  pub fn and_also(self, other: Filter) -> Self {
    match (self, other) {
      (Filter::And(mut left), Filter::And(right)) => {
        left.extend(right);
        Filter::And(left)
      }
      (Filter::And(mut left), other) => {
        left.push(other);
        Filter::And(left)
      }
      (first, other) => Filter::And(vec![first, other]),
    }
  }

  fn field(key: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
    Filter::Field { key: key.into(), op, value: value.into() }
  }

  /// The JSON `where` document
  pub fn to_json(&self) -> Value {
    match self {
      Filter::Field { key, op, value } => json!({ key.as_str(): { op.operator(): value } }),
      Filter::And(filters) => json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() }),
      Filter::Or(filters) => json!({ "$or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() }),
    }
  }

  /// Parse a `where` document. `{key: value}` is shorthand for `$eq`, and several
  /// keys at one level form an implicit `$and`.
  pub fn from_json(value: &Value) -> Result<Self> {
    let object = value
      .as_object()
      .ok_or_else(|| invalid(format!("where filter must be an object, got {value}")))?;

    let mut clauses = Vec::with_capacity(object.len());
    for (key, condition) in object {
      clauses.push(parse_clause(key, condition)?);
    }

    match clauses.len() {
      0 => Err(invalid("where filter must not be empty".to_string())),
      1 => Ok(clauses.remove(0)),
      _ => Ok(Filter::And(clauses)),
    }
  }

  /// Evaluate against an entry's metadata. Missing keys only satisfy `$ne` and `$nin`.
  pub fn matches(&self, metadata: Option<&Metadata>) -> bool {
    match self {
      Filter::And(filters) => filters.iter().all(|f| f.matches(metadata)),
      Filter::Or(filters) => filters.iter().any(|f| f.matches(metadata)),
      Filter::Field { key, op, value } => {
        let actual = metadata.and_then(|m| m.get(key));
        compare(actual, *op, value)
      }
    }
  }
}

impl Serialize for Filter {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    self.to_json().serialize(serializer)
  }
}

fn parse_clause(key: &str, condition: &Value) -> Result<Filter> {
  match key {
    "$and" | "$or" => {
      let items = condition
        .as_array()
        .ok_or_else(|| invalid(format!("{key} expects an array of filters")))?;
      let filters = items.iter().map(Filter::from_json).collect::<Result<Vec<_>>>()?;
      Ok(if key == "$and" { Filter::And(filters) } else { Filter::Or(filters) })
    }
    _ if key.starts_with('$') => Err(invalid(format!("unsupported logical operator: {key}"))),
    _ => match condition {
      Value::Object(operators) => parse_operators(key, operators),
      literal => Ok(Filter::eq(key, literal.clone())),
    },
  }
}

fn parse_operators(key: &str, operators: &Map<String, Value>) -> Result<Filter> {
  let mut clauses = Vec::with_capacity(operators.len());
  for (operator, operand) in operators {
    let op = Comparison::from_operator(operator)
      .ok_or_else(|| invalid(format!("unsupported operator {operator} on '{key}'")))?;
    if matches!(op, Comparison::In | Comparison::Nin) && !operand.is_array() {
      return Err(invalid(format!("{operator} on '{key}' expects an array")));
    }
    clauses.push(Filter::field(key, op, operand.clone()));
  }
  match clauses.len() {
    0 => Err(invalid(format!("no operator given for '{key}'"))),
    1 => Ok(clauses.remove(0)),
    _ => Ok(Filter::And(clauses)),
  }
}

fn compare(actual: Option<&Value>, op: Comparison, expected: &Value) -> bool {
  match (op, actual) {
    (Comparison::Ne, None) | (Comparison::Nin, None) => true,
    (_, None) => false,
    (Comparison::Eq, Some(actual)) => values_equal(actual, expected),
    (Comparison::Ne, Some(actual)) => !values_equal(actual, expected),
    (Comparison::In, Some(actual)) => contains(expected, actual),
    (Comparison::Nin, Some(actual)) => !contains(expected, actual),
    (Comparison::Gt, Some(actual)) => ordered(actual, expected, |a, b| a > b),
    (Comparison::Gte, Some(actual)) => ordered(actual, expected, |a, b| a >= b),
    (Comparison::Lt, Some(actual)) => ordered(actual, expected, |a, b| a < b),
    (Comparison::Lte, Some(actual)) => ordered(actual, expected, |a, b| a <= b),
  }
}

/// Numbers compare by value so `1` equals `1.0`
fn values_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn contains(list: &Value, item: &Value) -> bool {
  list.as_array().is_some_and(|values| values.iter().any(|v| values_equal(v, item)))
}

fn ordered(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
  match (actual.as_f64(), expected.as_f64()) {
    (Some(a), Some(b)) => cmp(a, b),
    _ => false,
  }
}

fn invalid(message: String) -> SearchError {
  SearchError::InvalidArgument(message)
}
