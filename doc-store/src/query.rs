//! Equality-filtered, ordered, paginated collection queries

use crate::document::Document;
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// Collection query
///
/// Filters are equality matches on top-level fields. Numbers compare by
/// value, so `5` matches `5.0`. When ordering, documents lacking the order
/// field are skipped and ties fall back to document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection to scan
    pub collection: String,
    /// Equality filters (field, value)
    pub filters: Vec<(String, Value)>,
    /// Optional ordering
    pub order_by: Option<(String, Direction)>,
    /// Documents to skip after filtering and ordering
    pub offset: usize,
    /// Maximum documents returned
    pub limit: Option<usize>,
}

impl Query {
    /// Query over a whole collection
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            offset: 0,
            limit: None,
        }
    }

    /// Add an equality filter
    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    /// Order results
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    /// Skip results
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Cap results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document passes every filter
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|(field, expected)| {
            doc.field(field)
                .map(|actual| values_equal(actual, expected))
                .unwrap_or(false)
        })
    }

    /// Filter, order and paginate candidate documents of the collection
    pub(crate) fn execute(&self, candidates: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = candidates
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        if let Some((field, direction)) = &self.order_by {
            docs.retain(|doc| doc.field(field).map_or(false, |v| !v.is_null()));
            docs.sort_by(|a, b| {
                let ordering = match (a.field(field), b.field(field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => Ordering::Equal,
                };
                let ordering = match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };
                ordering.then_with(|| a.id.cmp(&b.id))
            });
        }

        let iter = docs.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// Total order over JSON scalars: null < bool < number < string < other
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn class(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => class(a).cmp(&class(b)),
    }
}
