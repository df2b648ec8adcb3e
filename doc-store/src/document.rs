//! Documents, keys and write operations

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Commit sequence stamped on every write. `0` means "document absent".
pub type Version = u64;

/// Generate a new document id (UUID v7, time ordered)
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Address of a document: collection + id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocKey {
    /// Collection name
    pub collection: String,
    /// Document id within the collection
    pub id: String,
}

impl DocKey {
    /// Build a key
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as returned by reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id
    pub id: String,
    /// Version observed at read time
    pub version: Version,
    /// Document body (always a JSON object)
    pub data: Value,
}

impl Document {
    /// Top-level field lookup
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Decode the body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// Persisted form of a document body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    pub version: Version,
    pub data: Value,
}

/// A typed record living in a fixed collection
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the record is stored in
    const COLLECTION: &'static str;

    /// Key of the record with the given id
    fn key(id: &str) -> DocKey {
        DocKey::new(Self::COLLECTION, id)
    }
}

/// Per-field merge operation
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Overwrite the field
    Set(Value),
    /// Remove the field
    Delete,
    /// Append the values not already present in the array field
    ArrayUnion(Vec<Value>),
    /// Add to a numeric field (missing counts as 0)
    Increment(f64),
}

/// Ordered list of field operations applied by a merge update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: Vec<(String, FieldOp)>,
}

impl Patch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a plain JSON value
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push((field.to_string(), FieldOp::Set(value.into())));
        self
    }

    /// Set a field to any serializable value
    pub fn set_serialized<T: Serialize + ?Sized>(self, field: &str, value: &T) -> Result<Self> {
        Ok(self.set(field, serde_json::to_value(value)?))
    }

    /// Set the field when `Some`, delete it when `None`
    pub fn set_or_delete<T: Serialize>(self, field: &str, value: Option<&T>) -> Result<Self> {
        match value {
            Some(value) => self.set_serialized(field, value),
            None => Ok(self.delete(field)),
        }
    }

    /// Remove a field
    pub fn delete(mut self, field: &str) -> Self {
        self.fields.push((field.to_string(), FieldOp::Delete));
        self
    }

    /// Array union
    pub fn array_union(mut self, field: &str, values: Vec<Value>) -> Self {
        self.fields
            .push((field.to_string(), FieldOp::ArrayUnion(values)));
        self
    }

    /// Numeric increment
    pub fn increment(mut self, field: &str, by: f64) -> Self {
        self.fields.push((field.to_string(), FieldOp::Increment(by)));
        self
    }

    /// Whether the patch has no operations
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply every operation to a JSON object in order
    pub(crate) fn apply_to(&self, target: &mut Map<String, Value>) -> Result<()> {
        for (field, op) in &self.fields {
            match op {
                FieldOp::Set(value) => {
                    target.insert(field.clone(), value.clone());
                }
                FieldOp::Delete => {
                    target.remove(field);
                }
                FieldOp::ArrayUnion(values) => {
                    let slot = target
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if slot.is_null() {
                        *slot = Value::Array(Vec::new());
                    }
                    let array = slot.as_array_mut().ok_or_else(|| {
                        Error::InvalidDocument(format!("field '{}' is not an array", field))
                    })?;
                    for value in values {
                        if !array.contains(value) {
                            array.push(value.clone());
                        }
                    }
                }
                FieldOp::Increment(by) => {
                    let current = match target.get(field) {
                        None | Some(Value::Null) => 0.0,
                        Some(value) => value.as_f64().ok_or_else(|| {
                            Error::InvalidDocument(format!("field '{}' is not numeric", field))
                        })?,
                    };
                    target.insert(field.clone(), number(current + by));
                }
            }
        }
        Ok(())
    }
}

/// Integral results stay integers so typed records decode them as such
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// A single write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the whole document, creating it if missing
    Set {
        /// Target document
        key: DocKey,
        /// New body
        data: Value,
    },
    /// Create the document; fails with `AlreadyExists` if present
    Create {
        /// Target document
        key: DocKey,
        /// Initial body
        data: Value,
    },
    /// Merge into an existing document; fails with `NotFound` if missing
    Update {
        /// Target document
        key: DocKey,
        /// Field operations
        patch: Patch,
    },
    /// Merge, creating an empty document first if missing
    Merge {
        /// Target document
        key: DocKey,
        /// Field operations
        patch: Patch,
    },
    /// Remove the document (no-op if missing)
    Delete {
        /// Target document
        key: DocKey,
    },
}

impl WriteOp {
    /// Key the operation touches
    pub fn key(&self) -> &DocKey {
        match self {
            WriteOp::Set { key, .. }
            | WriteOp::Create { key, .. }
            | WriteOp::Update { key, .. }
            | WriteOp::Merge { key, .. }
            | WriteOp::Delete { key } => key,
        }
    }

    /// Compute the body after this write, given the body before it
    pub(crate) fn apply(&self, current: Option<Value>) -> Result<Option<Value>> {
        match self {
            WriteOp::Set { data, .. } => Ok(Some(ensure_object(data.clone())?)),
            WriteOp::Create { key, data } => match current {
                Some(_) => Err(Error::AlreadyExists(key.clone())),
                None => Ok(Some(ensure_object(data.clone())?)),
            },
            WriteOp::Update { key, patch } => {
                let mut body = current.ok_or_else(|| Error::NotFound(key.clone()))?;
                merge(&mut body, patch)?;
                Ok(Some(body))
            }
            WriteOp::Merge { patch, .. } => {
                let mut body = current.unwrap_or_else(|| Value::Object(Map::new()));
                merge(&mut body, patch)?;
                Ok(Some(body))
            }
            WriteOp::Delete { .. } => Ok(None),
        }
    }
}

fn ensure_object(data: Value) -> Result<Value> {
    if data.is_object() {
        Ok(data)
    } else {
        Err(Error::InvalidDocument("document body must be an object".to_string()))
    }
}

fn merge(body: &mut Value, patch: &Patch) -> Result<()> {
    let map = body
        .as_object_mut()
        .ok_or_else(|| Error::InvalidDocument("document body must be an object".to_string()))?;
    patch.apply_to(map)
}

/// Writes committed atomically, guarded by version preconditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSet {
    /// Each key must still be at the given version (0 = absent) at commit
    pub preconditions: Vec<(DocKey, Version)>,
    /// Writes in application order
    pub ops: Vec<WriteOp>,
}

impl WriteSet {
    /// Whether there is nothing to commit
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
