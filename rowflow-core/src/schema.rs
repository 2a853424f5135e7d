//! Schema definition for pipeline rows

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean stored as one byte per value
    Bool,

    /// 8-bit signed integer
    Int8,

    /// 16-bit signed integer
    Int16,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 8-bit unsigned integer
    UInt8,

    /// 16-bit unsigned integer
    UInt16,

    /// 32-bit unsigned integer
    UInt32,

    /// 64-bit unsigned integer
    UInt64,

    /// 16-bit floating point, stored as raw bits
    Float16,

    /// 32-bit floating point
    Float32,

    /// 64-bit floating point
    Float64,
}

impl DataType {
    /// Get the size of one element in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    /// Check if this type is a floating point type
    pub fn is_floating(self) -> bool {
        matches!(self, DataType::Float16 | DataType::Float32 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// A named, typed column slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    name: String,
    data_type: DataType,
    /// `None` when the shape varies from row to row
    shape: Option<Vec<usize>>,
}

impl Field {
    /// Create a new field with a fixed shape
    pub fn new(name: &str, data_type: DataType, shape: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            shape: Some(shape),
        }
    }

    /// Create a new field whose shape varies per row
    pub fn variable(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            shape: None,
        }
    }

    /// Get the name of this field
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the element type of this field
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Get the shape of this field, if fixed
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    /// Return a copy of this field under a different name
    #[must_use]
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Return a copy of this field with a different shape
    #[must_use]
    pub fn with_shape(&self, shape: Option<Vec<usize>>) -> Self {
        Self {
            shape,
            ..self.clone()
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "{}: {}{:?}", self.name, self.data_type, shape),
            None => write!(f, "{}: {}[*]", self.name, self.data_type),
        }
    }
}

/// Ordered mapping from column name to field
///
/// Insertion order is kept for display; identity is by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: IndexMap<String, Field>,
}

impl Schema {
    /// Create a new schema, rejecting duplicate column names
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut map = IndexMap::with_capacity(fields.len());
        for field in fields {
            let name = field.name().to_string();
            if map.insert(name.clone(), field).is_some() {
                return Err(Error::Schema(format!("duplicate column '{name}'")));
            }
        }
        Ok(Self { fields: map })
    }

    /// Get the fields in order
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Get a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Check if a column exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Get the column names in order
    pub fn column_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Get the column names as a set
    pub fn name_set(&self) -> BTreeSet<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Get the number of columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get the first column, which is the default map input
    pub fn first(&self) -> Option<&Field> {
        self.fields.first().map(|(_, field)| field)
    }

    /// Select and reorder a subset of columns
    pub fn project(&self, names: &[String]) -> Result<Self> {
        let mut fields = IndexMap::with_capacity(names.len());
        for name in names {
            let field = self.fields.get(name).ok_or_else(|| {
                Error::Schema(format!(
                    "project: column '{name}' does not exist, available columns are {:?}",
                    self.column_names()
                ))
            })?;
            fields.insert(name.clone(), field.clone());
        }
        Ok(Self { fields })
    }

    /// Rename columns per a from→to mapping, keeping positions
    pub fn rename(&self, from: &[String], to: &[String]) -> Result<Self> {
        for name in from {
            if !self.contains(name) {
                return Err(Error::Schema(format!(
                    "rename: column '{name}' does not exist, available columns are {:?}",
                    self.column_names()
                )));
            }
        }
        let mut fields = IndexMap::with_capacity(self.fields.len());
        for (name, field) in &self.fields {
            let new_name = from
                .iter()
                .position(|f| f == name)
                .map_or(name.as_str(), |i| to[i].as_str());
            if fields.insert(new_name.to_string(), field.renamed(new_name)).is_some() {
                return Err(Error::Schema(format!(
                    "rename: column '{new_name}' would appear twice"
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Merge the columns of several schemas, failing on any shared name
    pub fn merge(schemas: &[Schema]) -> Result<Self> {
        let mut fields: IndexMap<String, Field> = IndexMap::new();
        for schema in schemas {
            for (name, field) in &schema.fields {
                if fields.contains_key(name) {
                    return Err(Error::Schema(format!(
                        "zip: column '{name}' exists in more than one input"
                    )));
                }
                fields.insert(name.clone(), field.clone());
            }
        }
        Ok(Self { fields })
    }

    /// Map every field through `f`, keeping names and order
    #[must_use]
    pub fn map_fields(&self, f: impl Fn(&Field) -> Field) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .map(|(name, field)| (name.clone(), f(field)))
                .collect(),
        }
    }

    /// Serialize the schema to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Config(format!("schema serialization: {e}")))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema {{ ")?;
        for (i, field) in self.fields.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_label() -> Schema {
        Schema::new(vec![
            Field::variable("image", DataType::UInt8),
            Field::new("label", DataType::Int32, vec![]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = Schema::new(vec![
            Field::new("a", DataType::Int32, vec![]),
            Field::new("a", DataType::Int64, vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn project_reorders_and_rejects_unknown() {
        let schema = image_label();
        let projected = schema.project(&["label".into(), "image".into()]).unwrap();
        assert_eq!(projected.column_names(), vec!["label", "image"]);
        assert!(schema.project(&["missing".into()]).is_err());
    }

    #[test]
    fn rename_keeps_positions() {
        let schema = image_label();
        let renamed = schema
            .rename(&["image".into(), "label".into()], &["col1".into(), "col2".into()])
            .unwrap();
        assert_eq!(renamed.column_names(), vec!["col1", "col2"]);
        assert_eq!(renamed.field("col2").unwrap().data_type(), DataType::Int32);
    }

    #[test]
    fn rename_into_existing_name_fails() {
        let schema = image_label();
        assert!(schema.rename(&["image".into()], &["label".into()]).is_err());
    }

    #[test]
    fn merge_fails_on_overlap() {
        let a = image_label();
        let b = a.rename(&["image".into()], &["col1".into()]).unwrap();
        assert!(Schema::merge(&[a.clone(), b]).is_err());
        let c = a.rename(&["image".into(), "label".into()], &["x".into(), "y".into()]).unwrap();
        assert_eq!(Schema::merge(&[a, c]).unwrap().len(), 4);
    }

    #[test]
    fn name_sets_ignore_order() {
        let a = image_label();
        let b = a.project(&["label".into(), "image".into()]).unwrap();
        assert_eq!(a.name_set(), b.name_set());
    }
}
