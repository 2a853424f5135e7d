//! Row: the unit of data flowing through a pipeline

use indexmap::IndexMap;
use static_assertions::assert_impl_all;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Ordered mapping from unique column name to tensor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: IndexMap<String, Tensor>,
}

assert_impl_all!(Row: Send, Sync);

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from (name, tensor) pairs, rejecting duplicate names
    pub fn from_columns<S: Into<String>>(columns: impl IntoIterator<Item = (S, Tensor)>) -> Result<Self> {
        let mut row = Self::new();
        for (name, tensor) in columns {
            let name = name.into();
            if row.columns.contains_key(&name) {
                return Err(Error::Schema(format!("duplicate column '{name}' in row")));
            }
            row.columns.insert(name, tensor);
        }
        Ok(row)
    }

    /// Get a column by name
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.columns.get(name)
    }

    /// Insert or replace a column, keeping its position if it existed
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.columns.insert(name.into(), tensor)
    }

    /// Remove a column, preserving the order of the others
    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.columns.shift_remove(name)
    }

    /// Check if a column exists
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// Iterate over (name, tensor) pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Total bytes held by the row's tensors
    pub fn size_bytes(&self) -> usize {
        self.columns.values().map(Tensor::size_bytes).sum()
    }

    /// Keep only `names`, in that order
    pub fn project(mut self, names: &[String]) -> Result<Self> {
        let mut columns = IndexMap::with_capacity(names.len());
        for name in names {
            let tensor = self
                .columns
                .swap_remove(name)
                .ok_or_else(|| Error::Schema(format!("project: column '{name}' missing from row")))?;
            columns.insert(name.clone(), tensor);
        }
        Ok(Self { columns })
    }

    /// Rename columns per a from→to mapping, keeping positions
    pub fn rename(self, from: &[String], to: &[String]) -> Result<Self> {
        let mut columns = IndexMap::with_capacity(self.columns.len());
        for (name, tensor) in self.columns {
            let new_name = match from.iter().position(|f| *f == name) {
                Some(i) => to[i].clone(),
                None => name,
            };
            if columns.contains_key(&new_name) {
                return Err(Error::Schema(format!("rename: column '{new_name}' would appear twice")));
            }
            columns.insert(new_name, tensor);
        }
        Ok(Self { columns })
    }

    /// Append all columns of `other`, failing on a shared name
    pub fn merge(&mut self, other: Row) -> Result<()> {
        for (name, tensor) in other.columns {
            if self.columns.contains_key(&name) {
                return Err(Error::Schema(format!("zip: column '{name}' exists in more than one input")));
            }
            self.columns.insert(name, tensor);
        }
        Ok(())
    }
}

impl IntoIterator for Row {
    type Item = (String, Tensor);
    type IntoIter = indexmap::map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl std::ops::Index<&str> for Row {
    type Output = Tensor;

    fn index(&self, name: &str) -> &Tensor {
        &self.columns[name]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::from_columns([
            ("image", Tensor::vector(&[1u8, 2, 3])),
            ("label", Tensor::scalar(4i32)),
        ])
        .unwrap()
    }

    #[test]
    fn from_columns_rejects_duplicates() {
        let dup = Row::from_columns([("a", Tensor::scalar(1i32)), ("a", Tensor::scalar(2i32))]);
        assert!(dup.is_err());
    }

    #[test]
    fn project_selects_and_reorders() {
        let projected = row().project(&["label".into(), "image".into()]).unwrap();
        assert_eq!(projected.column_names(), vec!["label", "image"]);
        assert!(row().project(&["nope".into()]).is_err());
    }

    #[test]
    fn rename_exposes_only_new_keys() {
        let renamed = row()
            .rename(&["image".into(), "label".into()], &["col1".into(), "col2".into()])
            .unwrap();
        assert!(renamed.contains("col1") && renamed.contains("col2"));
        assert!(!renamed.contains("image") && !renamed.contains("label"));
    }

    #[test]
    fn merge_rejects_overlap() {
        let mut a = row();
        assert!(a.merge(row()).is_err());
        let mut b = row();
        let other = Row::from_columns([("extra", Tensor::scalar(1u32))]).unwrap();
        b.merge(other).unwrap();
        assert_eq!(b.column_names(), vec!["image", "label", "extra"]);
    }

    #[test]
    fn remove_preserves_order() {
        let mut r = row();
        r.insert("z", Tensor::scalar(0u8));
        r.remove("label");
        assert_eq!(r.column_names(), vec!["image", "z"]);
        assert_eq!(r.size_bytes(), 4);
    }
}
