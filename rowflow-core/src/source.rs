//! Reader traits at the boundary between the pipeline and storage layouts

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::row::Row;
use crate::schema::Schema;

/// Class label → sorted sample indices, used by the PK sampler
pub type ClassIndex = BTreeMap<i64, Vec<usize>>;

/// Random access to the raw samples of one opened source
pub trait SampleReader: Send + Sync {
    /// Columns produced by `read_sample`
    fn schema(&self) -> &Schema;

    /// Number of samples (the cardinality given to samplers)
    fn num_samples(&self) -> usize;

    /// Samples grouped by class, if the source is labelled
    fn class_index(&self) -> Option<&ClassIndex> {
        None
    }

    /// Read one sample
    fn read_sample(&self, index: usize) -> Result<Row>;
}

impl fmt::Debug for dyn SampleReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SampleReader({} samples, {})", self.num_samples(), self.schema())
    }
}

/// Describes a source location and opens a reader for it
///
/// Opening is deferred to tree validation so an unreadable source fails
/// iterator creation rather than node construction.
pub trait SourceProvider: Send + Sync + fmt::Debug {
    /// Storage layout name, e.g. `ImageFolder`
    fn kind(&self) -> &str;

    /// Location of the data
    fn location(&self) -> &Path;

    /// Scan the location and return a reader
    fn open(&self) -> Result<Arc<dyn SampleReader>>;
}

/// Group sample indices by label
pub fn build_class_index(labels: impl IntoIterator<Item = i64>) -> ClassIndex {
    let mut index = ClassIndex::new();
    for (i, label) in labels.into_iter().enumerate() {
        index.entry(label).or_default().push(i);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_groups_sorted() {
        let index = build_class_index([1, 0, 1, 2, 0]);
        assert_eq!(index[&0], vec![1, 4]);
        assert_eq!(index[&1], vec![0, 2]);
        assert_eq!(index[&2], vec![3]);
    }
}
