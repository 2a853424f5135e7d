//! In-memory sources for tests and for embedding already-loaded data

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rowflow_core::source::build_class_index;
use rowflow_core::{ClassIndex, DataType, DatasetNode, Row, SampleReader, SamplerSpec, Schema, SourceProvider, Tensor};

use crate::error::{Error, Result};

type GenerateFn = dyn Fn(usize) -> rowflow_core::Result<Row> + Send + Sync;

enum Samples {
    Rows(Vec<Row>),
    Generated { count: usize, func: Arc<GenerateFn> },
}

/// Reader over rows held in memory or produced by a closure
pub struct MemoryReader {
    schema: Schema,
    samples: Samples,
    classes: Option<ClassIndex>,
}

impl SampleReader for MemoryReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_samples(&self) -> usize {
        match &self.samples {
            Samples::Rows(rows) => rows.len(),
            Samples::Generated { count, .. } => *count,
        }
    }

    fn class_index(&self) -> Option<&ClassIndex> {
        self.classes.as_ref()
    }

    fn read_sample(&self, index: usize) -> rowflow_core::Result<Row> {
        match &self.samples {
            Samples::Rows(rows) => rows
                .get(index)
                .cloned()
                .ok_or_else(|| rowflow_core::Error::Pipeline(format!("memory index {index} out of range"))),
            Samples::Generated { func, .. } => func(index),
        }
    }
}

/// Read a scalar integer label
fn scalar_label(tensor: &Tensor) -> rowflow_core::Result<i64> {
    let values: Vec<i64> = match tensor.data_type() {
        DataType::Int8 => tensor.to_vec::<i8>()?.into_iter().map(i64::from).collect(),
        DataType::Int16 => tensor.to_vec::<i16>()?.into_iter().map(i64::from).collect(),
        DataType::Int32 => tensor.to_vec::<i32>()?.into_iter().map(i64::from).collect(),
        DataType::Int64 => tensor.to_vec::<i64>()?,
        DataType::UInt8 => tensor.to_vec::<u8>()?.into_iter().map(i64::from).collect(),
        DataType::UInt16 => tensor.to_vec::<u16>()?.into_iter().map(i64::from).collect(),
        DataType::UInt32 => tensor.to_vec::<u32>()?.into_iter().map(i64::from).collect(),
        other => {
            return Err(rowflow_core::Error::Schema(format!("label column must be an integer, got {other}")));
        }
    };
    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err(rowflow_core::Error::Schema(format!(
            "label column must be a scalar, got shape {:?}",
            tensor.shape()
        ))),
    }
}

/// Provider handing out a shared [`MemoryReader`]
pub struct MemoryProvider {
    name: String,
    location: PathBuf,
    reader: Arc<MemoryReader>,
}

impl MemoryProvider {
    /// Provider over materialized rows, each matching `schema` by column name
    pub fn from_rows(name: &str, schema: Schema, rows: Vec<Row>) -> Result<Self> {
        let expected = schema.name_set();
        for (i, row) in rows.iter().enumerate() {
            let names: BTreeSet<&str> = row.column_names().into_iter().collect();
            if expected != names {
                return Err(Error::Core(rowflow_core::Error::Schema(format!(
                    "row {i} has columns {:?}, schema has {:?}",
                    row.column_names(),
                    schema.column_names()
                ))));
            }
        }
        Ok(Self::new(name, schema, Samples::Rows(rows)))
    }

    /// Provider producing `count` rows on demand
    pub fn generator<F>(name: &str, schema: Schema, count: usize, func: F) -> Self
    where
        F: Fn(usize) -> rowflow_core::Result<Row> + Send + Sync + 'static,
    {
        Self::new(
            name,
            schema,
            Samples::Generated {
                count,
                func: Arc::new(func),
            },
        )
    }

    fn new(name: &str, schema: Schema, samples: Samples) -> Self {
        Self {
            name: name.to_string(),
            location: PathBuf::from(format!("memory://{name}")),
            reader: Arc::new(MemoryReader {
                schema,
                samples,
                classes: None,
            }),
        }
    }

    /// Group samples by the integer scalar in `column`, enabling PK sampling
    pub fn with_label_column(self, column: &str) -> Result<Self> {
        if !self.reader.schema.contains(column) {
            return Err(Error::InvalidArgument(format!("label column '{column}' is not in the schema")));
        }
        let mut labels = Vec::with_capacity(self.reader.num_samples());
        for index in 0..self.reader.num_samples() {
            let row = self.reader.read_sample(index)?;
            let tensor = row
                .get(column)
                .ok_or_else(|| Error::InvalidArgument(format!("row {index} has no column '{column}'")))?;
            labels.push(scalar_label(tensor)?);
        }

        let reader = Arc::try_unwrap(self.reader)
            .map_err(|_| Error::InvalidArgument("memory reader already shared".into()))?;
        Ok(Self {
            reader: Arc::new(MemoryReader {
                classes: Some(build_class_index(labels)),
                ..reader
            }),
            ..self
        })
    }

    /// Wrap into a source node
    pub fn into_node(self, sampler: SamplerSpec) -> DatasetNode {
        DatasetNode::source(Arc::new(self), sampler)
    }
}

impl fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("name", &self.name)
            .field("samples", &self.reader.num_samples())
            .field("labelled", &self.reader.classes.is_some())
            .finish()
    }
}

impl SourceProvider for MemoryProvider {
    fn kind(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &Path {
        &self.location
    }

    fn open(&self) -> rowflow_core::Result<Arc<dyn SampleReader>> {
        Ok(self.reader.clone())
    }
}

/// Source over materialized rows, read in order
pub fn from_rows(name: &str, schema: Schema, rows: Vec<Row>) -> Result<DatasetNode> {
    Ok(MemoryProvider::from_rows(name, schema, rows)?.into_node(SamplerSpec::Sequential {
        start: 0,
        num_samples: 0,
    }))
}

/// Source producing `count` rows from `func`, read in order
pub fn generator<F>(name: &str, schema: Schema, count: usize, func: F) -> DatasetNode
where
    F: Fn(usize) -> rowflow_core::Result<Row> + Send + Sync + 'static,
{
    MemoryProvider::generator(name, schema, count, func).into_node(SamplerSpec::Sequential {
        start: 0,
        num_samples: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("x", DataType::Int32, vec![]),
            Field::new("label", DataType::UInt8, vec![]),
        ])
        .unwrap()
    }

    fn row(x: i32, label: u8) -> Row {
        Row::from_columns([("x", Tensor::scalar(x)), ("label", Tensor::scalar(label))]).unwrap()
    }

    #[test]
    fn rows_must_match_schema() {
        let bad = Row::from_columns([("y", Tensor::scalar(1i32))]).unwrap();
        assert!(MemoryProvider::from_rows("m", schema(), vec![row(0, 0), bad]).is_err());
        assert!(from_rows("m", schema(), vec![row(0, 0)]).is_ok());
    }

    #[test]
    fn label_column_builds_class_index() {
        let provider = MemoryProvider::from_rows("m", schema(), vec![row(0, 1), row(1, 0), row(2, 1)])
            .unwrap()
            .with_label_column("label")
            .unwrap();
        let reader = provider.open().unwrap();
        let classes = reader.class_index().unwrap();
        assert_eq!(classes[&1], vec![0, 2]);
        assert_eq!(classes[&0], vec![1]);

        let provider = MemoryProvider::from_rows("m", schema(), vec![row(0, 1)]).unwrap();
        assert!(provider.with_label_column("nope").is_err());
    }

    #[test]
    fn generator_calls_closure_per_read() {
        let provider = MemoryProvider::generator("gen", schema(), 3, |i| Ok(row(i32::try_from(i).unwrap(), 0)));
        let reader = provider.open().unwrap();
        assert_eq!(reader.num_samples(), 3);
        assert_eq!(reader.read_sample(2).unwrap()["x"].to_vec::<i32>().unwrap(), vec![2]);
    }
}
