//! CelebA source: face images with 40 binary attributes
//!
//! The directory holds `list_attr_celeba.txt` (sample count, attribute
//! names, then one `file v1 .. v40` line per image with values in
//! `{-1, 1}`), the image files themselves and, optionally,
//! `list_eval_partition.txt` assigning each file to train (0), valid (1)
//! or test (2).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use rowflow_core::{DataType, DatasetNode, Field, Row, SampleReader, SamplerSpec, Schema, SourceProvider, Tensor};

use crate::common::{existing_dir, file_tensor, has_extension, normalize_extensions};
use crate::error::{Error, Result};

const ATTR_FILE: &str = "list_attr_celeba.txt";
const PARTITION_FILE: &str = "list_eval_partition.txt";

/// Subset of CelebA to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CelebaUsage {
    /// Partition 0
    Train,
    /// Partition 1
    Valid,
    /// Partition 2
    Test,
    /// Every image
    All,
}

impl CelebaUsage {
    fn partition(self) -> Option<u8> {
        match self {
            CelebaUsage::Train => Some(0),
            CelebaUsage::Valid => Some(1),
            CelebaUsage::Test => Some(2),
            CelebaUsage::All => None,
        }
    }
}

impl FromStr for CelebaUsage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(CelebaUsage::Train),
            "valid" => Ok(CelebaUsage::Valid),
            "test" => Ok(CelebaUsage::Test),
            "all" => Ok(CelebaUsage::All),
            other => Err(Error::InvalidArgument(format!(
                "celeba usage must be one of train, valid, test, all; got '{other}'"
            ))),
        }
    }
}

/// Provider for a CelebA directory
#[derive(Debug)]
pub struct CelebaProvider {
    dir: PathBuf,
    usage: CelebaUsage,
    extensions: Vec<String>,
}

impl CelebaProvider {
    /// Create a provider for `dir`
    pub fn new(dir: impl AsRef<Path>, usage: CelebaUsage, extensions: &[String]) -> Result<Self> {
        Ok(Self {
            dir: existing_dir(dir.as_ref())?,
            usage,
            extensions: normalize_extensions(extensions),
        })
    }

    fn partitions(&self) -> Result<Option<HashSet<String>>> {
        let Some(wanted) = self.usage.partition() else {
            return Ok(None);
        };
        let path = self.dir.join(PARTITION_FILE);
        if !path.is_file() {
            return Err(Error::format(
                &path,
                format!("usage {:?} needs the partition file", self.usage),
            ));
        }

        let mut partitions = HashSet::new();
        for (line_no, line) in fs::read_to_string(&path)?.lines().enumerate() {
            let mut parts = line.split_whitespace();
            let (Some(file), Some(part)) = (parts.next(), parts.next()) else {
                continue;
            };
            let part: u8 = part
                .parse()
                .map_err(|_| Error::format(&path, format!("line {}: bad partition '{part}'", line_no + 1)))?;
            if part == wanted {
                partitions.insert(file.to_string());
            }
        }
        Ok(Some(partitions))
    }

    fn load(&self) -> Result<CelebaReader> {
        let path = self.dir.join(ATTR_FILE);
        let content = fs::read_to_string(&path)?;
        let mut lines = content.lines();

        // first line is the sample count, second the attribute names
        lines.next();
        let names: Vec<&str> = lines
            .next()
            .ok_or_else(|| Error::format(&path, "missing attribute name line"))?
            .split_whitespace()
            .collect();

        let partitions = self.partitions()?;
        let mut samples = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let mut parts = line.split_whitespace();
            let Some(file) = parts.next() else {
                continue;
            };
            if !has_extension(Path::new(file), &self.extensions) {
                continue;
            }
            if partitions.as_ref().is_some_and(|p| !p.contains(file)) {
                continue;
            }
            let attrs = parts
                .map(|v| match v {
                    "1" => Ok(1u32),
                    "-1" | "0" => Ok(0u32),
                    other => Err(Error::format(&path, format!("line {}: bad attribute '{other}'", line_no + 3))),
                })
                .collect::<Result<Vec<u32>>>()?;
            if attrs.len() != names.len() {
                return Err(Error::format(
                    &path,
                    format!("line {}: {} attributes, expected {}", line_no + 3, attrs.len(), names.len()),
                ));
            }
            samples.push((self.dir.join(file), attrs));
        }
        debug!("Loaded {} CelebA samples ({:?}) from {}", samples.len(), self.usage, self.dir.display());

        Ok(CelebaReader {
            schema: Schema::new(vec![
                Field::variable("image", DataType::UInt8),
                Field::new("attr", DataType::UInt32, vec![names.len()]),
            ])?,
            samples,
        })
    }
}

impl SourceProvider for CelebaProvider {
    fn kind(&self) -> &str {
        "CelebA"
    }

    fn location(&self) -> &Path {
        &self.dir
    }

    fn open(&self) -> rowflow_core::Result<Arc<dyn SampleReader>> {
        Ok(Arc::new(self.load()?))
    }
}

/// Reader over the parsed attribute list
pub struct CelebaReader {
    samples: Vec<(PathBuf, Vec<u32>)>,
    schema: Schema,
}

impl SampleReader for CelebaReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn read_sample(&self, index: usize) -> rowflow_core::Result<Row> {
        let (path, attrs) = self
            .samples
            .get(index)
            .ok_or_else(|| rowflow_core::Error::Pipeline(format!("celeba index {index} out of range")))?;
        Row::from_columns([("image", file_tensor(path)?), ("attr", Tensor::vector(attrs))])
    }
}

/// CelebA source
///
/// `usage` is one of `train`, `valid`, `test` or `all`; `sampler`
/// defaults to sequential order. An empty `extensions` list accepts every
/// file named in the attribute list.
pub fn celeba(
    dir: impl AsRef<Path>,
    usage: &str,
    sampler: Option<SamplerSpec>,
    extensions: &[String],
) -> Result<DatasetNode> {
    let usage: CelebaUsage = usage.parse()?;
    let provider = CelebaProvider::new(dir, usage, extensions)?;
    let sampler = sampler.unwrap_or(SamplerSpec::Sequential {
        start: 0,
        num_samples: 0,
    });
    Ok(DatasetNode::source(Arc::new(provider), sampler))
}
