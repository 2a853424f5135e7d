//! MNIST source over IDX files
//!
//! Every `<prefix>-images-idx3-ubyte` file in the directory is paired with
//! `<prefix>-labels-idx1-ubyte`; pairs are read in sorted prefix order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use rowflow_core::io::MemoryMappedFile;
use rowflow_core::source::build_class_index;
use rowflow_core::{
    Buffer, ClassIndex, DataType, DatasetNode, Field, Row, SampleReader, SamplerSpec, Schema, SourceProvider, Tensor,
};

use crate::common::{default_sampler, existing_dir, locate, sorted_entries};
use crate::error::{Error, Result};

const IMAGES_SUFFIX: &str = "-images-idx3-ubyte";
const LABELS_SUFFIX: &str = "-labels-idx1-ubyte";
const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;
const IMAGES_HEADER: usize = 16;
const LABELS_HEADER: usize = 8;

fn read_u32_be(file: &MemoryMappedFile, offset: usize) -> Result<u32> {
    let bytes = file.slice(offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn header_usize(file: &MemoryMappedFile, offset: usize) -> Result<usize> {
    let value = read_u32_be(file, offset)?;
    usize::try_from(value).map_err(|_| Error::format(file.path(), "header value does not fit in memory"))
}

struct IdxPair {
    images: MemoryMappedFile,
    labels: MemoryMappedFile,
}

/// Provider for an MNIST directory
#[derive(Debug)]
pub struct MnistProvider {
    dir: PathBuf,
}

impl MnistProvider {
    /// Create a provider for `dir`
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            dir: existing_dir(dir.as_ref())?,
        })
    }

    fn load(&self) -> Result<MnistReader> {
        let image_files = sorted_entries(&self.dir, |p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(IMAGES_SUFFIX))
        })?;
        if image_files.is_empty() {
            return Err(Error::format(&self.dir, format!("no '*{IMAGES_SUFFIX}' files")));
        }

        let mut pairs = Vec::with_capacity(image_files.len());
        let mut ends = Vec::with_capacity(image_files.len());
        let mut dims: Option<(usize, usize)> = None;
        let mut total = 0;
        for image_path in image_files {
            let name = image_path.to_string_lossy();
            let labels_path = PathBuf::from(format!("{}{LABELS_SUFFIX}", &name[..name.len() - IMAGES_SUFFIX.len()]));
            let images = MemoryMappedFile::open(&image_path)?;
            let labels = MemoryMappedFile::open(&labels_path)?;

            if read_u32_be(&images, 0)? != IMAGES_MAGIC {
                return Err(Error::format(&image_path, "bad magic number"));
            }
            if read_u32_be(&labels, 0)? != LABELS_MAGIC {
                return Err(Error::format(&labels_path, "bad magic number"));
            }
            let count = header_usize(&images, 4)?;
            if header_usize(&labels, 4)? != count {
                return Err(Error::format(&labels_path, "label count differs from image count"));
            }
            let shape = (header_usize(&images, 8)?, header_usize(&images, 12)?);
            match dims {
                Some(d) if d != shape => {
                    return Err(Error::format(&image_path, format!("image size {shape:?} differs from {d:?}")));
                }
                _ => dims = Some(shape),
            }
            let images_len = count
                .checked_mul(shape.0)
                .and_then(|n| n.checked_mul(shape.1))
                .and_then(|n| n.checked_add(IMAGES_HEADER))
                .ok_or_else(|| Error::format(&image_path, "header sizes overflow"))?;
            let labels_len = count
                .checked_add(LABELS_HEADER)
                .ok_or_else(|| Error::format(&labels_path, "header sizes overflow"))?;
            if images.size() < images_len || labels.size() < labels_len {
                return Err(Error::format(&image_path, "file shorter than its header claims"));
            }

            total += count;
            ends.push(total);
            pairs.push(IdxPair { images, labels });
        }

        let (rows, cols) = dims.unwrap_or((28, 28));
        let mut labels = Vec::with_capacity(total);
        let mut start = 0;
        for (pair, end) in pairs.iter().zip(&ends) {
            labels.extend(pair.labels.slice(LABELS_HEADER, end - start)?.iter().map(|l| i64::from(*l)));
            start = *end;
        }
        debug!("Loaded {} MNIST samples from {}", total, self.dir.display());

        Ok(MnistReader {
            pairs,
            ends,
            rows,
            cols,
            classes: build_class_index(labels),
            schema: Schema::new(vec![
                Field::new("image", DataType::UInt8, vec![rows, cols, 1]),
                Field::new("label", DataType::UInt32, vec![]),
            ])?,
        })
    }
}

impl SourceProvider for MnistProvider {
    fn kind(&self) -> &str {
        "Mnist"
    }

    fn location(&self) -> &Path {
        &self.dir
    }

    fn open(&self) -> rowflow_core::Result<Arc<dyn SampleReader>> {
        Ok(Arc::new(self.load()?))
    }
}

/// Reader over memory-mapped IDX files
pub struct MnistReader {
    pairs: Vec<IdxPair>,
    ends: Vec<usize>,
    rows: usize,
    cols: usize,
    classes: ClassIndex,
    schema: Schema,
}

impl SampleReader for MnistReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_samples(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn class_index(&self) -> Option<&ClassIndex> {
        Some(&self.classes)
    }

    fn read_sample(&self, index: usize) -> rowflow_core::Result<Row> {
        let (segment, local) = locate(&self.ends, index)
            .ok_or_else(|| rowflow_core::Error::Pipeline(format!("mnist index {index} out of range")))?;
        let pair = &self.pairs[segment];
        let pixels = self.rows * self.cols;
        let image = pair.images.slice(IMAGES_HEADER + local * pixels, pixels)?;
        let label = pair.labels.slice(LABELS_HEADER + local, 1)?[0];

        Row::from_columns([
            (
                "image",
                Tensor::from_bytes(DataType::UInt8, vec![self.rows, self.cols, 1], Buffer::from_slice(image))?,
            ),
            ("label", Tensor::scalar(u32::from(label))),
        ])
    }
}

/// MNIST source; `sampler` defaults to a random permutation
pub fn mnist(dir: impl AsRef<Path>, sampler: Option<SamplerSpec>) -> Result<DatasetNode> {
    let provider = MnistProvider::new(dir)?;
    Ok(DatasetNode::source(Arc::new(provider), sampler.unwrap_or_else(default_sampler)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    /// Write an IDX pair with `count` 2x2 images whose pixels equal their label
    pub(crate) fn write_idx(dir: &Path, prefix: &str, labels: &[u8]) {
        let count = u32::try_from(labels.len()).unwrap();
        let mut images = Vec::new();
        images.extend(IMAGES_MAGIC.to_be_bytes());
        images.extend(count.to_be_bytes());
        images.extend(2u32.to_be_bytes());
        images.extend(2u32.to_be_bytes());
        for label in labels {
            images.extend([*label; 4]);
        }
        let mut label_bytes = Vec::new();
        label_bytes.extend(LABELS_MAGIC.to_be_bytes());
        label_bytes.extend(count.to_be_bytes());
        label_bytes.extend(labels);

        fs::write(dir.join(format!("{prefix}{IMAGES_SUFFIX}")), images).unwrap();
        fs::write(dir.join(format!("{prefix}{LABELS_SUFFIX}")), label_bytes).unwrap();
    }

    #[test]
    fn reads_pairs_in_prefix_order() {
        let dir = tempfile::tempdir().unwrap();
        write_idx(dir.path(), "train", &[3, 1, 4]);
        write_idx(dir.path(), "t10k", &[9, 2]);

        let reader = MnistProvider::new(dir.path()).unwrap().open().unwrap();
        assert_eq!(reader.num_samples(), 5);
        assert_eq!(reader.schema().field("image").unwrap().shape(), Some(&[2, 2, 1][..]));

        // "t10k" sorts before "train"
        let row = reader.read_sample(1).unwrap();
        assert_eq!(row["label"].to_vec::<u32>().unwrap(), vec![2]);
        assert_eq!(row["image"].to_vec::<u8>().unwrap(), vec![2; 4]);
        let row = reader.read_sample(4).unwrap();
        assert_eq!(row["label"].to_vec::<u32>().unwrap(), vec![4]);
        assert!(reader.read_sample(5).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(format!("x{IMAGES_SUFFIX}")), [0u8; 16]).unwrap();
        fs::write(dir.path().join(format!("x{LABELS_SUFFIX}")), [0u8; 8]).unwrap();
        assert!(MnistProvider::new(dir.path()).unwrap().open().is_err());
    }

    #[test]
    fn oversized_header_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let mut images = Vec::new();
        images.extend(IMAGES_MAGIC.to_be_bytes());
        for _ in 0..3 {
            images.extend(u32::MAX.to_be_bytes());
        }
        let mut labels = Vec::new();
        labels.extend(LABELS_MAGIC.to_be_bytes());
        labels.extend(u32::MAX.to_be_bytes());
        fs::write(dir.path().join(format!("x{IMAGES_SUFFIX}")), images).unwrap();
        fs::write(dir.path().join(format!("x{LABELS_SUFFIX}")), labels).unwrap();

        let err = MnistProvider::new(dir.path()).unwrap().open().unwrap_err();
        assert!(matches!(err, rowflow_core::Error::Malformed { .. }));
    }

    #[test]
    fn empty_location_fails_construction() {
        assert!(mnist("", None).is_err());
    }
}
