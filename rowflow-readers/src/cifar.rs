//! CIFAR-10 and CIFAR-100 binary record sources
//!
//! Records are fixed-size: label byte(s) followed by 3072 bytes of image
//! data stored channel-major (1024 red, 1024 green, 1024 blue). Images are
//! emitted height-width-channel.

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

const SIDE: usize = 32;
const CHANNELS: usize = 3;
const IMAGE_BYTES: usize = SIDE * SIDE * CHANNELS;

/// Which CIFAR variant a directory holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CifarKind {
    /// 10 classes, one label byte per record
    Cifar10,
    /// 100 classes, coarse and fine label bytes per record
    Cifar100,
}

impl CifarKind {
    fn label_bytes(self) -> usize {
        match self {
            CifarKind::Cifar10 => 1,
            CifarKind::Cifar100 => 2,
        }
    }

    fn record_bytes(self) -> usize {
        self.label_bytes() + IMAGE_BYTES
    }

    fn label_columns(self) -> &'static [&'static str] {
        match self {
            CifarKind::Cifar10 => &["label"],
            CifarKind::Cifar100 => &["coarse_label", "fine_label"],
        }
    }

    fn is_data_file(self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        match self {
            CifarKind::Cifar10 => {
                (name.starts_with("data_batch_") && name.ends_with(".bin")) || name == "test_batch.bin"
            }
            CifarKind::Cifar100 => name == "train.bin" || name == "test.bin",
        }
    }

    /// Sort key placing training files first
    fn file_order(self, path: &Path) -> (bool, PathBuf) {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        (name.starts_with("test"), path.to_path_buf())
    }
}

/// Provider for a CIFAR directory
#[derive(Debug)]
pub struct CifarProvider {
    dir: PathBuf,
    kind: CifarKind,
}

impl CifarProvider {
    /// Create a provider for `dir`
    pub fn new(dir: impl AsRef<Path>, kind: CifarKind) -> Result<Self> {
        Ok(Self {
            dir: existing_dir(dir.as_ref())?,
            kind,
        })
    }

    fn load(&self) -> Result<CifarReader> {
        let mut paths = sorted_entries(&self.dir, |p| p.is_file() && self.kind.is_data_file(p))?;
        paths.sort_by_key(|p| self.kind.file_order(p));
        if paths.is_empty() {
            return Err(Error::format(&self.dir, "no CIFAR data files"));
        }

        let record = self.kind.record_bytes();
        let mut files = Vec::with_capacity(paths.len());
        let mut ends = Vec::with_capacity(paths.len());
        let mut labels = Vec::new();
        let mut total = 0;
        for path in paths {
            let file = MemoryMappedFile::open(&path)?;
            if file.size() % record != 0 {
                return Err(Error::format(
                    &path,
                    format!("size {} is not a multiple of the {record}-byte record", file.size()),
                ));
            }
            let count = file.size() / record;
            // the last label byte is the class used for PK sampling
            let class_byte = self.kind.label_bytes() - 1;
            labels.extend(
                file.as_slice()
                    .chunks_exact(record)
                    .map(|r| i64::from(r[class_byte])),
            );
            total += count;
            ends.push(total);
            files.push(file);
        }
        debug!("Loaded {} {:?} records from {}", total, self.kind, self.dir.display());

        let mut fields = vec![Field::new("image", DataType::UInt8, vec![SIDE, SIDE, CHANNELS])];
        fields.extend(
            self.kind
                .label_columns()
                .iter()
                .map(|name| Field::new(name, DataType::UInt32, vec![])),
        );

        Ok(CifarReader {
            kind: self.kind,
            files,
            ends,
            classes: build_class_index(labels),
            schema: Schema::new(fields)?,
        })
    }
}

impl SourceProvider for CifarProvider {
    fn kind(&self) -> &str {
        match self.kind {
            CifarKind::Cifar10 => "Cifar10",
            CifarKind::Cifar100 => "Cifar100",
        }
    }

    fn location(&self) -> &Path {
        &self.dir
    }

    fn open(&self) -> rowflow_core::Result<Arc<dyn SampleReader>> {
        Ok(Arc::new(self.load()?))
    }
}

/// Reader over memory-mapped CIFAR record files
pub struct CifarReader {
    kind: CifarKind,
    files: Vec<MemoryMappedFile>,
    ends: Vec<usize>,
    classes: ClassIndex,
    schema: Schema,
}

/// Convert channel-major planes to interleaved pixels
fn chw_to_hwc(planes: &[u8]) -> Vec<u8> {
    let area = SIDE * SIDE;
    let mut hwc = Vec::with_capacity(IMAGE_BYTES);
    for pixel in 0..area {
        for channel in 0..CHANNELS {
            hwc.push(planes[channel * area + pixel]);
        }
    }
    hwc
}

impl SampleReader for CifarReader {
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
            .ok_or_else(|| rowflow_core::Error::Pipeline(format!("cifar index {index} out of range")))?;
        let record_bytes = self.kind.record_bytes();
        let record = self.files[segment].slice(local * record_bytes, record_bytes)?;
        let (labels, planes) = record.split_at(self.kind.label_bytes());

        let mut row = Row::new();
        row.insert(
            "image",
            Tensor::from_bytes(
                DataType::UInt8,
                vec![SIDE, SIDE, CHANNELS],
                Buffer::from_vec(chw_to_hwc(planes)),
            )?,
        );
        for (name, label) in self.kind.label_columns().iter().zip(labels) {
            row.insert(*name, Tensor::scalar(u32::from(*label)));
        }
        Ok(row)
    }
}

/// CIFAR-10 source; `sampler` defaults to a random permutation
pub fn cifar10(dir: impl AsRef<Path>, sampler: Option<SamplerSpec>) -> Result<DatasetNode> {
    let provider = CifarProvider::new(dir, CifarKind::Cifar10)?;
    Ok(DatasetNode::source(Arc::new(provider), sampler.unwrap_or_else(default_sampler)))
}

/// CIFAR-100 source; `sampler` defaults to a random permutation
pub fn cifar100(dir: impl AsRef<Path>, sampler: Option<SamplerSpec>) -> Result<DatasetNode> {
    let provider = CifarProvider::new(dir, CifarKind::Cifar100)?;
    Ok(DatasetNode::source(Arc::new(provider), sampler.unwrap_or_else(default_sampler)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(labels: &[u8], fill: u8) -> Vec<u8> {
        let mut bytes = labels.to_vec();
        // red plane = fill, green = fill + 1, blue = fill + 2
        for channel in 0..3u8 {
            bytes.extend(std::iter::repeat(fill + channel).take(SIDE * SIDE));
        }
        bytes
    }

    #[test]
    fn cifar10_reads_training_files_before_test() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test_batch.bin"), record(&[9], 0)).unwrap();
        fs::write(dir.path().join("data_batch_1.bin"), [record(&[1], 10), record(&[2], 20)].concat()).unwrap();
        fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

        let reader = CifarProvider::new(dir.path(), CifarKind::Cifar10).unwrap().open().unwrap();
        assert_eq!(reader.num_samples(), 3);

        let row = reader.read_sample(1).unwrap();
        assert_eq!(row["label"].to_vec::<u32>().unwrap(), vec![2]);
        let image = row["image"].to_vec::<u8>().unwrap();
        assert_eq!(&image[..6], &[20, 21, 22, 20, 21, 22]);

        assert_eq!(reader.read_sample(2).unwrap()["label"].to_vec::<u32>().unwrap(), vec![9]);
    }

    #[test]
    fn cifar100_has_coarse_and_fine_labels() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("train.bin"), record(&[4, 42], 0)).unwrap();

        let reader = CifarProvider::new(dir.path(), CifarKind::Cifar100).unwrap().open().unwrap();
        assert_eq!(
            reader.schema().column_names(),
            vec!["image", "coarse_label", "fine_label"]
        );
        let row = reader.read_sample(0).unwrap();
        assert_eq!(row["coarse_label"].to_vec::<u32>().unwrap(), vec![4]);
        assert_eq!(row["fine_label"].to_vec::<u32>().unwrap(), vec![42]);
        assert_eq!(reader.class_index().unwrap()[&42], vec![0]);
    }

    #[test]
    fn truncated_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("train.bin"), [0u8; 100]).unwrap();
        let err = CifarProvider::new(dir.path(), CifarKind::Cifar100).unwrap().open().unwrap_err();
        assert_eq!(err.kind(), rowflow_core::ErrorKind::Io);
    }

    #[test]
    fn empty_location_fails_construction() {
        assert!(cifar10("", None).is_err());
        assert!(cifar100("", None).is_err());
    }
}
