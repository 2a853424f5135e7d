//! Image folder source: one sub-directory per class
//!
//! Files are read as raw bytes; decoding is left to a map operation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use rowflow_core::source::build_class_index;
use rowflow_core::{ClassIndex, DataType, DatasetNode, Field, Row, SampleReader, SamplerSpec, Schema, SourceProvider, Tensor};

use crate::common::{default_sampler, existing_dir, file_tensor, has_extension, normalize_extensions, sorted_entries};
use crate::error::{Error, Result};

/// Options for the image folder source
#[derive(Debug, Clone, Default)]
pub struct ImageFolderOptions {
    /// Accepted file extensions, empty for all files
    pub extensions: Vec<String>,

    /// Explicit class folder → label mapping; empty assigns labels by sorted folder name
    pub class_indexing: BTreeMap<String, i32>,
}

impl ImageFolderOptions {
    /// Restrict to files with these extensions
    #[must_use]
    pub fn with_extensions<S: Into<String>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Use an explicit class mapping
    #[must_use]
    pub fn with_class_indexing(mut self, class_indexing: BTreeMap<String, i32>) -> Self {
        self.class_indexing = class_indexing;
        self
    }
}

/// Provider scanning an image folder when the tree is validated
#[derive(Debug)]
pub struct ImageFolderProvider {
    dir: PathBuf,
    extensions: Vec<String>,
    class_indexing: BTreeMap<String, i32>,
}

impl ImageFolderProvider {
    /// Create a provider for `dir`
    pub fn new(dir: impl AsRef<Path>, options: ImageFolderOptions) -> Result<Self> {
        Ok(Self {
            dir: existing_dir(dir.as_ref())?,
            extensions: normalize_extensions(&options.extensions),
            class_indexing: options.class_indexing,
        })
    }

    fn classes(&self) -> Result<Vec<(PathBuf, i32)>> {
        if self.class_indexing.is_empty() {
            let folders = sorted_entries(&self.dir, Path::is_dir)?;
            return folders
                .into_iter()
                .enumerate()
                .map(|(label, folder)| {
                    let label = i32::try_from(label)
                        .map_err(|_| Error::format(&self.dir, "too many class folders"))?;
                    Ok((folder, label))
                })
                .collect();
        }

        self.class_indexing
            .iter()
            .map(|(name, label)| {
                let folder = self.dir.join(name);
                if folder.is_dir() {
                    Ok((folder, *label))
                } else {
                    Err(Error::format(&self.dir, format!("class folder '{name}' does not exist")))
                }
            })
            .collect()
    }

    fn scan(&self) -> Result<ImageFolderReader> {
        let mut samples = Vec::new();
        for (folder, label) in self.classes()? {
            let files = sorted_entries(&folder, |p| p.is_file() && has_extension(p, &self.extensions))?;
            samples.extend(files.into_iter().map(|file| (file, label)));
        }
        debug!("Scanned {} images under {}", samples.len(), self.dir.display());

        let classes = build_class_index(samples.iter().map(|(_, label)| i64::from(*label)));
        let schema = Schema::new(vec![
            Field::variable("image", DataType::UInt8),
            Field::new("label", DataType::Int32, vec![]),
        ])?;
        Ok(ImageFolderReader {
            samples,
            classes,
            schema,
        })
    }
}

impl SourceProvider for ImageFolderProvider {
    fn kind(&self) -> &str {
        "ImageFolder"
    }

    fn location(&self) -> &Path {
        &self.dir
    }

    fn open(&self) -> rowflow_core::Result<Arc<dyn SampleReader>> {
        Ok(Arc::new(self.scan()?))
    }
}

/// Reader over a scanned image folder
pub struct ImageFolderReader {
    samples: Vec<(PathBuf, i32)>,
    classes: ClassIndex,
    schema: Schema,
}

impl SampleReader for ImageFolderReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn class_index(&self) -> Option<&ClassIndex> {
        Some(&self.classes)
    }

    fn read_sample(&self, index: usize) -> rowflow_core::Result<Row> {
        let (path, label) = self
            .samples
            .get(index)
            .ok_or_else(|| rowflow_core::Error::Pipeline(format!("image index {index} out of range")))?;
        Row::from_columns([("image", file_tensor(path)?), ("label", Tensor::scalar(*label))])
    }
}

/// Image folder source; `sampler` defaults to a random permutation
pub fn image_folder(
    dir: impl AsRef<Path>,
    options: ImageFolderOptions,
    sampler: Option<SamplerSpec>,
) -> Result<DatasetNode> {
    let provider = ImageFolderProvider::new(dir, options)?;
    Ok(DatasetNode::source(Arc::new(provider), sampler.unwrap_or_else(default_sampler)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (class, files) in [("cat", &["a.jpg", "b.jpg", "notes.txt"][..]), ("dog", &["c.JPG"][..])] {
            fs::create_dir(dir.path().join(class)).unwrap();
            for file in files {
                fs::write(dir.path().join(class).join(file), file.as_bytes()).unwrap();
            }
        }
        dir
    }

    #[test]
    fn scans_classes_in_sorted_order() {
        let dir = fixture();
        let provider =
            ImageFolderProvider::new(dir.path(), ImageFolderOptions::default().with_extensions([".jpg"])).unwrap();
        let reader = provider.open().unwrap();

        assert_eq!(reader.num_samples(), 3);
        let classes = reader.class_index().unwrap();
        assert_eq!(classes[&0], vec![0, 1]);
        assert_eq!(classes[&1], vec![2]);

        let row = reader.read_sample(2).unwrap();
        assert_eq!(row["label"].to_vec::<i32>().unwrap(), vec![1]);
        assert_eq!(row["image"].to_vec::<u8>().unwrap(), b"c.JPG".to_vec());
    }

    #[test]
    fn explicit_class_indexing() {
        let dir = fixture();
        let mapping = BTreeMap::from([("dog".to_string(), 7)]);
        let provider = ImageFolderProvider::new(dir.path(), ImageFolderOptions::default().with_class_indexing(mapping))
            .unwrap();
        let reader = provider.open().unwrap();
        assert_eq!(reader.num_samples(), 1);
        assert_eq!(reader.read_sample(0).unwrap()["label"].to_vec::<i32>().unwrap(), vec![7]);

        let mapping = BTreeMap::from([("bird".to_string(), 0)]);
        let provider = ImageFolderProvider::new(dir.path(), ImageFolderOptions::default().with_class_indexing(mapping))
            .unwrap();
        assert!(provider.open().is_err());
    }

    #[test]
    fn missing_folder_fails_construction() {
        assert!(image_folder("", ImageFolderOptions::default(), None).is_err());
        assert!(image_folder("/definitely/not/here", ImageFolderOptions::default(), None).is_err());
    }
}
