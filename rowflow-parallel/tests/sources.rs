mod common;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rowflow_core::{
    ClassIndex, DatasetNode, ExecutionConfig, Result, Row, SampleReader, SamplerSpec, Schema, SourceProvider, TAKE_ALL,
};
use rowflow_parallel::CreateIterator;
use rowflow_readers::{cifar10, image_folder, mnist, ImageFolderOptions, ImageFolderProvider};

use common::{collect, init_tracing};

fn image_tree(dir: &Path, classes: &[(&str, usize)]) {
    for (class, count) in classes {
        fs::create_dir(dir.join(class)).unwrap();
        for i in 0..*count {
            fs::write(dir.join(class).join(format!("{i}.jpg")), vec![u8::try_from(i).unwrap(); i + 1]).unwrap();
        }
    }
}

/// Image folder provider that counts the samples its readers load
#[derive(Debug)]
struct CountingProvider {
    inner: ImageFolderProvider,
    reads: Arc<AtomicUsize>,
}

struct CountingReader {
    inner: Arc<dyn SampleReader>,
    reads: Arc<AtomicUsize>,
}

impl SourceProvider for CountingProvider {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn location(&self) -> &Path {
        self.inner.location()
    }

    fn open(&self) -> Result<Arc<dyn SampleReader>> {
        Ok(Arc::new(CountingReader {
            inner: self.inner.open()?,
            reads: Arc::clone(&self.reads),
        }))
    }
}

impl SampleReader for CountingReader {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn num_samples(&self) -> usize {
        self.inner.num_samples()
    }

    fn class_index(&self) -> Option<&ClassIndex> {
        self.inner.class_index()
    }

    fn read_sample(&self, index: usize) -> Result<Row> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_sample(index)
    }
}

#[test]
fn image_folder_take_five() {
    let dir = tempfile::tempdir().unwrap();
    image_tree(dir.path(), &[("apple", 30), ("pear", 14)]);

    let reads = Arc::new(AtomicUsize::new(0));
    let provider = CountingProvider {
        inner: ImageFolderProvider::new(dir.path(), ImageFolderOptions::default()).unwrap(),
        reads: Arc::clone(&reads),
    };
    let node = DatasetNode::source(Arc::new(provider), SamplerSpec::sequential(0, 0).unwrap())
        .take(5)
        .unwrap();

    let config = ExecutionConfig::default().with_workers(2).with_queue_capacity(1);
    let rows = collect(&node, config).unwrap();
    assert_eq!(rows.len(), 5);
    for row in &rows {
        assert_eq!(row.column_names(), vec!["image", "label"]);
    }
    // Workers stop once take is satisfied instead of reading all 44 images
    assert!(reads.load(Ordering::SeqCst) < 44);
}

#[test]
fn image_folder_random_seven_reads_seven() {
    let dir = tempfile::tempdir().unwrap();
    image_tree(dir.path(), &[("a", 4), ("b", 6)]);
    let node = image_folder(
        dir.path(),
        ImageFolderOptions::default(),
        Some(SamplerSpec::random(false, 7).unwrap()),
    )
    .unwrap()
    .take(TAKE_ALL)
    .unwrap();
    assert_eq!(collect(&node, ExecutionConfig::default()).unwrap().len(), 7);
}

#[test]
fn image_folder_batches_labels_only() {
    let dir = tempfile::tempdir().unwrap();
    image_tree(dir.path(), &[("a", 3), ("b", 3)]);
    let node = image_folder(
        dir.path(),
        ImageFolderOptions::default(),
        Some(SamplerSpec::sequential(0, 0).unwrap()),
    )
    .unwrap()
    .project(["label"])
    .unwrap()
    .batch(6, true)
    .unwrap();

    let rows = collect(&node, ExecutionConfig::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["label"].to_vec::<i32>().unwrap(), vec![0, 0, 0, 1, 1, 1]);
}

#[test]
fn missing_image_folder_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    assert!(image_folder(dir.path().join("absent"), ImageFolderOptions::default(), None).is_err());
}

fn write_mnist(dir: &Path, labels: &[u8]) {
    let count = u32::try_from(labels.len()).unwrap();
    let mut images = Vec::new();
    images.extend(0x0803u32.to_be_bytes());
    images.extend(count.to_be_bytes());
    images.extend(28u32.to_be_bytes());
    images.extend(28u32.to_be_bytes());
    for label in labels {
        images.extend([*label; 28 * 28]);
    }
    let mut label_bytes = Vec::new();
    label_bytes.extend(0x0801u32.to_be_bytes());
    label_bytes.extend(count.to_be_bytes());
    label_bytes.extend(labels);
    fs::write(dir.join("train-images-idx3-ubyte"), images).unwrap();
    fs::write(dir.join("train-labels-idx1-ubyte"), label_bytes).unwrap();
}

#[test]
fn mnist_images_batch_with_leading_axis() {
    let dir = tempfile::tempdir().unwrap();
    write_mnist(dir.path(), &[5, 0, 4, 1, 9]);
    let node = mnist(dir.path(), Some(SamplerSpec::sequential(0, 0).unwrap()))
        .unwrap()
        .batch(2, true)
        .unwrap();

    let config = ExecutionConfig::default();
    let schema = node.output_schema(&config).unwrap();
    assert_eq!(schema.field("image").unwrap().shape(), Some(&[2, 28, 28, 1][..]));

    let rows = collect(&node, config).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["image"].shape(), &[2, 28, 28, 1]);
    assert_eq!(rows[1]["label"].to_vec::<u32>().unwrap(), vec![4, 1]);
}

#[test]
fn truncated_mnist_fails_to_build() {
    let dir = tempfile::tempdir().unwrap();
    write_mnist(dir.path(), &[1, 2]);
    let path = dir.path().join("train-images-idx3-ubyte");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    let node = mnist(dir.path(), None).unwrap();
    init_tracing();
    assert!(node.create_iterator().is_err());
}

#[test]
fn cifar10_records_become_hwc_images() {
    let dir = tempfile::tempdir().unwrap();
    let mut records = Vec::new();
    for label in [3u8, 7] {
        records.push(label);
        // Red plane 1, green plane 2, blue plane 3
        for plane in 1..=3u8 {
            records.extend(std::iter::repeat(plane).take(32 * 32));
        }
    }
    fs::write(dir.path().join("data_batch_1.bin"), records).unwrap();

    let node = cifar10(dir.path(), Some(SamplerSpec::sequential(0, 0).unwrap())).unwrap();
    let rows = collect(&node, ExecutionConfig::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["label"].to_vec::<u32>().unwrap(), vec![7]);
    let pixels = rows[0]["image"].to_vec::<u8>().unwrap();
    assert_eq!(&pixels[..6], &[1, 2, 3, 1, 2, 3]);
}
