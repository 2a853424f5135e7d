//! Raw-sample readers and source factories for rowflow pipelines
//!
//! Each storage layout provides a [`SourceProvider`](rowflow_core::SourceProvider)
//! and a factory function returning a source [`DatasetNode`](rowflow_core::DatasetNode).
//! Factories fail when the location does not exist; the layout itself is
//! scanned when the pipeline is validated.

#![warn(missing_docs)]

mod common;
mod error;

pub mod celeba;
pub mod cifar;
pub mod image_folder;
pub mod memory;
pub mod mnist;

pub use celeba::{celeba, CelebaProvider, CelebaUsage};
pub use cifar::{cifar10, cifar100, CifarKind, CifarProvider};
pub use common::default_sampler;
pub use error::{Error, Result};
pub use image_folder::{image_folder, ImageFolderOptions, ImageFolderProvider};
pub use memory::{from_rows, generator, MemoryProvider, MemoryReader};
pub use mnist::{mnist, MnistProvider};
