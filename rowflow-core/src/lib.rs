//! Core data structures and the dataset node tree for rowflow pipelines
//!
//! This crate defines tensors, rows and schemas, the samplers that pick
//! which raw samples a source reads, and the declarative [`DatasetNode`]
//! tree. Validation resolves a tree into an immutable [`Plan`] that the
//! execution engine in `rowflow-parallel` compiles into running operators.

#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod dataset;
pub mod error;
pub mod io;
pub mod memory;
pub mod row;
pub mod sampler;
pub mod schema;
pub mod source;
pub mod tensor;
pub mod transform;
pub mod validate;

// Re-export key types for convenience
pub use buffer::Buffer;
pub use config::ExecutionConfig;
pub use dataset::{concat, zip, DatasetNode, MapSpec, NodeVisitor, REPEAT_FOREVER, TAKE_ALL};
pub use error::{Error, ErrorKind, Result};
pub use row::Row;
pub use sampler::{BuiltSampler, SamplerSpec};
pub use schema::{DataType, Field, Schema};
pub use source::{ClassIndex, SampleReader, SourceProvider};
pub use tensor::{Element, Quantization, Tensor};
pub use transform::{FnOp, TensorOp};
pub use validate::{validate, MapPlan, Plan, PlanKind};

/// Memory budget and accounting functionality
pub mod budget {
    pub use crate::memory::MemoryBudget;
    pub use crate::memory::MemoryStats;
}
