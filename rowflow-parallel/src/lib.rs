//! Concurrent execution engine for rowflow pipelines
//!
//! A validated [`Plan`](rowflow_core::Plan) is compiled into a tree of
//! operators, each running on its own named threads and connected by
//! bounded queues. A [`DatasetIterator`] owns one such tree and pulls the
//! finished rows from its root.
//!
//! Ordering: source and map fan-out reproduce single-threaded row order
//! unless [`ExecutionConfig::preserve_order`](rowflow_core::ExecutionConfig)
//! is turned off. Shuffle is the only operator that reorders on purpose.

#![warn(missing_docs)]

pub mod cancel;
pub mod iterator;
pub mod queue;

mod operators;
mod tree;

// Re-export key types for convenience
pub use cancel::CancellationToken;
pub use iterator::{create_iterator, CreateIterator, DatasetIterator, IteratorState};
pub use queue::{Consumer, Message, Producer, Push};
