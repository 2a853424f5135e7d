//! Pull-based iterator driving a compiled execution tree

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};
use uuid::Uuid;

use rowflow_core::budget::{MemoryBudget, MemoryStats};
use rowflow_core::{validate, DatasetNode, Error, ExecutionConfig, Plan, Result, Row, Schema};

use crate::cancel::CancellationToken;
use crate::operators::{ExecContext, Subtree};
use crate::queue::{Consumer, Message};
use crate::tree::compile;

/// Lifecycle of a [`DatasetIterator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Created, no execution tree yet
    Uninitialized,
    /// Execution tree compiled and running
    Running,
    /// Stopped; final
    Stopped,
}

/// The single consumer of a compiled execution tree
///
/// Each iterator owns its own execution tree; the tree is stopped and every
/// worker joined when the iterator is stopped or dropped.
pub struct DatasetIterator {
    id: Uuid,
    state: IteratorState,
    token: CancellationToken,
    plan: Option<Arc<Plan>>,
    budget: Option<Arc<MemoryBudget>>,
    output: Option<Consumer>,
    handles: Vec<JoinHandle<()>>,
    finished: bool,
    failure: Option<String>,
}

impl DatasetIterator {
    /// Create an iterator with no execution tree
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: IteratorState::Uninitialized,
            token: CancellationToken::new(),
            plan: None,
            budget: None,
            output: None,
            handles: Vec::new(),
            finished: false,
            failure: None,
        }
    }

    /// Validate `node` and start its execution tree
    pub fn launch(&mut self, node: &DatasetNode, config: ExecutionConfig) -> Result<()> {
        if self.state != IteratorState::Uninitialized {
            return Err(Error::InvalidOperation(format!(
                "iterator {} can only be launched once",
                self.id
            )));
        }
        let plan = validate(node, &config)?;
        let ctx = Arc::new(ExecContext::new(config));
        self.token = CancellationToken::new();
        let subtree = match compile(&plan, &ctx, &self.token) {
            Ok(subtree) => subtree,
            Err(e) => {
                self.token.cancel();
                return Err(e);
            }
        };

        info!(
            "Launched execution tree {} ({} rows expected)",
            self.id,
            plan.num_rows().map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );
        self.output = Some(subtree.output);
        self.handles = subtree.handles;
        self.plan = Some(plan);
        self.budget = ctx.budget.clone();
        self.state = IteratorState::Running;
        Ok(())
    }

    /// Identifier of this iterator's execution tree, used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Columns of the rows this iterator yields, once launched
    pub fn schema(&self) -> Option<&Schema> {
        self.plan.as_ref().map(|plan| &plan.schema)
    }

    /// Memory held by buffering operators, when a ceiling is configured
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        self.budget.as_ref().map(|budget| budget.stats())
    }

    /// Block until the next row is available
    ///
    /// `Ok(None)` marks end of stream and is returned again on later calls.
    /// A failure inside the pipeline is returned once; afterwards every call
    /// returns [`Error::Terminated`].
    pub fn get_next_row(&mut self) -> Result<Option<Row>> {
        match self.state {
            IteratorState::Uninitialized => {
                return Err(Error::InvalidOperation("iterator was not launched".into()));
            }
            IteratorState::Stopped => {
                return Err(Error::InvalidOperation("iterator was stopped".into()));
            }
            IteratorState::Running => {}
        }
        if let Some(failure) = &self.failure {
            return Err(Error::Terminated(failure.clone()));
        }
        if self.finished {
            return Ok(None);
        }
        let Some(output) = &self.output else {
            return Err(Error::InvalidOperation("iterator has no execution tree".into()));
        };

        match output.pop(&self.token) {
            Some(Message::Row(row)) => Ok(Some(row)),
            Some(Message::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Some(Message::Failed(e)) => {
                error!("Execution tree {} failed: {}", self.id, e);
                self.failure = Some(e.to_string());
                self.token.cancel();
                Err(e)
            }
            None => {
                let reason = "execution tree was cancelled".to_string();
                self.failure = Some(reason.clone());
                Err(Error::Terminated(reason))
            }
        }
    }

    /// Stop every worker and wait for them to exit
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn stop(&mut self) {
        if self.state == IteratorState::Stopped {
            return;
        }
        let was_running = self.state == IteratorState::Running;
        self.state = IteratorState::Stopped;
        self.token.cancel();
        self.output = None;
        let handles = std::mem::take(&mut self.handles);
        let workers = handles.len();
        Subtree::join(handles);
        if was_running {
            info!("Stopped execution tree {} ({} workers joined)", self.id, workers);
        }
    }
}

impl Default for DatasetIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DatasetIterator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DatasetIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetIterator")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("workers", &self.handles.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Iterator for DatasetIterator {
    type Item = Result<Row>;

    /// Rows until end of stream; a failure is yielded once and ends iteration
    fn next(&mut self) -> Option<Self::Item> {
        if self.state != IteratorState::Running || self.finished || self.failure.is_some() {
            return None;
        }
        self.get_next_row().transpose()
    }
}

/// Validate `node` and start iterating it with `config`
///
/// Fails when the tree does not validate; no workers are left running in
/// that case.
pub fn create_iterator(node: &DatasetNode, config: ExecutionConfig) -> Result<DatasetIterator> {
    let mut iterator = DatasetIterator::new();
    iterator.launch(node, config)?;
    Ok(iterator)
}

/// Iterator construction on dataset nodes
pub trait CreateIterator {
    /// Iterate with the default configuration
    fn create_iterator(&self) -> Result<DatasetIterator> {
        self.create_iterator_with(ExecutionConfig::default())
    }

    /// Iterate with `config`
    fn create_iterator_with(&self, config: ExecutionConfig) -> Result<DatasetIterator>;
}

impl CreateIterator for DatasetNode {
    fn create_iterator_with(&self, config: ExecutionConfig) -> Result<DatasetIterator> {
        create_iterator(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::SamplerSpec;

    use crate::operators::tests::numbers;

    fn source(rows: usize) -> DatasetNode {
        DatasetNode::source(numbers(rows), SamplerSpec::sequential(0, 0).unwrap())
    }

    #[test]
    fn state_machine() {
        let mut iter = DatasetIterator::new();
        assert_eq!(iter.state(), IteratorState::Uninitialized);
        assert!(matches!(iter.get_next_row(), Err(Error::InvalidOperation(_))));

        iter.launch(&source(2), ExecutionConfig::default()).unwrap();
        assert_eq!(iter.state(), IteratorState::Running);
        assert!(matches!(
            iter.launch(&source(2), ExecutionConfig::default()),
            Err(Error::InvalidOperation(_))
        ));

        iter.stop();
        assert_eq!(iter.state(), IteratorState::Stopped);
        assert!(matches!(iter.get_next_row(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn end_of_stream_repeats() {
        let mut iter = source(1).create_iterator().unwrap();
        assert!(iter.get_next_row().unwrap().is_some());
        assert!(iter.get_next_row().unwrap().is_none());
        assert!(iter.get_next_row().unwrap().is_none());
    }

    #[test]
    fn schema_is_known_after_launch() {
        let iter = source(3).create_iterator().unwrap();
        assert_eq!(iter.schema().unwrap().column_names(), vec!["n".to_string()]);
    }

    #[test]
    fn failed_validation_yields_no_iterator() {
        let node = source(3).project(["missing"]).unwrap();
        let err = create_iterator(&node, ExecutionConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn stop_before_end_joins_blocked_workers() {
        let mut iter = source(1_000)
            .create_iterator_with(ExecutionConfig::default().with_queue_capacity(1))
            .unwrap();
        assert!(iter.next().is_some());
        iter.stop();
        iter.stop();
        assert_eq!(iter.state(), IteratorState::Stopped);
        assert!(iter.next().is_none());
    }

    #[test]
    fn memory_stats_track_buffered_rows() {
        let node = source(40).shuffle(10).unwrap();
        let mut iter = node
            .create_iterator_with(ExecutionConfig::default().with_memory_ceiling(1024))
            .unwrap();
        while iter.get_next_row().unwrap().is_some() {}
        let stats = iter.memory_stats().unwrap();
        assert!(stats.peak_usage >= 40);
        assert!(stats.peak_usage <= 1024);
        assert!(source(1).create_iterator().unwrap().memory_stats().is_none());
    }
}
