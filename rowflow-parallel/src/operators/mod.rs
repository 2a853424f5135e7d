//! Runtime operators
//!
//! Every operator runs on one or more named threads. It pulls messages from
//! its input queue(s), does its work and pushes to a single output queue
//! that it owns. A failure travels downstream as [`Message::Failed`]; end of
//! stream as [`Message::Eof`]. A worker exits as soon as its token is
//! cancelled or its consumer disappears.

mod batch;
mod columns;
mod concat;
mod limit;
mod map;
mod repeat;
mod shuffle;
mod source;
mod zip;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use rowflow_core::budget::MemoryBudget;
use rowflow_core::{ExecutionConfig, Result, Row};

use crate::cancel::CancellationToken;
use crate::queue::{bounded, Consumer, Message, Producer, Push};

pub(crate) use batch::spawn_batch;
pub(crate) use columns::{spawn_project, spawn_rename};
pub(crate) use concat::spawn_concat;
pub(crate) use limit::{spawn_skip, spawn_take};
pub(crate) use map::spawn_map;
pub(crate) use repeat::spawn_repeat;
pub(crate) use shuffle::spawn_shuffle;
pub(crate) use source::spawn_source;
pub(crate) use zip::spawn_zip;

/// Settings shared by every operator of one execution tree
#[derive(Debug)]
pub(crate) struct ExecContext {
    pub config: ExecutionConfig,
    pub budget: Option<Arc<MemoryBudget>>,
    /// Threads left before spawning fails
    #[cfg(test)]
    pub spawn_limit: Option<std::sync::atomic::AtomicUsize>,
}

impl ExecContext {
    pub fn new(config: ExecutionConfig) -> Self {
        let budget = config.memory_ceiling.map(|ceiling| Arc::new(MemoryBudget::new(ceiling)));
        Self {
            config,
            budget,
            #[cfg(test)]
            spawn_limit: None,
        }
    }

    pub fn queue(&self) -> (Producer, Consumer) {
        bounded(self.config.queue_capacity)
    }

    /// Start a named operator thread and add it to `handles`
    ///
    /// When the thread cannot be started, `token` is cancelled and every
    /// thread already in `handles` is joined before the error is returned.
    pub fn spawn<F>(
        &self,
        name: String,
        handles: &mut Vec<JoinHandle<()>>,
        token: &CancellationToken,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.start(name, body) {
            Ok(handle) => {
                handles.push(handle);
                Ok(())
            }
            Err(e) => {
                error!("Could not start operator thread: {}", e);
                token.cancel();
                Subtree::join(std::mem::take(handles));
                Err(e)
            }
        }
    }

    fn start<F>(&self, name: String, body: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        #[cfg(test)]
        if let Some(left) = &self.spawn_limit {
            use std::sync::atomic::Ordering;
            if left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_err() {
                return Err(rowflow_core::Error::Pipeline(format!("no thread left for {name}")));
            }
        }
        Ok(thread::Builder::new().name(name).spawn(body)?)
    }
}

/// A compiled subtree: its output queue and the threads feeding it
pub(crate) struct Subtree {
    pub output: Consumer,
    pub handles: Vec<JoinHandle<()>>,
}

impl Subtree {
    /// Join every thread, logging workers that panicked
    pub fn join(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("Worker thread {} panicked", name);
            }
        }
    }
}

/// Bytes of rows buffered by one operator, charged against the budget
pub(crate) struct Held {
    budget: Option<Arc<MemoryBudget>>,
    component: String,
    bytes: usize,
}

impl Held {
    pub fn new(ctx: &ExecContext, component: &str) -> Self {
        Self {
            budget: ctx.budget.clone(),
            component: component.to_string(),
            bytes: 0,
        }
    }

    /// Account `bytes` more, failing when the ceiling would be crossed
    pub fn charge(&mut self, bytes: usize) -> Result<()> {
        if let Some(budget) = &self.budget {
            budget.charge(&self.component, bytes)?;
        }
        self.bytes += bytes;
        Ok(())
    }

    pub fn release(&mut self, bytes: usize) {
        let bytes = bytes.min(self.bytes);
        if let Some(budget) = &self.budget {
            budget.release(&self.component, bytes);
        }
        self.bytes -= bytes;
    }

    pub fn release_all(&mut self) {
        self.release(self.bytes);
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Thread name for worker `index` of the node at `ordinal`
pub(crate) fn thread_name(op: &str, ordinal: usize, index: Option<usize>) -> String {
    match index {
        Some(index) => format!("rowflow-{}{ordinal}-{index}", op.to_ascii_lowercase()),
        None => format!("rowflow-{}{ordinal}", op.to_ascii_lowercase()),
    }
}

/// What a single-input operator does with one row
pub(crate) enum Step {
    /// Forward this row
    Emit(Row),
    /// Drop the row
    Drop,
    /// Forward this row, then end the stream
    Last(Row),
}

/// Run a single-input, row-at-a-time operator on its own thread
///
/// `step` sees every row in order. `on_end` runs once when the operator
/// finishes for any reason.
pub(crate) fn spawn_pipe<S, E>(
    name: String,
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
    mut step: S,
    on_end: E,
) -> Result<Subtree>
where
    S: FnMut(Row) -> Result<Step> + Send + 'static,
    E: FnOnce() + Send + 'static,
{
    let (producer, output) = ctx.queue();
    let label = name.clone();
    let upstream = input.output;
    let mut handles = input.handles;
    let worker_token = token.clone();
    ctx.spawn(name, &mut handles, token, move || {
        let token = worker_token;
        let mut rows = 0usize;
        loop {
            let row = match upstream.pop(&token) {
                Some(Message::Row(row)) => row,
                Some(terminal) => {
                    producer.push(terminal, &token);
                    break;
                }
                None => break,
            };
            let (row, last) = match step(row) {
                Ok(Step::Emit(row)) => (row, false),
                Ok(Step::Drop) => continue,
                Ok(Step::Last(row)) => (row, true),
                Err(e) => {
                    producer.push(Message::Failed(e), &token);
                    break;
                }
            };
            if producer.push_row(row, &token) != Push::Sent {
                break;
            }
            rows += 1;
            if last {
                producer.push(Message::Eof, &token);
                break;
            }
        }
        on_end();
        debug!("{} finished after {} rows", label, rows);
    })?;
    Ok(Subtree { output, handles })
}

/// Push a message, reporting whether the worker may continue
pub(crate) fn forward(producer: &Producer, message: Message, token: &CancellationToken) -> bool {
    producer.push(message, token) == Push::Sent
}

/// Fan-in thread merging the outputs of `workers` parallel workers
///
/// Ordered fan-in gets one queue per worker and visits them round-robin, so
/// row `k` is read from worker `k % workers`; the first end marker in turn
/// order ends the stream. Unordered fan-in gets a single shared queue and
/// ends after one end marker per worker. A failure is forwarded as is and
/// cancels `workers_token`. The collector thread is added to `handles`.
pub(crate) fn spawn_collector(
    name: String,
    inputs: Vec<Consumer>,
    workers: usize,
    ctx: &ExecContext,
    token: &CancellationToken,
    workers_token: CancellationToken,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<Consumer> {
    let ordered = inputs.len() == workers;
    let (producer, output) = ctx.queue();
    let label = name.clone();
    let collector_token = token.clone();
    ctx.spawn(name, handles, token, move || {
        let token = collector_token;
        let mut rows = 0usize;
        let mut finished = 0usize;
        loop {
            let input = &inputs[rows % inputs.len()];
            match input.pop(&token) {
                Some(Message::Row(row)) => {
                    if !forward(&producer, Message::Row(row), &token) {
                        break;
                    }
                    rows += 1;
                }
                Some(Message::Eof) => {
                    finished += 1;
                    if ordered || finished == workers {
                        forward(&producer, Message::Eof, &token);
                        break;
                    }
                }
                Some(Message::Failed(e)) => {
                    error!("{} failed: {}", label, e);
                    workers_token.cancel();
                    forward(&producer, Message::Failed(e), &token);
                    break;
                }
                None => break,
            }
        }
        workers_token.cancel();
        debug!("{} finished after {} rows", label, rows);
    })?;
    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use rowflow_core::{
        validate, DataType, DatasetNode, Error, ExecutionConfig, Field, Row, Schema, SourceProvider, Tensor,
    };
    use rowflow_readers::MemoryProvider;

    use super::{ExecContext, Subtree};
    use crate::cancel::CancellationToken;
    use crate::queue::Message;
    use crate::tree::compile;

    /// Provider of `rows` rows with one Int32 column `n` holding the index
    pub(crate) fn numbers(rows: usize) -> Arc<dyn SourceProvider> {
        let schema = Schema::new(vec![Field::new("n", DataType::Int32, vec![])]).unwrap();
        Arc::new(MemoryProvider::generator("numbers", schema, rows, |i| {
            Row::from_columns([("n", Tensor::scalar(i32::try_from(i).unwrap()))])
        }))
    }

    /// Drain a subtree to its end marker, returning the rows or the failure
    pub(crate) fn drain(subtree: Subtree, token: &CancellationToken) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        let outcome = loop {
            match subtree.output.pop(token) {
                Some(Message::Row(row)) => rows.push(row),
                Some(Message::Eof) => break Ok(rows),
                Some(Message::Failed(e)) => break Err(e),
                None => break Err(Error::Pipeline("cancelled".into())),
            }
        };
        token.cancel();
        Subtree::join(subtree.handles);
        outcome
    }

    /// Compile and drain `node`
    pub(crate) fn run(node: &DatasetNode, config: ExecutionConfig) -> Result<Vec<Row>, Error> {
        let plan = validate(node, &config)?;
        let ctx = Arc::new(ExecContext::new(config));
        let token = CancellationToken::new();
        let subtree = compile(&plan, &ctx, &token)?;
        drain(subtree, &token)
    }

    /// Values of the Int32 scalar column `column`
    pub(crate) fn values(rows: &[Row], column: &str) -> Vec<i32> {
        rows.iter()
            .map(|row| row[column].to_vec::<i32>().unwrap()[0])
            .collect()
    }
}
