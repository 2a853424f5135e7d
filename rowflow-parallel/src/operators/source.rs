//! Source operator: reader workers over the built sampler indices
//!
//! Worker `w` of `n` reads sampler positions `w, w + n, w + 2n, ...`. In
//! ordered mode each worker has its own queue and the collector visits the
//! queues round-robin, which reproduces sampler order exactly. In unordered
//! mode all workers share one queue and rows leave in completion order.

use std::sync::Arc;

use rowflow_core::{BuiltSampler, Error, Result, SampleReader};

use super::{forward, spawn_collector, thread_name, ExecContext, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::{Message, Producer};

fn read_position(reader: &dyn SampleReader, sampler: &BuiltSampler, position: usize) -> Message {
    let index = sampler.indices()[position];
    let row = usize::try_from(index)
        .map_err(|_| Error::Pipeline(format!("negative sample index {index}")))
        .and_then(|index| reader.read_sample(index));
    match row {
        Ok(row) => Message::Row(row),
        Err(e) => Message::Failed(e),
    }
}

fn run_worker(
    reader: &dyn SampleReader,
    sampler: &BuiltSampler,
    first: usize,
    stride: usize,
    producer: &Producer,
    token: &CancellationToken,
) {
    for position in (first..sampler.len()).step_by(stride) {
        let message = read_position(reader, sampler, position);
        let failed = matches!(message, Message::Failed(_));
        if !forward(producer, message, token) || failed {
            return;
        }
    }
    forward(producer, Message::Eof, token);
}

pub(crate) fn spawn_source(
    name: &str,
    ordinal: usize,
    reader: &Arc<dyn SampleReader>,
    sampler: &BuiltSampler,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let workers = ctx.config.source_workers().min(sampler.len()).max(1);
    let workers_token = token.child_token();

    let mut handles = Vec::with_capacity(workers + 1);
    let mut inputs = Vec::with_capacity(workers);
    let shared = if ctx.config.preserve_order { None } else { Some(ctx.queue()) };

    for w in 0..workers {
        let producer = match &shared {
            Some((producer, _)) => producer.clone(),
            None => {
                let (producer, consumer) = ctx.queue();
                inputs.push(consumer);
                producer
            }
        };
        let reader = Arc::clone(reader);
        let sampler = sampler.clone();
        let worker_token = workers_token.clone();
        ctx.spawn(thread_name(name, ordinal, Some(w)), &mut handles, token, move || {
            run_worker(reader.as_ref(), &sampler, w, workers, &producer, &worker_token);
        })?;
    }
    if let Some((_, consumer)) = shared {
        inputs.push(consumer);
    }

    let output = spawn_collector(
        thread_name(name, ordinal, None),
        inputs,
        workers,
        ctx,
        token,
        workers_token,
        &mut handles,
    )?;
    Ok(Subtree { output, handles })
}
