//! Map operator: a dispatcher, `n` transform workers and a collector
//!
//! The dispatcher hands row `k` to worker `k % n`. With order preservation
//! every worker has private input and output queues and the collector reads
//! the outputs round-robin; otherwise the workers share one input and one
//! output queue.

use std::sync::Arc;

use rowflow_core::{MapPlan, Result};

use super::{forward, spawn_collector, thread_name, ExecContext, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::{Consumer, Message, Producer};

fn run_dispatcher(input: &Consumer, targets: &[Producer], token: &CancellationToken) {
    let mut next = 0usize;
    loop {
        let target = next % targets.len();
        match input.pop(token) {
            Some(Message::Row(row)) => {
                if !forward(&targets[target], Message::Row(row), token) {
                    return;
                }
                next += 1;
            }
            Some(terminal) => {
                // The collector reaches `target` next; every other worker
                // just needs to wind down.
                forward(&targets[target], terminal, token);
                for offset in 1..targets.len() {
                    forward(&targets[(target + offset) % targets.len()], Message::Eof, token);
                }
                return;
            }
            None => return,
        }
    }
}

fn run_worker(map: &MapPlan, input: &Consumer, output: &Producer, token: &CancellationToken) {
    loop {
        let message = match input.pop(token) {
            Some(Message::Row(row)) => match map.apply(row) {
                Ok(row) => Message::Row(row),
                Err(e) => {
                    forward(output, Message::Failed(e), token);
                    return;
                }
            },
            Some(terminal) => {
                forward(output, terminal, token);
                return;
            }
            None => return,
        };
        if !forward(output, message, token) {
            return;
        }
    }
}

pub(crate) fn spawn_map(
    ordinal: usize,
    map: &Arc<MapPlan>,
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let workers = ctx.config.map_workers();
    let workers_token = token.child_token();
    let mut handles = input.handles;

    let mut targets = Vec::with_capacity(workers);
    let mut outputs = Vec::with_capacity(workers);
    let shared = if ctx.config.preserve_order {
        None
    } else {
        Some((ctx.queue(), ctx.queue()))
    };

    for w in 0..workers {
        let ((target, work), (result, collected)) = match &shared {
            Some((jobs, results)) => (jobs.clone(), results.clone()),
            None => (ctx.queue(), ctx.queue()),
        };
        targets.push(target);
        if shared.is_none() || w == 0 {
            outputs.push(collected);
        }
        let map = Arc::clone(map);
        let worker_token = workers_token.clone();
        ctx.spawn(thread_name("map", ordinal, Some(w)), &mut handles, token, move || {
            run_worker(&map, &work, &result, &worker_token);
        })?;
    }
    drop(shared);

    let upstream = input.output;
    let dispatch_token = workers_token.clone();
    ctx.spawn(thread_name("map-dispatch", ordinal, None), &mut handles, token, move || {
        run_dispatcher(&upstream, &targets, &dispatch_token);
    })?;

    let output = spawn_collector(
        thread_name("map", ordinal, None),
        outputs,
        workers,
        ctx,
        token,
        workers_token,
        &mut handles,
    )?;
    Ok(Subtree { output, handles })
}
