//! Repeat operator: recompiles and drains the child subtree once per epoch
//!
//! Every epoch runs a fresh copy of the child subtree built from the same
//! plan, so samplers and shuffle seeds restart identically and repeated
//! epochs carry identical rows.

use std::sync::Arc;

use tracing::{debug, warn};

use rowflow_core::{Plan, Result};

use super::{forward, thread_name, ExecContext, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::{Consumer, Message, Producer};
use crate::tree::compile;

enum Epoch {
    /// The child reached end of stream after this many rows
    Done(usize),
    /// Cancelled, consumer gone, or a failure was forwarded
    Halted,
}

fn drain_epoch(input: &Consumer, producer: &Producer, epoch_token: &CancellationToken) -> Epoch {
    let mut rows = 0usize;
    loop {
        match input.pop(epoch_token) {
            Some(Message::Row(row)) => {
                if !forward(producer, Message::Row(row), epoch_token) {
                    return Epoch::Halted;
                }
                rows += 1;
            }
            Some(Message::Eof) => return Epoch::Done(rows),
            Some(failed) => {
                forward(producer, failed, epoch_token);
                return Epoch::Halted;
            }
            None => return Epoch::Halted,
        }
    }
}

pub(crate) fn spawn_repeat(
    ordinal: usize,
    child: &Arc<Plan>,
    count: Option<usize>,
    ctx: &Arc<ExecContext>,
    token: &CancellationToken,
) -> Result<Subtree> {
    let (producer, output) = ctx.queue();
    let child = Arc::clone(child);
    let epoch_ctx = Arc::clone(ctx);
    let worker_token = token.clone();
    let label = thread_name("repeat", ordinal, None);
    let name = label.clone();

    let mut handles = Vec::with_capacity(1);
    ctx.spawn(name, &mut handles, token, move || {
        let (ctx, token) = (epoch_ctx, worker_token);
        let mut epochs = 0usize;
        let mut rows = 0usize;
        loop {
            if count.is_some_and(|count| epochs >= count) {
                forward(&producer, Message::Eof, &token);
                break;
            }
            let epoch_token = token.child_token();
            let subtree = match compile(&child, &ctx, &epoch_token) {
                Ok(subtree) => subtree,
                Err(e) => {
                    epoch_token.cancel();
                    forward(&producer, Message::Failed(e), &token);
                    break;
                }
            };
            let outcome = drain_epoch(&subtree.output, &producer, &epoch_token);
            epoch_token.cancel();
            Subtree::join(subtree.handles);

            match outcome {
                Epoch::Done(0) if count.is_none() => {
                    warn!("{}: unbounded repeat over an empty epoch, ending stream", label);
                    forward(&producer, Message::Eof, &token);
                    break;
                }
                Epoch::Done(epoch_rows) => {
                    rows += epoch_rows;
                    epochs += 1;
                }
                Epoch::Halted => break,
            }
        }
        debug!("{} finished after {} epochs, {} rows", label, epochs, rows);
    })?;

    Ok(Subtree { output, handles })
}
