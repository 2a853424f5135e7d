//! Shuffle operator: a fixed-capacity reservoir with random eviction

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use rowflow_core::{Result, Row};

use super::{forward, thread_name, ExecContext, Held, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::Message;

pub(crate) fn spawn_shuffle(
    ordinal: usize,
    seed: u64,
    buffer_size: usize,
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let (producer, output) = ctx.queue();
    let upstream = input.output;
    let worker_token = token.clone();
    let label = thread_name("shuffle", ordinal, None);
    let mut held = Held::new(ctx, &label);
    let name = label.clone();

    let mut handles = input.handles;
    ctx.spawn(name, &mut handles, token, move || {
        let token = worker_token;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut buffer: Vec<(Row, usize)> = Vec::with_capacity(buffer_size);
        let mut rows = 0usize;

        loop {
            match upstream.pop(&token) {
                Some(Message::Row(row)) => {
                    let bytes = row.size_bytes();
                    if let Err(e) = held.charge(bytes) {
                        forward(&producer, Message::Failed(e), &token);
                        break;
                    }
                    if buffer.len() < buffer_size {
                        buffer.push((row, bytes));
                        continue;
                    }
                    let slot = rng.gen_range(0..buffer.len());
                    let (evicted, evicted_bytes) = std::mem::replace(&mut buffer[slot], (row, bytes));
                    held.release(evicted_bytes);
                    if !forward(&producer, Message::Row(evicted), &token) {
                        break;
                    }
                    rows += 1;
                }
                Some(Message::Eof) => {
                    buffer.shuffle(&mut rng);
                    let mut drained = true;
                    for (row, bytes) in buffer.drain(..) {
                        held.release(bytes);
                        if !forward(&producer, Message::Row(row), &token) {
                            drained = false;
                            break;
                        }
                        rows += 1;
                    }
                    if drained {
                        forward(&producer, Message::Eof, &token);
                    }
                    break;
                }
                Some(failed) => {
                    forward(&producer, failed, &token);
                    break;
                }
                None => break,
            }
        }
        debug!("{} finished after {} rows", label, rows);
    })?;
    Ok(Subtree { output, handles })
}
