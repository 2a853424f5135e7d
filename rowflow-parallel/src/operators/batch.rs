//! Batch operator: stacks consecutive rows column by column

use tracing::debug;

use rowflow_core::{Error, Result, Row, Tensor};

use super::{forward, thread_name, ExecContext, Held, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::Message;

/// Stack `rows` into one row whose tensors gain a leading batch axis
fn stack_rows(rows: &[Row]) -> Result<Row> {
    let Some(first) = rows.first() else {
        return Err(Error::Pipeline("cannot batch zero rows".into()));
    };
    let mut batch = Row::new();
    for name in first.column_names() {
        let column = rows
            .iter()
            .map(|row| {
                row.get(name)
                    .cloned()
                    .ok_or_else(|| Error::Schema(format!("batch: row is missing column '{name}'")))
            })
            .collect::<Result<Vec<Tensor>>>()?;
        batch.insert(name, Tensor::stack(&column)?);
    }
    Ok(batch)
}

pub(crate) fn spawn_batch(
    ordinal: usize,
    size: usize,
    drop_remainder: bool,
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let (producer, output) = ctx.queue();
    let upstream = input.output;
    let worker_token = token.clone();
    let label = thread_name("batch", ordinal, None);
    let mut held = Held::new(ctx, &label);
    let name = label.clone();

    let mut handles = input.handles;
    ctx.spawn(name, &mut handles, token, move || {
        let token = worker_token;
        let mut pending: Vec<Row> = Vec::with_capacity(size);
        let mut batches = 0usize;
        loop {
            let message = match upstream.pop(&token) {
                Some(Message::Row(row)) => {
                    if let Err(e) = held.charge(row.size_bytes()) {
                        forward(&producer, Message::Failed(e), &token);
                        break;
                    }
                    pending.push(row);
                    if pending.len() < size {
                        continue;
                    }
                    stack_rows(&pending)
                }
                Some(Message::Eof) if !pending.is_empty() && !drop_remainder => stack_rows(&pending),
                Some(terminal) => {
                    forward(&producer, terminal, &token);
                    break;
                }
                None => break,
            };
            let full = pending.len() == size;
            pending.clear();
            held.release_all();
            let sent = match message {
                Ok(batch) => forward(&producer, Message::Row(batch), &token),
                Err(e) => {
                    forward(&producer, Message::Failed(e), &token);
                    break;
                }
            };
            if !sent {
                break;
            }
            batches += 1;
            if !full {
                // The partial batch is always the last one
                forward(&producer, Message::Eof, &token);
                break;
            }
        }
        debug!("{} finished after {} batches", label, batches);
    })?;
    Ok(Subtree { output, handles })
}

#[cfg(test)]
mod tests {
    use rowflow_core::{DatasetNode, Error, ExecutionConfig, SamplerSpec};
    use test_case::test_case;

    use crate::operators::tests::{numbers, run};

    fn batched(rows: usize, size: i64, drop_remainder: bool, config: ExecutionConfig) -> Result<Vec<Vec<i32>>, Error> {
        let node = DatasetNode::source(numbers(rows), SamplerSpec::sequential(0, 0).unwrap())
            .batch(size, drop_remainder)
            .unwrap();
        Ok(run(&node, config)?
            .iter()
            .map(|row| row["n"].to_vec::<i32>().unwrap())
            .collect())
    }

    #[test_case(10, 3, false => vec![3, 3, 3, 1]; "keeps remainder")]
    #[test_case(10, 3, true => vec![3, 3, 3]; "drops remainder")]
    #[test_case(9, 3, false => vec![3, 3, 3]; "exact multiple")]
    #[test_case(2, 5, true => Vec::<usize>::new(); "all rows in remainder")]
    #[test_case(0, 4, false => Vec::<usize>::new(); "empty input")]
    fn batch_sizes(rows: usize, size: i64, drop_remainder: bool) -> Vec<usize> {
        batched(rows, size, drop_remainder, ExecutionConfig::default())
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect()
    }

    #[test]
    fn batches_keep_row_order() {
        let got = batched(5, 2, false, ExecutionConfig::default()).unwrap();
        assert_eq!(got, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn batch_larger_than_ceiling_fails() {
        // 4 bytes per row; a batch of 8 rows needs 32
        let err = batched(20, 8, false, ExecutionConfig::default().with_memory_ceiling(16)).unwrap_err();
        assert!(matches!(err, Error::MemoryBudgetExceeded { .. }));
    }

    #[test]
    fn batch_within_ceiling_succeeds() {
        let got = batched(20, 4, false, ExecutionConfig::default().with_memory_ceiling(16)).unwrap();
        assert_eq!(got.len(), 5);
    }
}
