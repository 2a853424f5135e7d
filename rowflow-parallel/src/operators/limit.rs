//! Skip and Take operators

use std::sync::Arc;

use rowflow_core::{Plan, Result};

use super::{spawn_pipe, thread_name, ExecContext, Step, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::Message;
use crate::tree::compile;

pub(crate) fn spawn_skip(
    ordinal: usize,
    count: usize,
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let mut skipped = 0usize;
    spawn_pipe(
        thread_name("skip", ordinal, None),
        input,
        ctx,
        token,
        move |row| {
            if skipped < count {
                skipped += 1;
                return Ok(Step::Drop);
            }
            Ok(Step::Emit(row))
        },
        || {},
    )
}

/// Forward the first `count` rows of `child`, then cancel it
///
/// The child runs under its own token so stopping it early leaves the rest
/// of the tree untouched.
pub(crate) fn spawn_take(
    ordinal: usize,
    child: &Arc<Plan>,
    count: usize,
    ctx: &Arc<ExecContext>,
    token: &CancellationToken,
) -> Result<Subtree> {
    if count == 0 {
        return spawn_empty(ctx, token);
    }
    let upstream = token.child_token();
    let input = match compile(child, ctx, &upstream) {
        Ok(input) => input,
        Err(e) => {
            upstream.cancel();
            return Err(e);
        }
    };
    let mut taken = 0usize;
    spawn_pipe(
        thread_name("take", ordinal, None),
        input,
        ctx,
        token,
        move |row| {
            taken += 1;
            Ok(if taken == count { Step::Last(row) } else { Step::Emit(row) })
        },
        move || upstream.cancel(),
    )
}

/// A stream that ends before its first row
fn spawn_empty(ctx: &ExecContext, token: &CancellationToken) -> Result<Subtree> {
    let (producer, output) = ctx.queue();
    producer.push(Message::Eof, token);
    Ok(Subtree {
        output,
        handles: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rowflow_core::{DataType, DatasetNode, ExecutionConfig, Field, Row, SamplerSpec, Schema, Tensor, TAKE_ALL};
    use rowflow_readers::generator;
    use test_case::test_case;

    use crate::operators::tests::{numbers, run, values};

    fn source(rows: usize) -> DatasetNode {
        DatasetNode::source(numbers(rows), SamplerSpec::sequential(0, 0).unwrap())
    }

    #[test_case(10, 0 => 10; "skip none")]
    #[test_case(10, 4 => 6; "skip some")]
    #[test_case(10, 10 => 0; "skip all")]
    #[test_case(10, 25 => 0; "skip past end")]
    fn skip_counts(rows: usize, count: i64) -> usize {
        run(&source(rows).skip(count).unwrap(), ExecutionConfig::default())
            .unwrap()
            .len()
    }

    #[test_case(10, 3 => 3; "take some")]
    #[test_case(10, 10 => 10; "take exact")]
    #[test_case(10, 25 => 10; "take past end")]
    #[test_case(10, 0 => 0; "take none")]
    #[test_case(10, TAKE_ALL => 10; "take all")]
    fn take_counts(rows: usize, count: i64) -> usize {
        run(&source(rows).take(count).unwrap(), ExecutionConfig::default())
            .unwrap()
            .len()
    }

    #[test]
    fn skip_then_take_selects_a_window() {
        let node = source(20).skip(5).unwrap().take(3).unwrap();
        let got = values(&run(&node, ExecutionConfig::default()).unwrap(), "n");
        assert_eq!(got, vec![5, 6, 7]);
    }

    #[test]
    fn take_stops_reading_early() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let schema = Schema::new(vec![Field::new("n", DataType::Int32, vec![])]).unwrap();
        let node = generator("counted", schema, 10_000, move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            Row::from_columns([("n", Tensor::scalar(i32::try_from(i).unwrap()))])
        })
        .take(5)
        .unwrap();

        let config = ExecutionConfig::default().with_workers(2).with_queue_capacity(2);
        assert_eq!(run(&node, config).unwrap().len(), 5);
        assert!(reads.load(Ordering::SeqCst) < 10_000);
    }
}
