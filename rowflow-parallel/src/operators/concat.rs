//! Concat operator: drains its children one after another

use std::sync::Arc;

use tracing::debug;

use rowflow_core::{Plan, Result};

use super::{forward, thread_name, ExecContext, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::Message;
use crate::tree::compile_all;

pub(crate) fn spawn_concat(
    ordinal: usize,
    children: &[Arc<Plan>],
    ctx: &Arc<ExecContext>,
    token: &CancellationToken,
) -> Result<Subtree> {
    let subtrees = compile_all(children, ctx, token)?;
    let mut handles = Vec::new();
    let mut inputs = Vec::with_capacity(subtrees.len());
    for subtree in subtrees {
        inputs.push(subtree.output);
        handles.extend(subtree.handles);
    }

    let (producer, output) = ctx.queue();
    let worker_token = token.clone();
    let label = thread_name("concat", ordinal, None);
    let name = label.clone();
    ctx.spawn(name, &mut handles, token, move || {
        let token = worker_token;
        let mut rows = 0usize;
        let mut clean = true;
        'children: for input in &inputs {
            loop {
                match input.pop(&token) {
                    Some(Message::Row(row)) => {
                        if !forward(&producer, Message::Row(row), &token) {
                            clean = false;
                            break 'children;
                        }
                        rows += 1;
                    }
                    Some(Message::Eof) => continue 'children,
                    Some(failed) => {
                        forward(&producer, failed, &token);
                        clean = false;
                        break 'children;
                    }
                    None => {
                        clean = false;
                        break 'children;
                    }
                }
            }
        }
        if clean {
            forward(&producer, Message::Eof, &token);
        }
        debug!("{} finished after {} rows", label, rows);
    })?;

    Ok(Subtree { output, handles })
}

#[cfg(test)]
mod tests {
    use rowflow_core::{DatasetNode, ExecutionConfig, SamplerSpec};

    use crate::operators::tests::{numbers, run, values};

    fn source(rows: usize, start: i64) -> DatasetNode {
        DatasetNode::source(numbers(rows), SamplerSpec::sequential(start, 0).unwrap())
    }

    #[test]
    fn children_are_drained_in_order() {
        let node = (source(5, 2) + source(3, 0)).unwrap();
        let got = values(&run(&node, ExecutionConfig::default()).unwrap(), "n");
        assert_eq!(got, vec![2, 3, 4, 0, 1, 2]);
    }

    #[test]
    fn empty_children_are_skipped() {
        let node = source(0, 0).concat(vec![source(2, 0), source(0, 0)]).unwrap();
        assert_eq!(run(&node, ExecutionConfig::default()).unwrap().len(), 2);
    }
}
