//! Zip operator: merges one row from every child per step

use std::sync::Arc;

use tracing::debug;

use rowflow_core::{Plan, Result, Row};

use super::{forward, thread_name, ExecContext, Subtree};
use crate::cancel::CancellationToken;
use crate::queue::{Consumer, Message};
use crate::tree::compile_all;

/// Pull one row from every input; `Err` carries the terminal message that
/// ended the shortest input
fn next_merged(inputs: &[Consumer], token: &CancellationToken) -> Option<std::result::Result<Row, Message>> {
    let mut merged = Row::new();
    for input in inputs {
        match input.pop(token)? {
            Message::Row(row) => {
                if let Err(e) = merged.merge(row) {
                    return Some(Err(Message::Failed(e)));
                }
            }
            terminal => return Some(Err(terminal)),
        }
    }
    Some(Ok(merged))
}

pub(crate) fn spawn_zip(
    ordinal: usize,
    children: &[Arc<Plan>],
    ctx: &Arc<ExecContext>,
    token: &CancellationToken,
) -> Result<Subtree> {
    let children_token = token.child_token();
    let subtrees = compile_all(children, ctx, &children_token)?;
    let mut handles = Vec::new();
    let mut inputs = Vec::with_capacity(subtrees.len());
    for subtree in subtrees {
        inputs.push(subtree.output);
        handles.extend(subtree.handles);
    }

    let (producer, output) = ctx.queue();
    let worker_token = token.clone();
    let label = thread_name("zip", ordinal, None);
    let name = label.clone();
    ctx.spawn(name, &mut handles, token, move || {
        let token = worker_token;
        let mut rows = 0usize;
        loop {
            match next_merged(&inputs, &token) {
                Some(Ok(row)) => {
                    if !forward(&producer, Message::Row(row), &token) {
                        break;
                    }
                    rows += 1;
                }
                Some(Err(terminal)) => {
                    forward(&producer, terminal, &token);
                    break;
                }
                None => break,
            }
        }
        // Longer inputs may still hold rows; they are discarded
        children_token.cancel();
        debug!("{} finished after {} rows", label, rows);
    })?;

    Ok(Subtree { output, handles })
}

#[cfg(test)]
mod tests {
    use rowflow_core::{DatasetNode, ExecutionConfig, SamplerSpec};

    use crate::operators::tests::{numbers, run, values};

    fn renamed(rows: usize, column: &str) -> DatasetNode {
        DatasetNode::source(numbers(rows), SamplerSpec::sequential(0, 0).unwrap())
            .rename(["n"], [column])
            .unwrap()
    }

    #[test]
    fn zip_stops_at_shortest_child() {
        let node = renamed(7, "a").zip(vec![renamed(4, "b"), renamed(9, "c")]).unwrap();
        let rows = run(&node, ExecutionConfig::default()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].column_names(), vec!["a", "b", "c"]);
        assert_eq!(values(&rows, "c"), vec![0, 1, 2, 3]);
    }

    #[test]
    fn zip_with_empty_child_is_empty() {
        let node = renamed(5, "a").zip(vec![renamed(0, "b")]).unwrap();
        assert!(run(&node, ExecutionConfig::default()).unwrap().is_empty());
    }
}
