//! Execution tree compiler
//!
//! Walks a validated [`Plan`] bottom-up and spawns one runtime operator per
//! node, wiring each child's output queue into its parent.

use std::sync::Arc;

use rowflow_core::{Plan, PlanKind, Result};

use crate::cancel::CancellationToken;
use crate::operators::{
    spawn_batch, spawn_concat, spawn_map, spawn_project, spawn_rename, spawn_repeat, spawn_shuffle, spawn_skip,
    spawn_source, spawn_take, spawn_zip, ExecContext, Subtree,
};

/// Spawn the operators of `plan` and return the root output queue
///
/// On error `token` is cancelled and every operator thread already started
/// for `plan` has been joined.
pub(crate) fn compile(plan: &Arc<Plan>, ctx: &Arc<ExecContext>, token: &CancellationToken) -> Result<Subtree> {
    let ordinal = plan.ordinal;
    match &plan.kind {
        PlanKind::Source { name, reader, sampler } => spawn_source(name, ordinal, reader, sampler, ctx, token),
        PlanKind::Map { child, map } => {
            let input = compile(child, ctx, token)?;
            spawn_map(ordinal, map, input, ctx, token)
        }
        PlanKind::Batch {
            child,
            size,
            drop_remainder,
        } => {
            let input = compile(child, ctx, token)?;
            spawn_batch(ordinal, *size, *drop_remainder, input, ctx, token)
        }
        PlanKind::Shuffle { child, buffer_size } => {
            let input = compile(child, ctx, token)?;
            spawn_shuffle(ordinal, plan.seed, *buffer_size, input, ctx, token)
        }
        PlanKind::Repeat { child, count } => spawn_repeat(ordinal, child, *count, ctx, token),
        PlanKind::Skip { child, count } => {
            let input = compile(child, ctx, token)?;
            spawn_skip(ordinal, *count, input, ctx, token)
        }
        PlanKind::Take { child, count: None } => compile(child, ctx, token),
        PlanKind::Take {
            child,
            count: Some(count),
        } => spawn_take(ordinal, child, *count, ctx, token),
        PlanKind::Project { child, columns } => {
            let input = compile(child, ctx, token)?;
            spawn_project(ordinal, columns, input, ctx, token)
        }
        PlanKind::Rename { child, from, to } => {
            let input = compile(child, ctx, token)?;
            spawn_rename(ordinal, from, to, input, ctx, token)
        }
        PlanKind::Zip { children } => spawn_zip(ordinal, children, ctx, token),
        PlanKind::Concat { children } => spawn_concat(ordinal, children, ctx, token),
    }
}

/// Compile every child under `token`; on failure the ones already running
/// are cancelled and joined
pub(crate) fn compile_all(
    children: &[Arc<Plan>],
    ctx: &Arc<ExecContext>,
    token: &CancellationToken,
) -> Result<Vec<Subtree>> {
    let mut subtrees = Vec::with_capacity(children.len());
    for child in children {
        match compile(child, ctx, token) {
            Ok(subtree) => subtrees.push(subtree),
            Err(e) => {
                token.cancel();
                for subtree in subtrees {
                    Subtree::join(subtree.handles);
                }
                return Err(e);
            }
        }
    }
    Ok(subtrees)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use rowflow_core::{validate, DataType, Error, ExecutionConfig, Field, Row, Schema, Tensor};
    use rowflow_readers::generator;

    use super::*;

    #[test]
    fn failed_spawn_joins_started_operators() {
        let marker = Arc::new(());
        let held = Arc::clone(&marker);
        let schema = Schema::new(vec![Field::new("n", DataType::Int32, vec![])]).unwrap();
        let source = generator("numbers", schema, 1_000, move |i| {
            let _ = Arc::strong_count(&held);
            Row::from_columns([("n", Tensor::scalar(i32::try_from(i).unwrap()))])
        });
        let node = rowflow_core::zip(vec![source.clone(), source.rename(["n"], ["m"]).unwrap()]).unwrap();

        let config = ExecutionConfig::default().with_workers(2).with_queue_capacity(1);
        let plan = validate(&node, &config).unwrap();
        let mut ctx = ExecContext::new(config);
        // Enough for the first child but not the second
        ctx.spawn_limit = Some(AtomicUsize::new(4));
        let token = CancellationToken::new();

        let err = compile(&plan, &Arc::new(ctx), &token).err().unwrap();
        assert!(matches!(err, Error::Pipeline(_)));
        assert!(token.is_cancelled());
        drop(plan);
        drop(node);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
