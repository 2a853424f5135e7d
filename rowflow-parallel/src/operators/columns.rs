//! Project and Rename operators

use rowflow_core::Result;

use super::{spawn_pipe, thread_name, ExecContext, Step, Subtree};
use crate::cancel::CancellationToken;

pub(crate) fn spawn_project(
    ordinal: usize,
    columns: &[String],
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let columns = columns.to_vec();
    spawn_pipe(
        thread_name("project", ordinal, None),
        input,
        ctx,
        token,
        move |row| row.project(&columns).map(Step::Emit),
        || {},
    )
}

pub(crate) fn spawn_rename(
    ordinal: usize,
    from: &[String],
    to: &[String],
    input: Subtree,
    ctx: &ExecContext,
    token: &CancellationToken,
) -> Result<Subtree> {
    let (from, to) = (from.to_vec(), to.to_vec());
    spawn_pipe(
        thread_name("rename", ordinal, None),
        input,
        ctx,
        token,
        move |row| row.rename(&from, &to).map(Step::Emit),
        || {},
    )
}
