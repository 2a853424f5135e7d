//! Dataset node tree: the declarative description of a pipeline
//!
//! Nodes are built top-down by chaining calls on an owned [`DatasetNode`].
//! Every call checks its own arguments and returns an error instead of a
//! node when they are invalid. Tree-wide checks (schemas, column names,
//! opening sources) happen later in [`crate::validate`].
//!
//! Each node owns its children, so a subtree can only appear under one
//! parent. Use `clone()` for an explicit deep copy when the same
//! description is needed twice.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::sampler::SamplerSpec;
use crate::source::SourceProvider;
use crate::transform::TensorOp;

/// Sentinel for [`DatasetNode::take`] meaning "all remaining rows"
pub const TAKE_ALL: i64 = -1;

/// Sentinel for [`DatasetNode::repeat`] meaning "repeat forever"
pub const REPEAT_FOREVER: i64 = -1;

/// A node of the pipeline description
#[derive(Debug, Clone)]
pub enum DatasetNode {
    /// Reads raw samples selected by a sampler
    Source(SourceNode),
    /// Applies tensor operations to columns
    Map(MapNode),
    /// Stacks consecutive rows
    Batch(BatchNode),
    /// Approximate random reorder with a bounded buffer
    Shuffle(ShuffleNode),
    /// Replays the child stream
    Repeat(RepeatNode),
    /// Drops the first rows
    Skip(SkipNode),
    /// Keeps the first rows
    Take(TakeNode),
    /// Selects columns
    Project(ProjectNode),
    /// Renames columns
    Rename(RenameNode),
    /// Merges rows of several children side by side
    Zip(ZipNode),
    /// Appends the streams of several children
    Concat(ConcatNode),
}

/// Source leaf
#[derive(Debug, Clone)]
pub struct SourceNode {
    provider: Arc<dyn SourceProvider>,
    sampler: SamplerSpec,
}

impl SourceNode {
    /// Storage layout name
    pub fn kind(&self) -> &str {
        self.provider.kind()
    }

    /// Provider used to open the reader
    pub fn provider(&self) -> &Arc<dyn SourceProvider> {
        &self.provider
    }

    /// Sampler selecting the samples
    pub fn sampler(&self) -> &SamplerSpec {
        &self.sampler
    }
}

/// Map node
#[derive(Debug, Clone)]
pub struct MapNode {
    child: Box<DatasetNode>,
    ops: Vec<Arc<dyn TensorOp>>,
    input_columns: Vec<String>,
    output_columns: Vec<String>,
    project_columns: Vec<String>,
}

impl MapNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Operations, applied in order
    pub fn ops(&self) -> &[Arc<dyn TensorOp>] {
        &self.ops
    }

    /// Input columns; empty means the child's first column
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    /// Output columns; empty means the input columns
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Final projection; empty means keep every column
    pub fn project_columns(&self) -> &[String] {
        &self.project_columns
    }
}

/// Batch node
#[derive(Debug, Clone)]
pub struct BatchNode {
    child: Box<DatasetNode>,
    size: usize,
    drop_remainder: bool,
}

impl BatchNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Rows per batch
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether a final short batch is discarded
    pub fn drop_remainder(&self) -> bool {
        self.drop_remainder
    }
}

/// Shuffle node
#[derive(Debug, Clone)]
pub struct ShuffleNode {
    child: Box<DatasetNode>,
    buffer_size: usize,
}

impl ShuffleNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Capacity of the shuffle buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Repeat node
#[derive(Debug, Clone)]
pub struct RepeatNode {
    child: Box<DatasetNode>,
    count: Option<usize>,
}

impl RepeatNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Number of passes, `None` for unbounded
    pub fn count(&self) -> Option<usize> {
        self.count
    }
}

/// Skip node
#[derive(Debug, Clone)]
pub struct SkipNode {
    child: Box<DatasetNode>,
    count: usize,
}

impl SkipNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Rows to discard
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Take node
#[derive(Debug, Clone)]
pub struct TakeNode {
    child: Box<DatasetNode>,
    count: Option<usize>,
}

impl TakeNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Rows to keep, `None` for all
    pub fn count(&self) -> Option<usize> {
        self.count
    }
}

/// Project node
#[derive(Debug, Clone)]
pub struct ProjectNode {
    child: Box<DatasetNode>,
    columns: Vec<String>,
}

impl ProjectNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Columns to keep, in output order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Rename node
#[derive(Debug, Clone)]
pub struct RenameNode {
    child: Box<DatasetNode>,
    from: Vec<String>,
    to: Vec<String>,
}

impl RenameNode {
    /// Child node
    pub fn child(&self) -> &DatasetNode {
        &self.child
    }

    /// Existing names
    pub fn from(&self) -> &[String] {
        &self.from
    }

    /// New names, positionally matching `from`
    pub fn to(&self) -> &[String] {
        &self.to
    }
}

/// Zip node
#[derive(Debug, Clone)]
pub struct ZipNode {
    children: Vec<DatasetNode>,
}

impl ZipNode {
    /// Children in merge order
    pub fn children(&self) -> &[DatasetNode] {
        &self.children
    }
}

/// Concat node
#[derive(Debug, Clone)]
pub struct ConcatNode {
    children: Vec<DatasetNode>,
}

impl ConcatNode {
    /// Children in stream order
    pub fn children(&self) -> &[DatasetNode] {
        &self.children
    }
}

/// Arguments of a map node
#[derive(Debug, Clone, Default)]
pub struct MapSpec {
    ops: Vec<Arc<dyn TensorOp>>,
    input_columns: Vec<String>,
    output_columns: Vec<String>,
    project_columns: Vec<String>,
}

impl MapSpec {
    /// Map applying `ops` in order
    pub fn new(ops: Vec<Arc<dyn TensorOp>>) -> Self {
        Self {
            ops,
            ..Self::default()
        }
    }

    /// Columns fed to the operations
    #[must_use]
    pub fn input_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.input_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Columns receiving the results
    #[must_use]
    pub fn output_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.output_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Columns kept after the map, in order
    #[must_use]
    pub fn project_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.project_columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

fn check_unique(what: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!("{what}: empty column name")));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::InvalidArgument(format!("{what}: duplicate column '{name}'")));
        }
    }
    Ok(())
}

fn non_negative(what: &str, count: i64) -> Result<usize> {
    usize::try_from(count).map_err(|_| Error::InvalidArgument(format!("{what} must be non-negative, got {count}")))
}

fn strings<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    items.into_iter().map(Into::into).collect()
}

impl DatasetNode {
    /// Source leaf reading samples of `provider` selected by `sampler`
    pub fn source(provider: Arc<dyn SourceProvider>, sampler: SamplerSpec) -> Self {
        DatasetNode::Source(SourceNode { provider, sampler })
    }

    /// Apply tensor operations to columns
    pub fn map(self, spec: MapSpec) -> Result<Self> {
        if spec.ops.is_empty() {
            return Err(Error::InvalidArgument("map: at least one operation is required".into()));
        }
        check_unique("map input_columns", &spec.input_columns)?;
        check_unique("map output_columns", &spec.output_columns)?;
        check_unique("map project_columns", &spec.project_columns)?;

        let inputs = spec.input_columns.len().max(1);
        if !spec.output_columns.is_empty() && spec.output_columns.len() != inputs {
            return Err(Error::InvalidArgument(format!(
                "map: {} output columns for {} input columns",
                spec.output_columns.len(),
                inputs
            )));
        }

        Ok(DatasetNode::Map(MapNode {
            child: Box::new(self),
            ops: spec.ops,
            input_columns: spec.input_columns,
            output_columns: spec.output_columns,
            project_columns: spec.project_columns,
        }))
    }

    /// Group `size` consecutive rows into one
    pub fn batch(self, size: i64, drop_remainder: bool) -> Result<Self> {
        if size <= 0 {
            return Err(Error::InvalidArgument(format!("batch: size must be positive, got {size}")));
        }
        Ok(DatasetNode::Batch(BatchNode {
            child: Box::new(self),
            size: non_negative("batch size", size)?,
            drop_remainder,
        }))
    }

    /// Shuffle rows through a buffer of `buffer_size`
    pub fn shuffle(self, buffer_size: i64) -> Result<Self> {
        if buffer_size <= 1 {
            return Err(Error::InvalidArgument(format!(
                "shuffle: buffer_size must be greater than 1, got {buffer_size}"
            )));
        }
        Ok(DatasetNode::Shuffle(ShuffleNode {
            child: Box::new(self),
            buffer_size: non_negative("shuffle buffer_size", buffer_size)?,
        }))
    }

    /// Replay the stream `count` times; `count <= 0` repeats forever
    pub fn repeat(self, count: i64) -> Result<Self> {
        let count = if count <= 0 {
            None
        } else {
            Some(non_negative("repeat count", count)?)
        };
        Ok(DatasetNode::Repeat(RepeatNode {
            child: Box::new(self),
            count,
        }))
    }

    /// Discard the first `count` rows
    pub fn skip(self, count: i64) -> Result<Self> {
        Ok(DatasetNode::Skip(SkipNode {
            child: Box::new(self),
            count: non_negative("skip count", count)?,
        }))
    }

    /// Keep the first `count` rows, or all with [`TAKE_ALL`]
    pub fn take(self, count: i64) -> Result<Self> {
        let count = if count == TAKE_ALL {
            None
        } else {
            Some(non_negative("take count", count)?)
        };
        Ok(DatasetNode::Take(TakeNode {
            child: Box::new(self),
            count,
        }))
    }

    /// Keep only `columns`, in that order
    pub fn project<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Result<Self> {
        let columns = strings(columns);
        if columns.is_empty() {
            return Err(Error::InvalidArgument("project: no columns given".into()));
        }
        check_unique("project", &columns)?;
        Ok(DatasetNode::Project(ProjectNode {
            child: Box::new(self),
            columns,
        }))
    }

    /// Rename `from[i]` to `to[i]`
    pub fn rename<S: Into<String>, T: Into<String>>(
        self,
        from: impl IntoIterator<Item = S>,
        to: impl IntoIterator<Item = T>,
    ) -> Result<Self> {
        let from = strings(from);
        let to = strings(to);
        if from.is_empty() {
            return Err(Error::InvalidArgument("rename: no columns given".into()));
        }
        if from.len() != to.len() {
            return Err(Error::InvalidArgument(format!(
                "rename: {} input columns but {} output columns",
                from.len(),
                to.len()
            )));
        }
        check_unique("rename input_columns", &from)?;
        check_unique("rename output_columns", &to)?;
        Ok(DatasetNode::Rename(RenameNode {
            child: Box::new(self),
            from,
            to,
        }))
    }

    /// Zip this node with `others`
    pub fn zip(self, others: Vec<DatasetNode>) -> Result<Self> {
        if others.is_empty() {
            return Err(Error::InvalidArgument("zip: no datasets to zip with".into()));
        }
        let mut children = Vec::with_capacity(others.len() + 1);
        children.push(self);
        children.extend(others);
        zip(children)
    }

    /// Concatenate `others` after this node
    pub fn concat(self, others: Vec<DatasetNode>) -> Result<Self> {
        if others.is_empty() {
            return Err(Error::InvalidArgument("concat: no datasets to concatenate".into()));
        }
        let mut children = Vec::with_capacity(others.len() + 1);
        children.push(self);
        children.extend(others);
        concat(children)
    }

    /// Child nodes in order
    pub fn children(&self) -> Vec<&DatasetNode> {
        match self {
            DatasetNode::Source(_) => Vec::new(),
            DatasetNode::Map(n) => vec![n.child()],
            DatasetNode::Batch(n) => vec![n.child()],
            DatasetNode::Shuffle(n) => vec![n.child()],
            DatasetNode::Repeat(n) => vec![n.child()],
            DatasetNode::Skip(n) => vec![n.child()],
            DatasetNode::Take(n) => vec![n.child()],
            DatasetNode::Project(n) => vec![n.child()],
            DatasetNode::Rename(n) => vec![n.child()],
            DatasetNode::Zip(n) => n.children().iter().collect(),
            DatasetNode::Concat(n) => n.children().iter().collect(),
        }
    }

    /// Operator name of this node
    pub fn name(&self) -> &'static str {
        match self {
            DatasetNode::Source(_) => "Source",
            DatasetNode::Map(_) => "Map",
            DatasetNode::Batch(_) => "Batch",
            DatasetNode::Shuffle(_) => "Shuffle",
            DatasetNode::Repeat(_) => "Repeat",
            DatasetNode::Skip(_) => "Skip",
            DatasetNode::Take(_) => "Take",
            DatasetNode::Project(_) => "Project",
            DatasetNode::Rename(_) => "Rename",
            DatasetNode::Zip(_) => "Zip",
            DatasetNode::Concat(_) => "Concat",
        }
    }

    /// Dispatch to the visitor method for this node's variant
    pub fn accept<V: NodeVisitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            DatasetNode::Source(n) => visitor.visit_source(n),
            DatasetNode::Map(n) => visitor.visit_map(n),
            DatasetNode::Batch(n) => visitor.visit_batch(n),
            DatasetNode::Shuffle(n) => visitor.visit_shuffle(n),
            DatasetNode::Repeat(n) => visitor.visit_repeat(n),
            DatasetNode::Skip(n) => visitor.visit_skip(n),
            DatasetNode::Take(n) => visitor.visit_take(n),
            DatasetNode::Project(n) => visitor.visit_project(n),
            DatasetNode::Rename(n) => visitor.visit_rename(n),
            DatasetNode::Zip(n) => visitor.visit_zip(n),
            DatasetNode::Concat(n) => visitor.visit_concat(n),
        }
    }
}

/// Zip several datasets; the result ends with the shortest input
pub fn zip(children: Vec<DatasetNode>) -> Result<DatasetNode> {
    if children.is_empty() {
        return Err(Error::InvalidArgument("zip: no datasets given".into()));
    }
    Ok(DatasetNode::Zip(ZipNode { children }))
}

/// Concatenate several datasets in order
pub fn concat(children: Vec<DatasetNode>) -> Result<DatasetNode> {
    if children.is_empty() {
        return Err(Error::InvalidArgument("concat: no datasets given".into()));
    }
    Ok(DatasetNode::Concat(ConcatNode { children }))
}

impl std::ops::Add for DatasetNode {
    type Output = Result<DatasetNode>;

    fn add(self, rhs: DatasetNode) -> Result<DatasetNode> {
        concat(vec![self, rhs])
    }
}

/// Visitor over the closed set of node variants
pub trait NodeVisitor {
    /// Value produced per node
    type Output;

    /// Visit a source leaf
    fn visit_source(&mut self, node: &SourceNode) -> Self::Output;
    /// Visit a map node
    fn visit_map(&mut self, node: &MapNode) -> Self::Output;
    /// Visit a batch node
    fn visit_batch(&mut self, node: &BatchNode) -> Self::Output;
    /// Visit a shuffle node
    fn visit_shuffle(&mut self, node: &ShuffleNode) -> Self::Output;
    /// Visit a repeat node
    fn visit_repeat(&mut self, node: &RepeatNode) -> Self::Output;
    /// Visit a skip node
    fn visit_skip(&mut self, node: &SkipNode) -> Self::Output;
    /// Visit a take node
    fn visit_take(&mut self, node: &TakeNode) -> Self::Output;
    /// Visit a project node
    fn visit_project(&mut self, node: &ProjectNode) -> Self::Output;
    /// Visit a rename node
    fn visit_rename(&mut self, node: &RenameNode) -> Self::Output;
    /// Visit a zip node
    fn visit_zip(&mut self, node: &ZipNode) -> Self::Output;
    /// Visit a concat node
    fn visit_concat(&mut self, node: &ConcatNode) -> Self::Output;
}

/// Renders the tree one node per line, children indented
struct TreeWriter<'a, 'b> {
    f: &'a mut fmt::Formatter<'b>,
    depth: usize,
}

impl TreeWriter<'_, '_> {
    fn line(&mut self, text: fmt::Arguments<'_>) -> fmt::Result {
        writeln!(self.f, "{:indent$}{}", "", text, indent = self.depth * 2)
    }

    fn children<'n>(&mut self, children: impl IntoIterator<Item = &'n DatasetNode>) -> fmt::Result {
        self.depth += 1;
        for child in children {
            child.accept(self)?;
        }
        self.depth -= 1;
        Ok(())
    }
}

impl NodeVisitor for TreeWriter<'_, '_> {
    type Output = fmt::Result;

    fn visit_source(&mut self, node: &SourceNode) -> fmt::Result {
        self.line(format_args!(
            "{}({}, sampler={})",
            node.kind(),
            node.provider.location().display(),
            node.sampler
        ))
    }

    fn visit_map(&mut self, node: &MapNode) -> fmt::Result {
        let ops: Vec<&str> = node.ops.iter().map(|op| op.name()).collect();
        self.line(format_args!(
            "Map(ops={ops:?}, input={:?}, output={:?})",
            node.input_columns, node.output_columns
        ))?;
        self.children([node.child()])
    }

    fn visit_batch(&mut self, node: &BatchNode) -> fmt::Result {
        self.line(format_args!("Batch({}, drop_remainder={})", node.size, node.drop_remainder))?;
        self.children([node.child()])
    }

    fn visit_shuffle(&mut self, node: &ShuffleNode) -> fmt::Result {
        self.line(format_args!("Shuffle({})", node.buffer_size))?;
        self.children([node.child()])
    }

    fn visit_repeat(&mut self, node: &RepeatNode) -> fmt::Result {
        match node.count {
            Some(count) => self.line(format_args!("Repeat({count})"))?,
            None => self.line(format_args!("Repeat(forever)"))?,
        }
        self.children([node.child()])
    }

    fn visit_skip(&mut self, node: &SkipNode) -> fmt::Result {
        self.line(format_args!("Skip({})", node.count))?;
        self.children([node.child()])
    }

    fn visit_take(&mut self, node: &TakeNode) -> fmt::Result {
        match node.count {
            Some(count) => self.line(format_args!("Take({count})"))?,
            None => self.line(format_args!("Take(all)"))?,
        }
        self.children([node.child()])
    }

    fn visit_project(&mut self, node: &ProjectNode) -> fmt::Result {
        self.line(format_args!("Project({:?})", node.columns))?;
        self.children([node.child()])
    }

    fn visit_rename(&mut self, node: &RenameNode) -> fmt::Result {
        self.line(format_args!("Rename({:?} -> {:?})", node.from, node.to))?;
        self.children([node.child()])
    }

    fn visit_zip(&mut self, node: &ZipNode) -> fmt::Result {
        self.line(format_args!("Zip"))?;
        self.children(&node.children)
    }

    fn visit_concat(&mut self, node: &ConcatNode) -> fmt::Result {
        self.line(format_args!("Concat"))?;
        self.children(&node.children)
    }
}

impl fmt::Display for DatasetNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.accept(&mut TreeWriter { f, depth: 0 })
    }
}
