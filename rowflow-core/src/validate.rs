//! Tree validation: resolve a [`DatasetNode`] tree into an executable [`Plan`]
//!
//! Validation walks the tree once, bottom-up. It opens every source, builds
//! every sampler against the source cardinality, derives per-node seeds and
//! computes the output schema of each node. Any node whose parameters do
//! not fit its children's schemas fails here, before a single row flows.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::ExecutionConfig;
use crate::dataset::{
    BatchNode, ConcatNode, DatasetNode, MapNode, NodeVisitor, ProjectNode, RenameNode, RepeatNode,
    ShuffleNode, SkipNode, SourceNode, TakeNode, ZipNode,
};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::sampler::BuiltSampler;
use crate::schema::{Field, Schema};
use crate::source::SampleReader;
use crate::tensor::Tensor;
use crate::transform::{apply_chain, TensorOp};

/// Seed of the node with pre-order position `ordinal`
pub fn node_seed(base: u64, ordinal: usize) -> u64 {
    base ^ (ordinal as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// A validated node, ready to be compiled
#[derive(Debug)]
pub struct Plan {
    /// Pre-order position in the tree
    pub ordinal: usize,

    /// Seed for this node's randomness
    pub seed: u64,

    /// Columns of the rows this node emits
    pub schema: Schema,

    /// What the node does
    pub kind: PlanKind,
}

/// Operation of a [`Plan`] node, with its validated parameters
#[derive(Debug)]
pub enum PlanKind {
    /// Read the samples listed by `sampler` from `reader`
    Source {
        /// Storage layout name
        name: String,
        /// Opened reader
        reader: Arc<dyn SampleReader>,
        /// Index sequence, reused by every epoch
        sampler: BuiltSampler,
    },
    /// Apply tensor operations
    Map {
        /// Upstream
        child: Arc<Plan>,
        /// Resolved column layout
        map: Arc<MapPlan>,
    },
    /// Stack consecutive rows
    Batch {
        /// Upstream
        child: Arc<Plan>,
        /// Rows per batch
        size: usize,
        /// Discard a final short batch
        drop_remainder: bool,
    },
    /// Reorder through a bounded buffer
    Shuffle {
        /// Upstream
        child: Arc<Plan>,
        /// Buffer capacity
        buffer_size: usize,
    },
    /// Replay the child
    Repeat {
        /// Upstream, recompiled per epoch
        child: Arc<Plan>,
        /// Epochs, `None` for unbounded
        count: Option<usize>,
    },
    /// Discard leading rows
    Skip {
        /// Upstream
        child: Arc<Plan>,
        /// Rows to discard
        count: usize,
    },
    /// Keep leading rows
    Take {
        /// Upstream
        child: Arc<Plan>,
        /// Rows to keep, `None` for all
        count: Option<usize>,
    },
    /// Select columns
    Project {
        /// Upstream
        child: Arc<Plan>,
        /// Columns to keep
        columns: Vec<String>,
    },
    /// Rename columns
    Rename {
        /// Upstream
        child: Arc<Plan>,
        /// Existing names
        from: Vec<String>,
        /// New names
        to: Vec<String>,
    },
    /// Merge rows side by side
    Zip {
        /// Inputs in merge order
        children: Vec<Arc<Plan>>,
    },
    /// Append streams
    Concat {
        /// Inputs in stream order
        children: Vec<Arc<Plan>>,
    },
}

impl Plan {
    /// Operator name
    pub fn name(&self) -> &str {
        match &self.kind {
            PlanKind::Source { name, .. } => name,
            PlanKind::Map { .. } => "Map",
            PlanKind::Batch { .. } => "Batch",
            PlanKind::Shuffle { .. } => "Shuffle",
            PlanKind::Repeat { .. } => "Repeat",
            PlanKind::Skip { .. } => "Skip",
            PlanKind::Take { .. } => "Take",
            PlanKind::Project { .. } => "Project",
            PlanKind::Rename { .. } => "Rename",
            PlanKind::Zip { .. } => "Zip",
            PlanKind::Concat { .. } => "Concat",
        }
    }

    /// Direct children
    pub fn children(&self) -> Vec<&Arc<Plan>> {
        match &self.kind {
            PlanKind::Source { .. } => Vec::new(),
            PlanKind::Map { child, .. }
            | PlanKind::Batch { child, .. }
            | PlanKind::Shuffle { child, .. }
            | PlanKind::Repeat { child, .. }
            | PlanKind::Skip { child, .. }
            | PlanKind::Take { child, .. }
            | PlanKind::Project { child, .. }
            | PlanKind::Rename { child, .. } => vec![child],
            PlanKind::Zip { children } | PlanKind::Concat { children } => children.iter().collect(),
        }
    }

    /// Number of rows this node emits, `None` when unbounded
    pub fn num_rows(&self) -> Option<usize> {
        match &self.kind {
            PlanKind::Source { sampler, .. } => Some(sampler.len()),
            PlanKind::Map { child, .. }
            | PlanKind::Shuffle { child, .. }
            | PlanKind::Project { child, .. }
            | PlanKind::Rename { child, .. } => child.num_rows(),
            PlanKind::Batch {
                child,
                size,
                drop_remainder,
            } => child.num_rows().map(|rows| {
                if *drop_remainder {
                    rows / size
                } else {
                    rows.div_ceil(*size)
                }
            }),
            PlanKind::Repeat { child, count } => match (child.num_rows(), count) {
                (Some(0), _) => Some(0),
                (Some(rows), Some(count)) => Some(rows.saturating_mul(*count)),
                _ => None,
            },
            PlanKind::Skip { child, count } => child.num_rows().map(|rows| rows.saturating_sub(*count)),
            PlanKind::Take { child, count } => match (child.num_rows(), count) {
                (Some(rows), Some(count)) => Some(rows.min(*count)),
                (None, Some(count)) => Some(*count),
                (rows, None) => rows,
            },
            // An unbounded input does not lengthen a zip
            PlanKind::Zip { children } => children.iter().filter_map(|c| c.num_rows()).min(),
            PlanKind::Concat { children } => children
                .iter()
                .map(|c| c.num_rows())
                .try_fold(0usize, |acc, rows| rows.map(|r| acc.saturating_add(r))),
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{} #{} {}", "", self.name(), self.ordinal, self.schema, indent = depth * 2)?;
        for child in self.children() {
            child.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}

/// Resolved column layout of a map node
///
/// Outputs take the position of the first input column in the row; the
/// remaining input columns are consumed.
#[derive(Debug)]
pub struct MapPlan {
    ops: Vec<Arc<dyn TensorOp>>,
    input_columns: Vec<String>,
    output_columns: Vec<String>,
    project_columns: Option<Vec<String>>,
}

impl MapPlan {
    /// Input columns after defaulting
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    /// Output columns after defaulting
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Apply the operations to one row
    pub fn apply(&self, row: Row) -> Result<Row> {
        let mut entries: Vec<(String, Option<Tensor>)> =
            row.into_iter().map(|(name, tensor)| (name, Some(tensor))).collect();

        let mut outputs = Vec::with_capacity(self.output_columns.len());
        for (input, output) in self.input_columns.iter().zip(&self.output_columns) {
            let tensor = entries
                .iter_mut()
                .find(|(name, _)| name == input)
                .and_then(|(_, tensor)| tensor.take())
                .ok_or_else(|| Error::Schema(format!("map: input column '{input}' missing from row")))?;
            let result = apply_chain(&self.ops, tensor).map_err(|(op, source)| Error::Transform { op, source })?;
            outputs.push((output.clone(), result));
        }

        let mut out = Row::new();
        let mut pending = Some(outputs);
        for (name, tensor) in entries {
            match tensor {
                Some(tensor) => {
                    out.insert(name, tensor);
                }
                None => {
                    if let Some(outputs) = pending.take() {
                        for (name, tensor) in outputs {
                            out.insert(name, tensor);
                        }
                    }
                }
            }
        }

        match &self.project_columns {
            Some(columns) => out.project(columns),
            None => Ok(out),
        }
    }

    fn resolve(node: &MapNode, child: &Schema) -> Result<(Self, Schema)> {
        let input_columns = if node.input_columns().is_empty() {
            let first = child
                .first()
                .ok_or_else(|| Error::Schema("map: input has no columns".into()))?;
            vec![first.name().to_string()]
        } else {
            node.input_columns().to_vec()
        };
        let output_columns = if node.output_columns().is_empty() {
            input_columns.clone()
        } else {
            node.output_columns().to_vec()
        };
        if input_columns.len() != output_columns.len() {
            return Err(Error::Config(format!(
                "map: {} output columns for {} input columns",
                output_columns.len(),
                input_columns.len()
            )));
        }

        for input in &input_columns {
            if !child.contains(input) {
                return Err(Error::Schema(format!(
                    "map: input column '{input}' does not exist, available columns are {:?}",
                    child.column_names()
                )));
            }
        }
        for output in &output_columns {
            if child.contains(output) && !input_columns.contains(output) {
                return Err(Error::Schema(format!(
                    "map: output column '{output}' collides with an existing column"
                )));
            }
        }

        let mut fields = Vec::with_capacity(child.len());
        let mut placed = false;
        for field in child.fields() {
            if !input_columns.iter().any(|c| c == field.name()) {
                fields.push(field.clone());
                continue;
            }
            if placed {
                continue;
            }
            placed = true;
            for (input, output) in input_columns.iter().zip(&output_columns) {
                let Some(input_field) = child.field(input) else {
                    continue;
                };
                let mapped: Field = node
                    .ops()
                    .iter()
                    .fold(input_field.clone(), |field, op| op.output_field(&field));
                fields.push(mapped.renamed(output));
            }
        }
        let mut schema = Schema::new(fields)?;

        let project_columns = if node.project_columns().is_empty() {
            None
        } else {
            schema = schema.project(node.project_columns())?;
            Some(node.project_columns().to_vec())
        };

        Ok((
            Self {
                ops: node.ops().to_vec(),
                input_columns,
                output_columns,
                project_columns,
            },
            schema,
        ))
    }
}

/// Builds plan nodes, numbering them in pre-order
struct Validator<'a> {
    config: &'a ExecutionConfig,
    next_ordinal: usize,
}

impl Validator<'_> {
    fn ordinal(&mut self) -> (usize, u64) {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        (ordinal, node_seed(self.config.seed, ordinal))
    }

    /// Plan for a node with one child and an unchanged schema
    fn passthrough(&mut self, child: &DatasetNode, make: impl FnOnce(Arc<Plan>) -> PlanKind) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let child = child.accept(self)?;
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema: child.schema.clone(),
            kind: make(child),
        }))
    }

    fn children(&mut self, children: &[DatasetNode]) -> Result<Vec<Arc<Plan>>> {
        children.iter().map(|c| c.accept(self)).collect()
    }
}

impl NodeVisitor for Validator<'_> {
    type Output = Result<Arc<Plan>>;

    fn visit_source(&mut self, node: &SourceNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let reader = node.provider().open()?;
        let sampler = node
            .sampler()
            .build(reader.num_samples(), seed, reader.class_index())?;
        debug!(
            "Opened {} at {} with {} samples, sampler selects {}",
            node.kind(),
            node.provider().location().display(),
            reader.num_samples(),
            sampler.len()
        );
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema: reader.schema().clone(),
            kind: PlanKind::Source {
                name: node.kind().to_string(),
                reader,
                sampler,
            },
        }))
    }

    fn visit_map(&mut self, node: &MapNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let child = node.child().accept(self)?;
        let (map, schema) = MapPlan::resolve(node, &child.schema)?;
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema,
            kind: PlanKind::Map {
                child,
                map: Arc::new(map),
            },
        }))
    }

    fn visit_batch(&mut self, node: &BatchNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let child = node.child().accept(self)?;
        let size = node.size();
        let drop_remainder = node.drop_remainder();
        let schema = child.schema.map_fields(|field| {
            let shape = if drop_remainder {
                field.shape().map(|s| std::iter::once(size).chain(s.iter().copied()).collect())
            } else {
                None
            };
            field.with_shape(shape)
        });
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema,
            kind: PlanKind::Batch {
                child,
                size,
                drop_remainder,
            },
        }))
    }

    fn visit_shuffle(&mut self, node: &ShuffleNode) -> Result<Arc<Plan>> {
        let buffer_size = node.buffer_size();
        self.passthrough(node.child(), |child| PlanKind::Shuffle { child, buffer_size })
    }

    fn visit_repeat(&mut self, node: &RepeatNode) -> Result<Arc<Plan>> {
        let count = node.count();
        self.passthrough(node.child(), |child| PlanKind::Repeat { child, count })
    }

    fn visit_skip(&mut self, node: &SkipNode) -> Result<Arc<Plan>> {
        let count = node.count();
        self.passthrough(node.child(), |child| PlanKind::Skip { child, count })
    }

    fn visit_take(&mut self, node: &TakeNode) -> Result<Arc<Plan>> {
        let count = node.count();
        self.passthrough(node.child(), |child| PlanKind::Take { child, count })
    }

    fn visit_project(&mut self, node: &ProjectNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let child = node.child().accept(self)?;
        let schema = child.schema.project(node.columns())?;
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema,
            kind: PlanKind::Project {
                child,
                columns: node.columns().to_vec(),
            },
        }))
    }

    fn visit_rename(&mut self, node: &RenameNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let child = node.child().accept(self)?;
        let schema = child.schema.rename(node.from(), node.to())?;
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema,
            kind: PlanKind::Rename {
                child,
                from: node.from().to_vec(),
                to: node.to().to_vec(),
            },
        }))
    }

    fn visit_zip(&mut self, node: &ZipNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let children = self.children(node.children())?;
        let schemas: Vec<Schema> = children.iter().map(|c| c.schema.clone()).collect();
        let schema = Schema::merge(&schemas)?;
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema,
            kind: PlanKind::Zip { children },
        }))
    }

    fn visit_concat(&mut self, node: &ConcatNode) -> Result<Arc<Plan>> {
        let (ordinal, seed) = self.ordinal();
        let children = self.children(node.children())?;
        let first = &children[0].schema;
        for other in &children[1..] {
            if other.schema.name_set() != first.name_set() {
                return Err(Error::Schema(format!(
                    "concat: column names differ, {:?} vs {:?}",
                    first.column_names(),
                    other.schema.column_names()
                )));
            }
        }
        // Shapes that differ between inputs become variable
        let schema = first.map_fields(|field| {
            let agree = children[1..].iter().all(|c| {
                c.schema
                    .field(field.name())
                    .is_some_and(|f| f.shape() == field.shape() && f.data_type() == field.data_type())
            });
            if agree {
                field.clone()
            } else {
                field.with_shape(None)
            }
        });
        Ok(Arc::new(Plan {
            ordinal,
            seed,
            schema,
            kind: PlanKind::Concat { children },
        }))
    }
}

/// Validate `node` and resolve it into a plan
pub fn validate(node: &DatasetNode, config: &ExecutionConfig) -> Result<Arc<Plan>> {
    config.validate()?;
    let plan = node.accept(&mut Validator {
        config,
        next_ordinal: 0,
    })?;
    debug!("Validated plan:\n{}", plan);
    Ok(plan)
}

impl DatasetNode {
    /// Columns of the rows this tree produces
    pub fn output_schema(&self, config: &ExecutionConfig) -> Result<Schema> {
        Ok(validate(self, config)?.schema.clone())
    }

    /// Number of rows this tree produces, `None` when unbounded
    pub fn dataset_size(&self, config: &ExecutionConfig) -> Result<Option<usize>> {
        Ok(validate(self, config)?.num_rows())
    }
}
