//! Shared helpers for the pipeline integration tests

#![allow(dead_code)]

use std::sync::Once;

use rowflow_core::{DataType, DatasetNode, ExecutionConfig, Field, Result, Row, Schema, Tensor};
use rowflow_parallel::{CreateIterator, DatasetIterator};
use rowflow_readers::generator;

static INIT: Once = Once::new();

/// Route pipeline logs to the test output
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub fn int_schema(columns: &[&str]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|name| Field::new(name, DataType::Int32, vec![]))
            .collect(),
    )
    .unwrap()
}

/// `rows` rows; every column holds the row index plus the column offset
pub fn numbers(rows: usize, columns: &[&'static str]) -> DatasetNode {
    let names = columns.to_vec();
    generator("numbers", int_schema(columns), rows, move |i| {
        let i = i32::try_from(i).unwrap();
        Row::from_columns(names.iter().map(|name| (*name, Tensor::scalar(i))))
    })
}

pub fn int(row: &Row, column: &str) -> i32 {
    row[column].to_vec::<i32>().unwrap()[0]
}

pub fn ints(row: &Row, column: &str) -> Vec<i32> {
    row[column].to_vec::<i32>().unwrap()
}

/// Pull every row until end of stream
pub fn drain(iter: &mut DatasetIterator) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = iter.get_next_row()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Build an iterator, drain it and stop it
pub fn collect(node: &DatasetNode, config: ExecutionConfig) -> Result<Vec<Row>> {
    init_tracing();
    let mut iter = node.create_iterator_with(config)?;
    let rows = drain(&mut iter);
    iter.stop();
    rows
}
