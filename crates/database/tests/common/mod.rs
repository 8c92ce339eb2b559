#![allow(dead_code)]

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use lake_database::{Dataset, IoSettings, RunId};
use lake_types::{DType, SchemaVersion, TableContract};
use std::sync::Arc;

pub const IDENTITY_EDGES: &str = "identity_edges";

pub fn identity_edges_contract() -> TableContract {
    TableContract::new(
        IDENTITY_EDGES,
        [
            ("bucket", DType::I64),
            ("tick", DType::I64),
            ("observer_agent_id", DType::Str),
            ("edge_kind", DType::Str),
            ("subject_id", DType::Str),
            ("object_id", DType::Str),
            ("related_agent_id", DType::Str),
            ("token_id", DType::Str),
            ("edge_weight", DType::F64),
            ("edge_sign", DType::I64),
        ],
        ["bucket", "tick", "observer_agent_id", "edge_kind", "edge_weight"],
        ["subject_id", "object_id", "related_agent_id", "token_id", "edge_sign"],
        SchemaVersion::new(0, 1, "2025-09-20").expect("valid version"),
    )
    .expect("valid contract")
}

/// Minimal identity_edges frame: the required columns only.
pub fn identity_edges_frame(ticks: impl IntoIterator<Item = i64>) -> RecordBatch {
    let ticks: Vec<i64> = ticks.into_iter().collect();
    let n = ticks.len();
    RecordBatch::try_from_iter(vec![
        ("tick", Arc::new(Int64Array::from(ticks)) as ArrayRef),
        (
            "observer_agent_id",
            Arc::new(StringArray::from_iter_values((0..n).map(|i| format!("A{}", i % 3)))) as ArrayRef,
        ),
        (
            "edge_kind",
            Arc::new(StringArray::from(vec!["self_to_object"; n])) as ArrayRef,
        ),
        (
            "edge_weight",
            Arc::new(Float64Array::from_iter_values((0..n).map(|i| i as f64))) as ArrayRef,
        ),
    ])
    .expect("frame")
}

pub fn dataset(root: &std::path::Path, run: &str) -> Dataset {
    let settings = IoSettings::with_root(root);
    Dataset::new(settings, RunId::parse(run).expect("run id")).expect("dataset")
}

pub fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

pub fn ticks_of(batches: &[RecordBatch]) -> Vec<i64> {
    let mut out = Vec::new();
    for b in batches {
        let col = b.column_by_name("tick").expect("tick column");
        let col = col.as_any().downcast_ref::<Int64Array>().expect("int64 ticks");
        out.extend(col.values().iter().copied());
    }
    out.sort_unstable();
    out
}
