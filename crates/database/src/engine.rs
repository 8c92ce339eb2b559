//! The narrow columnar-file boundary the writer, reader and manifest rebuild
//! depend on. Storage contracts live above this trait; the file format lives
//! below it (see `parquet::ParquetEngine`).

use crate::config::Codec;
use arrow::array::{Array, Int64Array};
use arrow::compute::{cast, max, min};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parquet: {0}")]
    Pq(#[from] parquet::errors::ParquetError),
    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("{0}")]
    Shape(String),
}

/// Row count and tick extent of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartStats {
    pub rows: i64,
    pub tick_min: i64,
    pub tick_max: i64,
}

/// File-level metadata embedded in every part for forensic inspection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartMetadata {
    pub schema_version: Option<String>,
    pub table_name: Option<String>,
    pub run_id: Option<String>,
    pub num_rows: i64,
}

pub const META_SCHEMA_VERSION: &str = "runlake.schema_version";
pub const META_TABLE_NAME: &str = "runlake.table_name";
pub const META_RUN_ID: &str = "runlake.run_id";

/// How a part is encoded.
#[derive(Debug, Clone)]
pub struct PartWriteOptions {
    pub compression: Codec,
    pub row_group_size: usize,
    /// Key/value pairs embedded in the file footer.
    pub metadata: Vec<(String, String)>,
}

pub type BatchIter = Box<dyn Iterator<Item = Result<RecordBatch, EngineError>> + Send>;

pub trait TableEngine: Send + Sync {
    /// Extension of the files this engine produces, without the dot.
    fn extension(&self) -> &'static str;

    /// Write `batch` as one complete file at `path`, replacing anything there.
    /// Durability (fsync) and placement (rename) are the caller's job.
    fn write_part(&self, path: &Path, batch: &RecordBatch, opts: &PartWriteOptions) -> Result<(), EngineError>;

    /// Open a part as a lazy stream of batches.
    fn open_part(&self, path: &Path) -> Result<BatchIter, EngineError>;

    /// Recompute row count and tick extent from file content.
    fn part_stats(&self, path: &Path, tick_column: &str) -> Result<PartStats, EngineError>;

    /// Read the embedded metadata and footer row count without scanning rows.
    fn read_metadata(&self, path: &Path) -> Result<PartMetadata, EngineError>;
}

/// The tick column of `batch` as Int64, casting from other integer widths.
pub fn tick_values(batch: &RecordBatch, tick_column: &str) -> Result<Int64Array, EngineError> {
    let idx = batch.schema().index_of(tick_column)?;
    let col = batch.column(idx);
    if !col.data_type().is_integer() {
        return Err(EngineError::Shape(format!(
            "column {tick_column} is {}, expected an integer type",
            col.data_type()
        )));
    }
    let col = cast(col, &DataType::Int64)?;
    col.as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| EngineError::Shape(format!("column {tick_column} is not Int64")))
}

/// Fold one batch's tick extent into `acc`. Null ticks are skipped.
/// Call `finish_stats` once every batch has been folded.
pub fn accumulate_stats(acc: &mut Option<PartStats>, batch: &RecordBatch, tick_column: &str) -> Result<(), EngineError> {
    let ticks = tick_values(batch, tick_column)?;
    let s = acc.get_or_insert(PartStats {
        rows: 0,
        tick_min: i64::MAX,
        tick_max: i64::MIN,
    });
    s.rows += batch.num_rows() as i64;
    if let Some(lo) = min(&ticks) {
        s.tick_min = s.tick_min.min(lo);
    }
    if let Some(hi) = max(&ticks) {
        s.tick_max = s.tick_max.max(hi);
    }
    Ok(())
}

/// Resolve accumulated stats. No ticks seen falls back to a zero extent.
pub fn finish_stats(acc: Option<PartStats>) -> PartStats {
    match acc {
        Some(s) if s.tick_min <= s.tick_max => s,
        Some(s) => PartStats {
            rows: s.rows,
            tick_min: 0,
            tick_max: 0,
        },
        None => PartStats::default(),
    }
}

/// Stats for an in-memory batch.
pub fn batch_stats(batch: &RecordBatch, tick_column: &str) -> Result<PartStats, EngineError> {
    let mut acc = None;
    accumulate_stats(&mut acc, batch, tick_column)?;
    Ok(finish_stats(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    #[test]
    fn stats_cast_narrow_ticks() {
        let schema = Arc::new(Schema::new(vec![Field::new("tick", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![5, 2, 9]))]).unwrap();
        let s = batch_stats(&batch, "tick").unwrap();
        assert_eq!(s, PartStats { rows: 3, tick_min: 2, tick_max: 9 });
    }

    #[test]
    fn stats_accumulate_across_batches() {
        let schema = Arc::new(Schema::new(vec![Field::new("tick", DataType::Int64, true)]));
        let b1 = RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![Some(10), None]))]).unwrap();
        let b2 = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![3, 40]))]).unwrap();
        let mut acc = None;
        accumulate_stats(&mut acc, &b1, "tick").unwrap();
        accumulate_stats(&mut acc, &b2, "tick").unwrap();
        assert_eq!(finish_stats(acc), PartStats { rows: 4, tick_min: 3, tick_max: 40 });
    }

    #[test]
    fn non_integer_tick_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("tick", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow::array::StringArray::from(vec!["1"]))],
        )
        .unwrap();
        assert!(matches!(batch_stats(&batch, "tick"), Err(EngineError::Shape(_))));
    }
}
