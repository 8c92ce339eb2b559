//! Append: split a frame by bucket and land each bucket as one new immutable part.

use crate::config::IoSettings;
use crate::engine::{
    batch_stats, tick_values, PartWriteOptions, TableEngine, META_RUN_ID, META_SCHEMA_VERSION, META_TABLE_NAME,
};
use crate::error::{IoError, Result};
use crate::fs::{fsync_path, remove_quietly, rename_atomic};
use crate::manifest::{load_manifest, new_manifest, write_manifest, PartMeta, TableManifest};
use crate::paths::{bucket_dir, bucket_id, manifest_path, part_paths, validate_table_name, RunId};
use crate::validate::validate_frame;
use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::compute::filter_record_batch;
use arrow::compute::kernels::cmp::eq;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use lake_types::{TableContract, BUCKET_COLUMN, TICK_COLUMN};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOptions {
    /// Run the contract validator. Tick and bucket checks always run.
    pub validate_schema: bool,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self { validate_schema: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartSummary {
    pub bucket_id: i64,
    pub path: PathBuf,
    pub rows: i64,
    pub bytes: u64,
    pub tick_min: i64,
    pub tick_max: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendSummary {
    pub table: String,
    pub run_id: String,
    pub parts: Vec<PartSummary>,
    pub rows_written: i64,
    /// Touched bucket ids, ascending.
    pub buckets: Vec<i64>,
}

impl AppendSummary {
    fn empty(table: &str, run_id: &RunId) -> Self {
        Self {
            table: table.to_string(),
            run_id: run_id.to_string(),
            parts: Vec::new(),
            rows_written: 0,
            buckets: Vec::new(),
        }
    }
}

/// Derive the bucket column for every row. Null or negative ticks fail here,
/// before anything touches disk.
fn derive_buckets(batch: &RecordBatch, table: &str, bucket_size: i64) -> Result<Int64Array> {
    let ticks = tick_values(batch, TICK_COLUMN)
        .map_err(|e| IoError::schema(table, "tick column is not usable").with_source(e))?;
    if ticks.null_count() > 0 {
        return Err(IoError::schema(
            table,
            format!("tick column contains {} null values", ticks.null_count()),
        ));
    }
    let buckets = ticks
        .values()
        .iter()
        .map(|&t| bucket_id(t, bucket_size))
        .collect::<Result<Vec<i64>>>()
        .map_err(|e| e.for_table(table))?;
    Ok(Int64Array::from(buckets))
}

/// `batch` with `bucket` set to `buckets`, replacing any caller-supplied column.
fn with_bucket_column(batch: &RecordBatch, buckets: Int64Array, table: &str) -> Result<RecordBatch> {
    let schema = batch.schema();
    let bucket_field = Arc::new(Field::new(BUCKET_COLUMN, DataType::Int64, false));
    let bucket_array: ArrayRef = Arc::new(buckets);
    let mut fields = Vec::with_capacity(schema.fields().len() + 1);
    let mut columns = Vec::with_capacity(batch.num_columns() + 1);
    let mut replaced = false;
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if field.name() == BUCKET_COLUMN {
            fields.push(bucket_field.clone());
            columns.push(bucket_array.clone());
            replaced = true;
        } else {
            fields.push(field.clone());
            columns.push(column.clone());
        }
    }
    if !replaced {
        fields.push(bucket_field);
        columns.push(bucket_array);
    }
    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    RecordBatch::try_new(schema, columns)
        .map_err(|e| IoError::schema(table, "failed to attach bucket column").with_source(e))
}

fn rows_for_bucket(batch: &RecordBatch, buckets: &Int64Array, bucket: i64, table: &str) -> Result<RecordBatch> {
    eq(buckets, &Int64Array::new_scalar(bucket))
        .and_then(|mask| filter_record_batch(batch, &mask))
        .map_err(|e| IoError::schema(table, format!("failed to select rows for bucket {bucket}")).with_source(e))
}

/// Everything one append call needs to know about where and how to write.
#[derive(Clone, Copy)]
pub struct AppendTarget<'a> {
    pub engine: &'a dyn TableEngine,
    pub settings: &'a IoSettings,
    pub run_id: &'a RunId,
    pub table: &'a str,
    pub contract: &'a TableContract,
}

/// Append `batch` to `table` as one new part per touched bucket.
///
/// * No part is written unless the whole frame validates.
/// * A `Write` error aborts the call; buckets already landed stay indexed.
/// * A `Manifest` error after the writes means the parts are durable but not
///   indexed; `rebuild_manifest` recovers them.
pub fn append(target: &AppendTarget<'_>, batch: &RecordBatch, opts: AppendOptions) -> Result<AppendSummary> {
    let AppendTarget {
        settings,
        run_id,
        table,
        contract,
        ..
    } = *target;
    validate_table_name(table)?;
    if contract.name != table {
        return Err(IoError::schema(
            table,
            format!("contract is for table '{}', not '{table}'", contract.name),
        ));
    }
    contract.validate().map_err(|e| IoError::from(e).for_table(table))?;

    if batch.schema().index_of(TICK_COLUMN).is_err() {
        return Err(IoError::schema(table, format!("missing required '{TICK_COLUMN}' column")));
    }
    if batch.num_rows() == 0 {
        debug!(table, "empty frame; nothing to append");
        return Ok(AppendSummary::empty(table, run_id));
    }

    let buckets = derive_buckets(batch, table, settings.tick_bucket_size)?;
    let framed = with_bucket_column(batch, buckets.clone(), table)?;
    let framed = if opts.validate_schema {
        validate_frame(&framed, contract, settings.strict_schema)?
    } else {
        framed
    };

    let manifest_file = manifest_path(settings, run_id, table);
    let mut manifest = load_manifest(&manifest_file, table)?.unwrap_or_else(|| new_manifest(table));

    let write_opts = PartWriteOptions {
        compression: settings.compression,
        row_group_size: settings.row_group_size,
        metadata: vec![
            (META_SCHEMA_VERSION.to_string(), contract.version.to_string()),
            (META_TABLE_NAME.to_string(), table.to_string()),
            (META_RUN_ID.to_string(), run_id.to_string()),
        ],
    };

    let distinct: BTreeSet<i64> = buckets.values().iter().copied().collect();
    let mut summary = AppendSummary::empty(table, run_id);

    for &bucket in &distinct {
        let rows = rows_for_bucket(&framed, &buckets, bucket, table)?;
        manifest.begin_partition(bucket);
        match write_bucket(target, &rows, bucket, &write_opts) {
            Ok((part, summary_part)) => {
                manifest.update_with_new_part(bucket, part);
                summary.parts.push(summary_part);
            }
            Err(e) => {
                manifest.abort_partition(bucket);
                if !summary.parts.is_empty() {
                    persist_after_failure(&manifest_file, &manifest);
                }
                return Err(e);
            }
        }
    }

    summary.rows_written = framed.num_rows() as i64;
    summary.buckets = distinct.into_iter().collect();

    write_manifest(&manifest_file, &manifest)?;
    info!(
        table,
        run_id = %run_id,
        rows = summary.rows_written,
        parts = summary.parts.len(),
        buckets = ?summary.buckets,
        "append complete"
    );
    Ok(summary)
}

/// Keep buckets that landed before a failing one indexed.
fn persist_after_failure(path: &std::path::Path, manifest: &TableManifest) {
    if let Err(e) = write_manifest(path, manifest) {
        warn!(table = %manifest.table, error = %e, "could not index parts written before the failure");
    }
}

/// tmp write -> fsync -> rename for one bucket. The temp file is removed on any failure,
/// and nothing after the rename can fail.
fn write_bucket(
    target: &AppendTarget<'_>,
    rows: &RecordBatch,
    bucket: i64,
    opts: &PartWriteOptions,
) -> Result<(PartMeta, PartSummary)> {
    let table = target.table;
    let dir = bucket_dir(target.settings, target.run_id, table, bucket)?;
    let stats = batch_stats(rows, TICK_COLUMN)
        .map_err(|e| IoError::write(table, bucket, &dir, "failed to compute part stats", e))?;

    fs::create_dir_all(&dir)
        .map_err(|e| IoError::write(table, bucket, &dir, "failed to create bucket directory", e))?;

    let uuid_hex = Uuid::new_v4().simple().to_string();
    let paths = part_paths(target.settings, target.run_id, table, bucket, &uuid_hex)?;

    let landed = target
        .engine
        .write_part(&paths.tmp_path, rows, opts)
        .map_err(|e| IoError::write(table, bucket, &paths.tmp_path, "failed to write temp part", e))
        .and_then(|()| {
            fsync_path(&paths.tmp_path)
                .map_err(|e| IoError::write(table, bucket, &paths.tmp_path, "failed to fsync temp part", e))
        })
        .and_then(|()| {
            fs::metadata(&paths.tmp_path)
                .map(|m| m.len())
                .map_err(|e| IoError::write(table, bucket, &paths.tmp_path, "failed to stat temp part", e))
        })
        .and_then(|bytes| {
            rename_atomic(&paths.tmp_path, &paths.final_path)
                .map(|()| bytes)
                .map_err(|e| IoError::write(table, bucket, &paths.final_path, "failed to rename part into place", e))
        });
    let bytes = match landed {
        Ok(bytes) => bytes,
        Err(e) => {
            remove_quietly(&paths.tmp_path);
            return Err(e);
        }
    };

    debug!(table, bucket, rows = stats.rows, bytes, path = %paths.final_path.display(), "part written");

    let part = PartMeta {
        path: paths.file_name(),
        rows: stats.rows,
        bytes,
        tick_min: stats.tick_min,
        tick_max: stats.tick_max,
        created_at: Utc::now(),
    };
    let summary = PartSummary {
        bucket_id: bucket,
        path: paths.final_path,
        rows: stats.rows,
        bytes,
        tick_min: stats.tick_min,
        tick_max: stats.tick_max,
    };
    Ok((part, summary))
}
