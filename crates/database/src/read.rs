//! Range-filtered scans over the parts a manifest indexes.
//!
//! Pruning picks candidate files from manifest tick extents; the row-level tick
//! filter applied afterwards is what makes the result exact.

use crate::config::IoSettings;
use crate::engine::{tick_values, BatchIter, TableEngine};
use crate::error::{IoError, Result};
use crate::manifest::{load_manifest, resolve_part_path};
use crate::paths::{manifest_path, table_dir, validate_table_name, RunId};
use arrow::array::{BooleanArray, Int64Array};
use arrow::compute::and;
use arrow::compute::filter_record_batch;
use arrow::compute::kernels::cmp::{gt_eq, lt_eq};
use arrow::record_batch::RecordBatch;
use lake_types::TICK_COLUMN;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Inclusive tick bounds. A missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl TickRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(min: i64, max: i64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Does `[lo, hi]` intersect this range?
    pub fn overlaps(&self, lo: i64, hi: i64) -> bool {
        self.min.map_or(true, |m| hi >= m) && self.max.map_or(true, |m| lo <= m)
    }

    fn mask(&self, ticks: &Int64Array) -> arrow::error::Result<Option<BooleanArray>> {
        let lo = self.min.map(|m| gt_eq(ticks, &Int64Array::new_scalar(m))).transpose()?;
        let hi = self.max.map(|m| lt_eq(ticks, &Int64Array::new_scalar(m))).transpose()?;
        Ok(match (lo, hi) {
            (Some(a), Some(b)) => Some(and(&a, &b)?),
            (a, b) => a.or(b),
        })
    }
}

/// Lazy row source over the selected parts, one file open at a time.
pub struct PartScan {
    engine: Arc<dyn TableEngine>,
    table: String,
    range: TickRange,
    paths: Vec<PathBuf>,
    next_path: usize,
    current: Option<(PathBuf, BatchIter)>,
}

impl PartScan {
    /// Files this scan will read, in bucket order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn filter_rows(&self, batch: RecordBatch) -> arrow::error::Result<RecordBatch> {
        if self.range.is_unbounded() {
            return Ok(batch);
        }
        let ticks = tick_values(&batch, TICK_COLUMN).map_err(|e| arrow::error::ArrowError::ExternalError(Box::new(e)))?;
        match self.range.mask(&ticks)? {
            Some(mask) => filter_record_batch(&batch, &mask),
            None => Ok(batch),
        }
    }
}

impl Iterator for PartScan {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((path, batches)) = self.current.as_mut() {
                match batches.next() {
                    Some(Ok(batch)) => {
                        let path = path.clone();
                        match self.filter_rows(batch) {
                            Ok(b) if b.num_rows() == 0 => continue,
                            Ok(b) => return Some(Ok(b)),
                            Err(e) => {
                                self.current = None;
                                return Some(Err(IoError::manifest(
                                    &self.table,
                                    Some(&path),
                                    "failed to filter part rows",
                                )
                                .with_source(e)));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let err = IoError::manifest(&self.table, Some(path.as_path()), "failed to read indexed part")
                            .with_source(e);
                        self.current = None;
                        return Some(Err(err));
                    }
                    None => self.current = None,
                }
            }
            let path = self.paths.get(self.next_path)?.clone();
            self.next_path += 1;
            match self.engine.open_part(&path) {
                Ok(batches) => self.current = Some((path, batches)),
                Err(e) => {
                    return Some(Err(
                        IoError::manifest(&self.table, Some(&path), "failed to open indexed part").with_source(e)
                    ));
                }
            }
        }
    }
}

/// Plan a scan. The manifest must exist: a missing one is a `Manifest` error
/// rather than a silent filesystem walk.
pub fn scan(
    engine: Arc<dyn TableEngine>,
    settings: &IoSettings,
    run_id: &RunId,
    table: &str,
    range: TickRange,
) -> Result<PartScan> {
    validate_table_name(table)?;
    let mpath = manifest_path(settings, run_id, table);
    let manifest = load_manifest(&mpath, table)?.ok_or_else(|| {
        IoError::manifest(
            table,
            Some(&mpath),
            "manifest not found; run rebuild_manifest to index existing parts",
        )
    })?;

    let tdir = table_dir(settings, run_id, table);
    let mut paths = Vec::new();
    for partition in manifest.partitions.values() {
        if !range.overlaps(partition.tick_min, partition.tick_max) {
            continue;
        }
        for part in &partition.parts {
            if range.overlaps(part.tick_min, part.tick_max) {
                paths.push(resolve_part_path(&tdir, partition, part)?);
            }
        }
    }
    debug!(table, ?range, files = paths.len(), "scan planned");

    Ok(PartScan {
        engine,
        table: table.to_string(),
        range,
        paths,
        next_path: 0,
        current: None,
    })
}

/// Materialise a scan, keeping at most `limit` rows.
pub fn read(scan: PartScan, limit: Option<usize>) -> Result<Vec<RecordBatch>> {
    let mut out = Vec::new();
    let mut remaining = limit.unwrap_or(usize::MAX);
    for batch in scan {
        if remaining == 0 {
            break;
        }
        let batch = batch?;
        let batch = if batch.num_rows() > remaining {
            batch.slice(0, remaining)
        } else {
            batch
        };
        remaining -= batch.num_rows();
        out.push(batch);
    }
    Ok(out)
}
