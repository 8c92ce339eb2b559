//! Per-table manifest: the index of every part, grouped by bucket.
//!
//! The directory tree is the source of truth. The manifest is a cache over it
//! and `rebuild_manifest_from_fs` can always regenerate it from part content.

use crate::engine::TableEngine;
use crate::error::{IoError, Result};
use crate::fs::write_atomic;
use crate::paths::{bucket_key, format_bucket_dir, is_part_file, parse_bucket_dir};
use chrono::{DateTime, Utc};
use lake_types::TICK_COLUMN;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest file format version, independent of any table schema version.
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    Writing,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMeta {
    /// Relative to the bucket directory.
    pub path: String,
    pub rows: i64,
    pub bytes: u64,
    pub tick_min: i64,
    pub tick_max: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub bucket_id: i64,
    pub state: PartitionState,
    pub tick_min: i64,
    pub tick_max: i64,
    pub row_count: i64,
    pub byte_size: u64,
    pub parts: Vec<PartMeta>,
}

impl PartitionMeta {
    fn empty(bucket_id: i64) -> Self {
        Self {
            bucket_id,
            state: PartitionState::Writing,
            tick_min: 0,
            tick_max: 0,
            row_count: 0,
            byte_size: 0,
            parts: Vec::new(),
        }
    }

    /// Aggregates are always derived from `parts`, never carried separately.
    fn recompute(&mut self) {
        self.row_count = self.parts.iter().map(|p| p.rows).sum();
        self.byte_size = self.parts.iter().map(|p| p.bytes).sum();
        self.tick_min = self.parts.iter().map(|p| p.tick_min).min().unwrap_or(0);
        self.tick_max = self.parts.iter().map(|p| p.tick_max).max().unwrap_or(0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    pub table: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Keyed by the zero-padded bucket id, so key order is bucket order.
    pub partitions: BTreeMap<String, PartitionMeta>,
}

pub fn new_manifest(table: &str) -> TableManifest {
    let now = Utc::now();
    TableManifest {
        table: table.to_string(),
        version: MANIFEST_VERSION,
        created_at: now,
        updated_at: now,
        partitions: BTreeMap::new(),
    }
}

impl TableManifest {
    /// Mark a bucket as receiving a write. Creates the entry if absent.
    pub fn begin_partition(&mut self, bucket_id: i64) {
        self.partitions
            .entry(bucket_key(bucket_id))
            .or_insert_with(|| PartitionMeta::empty(bucket_id))
            .state = PartitionState::Writing;
    }

    /// Undo `begin_partition` after a failed write: drop a bucket that never
    /// received a part, otherwise restore it to `ready`.
    pub fn abort_partition(&mut self, bucket_id: i64) {
        let key = bucket_key(bucket_id);
        match self.partitions.get_mut(&key) {
            Some(p) if p.parts.is_empty() => {
                self.partitions.remove(&key);
            }
            Some(p) => p.state = PartitionState::Ready,
            None => {}
        }
    }

    /// Index a freshly renamed part and leave its bucket `ready`.
    pub fn update_with_new_part(&mut self, bucket_id: i64, part: PartMeta) {
        let entry = self
            .partitions
            .entry(bucket_key(bucket_id))
            .or_insert_with(|| PartitionMeta::empty(bucket_id));
        entry.parts.push(part);
        entry.recompute();
        entry.state = PartitionState::Ready;
        self.updated_at = Utc::now();
    }

    pub fn total_rows(&self) -> i64 {
        self.partitions.values().map(|p| p.row_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.partitions.values().map(|p| p.byte_size).sum()
    }

    /// Overall tick extent, or `None` for a manifest with no partitions.
    pub fn tick_range(&self) -> Option<(i64, i64)> {
        let lo = self.partitions.values().map(|p| p.tick_min).min()?;
        let hi = self.partitions.values().map(|p| p.tick_max).max()?;
        Some((lo, hi))
    }

    pub fn bucket_ids(&self) -> Vec<i64> {
        self.partitions.values().map(|p| p.bucket_id).collect()
    }
}

/// Absolute location of `part` given its table directory.
pub fn resolve_part_path(table_dir: &Path, partition: &PartitionMeta, part: &PartMeta) -> Result<PathBuf> {
    Ok(table_dir
        .join(format_bucket_dir(partition.bucket_id)?)
        .join(&part.path))
}

/// Load a manifest. A missing file is `Ok(None)`; anything unreadable is an error.
pub fn load_manifest(path: &Path, table: &str) -> Result<Option<TableManifest>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(IoError::manifest(table, Some(path), "failed to read manifest").with_source(e));
        }
    };
    let manifest: TableManifest = serde_json::from_slice(&raw)
        .map_err(|e| IoError::manifest(table, Some(path), "failed to parse manifest").with_source(e))?;
    Ok(Some(manifest))
}

/// Persist via temp file + rename; the final path is never written in place.
pub fn write_manifest(path: &Path, manifest: &TableManifest) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(manifest).map_err(|e| {
        IoError::manifest(&manifest.table, Some(path), "failed to serialise manifest").with_source(e)
    })?;
    write_atomic(path, &bytes).map_err(|e| {
        IoError::manifest(&manifest.table, Some(path), "failed to persist manifest").with_source(e)
    })?;
    debug!(table = %manifest.table, path = %path.display(), "manifest persisted");
    Ok(())
}

fn sorted_entries(dir: &Path, table: &str) -> Result<Vec<PathBuf>> {
    let rd = fs::read_dir(dir)
        .map_err(|e| IoError::manifest(table, Some(dir), "failed to list directory").with_source(e))?;
    let mut out = Vec::new();
    for entry in rd {
        let entry =
            entry.map_err(|e| IoError::manifest(table, Some(dir), "failed to list directory").with_source(e))?;
        out.push(entry.path());
    }
    out.sort();
    Ok(out)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Rebuild a table manifest by walking `bucket=` directories and recomputing
/// every part's stats from file content. Temp files are never indexed.
pub fn rebuild_manifest_from_fs(engine: &dyn TableEngine, table_dir: &Path, table: &str) -> Result<TableManifest> {
    if !table_dir.is_dir() {
        return Err(IoError::manifest(table, Some(table_dir), "table directory does not exist"));
    }
    let mut manifest = new_manifest(table);
    let mut parts = 0usize;

    for bucket_path in sorted_entries(table_dir, table)? {
        let Some(bucket_id) = file_name(&bucket_path).and_then(parse_bucket_dir) else {
            continue;
        };
        if !bucket_path.is_dir() {
            continue;
        }
        for part_path in sorted_entries(&bucket_path, table)? {
            let Some(name) = file_name(&part_path) else {
                continue;
            };
            if !is_part_file(name) || !part_path.is_file() {
                continue;
            }
            let stats = engine.part_stats(&part_path, TICK_COLUMN).map_err(|e| {
                IoError::manifest(table, Some(&part_path), "failed to read part during rebuild").with_source(e)
            })?;
            let meta = fs::metadata(&part_path).map_err(|e| {
                IoError::manifest(table, Some(&part_path), "failed to stat part during rebuild").with_source(e)
            })?;
            let created_at = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
            manifest.update_with_new_part(
                bucket_id,
                PartMeta {
                    path: name.to_string(),
                    rows: stats.rows,
                    bytes: meta.len(),
                    tick_min: stats.tick_min,
                    tick_max: stats.tick_max,
                    created_at,
                },
            );
            parts += 1;
        }
    }

    info!(
        table,
        buckets = manifest.partitions.len(),
        parts,
        rows = manifest.total_rows(),
        "manifest rebuilt from filesystem"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, rows: i64, lo: i64, hi: i64) -> PartMeta {
        PartMeta {
            path: name.to_string(),
            rows,
            bytes: 10 * rows as u64,
            tick_min: lo,
            tick_max: hi,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn aggregates_follow_parts() {
        let mut m = new_manifest("identity_edges");
        m.begin_partition(1);
        assert_eq!(m.partitions["000001"].state, PartitionState::Writing);
        m.update_with_new_part(1, part("part-a.parquet", 5, 120, 130));
        m.update_with_new_part(1, part("part-b.parquet", 3, 105, 125));
        m.update_with_new_part(0, part("part-c.parquet", 2, 7, 9));

        let p = &m.partitions["000001"];
        assert_eq!(p.state, PartitionState::Ready);
        assert_eq!((p.tick_min, p.tick_max, p.row_count, p.byte_size), (105, 130, 8, 80));
        assert_eq!(m.bucket_ids(), vec![0, 1]);
        assert_eq!(m.total_rows(), 10);
        assert_eq!(m.tick_range(), Some((7, 130)));
    }

    #[test]
    fn missing_manifest_is_none_and_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        assert!(load_manifest(&path, "t").unwrap().is_none());

        std::fs::write(&path, b"{not json").unwrap();
        let err = load_manifest(&path, "t").unwrap_err();
        assert!(err.is_manifest());
        assert_eq!(err.context().path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn persisted_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t").join("manifest.json");
        let mut m = new_manifest("t");
        m.update_with_new_part(3, part("part-x.parquet", 1, 300, 300));
        write_manifest(&path, &m).unwrap();

        let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["version"], 1);
        assert_eq!(v["partitions"]["000003"]["state"], "ready");
        assert_eq!(v["partitions"]["000003"]["parts"][0]["path"], "part-x.parquet");
        assert_eq!(load_manifest(&path, "t").unwrap(), Some(m));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn rebuild_of_missing_table_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = crate::parquet::ParquetEngine;
        let err = rebuild_manifest_from_fs(&engine, &dir.path().join("nope"), "nope").unwrap_err();
        assert!(err.is_manifest());
    }
}
