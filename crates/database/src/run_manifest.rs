//! Run-bundle manifest: a derived summary of every table manifest in a run plus
//! provenance and an artifacts index. Recomputed wholesale on every call.

use crate::artifacts::{collect_artifacts_index, ArtifactsIndex};
use crate::config::{Codec, IoSettings, Partitioning};
use crate::engine::TableEngine;
use crate::error::{IoError, Result};
use crate::fs::write_atomic;
use crate::manifest::{load_manifest, TableManifest};
use crate::paths::{bundle_manifest_path, manifest_path, tables_root, RunId};
use chrono::{DateTime, Utc};
use lake_types::SchemaVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

pub const BUNDLE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub sha: Option<String>,
    pub dirty: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    /// Version pinned by the contract registry the run was written against.
    pub core_schema_v: Option<SchemaVersion>,
    pub git: GitInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvInfo {
    pub lake_database: String,
    pub parquet: String,
    pub os: String,
    pub arch: String,
}

impl EnvInfo {
    pub fn current() -> Self {
        Self {
            lake_database: env!("CARGO_PKG_VERSION").to_string(),
            parquet: parquet::file::properties::DEFAULT_CREATED_BY.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoInfo {
    pub root_dir: PathBuf,
    pub partitioning: Partitioning,
    pub tick_bucket_size: i64,
    pub row_group_size: usize,
    pub compression: Codec,
}

impl From<&IoSettings> for IoInfo {
    fn from(s: &IoSettings) -> Self {
        Self {
            root_dir: s.root_dir.clone(),
            partitioning: s.partitioning,
            tick_bucket_size: s.tick_bucket_size,
            row_group_size: s.row_group_size,
            compression: s.compression,
        }
    }
}

/// Per-table aggregate. `total_rows`/`total_bytes` duplicate `rows`/`bytes`
/// for downstream readers that expect those names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIndexEntry {
    pub rows: i64,
    pub bytes: u64,
    pub total_rows: i64,
    pub total_bytes: u64,
    pub tick_min: Option<i64>,
    pub tick_max: Option<i64>,
    pub buckets: Vec<i64>,
}

impl From<&TableManifest> for TableIndexEntry {
    fn from(m: &TableManifest) -> Self {
        let rows = m.total_rows();
        let bytes = m.total_bytes();
        let range = m.tick_range();
        Self {
            rows,
            bytes,
            total_rows: rows,
            total_bytes: bytes,
            tick_min: range.map(|r| r.0),
            tick_max: range.map(|r| r.1),
            buckets: m.bucket_ids(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBundleManifest {
    pub schema_version: u32,
    pub run: RunInfo,
    pub env: EnvInfo,
    pub io: IoInfo,
    pub tables: BTreeMap<String, TableIndexEntry>,
    pub artifacts: ArtifactsIndex,
    pub meta: Map<String, Value>,
}

/// Names of tables under the run that have a persisted manifest, sorted.
pub fn list_tables(settings: &IoSettings, run_id: &RunId) -> Result<Vec<String>> {
    let root = tables_root(settings, run_id);
    let rd = match fs::read_dir(&root) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IoError::run_manifest(&root, "failed to list tables").with_source(e)),
    };
    let mut names = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| IoError::run_manifest(&root, "failed to list tables").with_source(e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if entry.path().is_dir() && manifest_path(settings, run_id, &name).is_file() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Aggregate every persisted table manifest of the run.
pub fn collect_tables_index(settings: &IoSettings, run_id: &RunId) -> Result<BTreeMap<String, TableIndexEntry>> {
    let mut out = BTreeMap::new();
    for name in list_tables(settings, run_id)? {
        if let Some(m) = load_manifest(&manifest_path(settings, run_id, &name), &name)? {
            out.insert(name, TableIndexEntry::from(&m));
        }
    }
    Ok(out)
}

fn git_stdout(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Best-effort revision of the working directory. Nulls when git is absent.
pub fn git_info() -> GitInfo {
    let sha = git_stdout(&["rev-parse", "HEAD"]).filter(|s| !s.is_empty());
    let dirty = match sha {
        Some(_) => git_stdout(&["status", "--porcelain"]).map(|s| !s.is_empty()),
        None => None,
    };
    if sha.is_none() {
        debug!("git revision unavailable; recording nulls");
    }
    GitInfo { sha, dirty }
}

/// Compose the bundle manifest for a run and persist it atomically.
pub fn write_run_bundle_manifest(
    engine: &dyn TableEngine,
    settings: &IoSettings,
    run_id: &RunId,
    core_schema_v: Option<&SchemaVersion>,
    meta: Map<String, Value>,
) -> Result<RunBundleManifest> {
    let bundle = RunBundleManifest {
        schema_version: BUNDLE_SCHEMA_VERSION,
        run: RunInfo {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            core_schema_v: core_schema_v.cloned(),
            git: git_info(),
        },
        env: EnvInfo::current(),
        io: IoInfo::from(settings),
        tables: collect_tables_index(settings, run_id)?,
        artifacts: collect_artifacts_index(engine, settings, run_id),
        meta,
    };

    let path = bundle_manifest_path(settings, run_id);
    let bytes = serde_json::to_vec_pretty(&bundle)
        .map_err(|e| IoError::run_manifest(&path, "failed to serialise bundle manifest").with_source(e))?;
    write_atomic(&path, &bytes)
        .map_err(|e| IoError::run_manifest(&path, "failed to persist bundle manifest").with_source(e))?;
    info!(run_id = %run_id, tables = bundle.tables.len(), path = %path.display(), "bundle manifest written");
    Ok(bundle)
}

pub fn load_run_bundle_manifest(settings: &IoSettings, run_id: &RunId) -> Result<Option<RunBundleManifest>> {
    let path = bundle_manifest_path(settings, run_id);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IoError::run_manifest(&path, "failed to read bundle manifest").with_source(e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| IoError::run_manifest(&path, "failed to parse bundle manifest").with_source(e))
}
