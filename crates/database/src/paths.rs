//! Authoritative layout of a run on disk. Pure functions, no IO.
//!
//! ```text
//! <root>/runs/<run_id>/tables/<table>/bucket=000123/part-<uuid>.parquet
//! <root>/runs/<run_id>/tables/<table>/manifest.json
//! <root>/runs/<run_id>/bundle.manifest.json
//! <root>/runs/<run_id>/artifacts/...
//! ```

use crate::config::IoSettings;
use crate::error::{IoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const BUCKET_PREFIX: &str = "bucket=";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const BUNDLE_MANIFEST_FILE: &str = "bundle.manifest.json";
pub const PART_EXTENSION: &str = "parquet";
pub const TMP_SUFFIX: &str = ".tmp";

/// Filesystem-safe run identifier, `[A-Za-z0-9._:-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn parse(raw: &str) -> Result<Self> {
        validate_run_id(raw)?;
        Ok(RunId(raw.to_string()))
    }

    /// Trim, replace spaces with underscores, then validate.
    pub fn normalize(raw: &str) -> Result<Self> {
        Self::parse(&raw.trim().replace(' ', "_"))
    }

    /// Timestamp-based id, `YYYYMMDD-HHMMSS` in UTC.
    pub fn generate() -> Self {
        RunId(chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = IoError;
    fn try_from(value: String) -> Result<Self> {
        validate_run_id(&value)?;
        Ok(RunId(value))
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

pub fn validate_run_id(raw: &str) -> Result<()> {
    let ok = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
    // "." and ".." would escape the runs directory.
    if !ok || raw.chars().all(|c| c == '.') {
        return Err(IoError::config(format!(
            "run_id '{raw}' contains illegal characters; allowed pattern is [A-Za-z0-9._:-]+"
        )));
    }
    Ok(())
}

/// Table names become directory names; keep them to `[a-z0-9_]`.
pub fn validate_table_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !ok {
        return Err(IoError::config(format!(
            "table name '{name}' is not a canonical lower_snake name"
        )));
    }
    Ok(())
}

/// `tick / bucket_size`, floor division.
pub fn bucket_id(tick: i64, bucket_size: i64) -> Result<i64> {
    if bucket_size < 1 {
        return Err(IoError::config(format!(
            "bucket_size must be >= 1, got {bucket_size}"
        )));
    }
    if tick < 0 {
        return Err(IoError::config(format!("tick must be >= 0, got {tick}")));
    }
    Ok(tick / bucket_size)
}

/// Zero-padded manifest key, `000123`.
pub fn bucket_key(bucket_id: i64) -> String {
    format!("{bucket_id:06}")
}

/// Directory name, `bucket=000123`.
pub fn format_bucket_dir(bucket_id: i64) -> Result<String> {
    if bucket_id < 0 {
        return Err(IoError::config(format!(
            "bucket_id must be >= 0, got {bucket_id}"
        )));
    }
    Ok(format!("{BUCKET_PREFIX}{}", bucket_key(bucket_id)))
}

/// Inverse of `format_bucket_dir`; `None` for anything that is not a bucket directory.
pub fn parse_bucket_dir(name: &str) -> Option<i64> {
    let digits = name.strip_prefix(BUCKET_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn run_root(settings: &IoSettings, run_id: &RunId) -> PathBuf {
    settings.root_dir.join("runs").join(run_id.as_str())
}

pub fn tables_root(settings: &IoSettings, run_id: &RunId) -> PathBuf {
    run_root(settings, run_id).join("tables")
}

pub fn table_dir(settings: &IoSettings, run_id: &RunId, table: &str) -> PathBuf {
    tables_root(settings, run_id).join(table)
}

pub fn manifest_path(settings: &IoSettings, run_id: &RunId, table: &str) -> PathBuf {
    table_dir(settings, run_id, table).join(MANIFEST_FILE)
}

pub fn bucket_dir(settings: &IoSettings, run_id: &RunId, table: &str, bucket_id: i64) -> Result<PathBuf> {
    Ok(table_dir(settings, run_id, table).join(format_bucket_dir(bucket_id)?))
}

pub fn bundle_manifest_path(settings: &IoSettings, run_id: &RunId) -> PathBuf {
    run_root(settings, run_id).join(BUNDLE_MANIFEST_FILE)
}

pub fn artifacts_root(settings: &IoSettings, run_id: &RunId) -> PathBuf {
    run_root(settings, run_id).join("artifacts")
}

/// Sibling temp path used for atomic replacement, `<final>.tmp`.
pub fn tmp_sibling(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Temporary and final location of one part. Both live in the bucket directory
/// so the final rename never crosses a filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPaths {
    pub tmp_path: PathBuf,
    pub final_path: PathBuf,
}

impl PartPaths {
    /// Bare file name of the final part, as recorded in the manifest.
    pub fn file_name(&self) -> String {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn part_file_name(uuid_hex: &str) -> String {
    format!("part-{uuid_hex}.{PART_EXTENSION}")
}

pub fn part_paths(
    settings: &IoSettings,
    run_id: &RunId,
    table: &str,
    bucket_id: i64,
    uuid_hex: &str,
) -> Result<PartPaths> {
    let final_path = bucket_dir(settings, run_id, table, bucket_id)?.join(part_file_name(uuid_hex));
    Ok(PartPaths {
        tmp_path: tmp_sibling(&final_path),
        final_path,
    })
}

/// True for finished part files; temp files and foreign files are excluded.
pub fn is_part_file(name: &str) -> bool {
    name.starts_with("part-") && name.ends_with(&format!(".{PART_EXTENSION}"))
}
