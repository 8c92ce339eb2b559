//! Auxiliary run outputs under `<run>/artifacts/`, written with the same
//! tmp -> fsync -> rename discipline as table parts.

use crate::config::IoSettings;
use crate::engine::{PartWriteOptions, TableEngine};
use crate::error::{IoError, Result};
use crate::fs::{fsync_path, remove_quietly, rename_atomic, write_atomic};
use crate::paths::{artifacts_root, run_root, tmp_sibling, RunId, TMP_SUFFIX};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What landed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactStat {
    pub path: PathBuf,
    pub bytes: u64,
    pub rows: Option<i64>,
}

/// One file in the artifacts index. `path` is relative to the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<i64>,
}

/// Files grouped by their directory relative to `artifacts/` (`"."` for the root).
pub type ArtifactsIndex = BTreeMap<String, Vec<ArtifactEntry>>;

/// `<run>/artifacts/<subpath>`, created on demand. `subpath` must stay inside
/// the artifacts root.
pub fn artifact_dir(settings: &IoSettings, run_id: &RunId, subpath: &str) -> Result<PathBuf> {
    let rel = Path::new(subpath);
    if !rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        return Err(IoError::config(format!(
            "artifact subpath must be relative and stay under artifacts/: {subpath:?}"
        )));
    }
    let dir = artifacts_root(settings, run_id).join(rel);
    fs::create_dir_all(&dir).map_err(|e| IoError::write_path(&dir, "failed to create artifact directory", e))?;
    Ok(dir)
}

fn stat(path: &Path, rows: Option<i64>) -> Result<ArtifactStat> {
    let bytes = fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| IoError::write_path(path, "failed to stat artifact", e))?;
    Ok(ArtifactStat {
        path: path.to_path_buf(),
        bytes,
        rows,
    })
}

/// Atomically write a small text or JSON payload.
pub fn write_text_artifact(path: &Path, text: &str) -> Result<ArtifactStat> {
    write_atomic(path, text.as_bytes()).map_err(|e| IoError::write_path(path, "failed to write text artifact", e))?;
    debug!(path = %path.display(), "text artifact written");
    stat(path, None)
}

/// Atomically write one batch as a columnar file through `engine`.
pub fn write_batch_artifact(
    engine: &dyn TableEngine,
    path: &Path,
    batch: &RecordBatch,
    opts: &PartWriteOptions,
) -> Result<ArtifactStat> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IoError::write_path(parent, "failed to create artifact directory", e))?;
    }
    let tmp = tmp_sibling(path);
    let landed = engine
        .write_part(&tmp, batch, opts)
        .map_err(|e| IoError::write_path(&tmp, "failed to write artifact", e))
        .and_then(|()| fsync_path(&tmp).map_err(|e| IoError::write_path(&tmp, "failed to fsync artifact", e)))
        .and_then(|()| rename_atomic(&tmp, path).map_err(|e| IoError::write_path(path, "failed to rename artifact", e)));
    if let Err(e) = landed {
        remove_quietly(&tmp);
        return Err(e);
    }
    debug!(path = %path.display(), rows = batch.num_rows(), "batch artifact written");
    stat(path, Some(batch.num_rows() as i64))
}

/// Regular files under `root`, sorted by path. A missing root is empty.
fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(e) if e.file_type().is_file() => files.push(e.into_path()),
            Ok(_) => {}
            Err(e) => {
                if e.io_error().map(|io| io.kind()) != Some(std::io::ErrorKind::NotFound) {
                    warn!(dir = %root.display(), error = %e, "failed to walk artifacts");
                }
            }
        }
    }
    files
}

fn slash_path(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Best-effort index of every finished file under `artifacts/`. Byte sizes are
/// always present; row counts only for files `engine` can read from the footer.
pub fn collect_artifacts_index(engine: &dyn TableEngine, settings: &IoSettings, run_id: &RunId) -> ArtifactsIndex {
    let run_dir = run_root(settings, run_id);
    let root = artifacts_root(settings, run_id);
    let files = walk(&root);

    let ext = format!(".{}", engine.extension());
    let mut index = ArtifactsIndex::new();
    for file in files {
        let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if name.ends_with(TMP_SUFFIX) {
            continue;
        }
        let Ok(meta) = fs::metadata(&file) else {
            continue;
        };
        let rows = if name.ends_with(&ext) {
            match engine.read_metadata(&file) {
                Ok(m) => Some(m.num_rows),
                Err(e) => {
                    debug!(path = %file.display(), error = %e, "no row count for artifact");
                    None
                }
            }
        } else {
            None
        };
        let group = file
            .parent()
            .and_then(|p| p.strip_prefix(&root).ok())
            .map(slash_path)
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let rel = file.strip_prefix(&run_dir).map(slash_path).unwrap_or_else(|_| slash_path(&file));
        index.entry(group).or_default().push(ArtifactEntry {
            path: rel,
            bytes: meta.len(),
            rows,
        });
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpath_cannot_escape_artifacts_root() {
        let dir = tempfile::tempdir().unwrap();
        let s = IoSettings::with_root(dir.path());
        let run = RunId::parse("r1").unwrap();
        assert!(artifact_dir(&s, &run, "../tables").unwrap_err().is_config());
        assert!(artifact_dir(&s, &run, "/etc").unwrap_err().is_config());
        let ok = artifact_dir(&s, &run, "lab/audit").unwrap();
        assert!(ok.is_dir());
    }

    #[test]
    fn index_groups_by_directory_and_skips_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let s = IoSettings::with_root(dir.path());
        let run = RunId::parse("r1").unwrap();
        let audit = artifact_dir(&s, &run, "lab/audit").unwrap();
        write_text_artifact(&audit.join("notes.json"), "{\"ok\":true}").unwrap();
        std::fs::write(audit.join("half.json.tmp"), b"x").unwrap();
        write_text_artifact(&artifacts_root(&s, &run).join("README.txt"), "hi").unwrap();

        let idx = collect_artifacts_index(&crate::parquet::ParquetEngine, &s, &run);
        assert_eq!(idx.keys().collect::<Vec<_>>(), vec![".", "lab/audit"]);
        let audit_files = &idx["lab/audit"];
        assert_eq!(audit_files.len(), 1);
        assert_eq!(audit_files[0].path, "artifacts/lab/audit/notes.json");
        assert_eq!(audit_files[0].bytes, 11);
        assert_eq!(audit_files[0].rows, None);
    }

    #[test]
    fn walk_is_sorted_and_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(walk(&dir.path().join("absent")).is_empty());

        std::fs::create_dir_all(dir.path().join("b/inner")).unwrap();
        std::fs::write(dir.path().join("b/inner/z.txt"), b"z").unwrap();
        std::fs::write(dir.path().join("b/a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();
        let rel: Vec<String> = walk(dir.path())
            .iter()
            .map(|p| slash_path(p.strip_prefix(dir.path()).unwrap()))
            .collect();
        assert_eq!(rel, vec!["b/a.txt", "b/inner/z.txt", "c.txt"]);
    }
}
