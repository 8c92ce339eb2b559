//! Run Lake Database crate
//!
//! Append-only, tick-partitioned storage for simulation output:
//! - Immutable Parquet parts, one per touched bucket per append, landed via tmp -> fsync -> rename.
//! - A per-table JSON manifest indexing parts by bucket (row counts, byte sizes, tick extents),
//!   always rebuildable from the files themselves.
//! - Frame validation against externally supplied table contracts (`lake_types::TableContract`).
//! - Range scans that prune by manifest tick extents and filter rows exactly.
//! - A run-bundle manifest summarising every table of a run plus provenance and artifacts.
//!
//! Layout overview (see `paths`):
//! <root>/runs/<run_id>/tables/<table>/bucket=000000/part-<uuid>.parquet
//!
//! Key modules:
//! - `dataset`: the `Dataset` handle most callers want.
//! - `write`: the append algorithm.
//! - `read`: `scan` / `read` with tick-range pruning.
//! - `manifest`: table manifest model, persistence and filesystem rebuild.
//! - `engine` / `parquet`: the narrow columnar-file boundary and its Parquet implementation.
//! - `config`: settings precedence (overrides > `RUNLAKE_IO_*` env > `runlake.toml` > defaults).
//!
//! Single writer per table is an operating assumption: two concurrent appenders can
//! lose a manifest update (their parts survive and `Dataset::rebuild_manifest` recovers them).

pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod parquet;
pub mod paths;
pub mod read;
pub mod run_manifest;
pub mod validate;
pub mod write;

pub use config::{Codec, IoSettings, Partitioning, SettingsLayer};
pub use dataset::Dataset;
pub use engine::{PartMetadata, PartStats, TableEngine};
pub use error::{ErrorContext, IoError, Result};
pub use manifest::{PartMeta, PartitionMeta, PartitionState, TableManifest};
pub use paths::RunId;
pub use read::{PartScan, TickRange};
pub use run_manifest::RunBundleManifest;
pub use write::{AppendOptions, AppendSummary, PartSummary};
