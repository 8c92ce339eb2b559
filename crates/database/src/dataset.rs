//! `Dataset`: one run's tables behind a single handle.

use crate::artifacts::artifact_dir;
use crate::config::{IoSettings, SettingsLayer};
use crate::engine::TableEngine;
use crate::error::Result;
use crate::manifest::{load_manifest, rebuild_manifest_from_fs, write_manifest, TableManifest};
use crate::parquet::ParquetEngine;
use crate::paths::{manifest_path, table_dir, validate_table_name, RunId};
use crate::read::{read, scan, PartScan, TickRange};
use crate::run_manifest::{list_tables, write_run_bundle_manifest, RunBundleManifest};
use crate::write::{append, AppendOptions, AppendSummary, AppendTarget};
use arrow::record_batch::RecordBatch;
use lake_types::{SchemaVersion, TableContract};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Owns its settings and run id. Nothing mutable is shared between datasets;
/// the directory tree is the only shared state.
pub struct Dataset {
    settings: IoSettings,
    run_id: RunId,
    engine: Arc<dyn TableEngine>,
    core_schema_v: Option<SchemaVersion>,
}

impl Dataset {
    /// Parquet-backed dataset. Fails with `Config` on unusable settings.
    pub fn new(settings: IoSettings, run_id: RunId) -> Result<Self> {
        Self::with_engine(settings, run_id, Arc::new(ParquetEngine))
    }

    pub fn with_engine(settings: IoSettings, run_id: RunId, engine: Arc<dyn TableEngine>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            run_id,
            engine,
            core_schema_v: None,
        })
    }

    /// Settings from `runlake.toml` and `RUNLAKE_IO_*`, no explicit overrides.
    pub fn from_env(run_id: &str) -> Result<Self> {
        let settings = IoSettings::load(None, &SettingsLayer::default());
        Self::new(settings, RunId::parse(run_id)?)
    }

    /// Registry schema version recorded in the bundle manifest.
    pub fn with_core_schema_version(mut self, version: SchemaVersion) -> Self {
        self.core_schema_v = Some(version);
        self
    }

    pub fn settings(&self) -> &IoSettings {
        &self.settings
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        table_dir(&self.settings, &self.run_id, table)
    }

    pub fn append(&self, table: &str, contract: &TableContract, batch: &RecordBatch) -> Result<AppendSummary> {
        self.append_with(table, contract, batch, AppendOptions::default())
    }

    pub fn append_with(
        &self,
        table: &str,
        contract: &TableContract,
        batch: &RecordBatch,
        opts: AppendOptions,
    ) -> Result<AppendSummary> {
        let target = AppendTarget {
            engine: self.engine.as_ref(),
            settings: &self.settings,
            run_id: &self.run_id,
            table,
            contract,
        };
        append(&target, batch, opts)
    }

    pub fn scan(&self, table: &str, range: TickRange) -> Result<PartScan> {
        scan(self.engine.clone(), &self.settings, &self.run_id, table, range)
    }

    pub fn read(&self, table: &str, range: TickRange, limit: Option<usize>) -> Result<Vec<RecordBatch>> {
        read(self.scan(table, range)?, limit)
    }

    pub fn manifest(&self, table: &str) -> Result<Option<TableManifest>> {
        validate_table_name(table)?;
        load_manifest(&manifest_path(&self.settings, &self.run_id, table), table)
    }

    /// Discard the table manifest and regenerate it from the part files on disk.
    pub fn rebuild_manifest(&self, table: &str) -> Result<TableManifest> {
        validate_table_name(table)?;
        let manifest = rebuild_manifest_from_fs(self.engine.as_ref(), &self.table_dir(table), table)?;
        let path = manifest_path(&self.settings, &self.run_id, table);
        write_manifest(&path, &manifest)?;
        info!(table, run_id = %self.run_id, rows = manifest.total_rows(), "manifest replaced");
        Ok(manifest)
    }

    /// Tables with a persisted manifest.
    pub fn tables(&self) -> Result<Vec<String>> {
        list_tables(&self.settings, &self.run_id)
    }

    pub fn write_bundle_manifest(&self, meta: Map<String, Value>) -> Result<RunBundleManifest> {
        write_run_bundle_manifest(
            self.engine.as_ref(),
            &self.settings,
            &self.run_id,
            self.core_schema_v.as_ref(),
            meta,
        )
    }

    pub fn artifact_dir(&self, subpath: &str) -> Result<PathBuf> {
        artifact_dir(&self.settings, &self.run_id, subpath)
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("root_dir", &self.settings.root_dir)
            .field("run_id", &self.run_id)
            .field("engine", &self.engine.extension())
            .finish()
    }
}
