//! Runtime settings for the run lake.
//!
//! `IoSettings` is an immutable value. Each configuration source produces a
//! `SettingsLayer` (every field optional) and `IoSettings::merge` folds a layer on
//! top of a base, returning a new value. `IoSettings::load` applies the layers in a
//! fixed order so that the highest precedence wins:
//!
//! explicit overrides > environment (`RUNLAKE_IO_*`) > `runlake.toml` > defaults
//!
//! Values that cannot be parsed at a layer (an unknown codec, a non-numeric bucket
//! size) are dropped with a warning and the next-lower layer's value stands. This
//! is accepted behaviour: a typo in one source never aborts configuration.

use crate::error::{IoError, Result};
use parquet::basic::{Compression, ZstdLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

pub const ENV_PREFIX: &str = "RUNLAKE_IO_";
pub const CONFIG_FILE_NAME: &str = "runlake.toml";

pub const DEFAULT_ROOT_DIR: &str = "out";
pub const DEFAULT_TICK_BUCKET_SIZE: i64 = 100;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// `bucket = tick / tick_bucket_size`
    TickBuckets,
}

impl Display for Partitioning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Partitioning::TickBuckets => f.write_str("tick_buckets"),
        }
    }
}

impl FromStr for Partitioning {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "tick_buckets" => Ok(Partitioning::TickBuckets),
            other => Err(format!("unknown partitioning '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Zstd,
    Lz4,
    Snappy,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
            Codec::Snappy => "snappy",
        }
    }

    pub(crate) fn to_parquet(self) -> Compression {
        match self {
            Codec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Codec::Lz4 => Compression::LZ4_RAW,
            Codec::Snappy => Compression::SNAPPY,
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" => Ok(Codec::Zstd),
            "lz4" => Ok(Codec::Lz4),
            "snappy" => Ok(Codec::Snappy),
            other => Err(format!("unsupported compression '{other}'")),
        }
    }
}

/// Settings for one dataset root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoSettings {
    pub root_dir: PathBuf,
    pub partitioning: Partitioning,
    /// Ticks per bucket. Must be >= 1.
    pub tick_bucket_size: i64,
    /// Target rows per row group; the size hint for written parts.
    pub row_group_size: usize,
    pub compression: Codec,
    /// Only the local filesystem (`file`, alias `local`) is implemented.
    pub fs_protocol: String,
    /// Reserved for remote backends; ignored for `file`.
    pub fs_options: BTreeMap<String, String>,
    pub strict_schema: bool,
    /// Manifest persist cadence. Currently the manifest is written after every append.
    pub write_manifest_every_n: u32,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            partitioning: Partitioning::TickBuckets,
            tick_bucket_size: DEFAULT_TICK_BUCKET_SIZE,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            compression: Codec::Zstd,
            fs_protocol: "file".to_string(),
            fs_options: BTreeMap::new(),
            strict_schema: true,
            write_manifest_every_n: 1,
        }
    }
}

/// One precedence layer. `None` leaves the underlying value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsLayer {
    pub root_dir: Option<PathBuf>,
    pub partitioning: Option<Partitioning>,
    pub tick_bucket_size: Option<i64>,
    pub row_group_size: Option<usize>,
    pub compression: Option<Codec>,
    pub fs_protocol: Option<String>,
    pub fs_options: Option<BTreeMap<String, String>>,
    pub strict_schema: Option<bool>,
    pub write_manifest_every_n: Option<u32>,
}

impl IoSettings {
    /// Defaults rooted at `root_dir`.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Fold `layer` over `self`, returning a new value.
    pub fn merge(&self, layer: &SettingsLayer) -> IoSettings {
        let mut s = self.clone();
        if let Some(v) = &layer.root_dir {
            s.root_dir = v.clone();
        }
        if let Some(v) = layer.partitioning {
            s.partitioning = v;
        }
        if let Some(v) = layer.tick_bucket_size {
            s.tick_bucket_size = v;
        }
        if let Some(v) = layer.row_group_size {
            s.row_group_size = v;
        }
        if let Some(v) = layer.compression {
            s.compression = v;
        }
        if let Some(v) = &layer.fs_protocol {
            s.fs_protocol = v.clone();
        }
        if let Some(v) = &layer.fs_options {
            s.fs_options = v.clone();
        }
        if let Some(v) = layer.strict_schema {
            s.strict_schema = v;
        }
        if let Some(v) = layer.write_manifest_every_n {
            s.write_manifest_every_n = v;
        }
        s
    }

    /// Resolve settings: defaults, then TOML (`path` or `./runlake.toml`), then
    /// environment, then `overrides`.
    pub fn load(path: Option<&Path>, overrides: &SettingsLayer) -> IoSettings {
        load_env_best_effort();
        let file = match path {
            Some(p) => SettingsLayer::from_toml_file(p),
            None => SettingsLayer::from_toml_file(Path::new(CONFIG_FILE_NAME)),
        };
        let env = SettingsLayer::from_env();
        IoSettings::default()
            .merge(&file)
            .merge(&env)
            .merge(overrides)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_bucket_size < 1 {
            return Err(IoError::config(format!(
                "tick_bucket_size must be >= 1, got {}",
                self.tick_bucket_size
            )));
        }
        if self.row_group_size < 1 {
            return Err(IoError::config("row_group_size must be >= 1"));
        }
        if self.write_manifest_every_n < 1 {
            return Err(IoError::config("write_manifest_every_n must be >= 1"));
        }
        match self.fs_protocol.as_str() {
            "file" | "local" => Ok(()),
            other => Err(IoError::config(format!(
                "unsupported filesystem protocol '{other}' (only 'file' is implemented)"
            ))),
        }
    }
}

impl SettingsLayer {
    /// Read `RUNLAKE_IO_*` from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_lookup(|key| std::env::var(key).ok())
    }

    /// Read the environment layer through `lookup`, which receives full variable names.
    pub fn from_env_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        SettingsLayer {
            root_dir: get("ROOT_DIR").map(PathBuf::from),
            partitioning: get("PARTITIONING").and_then(|v| parse_or_warn("PARTITIONING", &v)),
            tick_bucket_size: get("TICK_BUCKET_SIZE")
                .and_then(|v| parse_or_warn("TICK_BUCKET_SIZE", &v)),
            row_group_size: get("ROW_GROUP_SIZE").and_then(|v| parse_or_warn("ROW_GROUP_SIZE", &v)),
            compression: get("COMPRESSION").and_then(|v| parse_or_warn("COMPRESSION", &v)),
            fs_protocol: get("FS_PROTOCOL"),
            // Structured options are only accepted from the config file.
            fs_options: None,
            strict_schema: get("STRICT_SCHEMA").and_then(|v| parse_bool_or_warn("STRICT_SCHEMA", &v)),
            write_manifest_every_n: get("WRITE_MANIFEST_EVERY_N")
                .and_then(|v| parse_or_warn("WRITE_MANIFEST_EVERY_N", &v)),
        }
    }

    /// Load a TOML file. A missing or unreadable file yields an empty layer.
    pub fn from_toml_file(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return SettingsLayer::default(),
        };
        match Self::from_toml_str(&raw) {
            Ok(layer) => layer,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable settings file");
                SettingsLayer::default()
            }
        }
    }

    /// Parse a TOML document. Keys are read from an `[io]` table when present,
    /// otherwise from the top level.
    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        let doc: toml::Table = raw.parse()?;
        let table = match doc.get("io").and_then(|v| v.as_table()).cloned() {
            Some(io) => io,
            None => doc,
        };
        Ok(Self::from_toml_table(&table))
    }

    fn from_toml_table(t: &toml::Table) -> Self {
        let text = |key: &str| t.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let int = |key: &str| match t.get(key) {
            Some(toml::Value::Integer(i)) => Some(*i),
            Some(toml::Value::String(s)) => parse_or_warn::<i64>(key, s),
            Some(other) => {
                warn!(key, value = %other, "ignoring non-integer setting");
                None
            }
            None => None,
        };
        SettingsLayer {
            root_dir: text("root_dir").map(PathBuf::from),
            partitioning: text("partitioning").and_then(|v| parse_or_warn("partitioning", &v)),
            tick_bucket_size: int("tick_bucket_size"),
            row_group_size: int("row_group_size").and_then(|v| usize::try_from(v).ok()),
            compression: text("compression").and_then(|v| parse_or_warn("compression", &v)),
            fs_protocol: text("fs_protocol"),
            fs_options: t.get("fs_options").and_then(|v| v.as_table()).map(|opts| {
                opts.iter()
                    .map(|(k, v)| {
                        let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), v)
                    })
                    .collect()
            }),
            strict_schema: match t.get("strict_schema") {
                Some(toml::Value::Boolean(b)) => Some(*b),
                Some(toml::Value::Integer(i)) => Some(*i != 0),
                Some(toml::Value::String(s)) => parse_bool_or_warn("strict_schema", s),
                _ => None,
            },
            write_manifest_every_n: int("write_manifest_every_n").and_then(|v| u32::try_from(v).ok()),
        }
    }
}

/// Best-effort: load `.env` so `RUNLAKE_IO_*` can live next to the project.
fn load_env_best_effort() {
    let _ = dotenvy::dotenv();
}

fn parse_or_warn<T>(key: &str, raw: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

fn parse_bool_or_warn(key: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => {
            warn!(key, value = raw, "ignoring invalid boolean setting");
            None
        }
    }
}
