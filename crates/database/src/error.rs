//! Error taxonomy for the run lake.
//!
//! Every failure surfaces as one of four kinds so callers can tell "nothing was
//! written" (`Schema`, `Config`) from "a bucket failed mid-write" (`Write`) and
//! "parts are durable but not indexed" (`Manifest`).

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IoError>;

type Source = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where an error happened. Rendered as a `[table=.. bucket=.. path=..]` suffix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub table: Option<String>,
    pub bucket: Option<i64>,
    pub path: Option<PathBuf>,
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.table.is_none() && self.bucket.is_none() && self.path.is_none() {
            return Ok(());
        }
        f.write_str(" [")?;
        let mut sep = "";
        if let Some(t) = &self.table {
            write!(f, "table={t}")?;
            sep = " ";
        }
        if let Some(b) = self.bucket {
            write!(f, "{sep}bucket={b}")?;
            sep = " ";
        }
        if let Some(p) = &self.path {
            write!(f, "{sep}path={}", p.display())?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Error)]
pub enum IoError {
    /// Invalid or unsupported settings, bad run ids, bad bucket math inputs.
    #[error("config: {message}{context}")]
    Config {
        message: String,
        context: ErrorContext,
    },
    /// Frame failed validation against its table contract. No part was written.
    #[error("schema: {message}{context}")]
    Schema {
        message: String,
        context: ErrorContext,
        #[source]
        source: Option<Source>,
    },
    /// The tmp-write / fsync / rename pipeline failed for a bucket.
    #[error("write: {message}{context}")]
    Write {
        message: String,
        context: ErrorContext,
        #[source]
        source: Option<Source>,
    },
    /// Manifest missing, unreadable, or could not be persisted or rebuilt.
    #[error("manifest: {message}{context}")]
    Manifest {
        message: String,
        context: ErrorContext,
        #[source]
        source: Option<Source>,
    },
}

impl IoError {
    pub fn config(message: impl Into<String>) -> Self {
        IoError::Config {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn schema(table: &str, message: impl Into<String>) -> Self {
        IoError::Schema {
            message: message.into(),
            context: ErrorContext {
                table: Some(table.to_string()),
                ..Default::default()
            },
            source: None,
        }
    }

    pub fn write<E>(table: &str, bucket: i64, path: &Path, message: impl Into<String>, source: E) -> Self
    where
        E: Into<Source>,
    {
        IoError::Write {
            message: message.into(),
            context: ErrorContext {
                table: Some(table.to_string()),
                bucket: Some(bucket),
                path: Some(path.to_path_buf()),
            },
            source: Some(source.into()),
        }
    }

    /// A write failure outside any table, e.g. a run artifact.
    pub fn write_path<E>(path: &Path, message: impl Into<String>, source: E) -> Self
    where
        E: Into<Source>,
    {
        IoError::Write {
            message: message.into(),
            context: ErrorContext {
                path: Some(path.to_path_buf()),
                ..Default::default()
            },
            source: Some(source.into()),
        }
    }

    pub fn manifest(table: &str, path: Option<&Path>, message: impl Into<String>) -> Self {
        IoError::Manifest {
            message: message.into(),
            context: ErrorContext {
                table: Some(table.to_string()),
                bucket: None,
                path: path.map(Path::to_path_buf),
            },
            source: None,
        }
    }

    /// A manifest failure not tied to one table (the run-bundle manifest).
    pub fn run_manifest(path: &Path, message: impl Into<String>) -> Self {
        IoError::Manifest {
            message: message.into(),
            context: ErrorContext {
                path: Some(path.to_path_buf()),
                ..Default::default()
            },
            source: None,
        }
    }

    /// Attach an underlying cause to a `Schema`, `Write` or `Manifest` error.
    pub fn with_source<E: Into<Source>>(mut self, err: E) -> Self {
        match &mut self {
            IoError::Schema { source, .. }
            | IoError::Write { source, .. }
            | IoError::Manifest { source, .. } => *source = Some(err.into()),
            IoError::Config { .. } => {}
        }
        self
    }

    /// Attach a table name to an error that was raised without one.
    pub fn for_table(mut self, name: &str) -> Self {
        let ctx = self.context_mut();
        if ctx.table.is_none() {
            ctx.table = Some(name.to_string());
        }
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            IoError::Config { context, .. }
            | IoError::Schema { context, .. }
            | IoError::Write { context, .. }
            | IoError::Manifest { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            IoError::Config { context, .. }
            | IoError::Schema { context, .. }
            | IoError::Write { context, .. }
            | IoError::Manifest { context, .. } => context,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, IoError::Config { .. })
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, IoError::Schema { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self, IoError::Write { .. })
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, IoError::Manifest { .. })
    }
}

impl From<lake_types::ContractError> for IoError {
    fn from(e: lake_types::ContractError) -> Self {
        IoError::Schema {
            message: "invalid table contract".to_string(),
            context: ErrorContext::default(),
            source: Some(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let e = IoError::write(
            "identity_edges",
            3,
            Path::new("/tmp/x.parquet.tmp"),
            "rename failed",
            std::io::Error::other("boom"),
        );
        let s = e.to_string();
        assert!(s.starts_with("write: rename failed"));
        assert!(s.contains("table=identity_edges"));
        assert!(s.contains("bucket=3"));
        assert!(s.contains("path=/tmp/x.parquet.tmp"));
    }

    #[test]
    fn config_without_context_has_no_suffix() {
        assert_eq!(IoError::config("bad").to_string(), "config: bad");
    }

    #[test]
    fn for_table_keeps_existing_name() {
        let e = IoError::schema("a", "x").for_table("b");
        assert_eq!(e.context().table.as_deref(), Some("a"));
        let e = IoError::config("x").for_table("b");
        assert_eq!(e.context().table.as_deref(), Some("b"));
    }
}
