//! Table contracts: the column set, dtypes, required/nullable split and pinned
//! schema version for one canonical table.

use crate::dtype::DType;
use crate::version::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// The single partition column every contract declares.
pub const BUCKET_COLUMN: &str = "bucket";
/// Time column used to derive the bucket.
pub const TICK_COLUMN: &str = "tick";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("table name '{0}' is not lower_snake")]
    InvalidName(String),
    #[error("table '{table}': partitioning must be [\"bucket\"], got {got:?}")]
    Partitioning { table: String, got: Vec<String> },
    #[error("table '{table}': column '{column}' is both required and nullable")]
    RequiredAndNullable { table: String, column: String },
    #[error("table '{table}': column '{column}' is not declared in columns")]
    Undeclared { table: String, column: String },
    #[error("table '{table}': 'bucket' must be a required column")]
    BucketNotRequired { table: String },
    #[error("table '{table}': 'tick' must be i64, got {got}")]
    TickNotI64 { table: String, got: DType },
    #[error("schema version date must be ISO YYYY-MM-DD, got '{0}'")]
    Version(String),
    #[error("contract json: {0}")]
    Json(String),
}

/// Externally supplied schema descriptor for a canonical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContract {
    pub name: String,
    pub columns: BTreeMap<String, DType>,
    pub partitioning: Vec<String>,
    pub required: BTreeSet<String>,
    pub nullable: BTreeSet<String>,
    pub version: SchemaVersion,
}

impl TableContract {
    /// Build a contract and check its invariants. Partitioning is always `["bucket"]`.
    pub fn new<K, R, N>(
        name: &str,
        columns: impl IntoIterator<Item = (K, DType)>,
        required: impl IntoIterator<Item = R>,
        nullable: impl IntoIterator<Item = N>,
        version: SchemaVersion,
    ) -> Result<Self, ContractError>
    where
        K: Into<String>,
        R: Into<String>,
        N: Into<String>,
    {
        let contract = Self {
            name: name.to_string(),
            columns: columns.into_iter().map(|(c, d)| (c.into(), d)).collect(),
            partitioning: vec![BUCKET_COLUMN.to_string()],
            required: required.into_iter().map(Into::into).collect(),
            nullable: nullable.into_iter().map(Into::into).collect(),
            version,
        };
        contract.validate()?;
        Ok(contract)
    }

    /// Parse a contract from its JSON form and check its invariants.
    pub fn from_json_str(s: &str) -> Result<Self, ContractError> {
        let contract: TableContract =
            serde_json::from_str(s).map_err(|e| ContractError::Json(e.to_string()))?;
        contract.validate()?;
        Ok(contract)
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if !is_lower_snake(&self.name) {
            return Err(ContractError::InvalidName(self.name.clone()));
        }
        if self.partitioning.len() != 1 || self.partitioning[0] != BUCKET_COLUMN {
            return Err(ContractError::Partitioning {
                table: self.name.clone(),
                got: self.partitioning.clone(),
            });
        }
        if let Some(column) = self.required.intersection(&self.nullable).next() {
            return Err(ContractError::RequiredAndNullable {
                table: self.name.clone(),
                column: column.clone(),
            });
        }
        if let Some(column) = self
            .required
            .iter()
            .chain(self.nullable.iter())
            .find(|c| !self.columns.contains_key(*c))
        {
            return Err(ContractError::Undeclared {
                table: self.name.clone(),
                column: column.clone(),
            });
        }
        if !self.required.contains(BUCKET_COLUMN) {
            return Err(ContractError::BucketNotRequired {
                table: self.name.clone(),
            });
        }
        match self.dtype_of(TICK_COLUMN) {
            Some(got) if got != DType::I64 => {
                return Err(ContractError::TickNotI64 {
                    table: self.name.clone(),
                    got,
                })
            }
            _ => {}
        }
        self.version.validate()
    }

    /// Columns a frame may carry under strict mode: required ∪ nullable.
    pub fn known_columns(&self) -> BTreeSet<&str> {
        self.required
            .iter()
            .chain(self.nullable.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn dtype_of(&self, column: &str) -> Option<DType> {
        self.columns.get(column).copied()
    }
}

fn is_lower_snake(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
