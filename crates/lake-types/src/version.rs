use crate::contract::ContractError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Pinned schema version of a table contract, e.g. `0.1@2025-09-20`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    /// ISO `YYYY-MM-DD` release date.
    pub date: String,
}

impl SchemaVersion {
    pub fn new(major: u32, minor: u32, date: impl Into<String>) -> Result<Self, ContractError> {
        let version = Self {
            major,
            minor,
            date: date.into(),
        };
        version.validate()?;
        Ok(version)
    }

    /// Deserialized versions skip `new`, so contracts re-check the date here.
    pub fn validate(&self) -> Result<(), ContractError> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|_| ContractError::Version(self.date.clone()))
    }
}

/// Rendered as embedded in part file metadata.
impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}@{}", self.major, self.minor, self.date)
    }
}
