use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Logical column type declared by a table contract.
///
/// The set is closed. Scalar kinds are cast on write; nested kinds are only
/// checked for their outer shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "i64")]
    I64,
    #[serde(rename = "f64")]
    F64,
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "struct")]
    Struct,
    #[serde(rename = "list[struct]")]
    ListStruct,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::I64 => "i64",
            DType::F64 => "f64",
            DType::Str => "str",
            DType::Struct => "struct",
            DType::ListStruct => "list[struct]",
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "i64" => Ok(DType::I64),
            "f64" => Ok(DType::F64),
            "str" => Ok(DType::Str),
            "struct" => Ok(DType::Struct),
            "list[struct]" => Ok(DType::ListStruct),
            other => Err(format!("unknown dtype '{other}'")),
        }
    }
}
