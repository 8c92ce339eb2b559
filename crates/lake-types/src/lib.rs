//! Contract-side vocabulary shared by the run lake.
//!
//! Table contracts are owned by an external registry; this crate only gives them a
//! typed shape (`TableContract`, `DType`, `SchemaVersion`) and checks the structural
//! invariants every contract must satisfy before the engine will write against it.

pub mod contract;
pub mod dtype;
pub mod version;

pub use contract::{ContractError, TableContract, BUCKET_COLUMN, TICK_COLUMN};
pub use dtype::DType;
pub use version::SchemaVersion;
