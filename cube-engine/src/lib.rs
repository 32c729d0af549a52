//! FILENAME: cube-engine/src/lib.rs
//! PURPOSE: Main library entry point for the cube aggregation engine.
//! CONTEXT: Re-exports public types and modules for use by other crates.

pub mod aggregate;
pub mod engine;
pub mod error;
pub mod record;
pub mod schema;
pub mod update;

// Re-export commonly used types at the crate root
pub use aggregate::Aggregation;
pub use engine::{Cube, RECORD_ID_DELIMITER, ROOT_ID};
pub use error::CubeError;
pub use record::{NodeId, Record, RecordTree};
pub use schema::{CubeField, CubeSchema};
pub use update::{ChangeSet, RowUpdate, RowUpdates, Update, UpdateOrigin};
