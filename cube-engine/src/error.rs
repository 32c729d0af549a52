//! FILENAME: cube-engine/src/error.rs

use thiserror::Error;

/// Errors surfaced by cube configuration, loading, and mutation.
///
/// Aggregation itself never fails: aggregate and replace are total over
/// well-typed inputs, and an aggregator without incremental support is a
/// designed degradation (dirty + lazy recompute), not an error.
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("Duplicate field in schema: {0}")]
    DuplicateField(String),

    #[error("Field name 'id' is reserved for record identity")]
    ReservedFieldName,

    #[error("Field '{0}' is not a dimension and has no aggregation assigned")]
    MissingAggregation(String),

    #[error("Unknown grouping field: {0}")]
    UnknownDimension(String),

    #[error("Grouping field '{0}' is not flagged as a dimension")]
    NotADimension(String),

    #[error("Duplicate record id: {0}")]
    DuplicateRecordId(String),

    #[error("Unknown record id: {0}")]
    UnknownRecord(String),

    #[error("Record '{0}' is not a leaf")]
    NotALeaf(String),

    #[error("Field '{0}' is a grouping dimension; changing it reshapes the hierarchy and requires a rebuild")]
    DimensionUpdate(String),
}
