//! FILENAME: store/src/lib.rs
//! PURPOSE: Main library entry point for the shared data model.
//! CONTEXT: Re-exports the value, field, and row types for use by other crates.

pub mod field;
pub mod row;
pub mod value;

// Re-export commonly used types at the crate root
pub use field::{gen_display_name, Field, FieldType};
pub use row::RawRow;
pub use value::Value;
