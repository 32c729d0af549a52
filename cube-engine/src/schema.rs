//! FILENAME: cube-engine/src/schema.rs
//! Cube Schema - The serializable configuration.
//!
//! This module contains the types needed to DESCRIBE a cube: which fields
//! exist, which of them may serve as grouping dimensions, and how each field
//! aggregates. These structures are designed to be:
//! - Serializable (for saving/loading host documents)
//! - Immutable snapshots of configuration intent
//! - Validated once, before any hierarchy is built

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use store::Field;

use crate::aggregate::Aggregation;
use crate::error::CubeError;

// ============================================================================
// FIELD CONFIGURATION
// ============================================================================

/// One field of the cube: its definition plus aggregation behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeField {
    pub field: Field,

    /// Whether this field may be used as a grouping dimension.
    #[serde(default)]
    pub dimension: bool,

    /// How this field rolls up. A dimension left unassigned defaults to
    /// `Unique`; a non-dimension must be assigned explicitly (use `Null`
    /// to opt a field out of aggregation).
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
}

impl CubeField {
    pub fn new(field: Field) -> Self {
        CubeField {
            field,
            dimension: false,
            aggregation: None,
        }
    }

    pub fn dimension(field: Field) -> Self {
        CubeField {
            field,
            dimension: true,
            aggregation: None,
        }
    }

    pub fn aggregated(field: Field, aggregation: Aggregation) -> Self {
        CubeField {
            field,
            dimension: false,
            aggregation: Some(aggregation),
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// The aggregation actually applied to this field, after defaulting.
    pub fn effective_aggregation(&self) -> Option<Aggregation> {
        match self.aggregation {
            Some(a) => Some(a),
            None if self.dimension => Some(Aggregation::Unique),
            None => None,
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// The validated, ordered field set of a cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeSchema {
    fields: Vec<CubeField>,
}

impl CubeSchema {
    /// Builds a schema, rejecting misconfiguration up front.
    pub fn new(fields: Vec<CubeField>) -> Result<Self, CubeError> {
        let schema = CubeSchema { fields };
        schema.validate()?;
        Ok(schema)
    }

    /// Re-checks the schema invariants. Called again at hierarchy build so
    /// that schemas deserialized from a host document are covered too.
    pub fn validate(&self) -> Result<(), CubeError> {
        let mut seen = HashSet::new();
        for cf in &self.fields {
            let name = cf.field.name.as_str();
            if name == "id" {
                return Err(CubeError::ReservedFieldName);
            }
            if !seen.insert(name) {
                return Err(CubeError::DuplicateField(name.to_string()));
            }
            if cf.effective_aggregation().is_none() {
                return Err(CubeError::MissingAggregation(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> &[CubeField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&CubeField> {
        self.fields.iter().find(|cf| cf.field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Every field paired with its effective aggregation, in schema order.
    pub fn aggregated_fields(&self) -> Vec<(String, Aggregation)> {
        self.fields
            .iter()
            .filter_map(|cf| {
                cf.effective_aggregation()
                    .map(|a| (cf.field.name.clone(), a))
            })
            .collect()
    }
}

impl Default for CubeSchema {
    fn default() -> Self {
        CubeSchema { fields: Vec::new() }
    }
}
