//! FILENAME: store/src/row.rs
//! PURPOSE: The flat input row supplied by a data-loading layer.
//! CONTEXT: A `RawRow` is one unprocessed source fact: a unique id plus a
//! field-name -> value map. Rows carry no type information of their own;
//! coercion happens against field definitions when a row is loaded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::value::Value;

/// One flat source row: a unique id and its named values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub id: String,
    pub values: HashMap<String, Value>,
}

impl RawRow {
    pub fn new(id: impl Into<String>) -> Self {
        RawRow {
            id: id.into(),
            values: HashMap::new(),
        }
    }

    /// Builder-style insert, for hosts assembling rows inline.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let row = RawRow::new("r1")
            .with("region", "EMEA")
            .with("amount", 10.0);
        assert_eq!(row.id, "r1");
        assert_eq!(row.get("region"), Some(&Value::text("EMEA")));
        assert_eq!(row.get("amount"), Some(&Value::Number(10.0)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let mut row = RawRow::new("r1").with("amount", 1.0);
        row.set("amount", 2.0);
        assert_eq!(row.get("amount"), Some(&Value::Number(2.0)));
    }
}
