//! FILENAME: store/src/field.rs
//! PURPOSE: Typed attribute definitions for row data.
//! CONTEXT: A `Field` names one attribute of a row shape, gives it a
//! semantic type, and carries display metadata. Fields are immutable after
//! creation and shared by reference across every record of the same shape.

use serde::{Deserialize, Serialize};
use crate::value::Value;

/// The semantic type of a field, driving value coercion at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// No coercion; values are stored as supplied.
    Auto,
    Bool,
    /// Numeric with fractional part truncated.
    Int,
    Number,
    String,
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::Auto
    }
}

/// A named, typed attribute definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(default)]
    pub field_type: FieldType,

    /// Human-facing label; generated from the name unless supplied.
    #[serde(default)]
    pub display_name: String,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let display_name = gen_display_name(&name);
        Field {
            name,
            field_type,
            display_name,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Coerces a raw value to this field's semantic type.
    /// `Null` passes through every type; a value that cannot be coerced
    /// loads as `Null`.
    pub fn parse_value(&self, raw: Value) -> Value {
        if raw.is_null() {
            return Value::Null;
        }
        match self.field_type {
            FieldType::Auto => raw,
            FieldType::Number => match raw {
                Value::Number(_) => raw,
                Value::Text(ref s) => match s.trim().parse::<f64>() {
                    Ok(n) => Value::Number(n),
                    Err(_) => Value::Null,
                },
                _ => Value::Null,
            },
            FieldType::Int => match raw {
                Value::Number(n) => Value::Number(n.trunc()),
                Value::Text(ref s) => match s.trim().parse::<f64>() {
                    Ok(n) => Value::Number(n.trunc()),
                    Err(_) => Value::Null,
                },
                _ => Value::Null,
            },
            FieldType::Bool => match raw {
                Value::Boolean(_) => raw,
                Value::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    _ => Value::Null,
                },
                _ => Value::Null,
            },
            FieldType::String => match raw {
                Value::Text(_) => raw,
                other => Value::Text(other.to_string()),
            },
        }
    }
}

/// Derives a display label from a field name.
/// "regionName" -> "Region Name", "region_name" -> "Region Name".
pub fn gen_display_name(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        } else if c.is_uppercase() && prev_lower {
            words.push(std::mem::take(&mut current));
            current.push(c);
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|w| capitalize(w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
