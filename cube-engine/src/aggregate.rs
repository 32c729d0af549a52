//! FILENAME: cube-engine/src/aggregate.rs
//! Aggregation policies - HOW field values roll up.
//!
//! Every policy is a pure function over the rows it is handed: `aggregate`
//! computes from scratch, `replace` folds one described change into the
//! previous aggregate without rescanning the rows. Rows may be leaves or
//! groups; policies that treat immediate children as already aggregated
//! (Sum, Count, LeafCount) read the child's stored value, while Average
//! walks down to the leaves of the full subtree.
//!
//! `replace` is the reason this module exists at all: a cell edit in a deep
//! hierarchy must not cost O(leaves) per ancestor. Policies that cannot fold
//! a change incrementally say so via `supports_replace`, and the driver
//! falls back to marking the chain dirty for a lazy recompute.

use serde::{Deserialize, Serialize};

use store::Value;

use crate::record::{NodeId, RecordTree};
use crate::update::{RowUpdate, UpdateOrigin};

/// The closed set of aggregation policies assignable to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregation {
    /// Sum of non-null numeric values; `Null` when none contribute.
    Sum,
    /// Mean over the non-null leaf values of the full subtree.
    Average,
    /// Number of rows with a non-null value; groups contribute their
    /// already-aggregated count.
    Count,
    /// Number of immediate child rows.
    ChildCount,
    /// Number of leaves in the full subtree.
    LeafCount,
    /// The common value when every row agrees, else `Null`.
    Unique,
    /// The sole row's value when exactly one row, else `Null`.
    Single,
    /// Largest non-null numeric value.
    Max,
    /// Smallest non-null numeric value.
    Min,
    /// Always `Null`; opts a field out of aggregation.
    Null,
}

impl Aggregation {
    /// Computes the aggregate from scratch over `rows`.
    pub fn aggregate(&self, tree: &RecordTree, rows: &[NodeId], field: &str) -> Value {
        match self {
            Aggregation::Sum => {
                let mut sum: Option<f64> = None;
                for &row in rows {
                    if let Some(n) = tree.record(row).get(field).and_then(Value::as_number) {
                        *sum.get_or_insert(0.0) += n;
                    }
                }
                match sum {
                    Some(total) => Value::Number(total),
                    None => Value::Null,
                }
            }
            Aggregation::Average => {
                let mut total = 0.0;
                let mut count = 0u32;
                tree.for_each_leaf(rows, &mut |leaf| {
                    if let Some(n) = leaf.get(field).and_then(Value::as_number) {
                        total += n;
                        count += 1;
                    }
                });
                if count == 0 {
                    Value::Null
                } else {
                    Value::Number(total / count as f64)
                }
            }
            Aggregation::Count => {
                let mut count = 0.0;
                for &row in rows {
                    let record = tree.record(row);
                    if record.is_leaf() {
                        if record.get(field).map_or(false, |v| !v.is_null()) {
                            count += 1.0;
                        }
                    } else if let Some(n) = record.get(field).and_then(Value::as_number) {
                        count += n;
                    }
                }
                Value::Number(count)
            }
            Aggregation::ChildCount => Value::Number(rows.len() as f64),
            Aggregation::LeafCount => {
                let mut count = 0.0;
                for &row in rows {
                    let record = tree.record(row);
                    if record.is_leaf() {
                        count += 1.0;
                    } else if let Some(n) = record.get(field).and_then(Value::as_number) {
                        count += n;
                    }
                }
                Value::Number(count)
            }
            Aggregation::Unique => {
                let (first, rest) = match rows.split_first() {
                    Some((&first, rest)) => (first, rest),
                    None => return Value::Null,
                };
                let candidate = tree.record(first).get(field).unwrap_or(&Value::Null);
                for &row in rest {
                    if tree.record(row).get(field).unwrap_or(&Value::Null) != candidate {
                        return Value::Null;
                    }
                }
                candidate.clone()
            }
            Aggregation::Single => {
                if rows.len() == 1 {
                    tree.record(rows[0])
                        .get(field)
                        .cloned()
                        .unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            Aggregation::Max => numeric_extreme(tree, rows, field, |candidate, best| {
                candidate > best
            }),
            Aggregation::Min => numeric_extreme(tree, rows, field, |candidate, best| {
                candidate < best
            }),
            Aggregation::Null => Value::Null,
        }
    }

    /// Whether this policy can fold a change into the previous aggregate.
    /// When false the driver marks the ancestor chain dirty instead of
    /// calling `replace`.
    pub fn supports_replace(&self) -> bool {
        !matches!(self, Aggregation::Average | Aggregation::Single)
    }

    /// Folds one described change into `current` without rescanning `rows`,
    /// except where a policy's own rule requires it (Max/Min on a
    /// non-improving change). For policies without incremental support this
    /// degrades to a full `aggregate` over the rows as they now stand.
    pub fn replace(
        &self,
        tree: &RecordTree,
        rows: &[NodeId],
        current: Value,
        update: &RowUpdate,
    ) -> Value {
        match self {
            Aggregation::Sum => {
                let curr = current.as_number();
                let old = update.old_value.as_number();
                let new = update.new_value.as_number();
                if curr.is_none() && old.is_none() && new.is_none() {
                    return Value::Null;
                }
                Value::Number(curr.unwrap_or(0.0) - old.unwrap_or(0.0) + new.unwrap_or(0.0))
            }
            Aggregation::Count => {
                let curr = current.as_number().unwrap_or(0.0);
                match update.origin {
                    UpdateOrigin::Leaf => {
                        let delta = match (update.old_value.is_null(), update.new_value.is_null())
                        {
                            (true, false) => 1.0,
                            (false, true) => -1.0,
                            _ => 0.0,
                        };
                        Value::Number(curr + delta)
                    }
                    UpdateOrigin::Group => {
                        let old = update.old_value.as_number().unwrap_or(0.0);
                        let new = update.new_value.as_number().unwrap_or(0.0);
                        Value::Number(curr - old + new)
                    }
                }
            }
            // Value changes cannot alter tree shape, so these stand.
            Aggregation::ChildCount | Aggregation::LeafCount => current,
            Aggregation::Unique => {
                if rows.len() == 1 {
                    return update.new_value.clone();
                }
                if update.new_value == current {
                    current
                } else {
                    Value::Null
                }
            }
            Aggregation::Max => match (current.as_number(), update.new_value.as_number()) {
                (None, None) => Value::Null,
                (None, Some(n)) => Value::Number(n),
                (Some(c), Some(n)) if n > c => Value::Number(n),
                // The change may have lowered the previous maximum.
                _ => self.aggregate(tree, rows, &update.field),
            },
            Aggregation::Min => match (current.as_number(), update.new_value.as_number()) {
                (None, None) => Value::Null,
                (None, Some(n)) => Value::Number(n),
                (Some(c), Some(n)) if n < c => Value::Number(n),
                _ => self.aggregate(tree, rows, &update.field),
            },
            Aggregation::Null => Value::Null,
            Aggregation::Average | Aggregation::Single => {
                self.aggregate(tree, rows, &update.field)
            }
        }
    }
}

fn numeric_extreme<F: Fn(f64, f64) -> bool>(
    tree: &RecordTree,
    rows: &[NodeId],
    field: &str,
    beats: F,
) -> Value {
    let mut best: Option<f64> = None;
    for &row in rows {
        if let Some(n) = tree.record(row).get(field).and_then(Value::as_number) {
            if best.map_or(true, |b| beats(n, b)) {
                best = Some(n);
            }
        }
    }
    match best {
        Some(n) => Value::Number(n),
        None => Value::Null,
    }
}
