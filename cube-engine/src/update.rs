//! FILENAME: cube-engine/src/update.rs
//! Update plumbing - the unit of work carried up the hierarchy.
//!
//! A leaf mutation produces one `Update` holding one `RowUpdate` per changed
//! field. As the driver walks the ancestor chain, each level re-expresses the
//! row updates in terms of its own aggregate change before handing them to
//! the next level up; the `origin` tag tells aggregators whether old/new
//! describe raw leaf values or a child group's aggregate.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use store::Value;

use crate::record::NodeId;

/// Where a row update's old/new values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Raw values on an updated leaf.
    Leaf,
    /// A child group's aggregate, re-expressed during propagation.
    Group,
}

/// An immutable description of a single field's value change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub origin: UpdateOrigin,
}

impl RowUpdate {
    pub fn leaf(field: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        RowUpdate {
            field: field.into(),
            old_value,
            new_value,
            origin: UpdateOrigin::Leaf,
        }
    }

    pub fn group(field: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        RowUpdate {
            field: field.into(),
            old_value,
            new_value,
            origin: UpdateOrigin::Group,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.old_value == self.new_value
    }
}

/// Field updates of one mutation event. Updates touch few fields, so these
/// stay inline in the common case.
pub type RowUpdates = SmallVec<[RowUpdate; 4]>;

/// The net effect of one mutation event on one record, before propagation.
/// `old_data` snapshots the record's pre-change state so ancestors can see
/// both sides of the change while replacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub node: NodeId,
    pub old_data: FxHashMap<String, Value>,
    pub row_updates: RowUpdates,
}

impl Update {
    pub fn new(node: NodeId, old_data: FxHashMap<String, Value>, row_updates: RowUpdates) -> Self {
        Update {
            node,
            old_data,
            row_updates,
        }
    }
}

/// The nodes affected by one update cycle, for dependent views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Every affected node in leaf-to-root walk order: the updated leaf,
    /// then each ancestor whose data changed or went dirty.
    pub nodes: Vec<NodeId>,

    /// The subset of `nodes` pending lazy recompute after this cycle.
    pub dirty: Vec<NodeId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }
}
