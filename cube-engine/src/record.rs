//! FILENAME: cube-engine/src/record.rs
//! Record Tree - HOW hierarchy state is held.
//!
//! A `Record` is one row of the cube: a leaf fact loaded from source data,
//! or a group holding the rolled-up values for everything beneath it. Records
//! live in a flat arena (`RecordTree`); parent and child links are indices
//! into that arena, so ownership stays in one vector while the logical
//! structure remains a rooted tree.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use store::{RawRow, Value};

use crate::schema::{CubeField, CubeSchema};

/// Index of a record within its tree.
pub type NodeId = usize;

// ============================================================================
// RECORD
// ============================================================================

/// One node of the hierarchy: a leaf fact or an aggregated group.
///
/// Invariant: a record is a leaf iff it has no children. A leaf's data comes
/// from its source row; a group's data holds the current aggregate per field,
/// except for its applied dimensions, which hold the grouping values that
/// define the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    id: String,

    /// Human-facing label: the source id for leaves, the dimension value for
    /// groups, `Total` for the root.
    pub label: String,

    /// The shared field set this record was shaped by.
    #[serde(skip)]
    fields: Arc<CubeSchema>,

    data: FxHashMap<String, Value>,

    /// Grouping values applied on the path down to this node, keyed by
    /// dimension field name. Empty for leaves and the root.
    applied_dimensions: FxHashMap<String, Value>,

    parent: Option<NodeId>,
    children: Vec<NodeId>,

    /// Set when a stored aggregate is known stale pending a full recompute.
    dirty: bool,
}

impl Record {
    /// Builds a leaf from a source row. Only declared fields are copied in,
    /// coerced to their field type; extra properties on the row are dropped.
    pub(crate) fn leaf(fields: Arc<CubeSchema>, row: &RawRow) -> Record {
        let mut data = FxHashMap::default();
        for cf in fields.fields() {
            if let Some(raw) = row.get(&cf.field.name) {
                data.insert(cf.field.name.clone(), cf.field.parse_value(raw.clone()));
            }
        }
        Record {
            id: row.id.clone(),
            label: row.id.clone(),
            fields,
            data,
            applied_dimensions: FxHashMap::default(),
            parent: None,
            children: Vec::new(),
            dirty: false,
        }
    }

    /// Builds a group node. Every declared field starts at `Null`; the
    /// applied dimension values are then written over those slots, and the
    /// aggregation pass fills in the rest.
    pub(crate) fn group(
        fields: Arc<CubeSchema>,
        id: String,
        label: String,
        applied_dimensions: FxHashMap<String, Value>,
    ) -> Record {
        let mut data = FxHashMap::default();
        for cf in fields.fields() {
            data.insert(cf.field.name.clone(), Value::Null);
        }
        for (name, value) in &applied_dimensions {
            data.insert(name.clone(), value.clone());
        }
        Record {
            label,
            id,
            fields,
            data,
            applied_dimensions,
            parent: None,
            children: Vec::new(),
            dirty: false,
        }
    }

    /// The record's identity, fixed at construction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the stored value for a field, or `None` if it was never set.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn data(&self) -> &FxHashMap<String, Value> {
        &self.data
    }

    /// Applies `f` to every declared field and its current value.
    pub fn each_field<F: FnMut(&CubeField, Option<&Value>)>(&self, mut f: F) {
        for cf in self.fields.fields() {
            f(cf, self.data.get(cf.field.name.as_str()));
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn applied_dimensions(&self) -> &FxHashMap<String, Value> {
        &self.applied_dimensions
    }

    pub fn is_applied_dimension(&self, field: &str) -> bool {
        self.applied_dimensions.contains_key(field)
    }

    pub(crate) fn set_value(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

// ============================================================================
// RECORD TREE
// ============================================================================

/// The arena holding every record of one built hierarchy.
///
/// The first record pushed is the root. Node ids are stable for the lifetime
/// of the tree; a rebuild produces a fresh tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordTree {
    nodes: Vec<Record>,
    index: FxHashMap<String, NodeId>,
}

impl RecordTree {
    pub fn new() -> Self {
        RecordTree {
            nodes: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> NodeId {
        0
    }

    /// Direct access by node id. Ids handed out by this tree are always
    /// valid; indexing with a foreign id panics.
    pub fn record(&self, id: NodeId) -> &Record {
        &self.nodes[id]
    }

    pub fn get(&self, id: NodeId) -> Option<&Record> {
        self.nodes.get(id)
    }

    pub(crate) fn record_mut(&mut self, id: NodeId) -> &mut Record {
        &mut self.nodes[id]
    }

    pub fn node_by_id(&self, record_id: &str) -> Option<NodeId> {
        self.index.get(record_id).copied()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// All leaf node ids, in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_leaf())
            .map(|(i, _)| i)
    }

    pub(crate) fn push(&mut self, record: Record) -> NodeId {
        let id = self.nodes.len();
        self.index.insert(record.id.clone(), id);
        self.nodes.push(record);
        id
    }

    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Nodes of the subtree under `from`, children strictly before parents.
    pub fn post_order(&self, from: NodeId) -> Vec<NodeId> {
        let mut stack = vec![from];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().copied());
        }
        order.reverse();
        order
    }

    /// Applies `f` to every leaf at or below the given rows, without
    /// touching group aggregates along the way.
    pub fn for_each_leaf<F: FnMut(&Record)>(&self, rows: &[NodeId], f: &mut F) {
        let mut stack: Vec<NodeId> = rows.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let record = &self.nodes[id];
            if record.is_leaf() {
                f(record);
            } else {
                stack.extend(record.children.iter().rev().copied());
            }
        }
    }
}
