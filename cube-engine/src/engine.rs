//! FILENAME: cube-engine/src/engine.rs
//! Cube Engine - builds the hierarchy and keeps its aggregates current.
//!
//! This module takes a CubeSchema (configuration), an ordered list of
//! grouping dimensions, and flat source rows, and produces the aggregated
//! record tree; it then folds leaf-level mutations into that tree
//! incrementally.
//!
//! Algorithm:
//! 1. Validate the schema and the grouping fields
//! 2. Shape source rows into leaf records (declared fields only, coerced)
//! 3. Partition leaves level by level into group nodes under a single root
//! 4. Aggregate bottom-up in post-order
//!
//! On mutation, the driver walks the ancestor chain replacing aggregates
//! level by level, or marks the chain dirty when a policy cannot fold the
//! change; dirty nodes recompute lazily, children first, on the next read.

use std::sync::Arc;

use log::{debug, trace};
use rustc_hash::FxHashMap;

use store::{RawRow, Value};

use crate::aggregate::Aggregation;
use crate::error::CubeError;
use crate::record::{NodeId, Record, RecordTree};
use crate::schema::CubeSchema;
use crate::update::{ChangeSet, RowUpdate, RowUpdates, Update};

/// Separator between path segments of generated group record ids.
pub const RECORD_ID_DELIMITER: &str = ">>";

/// Id of the synthetic root record.
pub const ROOT_ID: &str = "root";

const ROOT_LABEL: &str = "Total";

// ============================================================================
// CUBE
// ============================================================================

/// A built hierarchy with live aggregates.
///
/// All mutation goes through `update_leaf`; one update cycle runs to
/// completion before the next begins, which the `&mut self` receivers
/// enforce at compile time.
#[derive(Debug, Clone)]
pub struct Cube {
    schema: Arc<CubeSchema>,

    /// Grouping fields, outermost level first.
    dimensions: Vec<String>,

    /// Every field paired with its effective aggregation, in schema order.
    aggregated_fields: Vec<(String, Aggregation)>,

    tree: RecordTree,
}

impl Cube {
    /// Builds the hierarchy from flat source rows and computes every
    /// aggregate bottom-up.
    pub fn build(
        schema: CubeSchema,
        dimensions: &[&str],
        rows: &[RawRow],
    ) -> Result<Cube, CubeError> {
        // Step 1: validate configuration
        schema.validate()?;
        for &dim in dimensions {
            let cf = schema
                .field(dim)
                .ok_or_else(|| CubeError::UnknownDimension(dim.to_string()))?;
            if !cf.dimension {
                return Err(CubeError::NotADimension(dim.to_string()));
            }
        }

        let schema = Arc::new(schema);
        let aggregated_fields = schema.aggregated_fields();

        // Step 2: shape source rows into leaf records
        let leaves: Vec<Record> = rows
            .iter()
            .map(|row| Record::leaf(schema.clone(), row))
            .collect();

        // Step 3: build the tree, one level per grouping dimension
        let mut tree = RecordTree::new();
        let root = tree.push(Record::group(
            schema.clone(),
            ROOT_ID.to_string(),
            ROOT_LABEL.to_string(),
            FxHashMap::default(),
        ));

        let mut cube = Cube {
            schema,
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            aggregated_fields,
            tree,
        };
        cube.insert_level(root, leaves, 0, &FxHashMap::default())?;

        // Step 4: aggregate bottom-up
        cube.compute_initial_aggregates();

        debug!(
            "cube built: {} records ({} leaves, {} grouping levels)",
            cube.tree.len(),
            cube.tree.leaves().count(),
            cube.dimensions.len()
        );
        Ok(cube)
    }

    /// Partitions `records` by the dimension at `depth`, creating one group
    /// node per distinct value; below the deepest dimension the records
    /// attach as leaves.
    fn insert_level(
        &mut self,
        parent: NodeId,
        records: Vec<Record>,
        depth: usize,
        applied: &FxHashMap<String, Value>,
    ) -> Result<(), CubeError> {
        if depth == self.dimensions.len() {
            for record in records {
                if self.tree.node_by_id(record.id()).is_some() {
                    return Err(CubeError::DuplicateRecordId(record.id().to_string()));
                }
                let node = self.tree.push(record);
                self.tree.attach(parent, node);
            }
            return Ok(());
        }

        let dim = self.dimensions[depth].clone();

        // Partition preserving first-seen value order. Keys are compared by
        // value equality, so null dimension values share one bucket.
        let mut buckets: Vec<(Value, Vec<Record>)> = Vec::new();
        for record in records {
            let key = record.get(&dim).cloned().unwrap_or(Value::Null);
            match buckets.iter_mut().find(|(k, _)| *k == key) {
                Some((_, bucket)) => bucket.push(record),
                None => buckets.push((key, vec![record])),
            }
        }

        let parent_id = self.tree.record(parent).id().to_string();
        for (key, bucket) in buckets {
            let label = dimension_label(&key);
            let group_id = format!(
                "{}{}{}=[{}]",
                parent_id, RECORD_ID_DELIMITER, dim, label
            );
            if self.tree.node_by_id(&group_id).is_some() {
                return Err(CubeError::DuplicateRecordId(group_id));
            }
            let mut group_applied = applied.clone();
            group_applied.insert(dim.clone(), key);

            let node = self.tree.push(Record::group(
                self.schema.clone(),
                group_id,
                label,
                group_applied.clone(),
            ));
            self.tree.attach(parent, node);
            self.insert_level(node, bucket, depth + 1, &group_applied)?;
        }
        Ok(())
    }

    fn compute_initial_aggregates(&mut self) {
        let root = self.tree.root();
        for node in self.tree.post_order(root) {
            // The root aggregates even when empty, so counts read 0 rather
            // than never being set.
            if !self.tree.record(node).is_leaf() || node == root {
                self.recompute_node(node);
            }
        }
    }

    /// Full per-field recompute of one group node; clears its dirty flag.
    fn recompute_node(&mut self, node: NodeId) {
        let children = self.tree.children(node).to_vec();
        let mut computed: Vec<(String, Value)> = Vec::new();
        for (field, aggregation) in &self.aggregated_fields {
            if self.tree.record(node).is_applied_dimension(field) {
                continue;
            }
            computed.push((
                field.clone(),
                aggregation.aggregate(&self.tree, &children, field),
            ));
        }
        let record = self.tree.record_mut(node);
        for (field, value) in computed {
            record.set_value(&field, value);
        }
        record.clear_dirty();
    }

    // ========================================================================
    // INCREMENTAL UPDATES
    // ========================================================================

    /// Applies field changes to one leaf and folds them up the ancestor
    /// chain. Fields absent from the schema or from the record are skipped;
    /// values are coerced exactly as loading does. Returns the nodes a
    /// dependent view must refresh.
    pub fn update_leaf(
        &mut self,
        record_id: &str,
        patch: &[(&str, Value)],
    ) -> Result<ChangeSet, CubeError> {
        // Step 1: locate the target leaf
        let leaf = self
            .tree
            .node_by_id(record_id)
            .ok_or_else(|| CubeError::UnknownRecord(record_id.to_string()))?;
        if !self.tree.record(leaf).is_leaf() {
            return Err(CubeError::NotALeaf(record_id.to_string()));
        }

        // Step 2: reject hierarchy-reshaping changes up front
        for &(field, _) in patch.iter() {
            if self.dimensions.iter().any(|d| d.as_str() == field) {
                return Err(CubeError::DimensionUpdate(field.to_string()));
            }
        }

        // Step 3: diff the patch against current leaf state
        let old_data = self.tree.record(leaf).data().clone();
        let mut row_updates = RowUpdates::new();
        for &(field, ref new_value) in patch.iter() {
            let coerced = match self.schema.field(field) {
                Some(cf) => cf.field.parse_value(new_value.clone()),
                None => {
                    trace!("update '{}': unknown field '{}' skipped", record_id, field);
                    continue;
                }
            };
            let old_value = match self.tree.record(leaf).get(field) {
                Some(v) => v.clone(),
                None => {
                    trace!(
                        "update '{}': field '{}' not present on record, skipped",
                        record_id,
                        field
                    );
                    continue;
                }
            };
            if coerced == old_value {
                continue;
            }
            self.tree
                .record_mut(leaf)
                .set_value(field, coerced.clone());
            row_updates.push(RowUpdate::leaf(field, old_value, coerced));
        }

        if row_updates.is_empty() {
            return Ok(ChangeSet::default());
        }

        // Step 4: propagate leaf-to-root
        let change_set = self.propagate(Update::new(leaf, old_data, row_updates));
        debug!(
            "update '{}': {} nodes affected, {} pending recompute",
            record_id,
            change_set.nodes.len(),
            change_set.dirty.len()
        );
        Ok(change_set)
    }

    /// Walks ancestors from the updated leaf to the root, one level at a
    /// time. Each level finishes before its parent starts, because a
    /// parent's replace may read the child aggregate written just below it.
    fn propagate(&mut self, update: Update) -> ChangeSet {
        let mut change_set = ChangeSet::default();
        change_set.nodes.push(update.node);

        let mut updates = update.row_updates;
        let mut node = update.node;
        let mut needs_recompute = false;

        while let Some(parent) = self.tree.parent(node) {
            if self.tree.record(parent).is_dirty() {
                // Everything from here up is already pending recompute; the
                // lazy pass will fold this change in when it reads.
                let mut cursor = Some(parent);
                while let Some(id) = cursor {
                    change_set.nodes.push(id);
                    change_set.dirty.push(id);
                    cursor = self.tree.parent(id);
                }
                break;
            }

            let mut next = RowUpdates::new();
            if !updates.is_empty() {
                let children = self.tree.children(parent).to_vec();
                for row_update in updates.iter() {
                    let aggregation = match self.aggregation_for(&row_update.field) {
                        Some(a) => a,
                        None => continue,
                    };
                    if !aggregation.supports_replace() {
                        needs_recompute = true;
                        continue;
                    }
                    let old = self
                        .tree
                        .record(parent)
                        .get(&row_update.field)
                        .cloned()
                        .unwrap_or(Value::Null);
                    let new = aggregation.replace(&self.tree, &children, old.clone(), row_update);
                    if new == old {
                        continue;
                    }
                    self.tree
                        .record_mut(parent)
                        .set_value(&row_update.field, new.clone());
                    // Re-express the change as this node's own aggregate
                    // delta for the next level up.
                    next.push(RowUpdate::group(row_update.field.clone(), old, new));
                }
            }

            let changed = !next.is_empty();
            if needs_recompute {
                self.tree.record_mut(parent).mark_dirty();
                change_set.dirty.push(parent);
            }
            if changed || needs_recompute {
                change_set.nodes.push(parent);
            } else {
                // Nothing above can change either.
                break;
            }

            updates = next;
            node = parent;
        }

        change_set
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Current aggregate for a field on a node, recomputing first if the
    /// node is pending. Missing fields read as `Null`.
    pub fn value(&mut self, node: NodeId, field: &str) -> Value {
        self.resolve(node);
        self.tree
            .record(node)
            .get(field)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Resolves a pending recompute on `node`, dirty children first. Clean
    /// nodes return immediately, so repeated reads cost nothing extra.
    pub fn resolve(&mut self, node: NodeId) {
        if !self.tree.record(node).is_dirty() {
            return;
        }
        trace!("resolving dirty node '{}'", self.tree.record(node).id());
        let children = self.tree.children(node).to_vec();
        for child in children {
            self.resolve(child);
        }
        self.recompute_node(node);
    }

    pub fn is_dirty(&self, node: NodeId) -> bool {
        self.tree.record(node).is_dirty()
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn node(&self, record_id: &str) -> Option<NodeId> {
        self.tree.node_by_id(record_id)
    }

    pub fn record(&self, node: NodeId) -> &Record {
        self.tree.record(node)
    }

    pub fn tree(&self) -> &RecordTree {
        &self.tree
    }

    pub fn schema(&self) -> &CubeSchema {
        &self.schema
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    fn aggregation_for(&self, field: &str) -> Option<Aggregation> {
        self.aggregated_fields
            .iter()
            .find(|(name, _)| name.as_str() == field)
            .map(|(_, a)| *a)
    }
}

fn dimension_label(value: &Value) -> String {
    if value.is_null() {
        "null".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CubeField;
    use store::{Field, FieldType};

    fn sales_schema() -> CubeSchema {
        CubeSchema::new(vec![
            CubeField::dimension(Field::new("region", FieldType::String)),
            CubeField::dimension(Field::new("sector", FieldType::String)),
            CubeField::aggregated(Field::new("amount", FieldType::Number), Aggregation::Sum),
            CubeField::aggregated(Field::new("quantity", FieldType::Number), Aggregation::Average),
            CubeField::aggregated(Field::new("currency", FieldType::String), Aggregation::Unique),
        ])
        .unwrap()
    }

    fn sales_rows() -> Vec<RawRow> {
        vec![
            RawRow::new("r1")
                .with("region", "EMEA")
                .with("sector", "Tech")
                .with("amount", 10.0)
                .with("quantity", 1.0)
                .with("currency", "USD"),
            RawRow::new("r2")
                .with("region", "EMEA")
                .with("sector", "Tech")
                .with("amount", 20.0)
                .with("quantity", 3.0)
                .with("currency", "USD"),
            RawRow::new("r3")
                .with("region", "EMEA")
                .with("sector", "Retail")
                .with("amount", 30.0)
                .with("quantity", 5.0)
                .with("currency", "USD"),
            RawRow::new("r4")
                .with("region", "APAC")
                .with("sector", "Tech")
                .with("amount", 40.0)
                .with("quantity", 7.0)
                .with("currency", "USD"),
        ]
    }

    fn sales_cube() -> Cube {
        Cube::build(sales_schema(), &["region", "sector"], &sales_rows()).unwrap()
    }

    // ========================================================================
    // BUILD
    // ========================================================================

    #[test]
    fn test_build_shapes_hierarchy() {
        let cube = sales_cube();
        let root = cube.root();

        assert_eq!(cube.record(root).id(), "root");
        assert_eq!(cube.record(root).label, "Total");
        assert_eq!(cube.tree().children(root).len(), 2);

        let emea = cube.node("root>>region=[EMEA]").unwrap();
        let apac = cube.node("root>>region=[APAC]").unwrap();
        assert_eq!(cube.tree().children(root), &[emea, apac]);
        assert_eq!(cube.record(emea).label, "EMEA");

        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();
        assert_eq!(cube.tree().parent(tech), Some(emea));
        assert_eq!(cube.tree().children(tech).len(), 2);

        let r1 = cube.node("r1").unwrap();
        assert!(cube.record(r1).is_leaf());
        assert_eq!(cube.tree().parent(r1), Some(tech));
    }

    #[test]
    fn test_initial_aggregates_bottom_up() {
        let mut cube = sales_cube();
        let root = cube.root();
        let emea = cube.node("root>>region=[EMEA]").unwrap();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();

        assert_eq!(cube.value(root, "amount"), Value::Number(100.0));
        assert_eq!(cube.value(emea, "amount"), Value::Number(60.0));
        assert_eq!(cube.value(tech, "amount"), Value::Number(30.0));

        // Applied dimensions hold the grouping value, not an aggregate
        assert_eq!(cube.value(tech, "region"), Value::text("EMEA"));
        assert_eq!(cube.value(tech, "sector"), Value::text("Tech"));

        // Unaggregated-at-this-level dimensions roll up via Unique
        assert_eq!(cube.value(emea, "sector"), Value::Null);
        assert_eq!(cube.value(root, "region"), Value::Null);
        assert_eq!(cube.value(root, "currency"), Value::text("USD"));

        assert_eq!(cube.value(emea, "quantity"), Value::Number(3.0));
        assert_eq!(cube.value(root, "quantity"), Value::Number(4.0));
    }

    #[test]
    fn test_null_dimension_values_bucket_together() {
        let schema = sales_schema();
        let rows = vec![
            RawRow::new("a").with("amount", 1.0),
            RawRow::new("b").with("region", Value::Null).with("amount", 2.0),
        ];
        let mut cube = Cube::build(schema, &["region"], &rows).unwrap();

        let bucket = cube.node("root>>region=[null]").unwrap();
        assert_eq!(cube.tree().children(bucket).len(), 2);
        assert_eq!(cube.record(bucket).label, "null");
        assert_eq!(cube.value(bucket, "amount"), Value::Number(3.0));

        // A declared field the record never carried stays a no-op
        let changes = cube
            .update_leaf("a", &[("quantity", Value::Number(5.0))])
            .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_build_rejects_bad_grouping() {
        let err = Cube::build(sales_schema(), &["flavor"], &sales_rows()).unwrap_err();
        assert!(matches!(err, CubeError::UnknownDimension(f) if f == "flavor"));

        let err = Cube::build(sales_schema(), &["amount"], &sales_rows()).unwrap_err();
        assert!(matches!(err, CubeError::NotADimension(f) if f == "amount"));
    }

    #[test]
    fn test_build_rejects_duplicate_record_ids() {
        let rows = vec![
            RawRow::new("r1").with("region", "EMEA").with("amount", 1.0),
            RawRow::new("r1").with("region", "EMEA").with("amount", 2.0),
        ];
        let err = Cube::build(sales_schema(), &["region"], &rows).unwrap_err();
        assert!(matches!(err, CubeError::DuplicateRecordId(id) if id == "r1"));
    }

    #[test]
    fn test_empty_cube_has_aggregated_root() {
        let schema = CubeSchema::new(vec![CubeField::aggregated(
            Field::new("deals", FieldType::Number),
            Aggregation::Count,
        )])
        .unwrap();
        let mut cube = Cube::build(schema, &[], &[]).unwrap();
        let root = cube.root();
        assert_eq!(cube.value(root, "deals"), Value::Number(0.0));
    }

    // ========================================================================
    // INCREMENTAL UPDATES
    // ========================================================================

    #[test]
    fn test_sum_update_walks_only_ancestor_chain() {
        let mut cube = sales_cube();
        let root = cube.root();
        let emea = cube.node("root>>region=[EMEA]").unwrap();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();
        let apac = cube.node("root>>region=[APAC]").unwrap();
        let r1 = cube.node("r1").unwrap();

        let changes = cube
            .update_leaf("r1", &[("amount", Value::Number(15.0))])
            .unwrap();

        assert_eq!(changes.nodes, vec![r1, tech, emea, root]);
        assert!(changes.dirty.is_empty());
        assert!(!changes.contains(apac));

        assert_eq!(cube.value(tech, "amount"), Value::Number(35.0));
        assert_eq!(cube.value(emea, "amount"), Value::Number(65.0));
        assert_eq!(cube.value(root, "amount"), Value::Number(105.0));
        // Sibling leaves and branches are untouched
        assert_eq!(cube.value(apac, "amount"), Value::Number(40.0));
        let r2 = cube.node("r2").unwrap();
        assert_eq!(cube.record(r2).get("amount"), Some(&Value::Number(20.0)));
    }

    #[test]
    fn test_count_update_folds_group_deltas() {
        let schema = CubeSchema::new(vec![
            CubeField::dimension(Field::new("region", FieldType::String)),
            CubeField::dimension(Field::new("sector", FieldType::String)),
            CubeField::aggregated(Field::new("deals", FieldType::Number), Aggregation::Count),
        ])
        .unwrap();
        let rows = vec![
            RawRow::new("r1")
                .with("region", "EMEA")
                .with("sector", "Tech")
                .with("deals", Value::Null),
            RawRow::new("r2")
                .with("region", "EMEA")
                .with("sector", "Tech")
                .with("deals", 4.0),
            RawRow::new("r3")
                .with("region", "EMEA")
                .with("sector", "Retail")
                .with("deals", 9.0),
        ];
        let mut cube = Cube::build(schema, &["region", "sector"], &rows).unwrap();
        let root = cube.root();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();

        assert_eq!(cube.value(tech, "deals"), Value::Number(1.0));
        assert_eq!(cube.value(root, "deals"), Value::Number(2.0));

        // Null -> non-null counts one more at every level; the upper levels
        // consume the child's aggregate delta, not the raw leaf values.
        cube.update_leaf("r1", &[("deals", Value::Number(7.0))])
            .unwrap();
        assert_eq!(cube.value(tech, "deals"), Value::Number(2.0));
        assert_eq!(cube.value(root, "deals"), Value::Number(3.0));

        // And back out again
        cube.update_leaf("r1", &[("deals", Value::Null)]).unwrap();
        assert_eq!(cube.value(tech, "deals"), Value::Number(1.0));
        assert_eq!(cube.value(root, "deals"), Value::Number(2.0));
    }

    #[test]
    fn test_unique_collapses_up_the_chain() {
        let mut cube = sales_cube();
        let root = cube.root();
        let emea = cube.node("root>>region=[EMEA]").unwrap();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();

        cube.update_leaf("r1", &[("currency", Value::text("EUR"))])
            .unwrap();

        assert_eq!(cube.value(tech, "currency"), Value::Null);
        assert_eq!(cube.value(emea, "currency"), Value::Null);
        assert_eq!(cube.value(root, "currency"), Value::Null);

        // The APAC branch still agrees with itself
        let apac = cube.node("root>>region=[APAC]").unwrap();
        assert_eq!(cube.value(apac, "currency"), Value::text("USD"));
    }

    #[test]
    fn test_max_update_rescans_current_children() {
        let schema = CubeSchema::new(vec![
            CubeField::dimension(Field::new("region", FieldType::String)),
            CubeField::aggregated(Field::new("peak", FieldType::Number), Aggregation::Max),
        ])
        .unwrap();
        let rows = vec![
            RawRow::new("a").with("region", "EMEA").with("peak", 10.0),
            RawRow::new("b").with("region", "EMEA").with("peak", 6.0),
        ];
        let mut cube = Cube::build(schema, &["region"], &rows).unwrap();
        let emea = cube.node("root>>region=[EMEA]").unwrap();

        // Raising the peak takes the fast path
        cube.update_leaf("a", &[("peak", Value::Number(12.0))]).unwrap();
        assert_eq!(cube.value(emea, "peak"), Value::Number(12.0));

        // Lowering the previous peak forces the rescan, which must see the
        // leaf's already-applied new value
        cube.update_leaf("a", &[("peak", Value::Number(2.0))]).unwrap();
        assert_eq!(cube.value(emea, "peak"), Value::Number(6.0));
    }

    #[test]
    fn test_update_errors() {
        let mut cube = sales_cube();

        let err = cube
            .update_leaf("ghost", &[("amount", Value::Number(1.0))])
            .unwrap_err();
        assert!(matches!(err, CubeError::UnknownRecord(id) if id == "ghost"));

        let err = cube
            .update_leaf("root>>region=[EMEA]", &[("amount", Value::Number(1.0))])
            .unwrap_err();
        assert!(matches!(err, CubeError::NotALeaf(_)));

        let err = cube
            .update_leaf("r1", &[("region", Value::text("APAC"))])
            .unwrap_err();
        assert!(matches!(err, CubeError::DimensionUpdate(f) if f == "region"));
    }

    #[test]
    fn test_unknown_field_is_noop_but_others_apply() {
        let mut cube = sales_cube();
        let root = cube.root();

        let changes = cube
            .update_leaf(
                "r1",
                &[
                    ("flavor", Value::text("grape")),
                    ("amount", Value::Number(11.0)),
                ],
            )
            .unwrap();

        assert!(!changes.is_empty());
        assert_eq!(cube.value(root, "amount"), Value::Number(101.0));
        assert_eq!(cube.record(cube.node("r1").unwrap()).get("flavor"), None);
    }

    #[test]
    fn test_noop_patch_yields_empty_change_set() {
        let mut cube = sales_cube();

        let changes = cube
            .update_leaf("r1", &[("amount", Value::Number(10.0))])
            .unwrap();
        assert!(changes.is_empty());

        // Coercion applies before the no-op comparison
        let changes = cube
            .update_leaf("r1", &[("amount", Value::text("10"))])
            .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_update_coerces_patched_values() {
        let mut cube = sales_cube();
        let root = cube.root();

        cube.update_leaf("r1", &[("amount", Value::text("15.5"))])
            .unwrap();
        assert_eq!(cube.value(root, "amount"), Value::Number(105.5));
    }

    // ========================================================================
    // DIRTY / LAZY RESOLUTION
    // ========================================================================

    #[test]
    fn test_average_update_dirties_chain_and_resolves_lazily() {
        let mut cube = sales_cube();
        let root = cube.root();
        let emea = cube.node("root>>region=[EMEA]").unwrap();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();
        let r1 = cube.node("r1").unwrap();

        let changes = cube
            .update_leaf("r1", &[("quantity", Value::Number(9.0))])
            .unwrap();

        assert_eq!(changes.nodes, vec![r1, tech, emea, root]);
        assert_eq!(changes.dirty, vec![tech, emea, root]);
        assert!(cube.is_dirty(tech));
        assert!(cube.is_dirty(root));

        // Reading the root resolves the whole chain beneath it
        assert_eq!(cube.value(root, "quantity"), Value::Number(6.0));
        assert!(!cube.is_dirty(root));
        assert!(!cube.is_dirty(emea));
        assert!(!cube.is_dirty(tech));
        assert_eq!(cube.value(tech, "quantity"), Value::Number(6.0));
    }

    #[test]
    fn test_dirty_resolution_matches_direct_aggregate() {
        let mut cube = sales_cube();
        let emea = cube.node("root>>region=[EMEA]").unwrap();

        cube.update_leaf("r3", &[("quantity", Value::Number(11.0))])
            .unwrap();
        assert!(cube.is_dirty(emea));

        let resolved = cube.value(emea, "quantity");
        let direct =
            Aggregation::Average.aggregate(cube.tree(), cube.tree().children(emea), "quantity");
        assert_eq!(resolved, direct);
        assert_eq!(resolved, Value::Number(5.0));
    }

    #[test]
    fn test_resolution_happens_at_most_once_per_cycle() {
        let mut cube = sales_cube();
        let root = cube.root();

        cube.update_leaf("r1", &[("quantity", Value::Number(9.0))])
            .unwrap();
        assert!(cube.is_dirty(root));

        // First read recomputes and clears; the second finds a clean node.
        let first = cube.value(root, "quantity");
        assert!(!cube.is_dirty(root));
        let second = cube.value(root, "quantity");
        assert_eq!(first, second);
    }

    #[test]
    fn test_update_onto_dirty_chain_defers_to_lazy_recompute() {
        let mut cube = sales_cube();
        let root = cube.root();
        let emea = cube.node("root>>region=[EMEA]").unwrap();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();
        let r1 = cube.node("r1").unwrap();

        cube.update_leaf("r1", &[("quantity", Value::Number(9.0))])
            .unwrap();
        assert!(cube.is_dirty(tech));

        // A second cycle reaching the dirty chain just flags it again; the
        // eventual recompute sees both changes.
        let changes = cube
            .update_leaf("r1", &[("amount", Value::Number(100.0))])
            .unwrap();
        assert_eq!(changes.nodes, vec![r1, tech, emea, root]);
        assert_eq!(changes.dirty, vec![tech, emea, root]);

        assert_eq!(cube.value(root, "amount"), Value::Number(190.0));
        assert_eq!(cube.value(root, "quantity"), Value::Number(6.0));
        assert!(!cube.is_dirty(tech));
    }

    #[test]
    fn test_mixed_patch_replaces_and_dirties_in_one_cycle() {
        let mut cube = sales_cube();
        let root = cube.root();
        let tech = cube.node("root>>region=[EMEA]>>sector=[Tech]").unwrap();

        let changes = cube
            .update_leaf(
                "r1",
                &[
                    ("amount", Value::Number(15.0)),
                    ("quantity", Value::Number(9.0)),
                ],
            )
            .unwrap();

        // Sum folded immediately, Average deferred
        assert_eq!(cube.record(tech).get("amount"), Some(&Value::Number(35.0)));
        assert!(changes.dirty.contains(&tech));
        assert!(cube.is_dirty(tech));

        assert_eq!(cube.value(root, "amount"), Value::Number(105.0));
        assert_eq!(cube.value(root, "quantity"), Value::Number(6.0));
    }
}
