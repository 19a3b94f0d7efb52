//! Validation and diffing of an edited location tree.
//!
//! The editor posts the whole tree back. [`plan_tree_save`] checks the
//! structural rules against the current rows and stock occupancy, then
//! returns the explicit create/update/delete operations that turn the stored
//! tree into the posted one.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use labinv_core::LocationId;

use crate::location::Location;
use crate::tree::LocationTree;

/// Tree node as posted by the editor. Ids stay raw until validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNodeInput {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub children: Vec<TreeNodeInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Invalid UUID: {0}")]
    BadId(String),

    #[error("Location label cannot be empty")]
    EmptyLabel,

    #[error("Duplicated label: {0}")]
    LabelNotUnique(String),

    #[error("Duplicated id: {0}")]
    IdNotUnique(LocationId),

    #[error("Container Area must exist")]
    ContainerRequired,

    #[error("Container Area must be root")]
    ContainerMustBeRoot,

    #[error("Container Area cannot have children")]
    ContainerNoChildren,

    #[error("Non-leaf nodes with stock: {}", join_ids(.0))]
    LeafRuleViolation(Vec<LocationId>),

    #[error("Parent change blocked for: {}", join_ids(.0))]
    ParentChangeBlocked(Vec<LocationId>),

    #[error("Cannot delete: {0} (has stock in subtree)")]
    DeleteBlockedStock(LocationId),
}

impl TreeError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadId(_) => "BAD_ID",
            Self::EmptyLabel => "EMPTY_LABEL",
            Self::LabelNotUnique(_) => "LABEL_NOT_UNIQUE",
            Self::IdNotUnique(_) => "ID_NOT_UNIQUE",
            Self::ContainerRequired => "CONTAINER_REQUIRED",
            Self::ContainerMustBeRoot => "CONTAINER_MUST_BE_ROOT",
            Self::ContainerNoChildren => "CONTAINER_NO_CHILDREN",
            Self::LeafRuleViolation(_) => "LEAF_RULE_VIOLATION",
            Self::ParentChangeBlocked(_) => "PARENT_CHANGE_BLOCKED",
            Self::DeleteBlockedStock(_) => "DELETE_BLOCKED_STOCK",
        }
    }
}

fn join_ids(ids: &[LocationId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

/// Operations that turn the stored rows into the posted tree.
///
/// Apply in field order: `creates` are parent-first, `deletes` child-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSavePlan {
    pub creates: Vec<Location>,
    pub updates: Vec<Location>,
    pub deletes: Vec<LocationId>,
}

impl TreeSavePlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Validate `posted` and diff it against `existing`.
///
/// `active` holds locations with non-discarded stock (leaf and parent rules);
/// `occupied` holds locations with any stock row at all (delete rule).
pub fn plan_tree_save(
    posted: &[TreeNodeInput],
    existing: &[Location],
    active: &HashSet<LocationId>,
    occupied: &HashSet<LocationId>,
    root: LocationId,
) -> Result<TreeSavePlan, TreeError> {
    let flat = flatten(posted)?;

    let root_row = flat
        .iter()
        .find(|l| l.id == root)
        .ok_or(TreeError::ContainerRequired)?;
    if root_row.parent_id.is_some() {
        return Err(TreeError::ContainerMustBeRoot);
    }
    if flat.iter().any(|l| l.parent_id == Some(root)) {
        return Err(TreeError::ContainerNoChildren);
    }

    let mut child_counts: HashMap<LocationId, usize> = HashMap::new();
    for loc in &flat {
        if let Some(parent) = loc.parent_id {
            *child_counts.entry(parent).or_default() += 1;
        }
    }
    let mut leaf_violations: Vec<LocationId> = active
        .iter()
        .filter(|id| child_counts.get(*id).copied().unwrap_or(0) > 0)
        .copied()
        .collect();
    if !leaf_violations.is_empty() {
        leaf_violations.sort();
        return Err(TreeError::LeafRuleViolation(leaf_violations));
    }

    let old_by_id: HashMap<LocationId, &Location> = existing.iter().map(|l| (l.id, l)).collect();
    let blocked: Vec<LocationId> = flat
        .iter()
        .filter(|l| active.contains(&l.id))
        .filter(|l| old_by_id.get(&l.id).is_some_and(|old| old.parent_id != l.parent_id))
        .map(|l| l.id)
        .collect();
    if !blocked.is_empty() {
        return Err(TreeError::ParentChangeBlocked(blocked));
    }

    let posted_ids: HashSet<LocationId> = flat.iter().map(|l| l.id).collect();
    let stored = LocationTree::new(existing.iter().cloned());
    let mut deletes = Vec::new();
    for loc in existing.iter().filter(|l| !posted_ids.contains(&l.id)) {
        if stored.subtree(&loc.id).iter().any(|id| occupied.contains(id)) {
            return Err(TreeError::DeleteBlockedStock(loc.id));
        }
        deletes.push(loc.id);
    }
    deletes.sort_by_key(|id| std::cmp::Reverse(stored.path(id).len()));

    let mut plan = TreeSavePlan {
        deletes,
        ..TreeSavePlan::default()
    };
    for loc in flat {
        match old_by_id.get(&loc.id) {
            None => plan.creates.push(loc),
            Some(old) if old.label != loc.label || old.parent_id != loc.parent_id => {
                plan.updates.push(loc)
            }
            Some(_) => {}
        }
    }
    Ok(plan)
}

/// Pre-order flattening with id/label checks. Parents precede children.
fn flatten(posted: &[TreeNodeInput]) -> Result<Vec<Location>, TreeError> {
    let mut out = Vec::new();
    let mut labels = HashSet::new();
    let mut ids = HashSet::new();
    let mut stack: Vec<(&TreeNodeInput, Option<LocationId>)> =
        posted.iter().rev().map(|n| (n, None)).collect();

    while let Some((node, parent)) = stack.pop() {
        let id: LocationId = node
            .id
            .parse()
            .map_err(|_| TreeError::BadId(node.id.clone()))?;
        let label = node.label.trim();
        if label.is_empty() {
            return Err(TreeError::EmptyLabel);
        }
        if !labels.insert(label.to_string()) {
            return Err(TreeError::LabelNotUnique(label.to_string()));
        }
        if !ids.insert(id) {
            return Err(TreeError::IdNotUnique(id));
        }
        out.push(Location::new(id, label, parent));
        stack.extend(node.children.iter().rev().map(|c| (c, Some(id))));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(id: LocationId, label: &str, children: Vec<TreeNodeInput>) -> TreeNodeInput {
        TreeNodeInput {
            id: id.to_string(),
            label: label.to_string(),
            children,
        }
    }

    struct World {
        root: LocationId,
        lab: LocationId,
        shelf: LocationId,
        existing: Vec<Location>,
    }

    fn world() -> World {
        let root = LocationId::new();
        let lab = LocationId::new();
        let shelf = LocationId::new();
        World {
            root,
            lab,
            shelf,
            existing: vec![
                Location::new(root, "Container Area", None),
                Location::new(lab, "Lab", None),
                Location::new(shelf, "Shelf", Some(lab)),
            ],
        }
    }

    fn current_tree(w: &World) -> Vec<TreeNodeInput> {
        vec![
            node(w.root, "Container Area", vec![]),
            node(w.lab, "Lab", vec![node(w.shelf, "Shelf", vec![])]),
        ]
    }

    fn none() -> HashSet<LocationId> {
        HashSet::new()
    }

    #[test]
    fn unchanged_tree_yields_empty_plan() {
        let w = world();
        let plan = plan_tree_save(&current_tree(&w), &w.existing, &none(), &none(), w.root).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn bad_id_is_reported_first() {
        let w = world();
        let mut posted = current_tree(&w);
        posted.push(TreeNodeInput {
            id: "shelf-9".into(),
            label: "Lab".into(),
            children: vec![],
        });
        let err = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap_err();
        assert_eq!(err.code(), "BAD_ID");
    }

    #[test]
    fn duplicate_labels_and_ids_are_rejected() {
        let w = world();
        let mut posted = current_tree(&w);
        posted.push(node(LocationId::new(), "Shelf", vec![]));
        let err = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap_err();
        assert_eq!(err, TreeError::LabelNotUnique("Shelf".into()));

        let mut posted = current_tree(&w);
        posted.push(node(w.shelf, "Other", vec![]));
        let err = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap_err();
        assert_eq!(err, TreeError::IdNotUnique(w.shelf));
    }

    #[test]
    fn root_rules() {
        let w = world();
        let posted = vec![node(w.lab, "Lab", vec![node(w.shelf, "Shelf", vec![])])];
        let err = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap_err();
        assert_eq!(err.code(), "CONTAINER_REQUIRED");

        let posted = vec![node(
            w.lab,
            "Lab",
            vec![node(w.root, "Container Area", vec![]), node(w.shelf, "Shelf", vec![])],
        )];
        let err = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap_err();
        assert_eq!(err.code(), "CONTAINER_MUST_BE_ROOT");

        let posted = vec![
            node(w.root, "Container Area", vec![node(LocationId::new(), "Bin", vec![])]),
            node(w.lab, "Lab", vec![node(w.shelf, "Shelf", vec![])]),
        ];
        let err = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap_err();
        assert_eq!(err.code(), "CONTAINER_NO_CHILDREN");
    }

    #[test]
    fn stocked_node_must_stay_leaf() {
        let w = world();
        let posted = vec![
            node(w.root, "Container Area", vec![]),
            node(
                w.lab,
                "Lab",
                vec![node(w.shelf, "Shelf", vec![node(LocationId::new(), "Bin", vec![])])],
            ),
        ];
        let active = HashSet::from([w.shelf]);
        let err = plan_tree_save(&posted, &w.existing, &active, &active, w.root).unwrap_err();
        assert_eq!(err, TreeError::LeafRuleViolation(vec![w.shelf]));
    }

    #[test]
    fn stocked_node_cannot_move() {
        let w = world();
        let posted = vec![
            node(w.root, "Container Area", vec![]),
            node(w.lab, "Lab", vec![]),
            node(w.shelf, "Shelf", vec![]),
        ];
        let active = HashSet::from([w.shelf]);
        let err = plan_tree_save(&posted, &w.existing, &active, &active, w.root).unwrap_err();
        assert_eq!(err, TreeError::ParentChangeBlocked(vec![w.shelf]));
    }

    #[test]
    fn renaming_a_stocked_node_is_allowed() {
        let w = world();
        let posted = vec![
            node(w.root, "Container Area", vec![]),
            node(w.lab, "Lab", vec![node(w.shelf, "Shelf 1", vec![])]),
        ];
        let active = HashSet::from([w.shelf]);
        let plan = plan_tree_save(&posted, &w.existing, &active, &active, w.root).unwrap();
        assert_eq!(plan.updates, vec![Location::new(w.shelf, "Shelf 1", Some(w.lab))]);
    }

    #[test]
    fn delete_blocked_by_any_stock_in_subtree() {
        let w = world();
        let posted = vec![node(w.root, "Container Area", vec![])];
        let occupied = HashSet::from([w.shelf]);
        let err = plan_tree_save(&posted, &w.existing, &none(), &occupied, w.root).unwrap_err();
        assert_eq!(err, TreeError::DeleteBlockedStock(w.lab));
    }

    #[test]
    fn deletes_children_before_parents_and_creates_parents_first() {
        let w = world();
        let room = LocationId::new();
        let bench = LocationId::new();
        let posted = vec![
            node(w.root, "Container Area", vec![]),
            node(room, "Room", vec![node(bench, "Bench", vec![])]),
        ];
        let plan = plan_tree_save(&posted, &w.existing, &none(), &none(), w.root).unwrap();
        assert_eq!(plan.deletes, vec![w.shelf, w.lab]);
        let created: Vec<_> = plan.creates.iter().map(|l| l.id).collect();
        assert_eq!(created, vec![room, bench]);
        assert_eq!(plan.creates[1].parent_id, Some(room));
    }

    fn arb_forest() -> impl Strategy<Value = Vec<(usize, Option<usize>)>> {
        (1usize..12).prop_flat_map(|n| {
            proptest::collection::vec(proptest::option::of(0usize..12), n).prop_map(|parents| {
                parents
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| (i, p.filter(|p| *p < i)))
                    .collect()
            })
        })
    }

    proptest! {
        #[test]
        fn creates_always_follow_their_parent(shape in arb_forest()) {
            let root = LocationId::new();
            let ids: Vec<LocationId> = shape.iter().map(|_| LocationId::new()).collect();
            fn build(i: usize, shape: &[(usize, Option<usize>)], ids: &[LocationId]) -> TreeNodeInput {
                TreeNodeInput {
                    id: ids[i].to_string(),
                    label: format!("node-{i}"),
                    children: shape
                        .iter()
                        .filter(|(_, p)| *p == Some(i))
                        .map(|(c, _)| build(*c, shape, ids))
                        .collect(),
                }
            }
            let mut posted = vec![TreeNodeInput { id: root.to_string(), label: "root".into(), children: vec![] }];
            posted.extend(shape.iter().filter(|(_, p)| p.is_none()).map(|(i, _)| build(*i, &shape, &ids)));
            let existing = vec![Location::new(root, "root", None)];

            let plan = plan_tree_save(&posted, &existing, &HashSet::new(), &HashSet::new(), root).unwrap();
            prop_assert_eq!(plan.creates.len(), shape.len());
            let mut placed = HashSet::from([root]);
            for loc in &plan.creates {
                if let Some(parent) = loc.parent_id {
                    prop_assert!(placed.contains(&parent));
                }
                placed.insert(loc.id);
            }
        }
    }
}
