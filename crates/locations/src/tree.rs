//! Read-side views over the location rows.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use labinv_core::{LocationId, index_by_id};

use crate::location::Location;

/// Separator used when a location path is rendered as one string.
pub const PATH_SEPARATOR: &str = " / ";

/// Nested tree node, as served to and accepted from the tree editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: LocationId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// A location without children, with its label path from the top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafLocation {
    pub id: LocationId,
    pub label: String,
    pub label_path: Vec<String>,
}

/// Indexed snapshot of all location rows.
#[derive(Debug, Clone, Default)]
pub struct LocationTree {
    nodes: HashMap<LocationId, Location>,
    children: HashMap<LocationId, Vec<LocationId>>,
}

impl LocationTree {
    pub fn new(rows: impl IntoIterator<Item = Location>) -> Self {
        let nodes: HashMap<LocationId, Location> = index_by_id(rows);
        let mut children: HashMap<LocationId, Vec<LocationId>> = HashMap::new();
        for loc in nodes.values() {
            if let Some(parent) = loc.parent_id {
                if nodes.contains_key(&parent) {
                    children.entry(parent).or_default().push(loc.id);
                }
            }
        }
        for kids in children.values_mut() {
            kids.sort_by(|a, b| label_of(&nodes, a).cmp(label_of(&nodes, b)));
        }
        Self { nodes, children }
    }

    pub fn get(&self, id: &LocationId) -> Option<&Location> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &LocationId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: &LocationId) -> &[LocationId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Existing node without children.
    pub fn is_leaf(&self, id: &LocationId) -> bool {
        self.contains(id) && self.children(id).is_empty()
    }

    /// Labels from the top-level ancestor down to `id`. Unknown ids yield an
    /// empty path; a corrupted parent cycle stops at the first repeat.
    pub fn path(&self, id: &LocationId) -> Vec<String> {
        let mut labels = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.nodes.get(id);
        while let Some(loc) = cursor {
            if !seen.insert(loc.id) {
                break;
            }
            labels.push(loc.label.clone());
            cursor = loc.parent_id.and_then(|p| self.nodes.get(&p));
        }
        labels.reverse();
        labels
    }

    pub fn path_text(&self, id: &LocationId) -> String {
        self.path(id).join(PATH_SEPARATOR)
    }

    pub fn path_map(&self) -> HashMap<LocationId, Vec<String>> {
        self.nodes.keys().map(|id| (*id, self.path(id))).collect()
    }

    /// All leaves, ordered by their rendered path.
    pub fn leaves(&self) -> Vec<LeafLocation> {
        let mut out: Vec<LeafLocation> = self
            .nodes
            .values()
            .filter(|l| self.children(&l.id).is_empty())
            .map(|l| LeafLocation {
                id: l.id,
                label: l.label.clone(),
                label_path: self.path(&l.id),
            })
            .collect();
        out.sort_by(|a, b| a.label_path.cmp(&b.label_path));
        out
    }

    /// `id` and every descendant.
    pub fn subtree(&self, id: &LocationId) -> Vec<LocationId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![*id];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            out.push(cur);
            stack.extend(self.children(&cur).iter().copied());
        }
        out
    }

    /// Ids whose rendered path contains `needle` (case-insensitive).
    pub fn matching_paths(&self, needle: &str) -> HashSet<LocationId> {
        let needle = needle.to_lowercase();
        self.nodes
            .keys()
            .filter(|id| self.path(id).join("/").to_lowercase().contains(&needle))
            .copied()
            .collect()
    }

    /// Nested view sorted by label. Nodes whose parent is missing surface at
    /// the top level, and the root is rendered without children.
    pub fn nested(&self, root: LocationId) -> Vec<TreeNode> {
        let mut tops: Vec<&Location> = self
            .nodes
            .values()
            .filter(|l| l.parent_id.is_none_or(|p| !self.nodes.contains_key(&p)))
            .collect();
        tops.sort_by(|a, b| a.label.cmp(&b.label));
        let mut seen = HashSet::new();
        tops.into_iter()
            .map(|l| self.build_node(l, root, &mut seen))
            .collect()
    }

    fn build_node(&self, loc: &Location, root: LocationId, seen: &mut HashSet<LocationId>) -> TreeNode {
        seen.insert(loc.id);
        let mut children = Vec::new();
        if loc.id != root {
            let pending: Vec<&Location> = self
                .children(&loc.id)
                .iter()
                .filter(|c| !seen.contains(*c))
                .filter_map(|c| self.nodes.get(c))
                .collect();
            for child in pending {
                // A sibling's subtree may already have claimed it.
                if !seen.contains(&child.id) {
                    children.push(self.build_node(child, root, seen));
                }
            }
        }
        TreeNode {
            id: loc.id,
            label: loc.label.clone(),
            children,
        }
    }
}

fn label_of<'a>(nodes: &'a HashMap<LocationId, Location>, id: &LocationId) -> &'a str {
    nodes.get(id).map(|l| l.label.as_str()).unwrap_or("")
}
