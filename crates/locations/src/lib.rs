//! Location tree domain module.
//!
//! Locations form a parent-pointer tree with one protected root (the
//! "container area" where new stock lands). Only leaves hold stock, and a node
//! holding active stock may neither gain children nor move.
//!
//! This crate is pure: it builds views over location rows (paths, leaves,
//! nested trees) and turns an edited tree into a validated save plan. Applying
//! the plan is the store's job.

pub mod location;
pub mod plan;
pub mod tree;

pub use location::Location;
pub use plan::{TreeError, TreeNodeInput, TreeSavePlan, plan_tree_save};
pub use tree::{LeafLocation, LocationTree, TreeNode, PATH_SEPARATOR};
